//! Storage for the registers that are swapped out on a mode switch.
//!
//! The ARM7TDMI has 37 physical registers but only 16 visible ones. When the
//! mode changes, the previous mode's R13/R14 (plus R8-R12 when FIQ is
//! involved) are written back here and the new mode's copies are projected
//! into the active [`Registers`](super::registers::Registers) file. The
//! `*_old` fields hold the User/System bank while an exception mode is
//! active.

use serde::{Deserialize, Serialize};

use crate::cpu::psr::Psr;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegisterBank {
    /// R8-R14 of the User/System bank, saved while another bank is live.
    pub r8_old: u32,
    pub r9_old: u32,
    pub r10_old: u32,
    pub r11_old: u32,
    pub r12_old: u32,
    pub r13_old: u32,
    pub r14_old: u32,

    /// FIQ banks R8-R14 so its handler gets scratch registers for free.
    pub r8_fiq: u32,
    pub r9_fiq: u32,
    pub r10_fiq: u32,
    pub r11_fiq: u32,
    pub r12_fiq: u32,
    pub r13_fiq: u32,
    pub r14_fiq: u32,

    pub r13_svc: u32,
    pub r14_svc: u32,

    pub r13_abt: u32,
    pub r14_abt: u32,

    pub r13_irq: u32,
    pub r14_irq: u32,

    pub r13_und: u32,
    pub r14_und: u32,

    pub spsr_fiq: Psr,
    pub spsr_svc: Psr,
    pub spsr_abt: Psr,
    pub spsr_irq: Psr,
    pub spsr_und: Psr,
}
