//! The 16 registers visible at any time. Which physical register backs
//! R8-R14 depends on the operating mode, see
//! [`RegisterBank`](super::register_bank::RegisterBank); the projection into
//! this file happens on every mode switch.
//!
//! R15 is the program counter. Because of the 3-stage pipeline it reads two
//! instructions ahead of the one currently executing (+8 in ARM state, +4 in
//! Thumb state).

use serde::{Deserialize, Serialize};

/// Stack Pointer register index.
pub const REG_SP: usize = 13;

/// Link Register index (return address for subroutines).
pub const REG_LR: usize = 14;

/// Program Counter register index.
pub const REG_PC: usize = 15;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub const fn program_counter(&self) -> u32 {
        self.0[REG_PC]
    }

    pub fn set_program_counter(&mut self, new_value: u32) {
        self.0[REG_PC] = new_value;
    }

    pub fn advance_program_counter(&mut self, amount: u32) {
        self.0[REG_PC] = self.0[REG_PC].wrapping_add(amount);
    }

    #[must_use]
    pub const fn register_at(&self, reg: usize) -> u32 {
        self.0[reg]
    }

    pub fn set_register_at(&mut self, reg: usize, new_value: u32) {
        debug_assert!(reg <= REG_PC, "invalid register index: {reg}");
        self.0[reg] = new_value;
    }
}
