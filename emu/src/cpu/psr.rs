//! # Program Status Registers (CPSR and SPSR)
//!
//! ```text
//! 31 30 29 28 27      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```
//!
//! The condition flags (bits 28-31) gate conditional execution, see
//! [`Condition`](super::condition::Condition). The control bits hold the
//! operating [`Mode`], the ARM/Thumb state bit and the two interrupt masks.
//! Each exception mode owns an SPSR that receives a copy of CPSR on entry.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::condition::Condition;
use crate::cpu::mode::Mode;

/// A CPSR or SPSR value, wrapping the raw `u32` with typed accessors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    /// Whether an instruction with condition field `cond` executes under the
    /// current flags.
    #[must_use]
    pub fn matches(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),
            NE => !self.zero_flag(),
            CS => self.carry_flag(),
            CC => !self.carry_flag(),
            MI => self.sign_flag(),
            PL => !self.sign_flag(),
            VS => self.overflow_flag(),
            VC => !self.overflow_flag(),
            HI => self.carry_flag() && !self.zero_flag(),
            LS => !self.carry_flag() || self.zero_flag(),
            GE => self.sign_flag() == self.overflow_flag(),
            LT => self.sign_flag() != self.overflow_flag(),
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()),
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()),
            AL => true,
            NV => false,
        }
    }

    /// N => Bit 31, set when the result is negative.
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z => Bit 30, set when the result is zero.
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C => Bit 29, carry out / not-borrow.
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V => Bit 28, signed overflow.
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// I => Bit 7, 1 disables IRQs.
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F => Bit 6, 1 disables FIQs.
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T => Bit 5, 0 = ARM state, 1 = Thumb state.
    #[must_use]
    pub fn thumb_state(self) -> bool {
        self.0.get_bit(5)
    }

    /// M4-M0 => Bits 4-0.
    ///
    /// The BIOS occasionally writes reserved mode patterns into SPSR; those
    /// fall back to Supervisor rather than tearing down emulation.
    #[must_use]
    pub fn mode(self) -> Mode {
        Mode::try_from(self.0 & 0b11111).unwrap_or_else(|_| {
            tracing::debug!("invalid mode bits {:#07b} in PSR {:#010X}", self.0 & 0b11111, self.0);
            Mode::Supervisor
        })
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    /// Sets N and Z from an ALU result.
    pub fn set_nz(&mut self, result: u32) {
        self.set_sign_flag(result.get_bit(31));
        self.set_zero_flag(result == 0);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    pub fn set_thumb_state(&mut self, value: bool) {
        self.0.set_bit(5, value);
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.0 = (self.0 & !0b11111) | mode as u32;
    }
}

impl From<Mode> for Psr {
    fn from(mode: Mode) -> Self {
        let mut psr = Self(0);
        psr.set_mode(mode);
        psr
    }
}

impl From<u32> for Psr {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Psr> for u32 {
    fn from(psr: Psr) -> Self {
        psr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_roundtrip() {
        let mut cpsr = Psr::default();
        cpsr.set_sign_flag(true);
        cpsr.set_carry_flag(true);
        assert!(cpsr.sign_flag());
        assert!(!cpsr.zero_flag());
        assert!(cpsr.carry_flag());
        assert!(!cpsr.overflow_flag());

        cpsr.set_sign_flag(false);
        assert!(!cpsr.sign_flag());
        assert!(cpsr.carry_flag());
    }

    #[test]
    fn nz_from_result() {
        let mut cpsr = Psr::default();
        cpsr.set_nz(0);
        assert!(cpsr.zero_flag());
        assert!(!cpsr.sign_flag());

        cpsr.set_nz(0x8000_0000);
        assert!(!cpsr.zero_flag());
        assert!(cpsr.sign_flag());
    }

    #[test]
    fn mode_bits() {
        let mut cpsr = Psr::default();
        cpsr.set_mode(Mode::Irq);
        assert_eq!(cpsr.mode(), Mode::Irq);
        assert_eq!(u32::from(cpsr) & 0b11111, 0b10010);

        cpsr.set_mode(Mode::System);
        assert_eq!(cpsr.mode(), Mode::System);
    }

    #[test]
    fn invalid_mode_falls_back_to_supervisor() {
        let cpsr = Psr::from(0b00000_u32);
        assert_eq!(cpsr.mode(), Mode::Supervisor);
    }

    #[test]
    fn state_and_interrupt_bits() {
        let mut cpsr = Psr::default();
        cpsr.set_thumb_state(true);
        cpsr.set_irq_disable(true);
        assert!(cpsr.thumb_state());
        assert!(cpsr.irq_disable());
        assert!(!cpsr.fiq_disable());
    }

    #[test]
    fn condition_predicates() {
        let mut cpsr = Psr::default();
        cpsr.set_zero_flag(true);
        assert!(cpsr.matches(Condition::EQ));
        assert!(!cpsr.matches(Condition::NE));
        assert!(cpsr.matches(Condition::LS));
        assert!(cpsr.matches(Condition::AL));
        assert!(!cpsr.matches(Condition::NV));

        cpsr.set_zero_flag(false);
        cpsr.set_sign_flag(true);
        cpsr.set_overflow_flag(false);
        assert!(cpsr.matches(Condition::LT));
        assert!(!cpsr.matches(Condition::GE));
    }
}
