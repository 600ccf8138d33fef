//! # ARM7TDMI Operating Modes
//!
//! The processor runs in one of seven modes, stored in CPSR bits 0-4. Five of
//! them are entered automatically by exceptions:
//!
//! | Exception          | Mode       | Vector | I | F |
//! |--------------------|------------|--------|---|---|
//! | Reset              | Supervisor | 0x00   | 1 | 1 |
//! | Undefined          | Undefined  | 0x04   | 1 | - |
//! | Software Interrupt | Supervisor | 0x08   | 1 | - |
//! | Prefetch Abort     | Abort      | 0x0C   | 1 | - |
//! | Data Abort         | Abort      | 0x10   | 1 | - |
//! | IRQ                | Irq        | 0x18   | 1 | - |
//! | FIQ                | Fiq        | 0x1C   | 1 | 1 |
//!
//! Each exception mode banks its own R13/R14 (FIQ also banks R8-R12) so a
//! handler never corrupts the interrupted program's stack pointer or return
//! address, see [`RegisterBank`](super::register_bank::RegisterBank).

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Mode {
    /// Normal program execution, the only unprivileged mode.
    User = 0b10000,
    /// Fast interrupt handling. Unused on the GBA (no FIQ source is wired).
    Fiq = 0b10001,
    /// Hardware interrupt handling (vblank, hblank, timers, DMA, keypad).
    Irq = 0b10010,
    /// Entered via Reset or SWI; the BIOS call handlers run here.
    Supervisor = 0b10011,
    /// Entered after a failed memory access.
    Abort = 0b10111,
    /// Entered when the CPU meets an instruction it cannot decode.
    Undefined = 0b11011,
    /// Privileged mode sharing the User register bank.
    System = 0b11111,
}

impl From<Mode> for u32 {
    fn from(mode: Mode) -> Self {
        mode as Self
    }
}

impl TryFrom<u32> for Mode {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(()),
        }
    }
}
