//! The ARM7TDMI core: pipeline, banked registers, mode switches, exception
//! entry and the per-step fetch/decode/execute contract.
//!
//! The two instruction sets live in [`arm`](super::arm) and
//! [`thumb`](super::thumb); this file owns everything they share.

use serde::{Deserialize, Serialize};

use crate::bus::{Access, Bus};
use crate::cpu::arm::{ArmInstruction, ARM_LUT};
use crate::cpu::condition::Condition;
use crate::cpu::mode::Mode;
use crate::cpu::psr::Psr;
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{Registers, REG_LR, REG_PC};
use crate::cpu::thumb::{ThumbInstruction, THUMB_LUT};

/// The exception sources of the core, with their vector addresses and entry
/// modes. Reset is not listed: it tears the whole machine down instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Undefined,
    SoftwareInterrupt,
    PrefetchAbort,
    DataAbort,
    Irq,
    Fiq,
}

impl Exception {
    const fn vector(self) -> u32 {
        match self {
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
            Self::PrefetchAbort => 0x0C,
            Self::DataAbort => 0x10,
            Self::Irq => 0x18,
            Self::Fiq => 0x1C,
        }
    }

    const fn mode(self) -> Mode {
        match self {
            Self::Undefined => Mode::Undefined,
            Self::SoftwareInterrupt => Mode::Supervisor,
            Self::PrefetchAbort | Self::DataAbort => Mode::Abort,
            Self::Irq => Mode::Irq,
            Self::Fiq => Mode::Fiq,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct Arm7tdmi {
    pub bus: Bus,

    pub registers: Registers,
    pub cpsr: Psr,
    /// SPSR of the current mode; the other banks live in `register_bank`.
    pub spsr: Psr,
    pub register_bank: RegisterBank,

    /// The two prefetched opcodes. `pipeline[0]` executes next.
    pipeline: [u32; 2],
    /// Set when the executing instruction redirected control flow.
    flushed: bool,
    /// Access kind of the next opcode fetch.
    sequential_fetch: bool,

    pub halted: bool,
    pub stopped: bool,
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        Self::new(Bus::default())
    }
}

impl Arm7tdmi {
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        let mut cpu = Self {
            bus,
            registers: Registers::default(),
            cpsr: Psr::from(Mode::Supervisor),
            spsr: Psr::from(Mode::Supervisor),
            register_bank: RegisterBank::default(),
            pipeline: [0; 2],
            flushed: false,
            sequential_fetch: false,
            halted: false,
            stopped: false,
        };
        cpu.reset();
        cpu
    }

    /// The Reset exception: Supervisor mode, interrupts masked, execution
    /// restarts at the reset vector.
    pub fn reset(&mut self) {
        self.registers = Registers::default();
        self.register_bank = RegisterBank::default();
        self.cpsr = Psr::from(Mode::Supervisor);
        self.cpsr.set_irq_disable(true);
        self.cpsr.set_fiq_disable(true);
        self.spsr = self.cpsr;
        self.halted = false;
        self.stopped = false;

        self.registers.set_program_counter(0x0000_0000);
        self.flush_pipeline();
        self.bus.take_cycles();
    }

    /// Runs one instruction and returns the cycles it consumed, memory
    /// waits included.
    pub fn step(&mut self) -> u32 {
        self.flushed = false;
        let fetch_access = if self.sequential_fetch { Access::Seq } else { Access::NonSeq };
        self.sequential_fetch = true;

        if self.cpsr.thumb_state() {
            let op_code = self.pipeline[0] as u16;
            self.pipeline[0] = self.pipeline[1];
            self.pipeline[1] =
                u32::from(self.bus.fetch_half(self.registers.program_counter(), fetch_access));

            self.execute_thumb(op_code);

            if !self.flushed {
                self.registers.advance_program_counter(2);
            }
        } else {
            let op_code = self.pipeline[0];
            self.pipeline[0] = self.pipeline[1];
            self.pipeline[1] = self.bus.fetch_word(self.registers.program_counter(), fetch_access);

            self.execute_arm(op_code);

            if !self.flushed {
                self.registers.advance_program_counter(4);
            }
        }

        if let Some(stop) = self.bus.take_halt_request() {
            if stop {
                self.stopped = true;
            } else {
                self.halted = true;
            }
        }

        self.bus.take_cycles()
    }

    pub fn execute_arm(&mut self, op_code: u32) {
        let condition = Condition::from((op_code >> 28) as u8);
        if !self.cpsr.matches(condition) {
            return;
        }

        match ARM_LUT[crate::cpu::arm::lut_index(op_code)] {
            ArmInstruction::DataProcessing => self.arm_data_processing(op_code),
            ArmInstruction::Mrs => self.arm_mrs(op_code),
            ArmInstruction::Msr => self.arm_msr(op_code),
            ArmInstruction::Multiply => self.arm_multiply(op_code),
            ArmInstruction::MultiplyLong => self.arm_multiply_long(op_code),
            ArmInstruction::SingleDataSwap => self.arm_single_data_swap(op_code),
            ArmInstruction::BranchAndExchange => self.arm_branch_and_exchange(op_code),
            ArmInstruction::HalfwordDataTransfer => self.arm_halfword_data_transfer(op_code),
            ArmInstruction::SingleDataTransfer => self.arm_single_data_transfer(op_code),
            ArmInstruction::BlockDataTransfer => self.arm_block_data_transfer(op_code),
            ArmInstruction::Branch => self.arm_branch(op_code),
            ArmInstruction::SoftwareInterrupt => self.exception(Exception::SoftwareInterrupt),
            ArmInstruction::Coprocessor | ArmInstruction::Undefined => {
                self.exception(Exception::Undefined);
            }
        }
    }

    pub fn execute_thumb(&mut self, op_code: u16) {
        match THUMB_LUT[crate::cpu::thumb::lut_index(op_code)] {
            ThumbInstruction::MoveShiftedRegister => self.thumb_move_shifted_register(op_code),
            ThumbInstruction::AddSubtract => self.thumb_add_subtract(op_code),
            ThumbInstruction::MoveCompareAddSubImm => self.thumb_move_compare_add_sub_imm(op_code),
            ThumbInstruction::AluOperation => self.thumb_alu_operation(op_code),
            ThumbInstruction::HiRegisterOpBx => self.thumb_hi_register_op_bx(op_code),
            ThumbInstruction::PcRelativeLoad => self.thumb_pc_relative_load(op_code),
            ThumbInstruction::LoadStoreRegOffset => self.thumb_load_store_reg_offset(op_code),
            ThumbInstruction::LoadStoreSignExt => self.thumb_load_store_sign_ext(op_code),
            ThumbInstruction::LoadStoreImmOffset => self.thumb_load_store_imm_offset(op_code),
            ThumbInstruction::LoadStoreHalfword => self.thumb_load_store_halfword(op_code),
            ThumbInstruction::SpRelativeLoadStore => self.thumb_sp_relative_load_store(op_code),
            ThumbInstruction::LoadAddress => self.thumb_load_address(op_code),
            ThumbInstruction::AddOffsetSp => self.thumb_add_offset_sp(op_code),
            ThumbInstruction::PushPopRegisters => self.thumb_push_pop_registers(op_code),
            ThumbInstruction::MultipleLoadStore => self.thumb_multiple_load_store(op_code),
            ThumbInstruction::ConditionalBranch => self.thumb_conditional_branch(op_code),
            ThumbInstruction::SoftwareInterrupt => self.exception(Exception::SoftwareInterrupt),
            ThumbInstruction::UnconditionalBranch => self.thumb_unconditional_branch(op_code),
            ThumbInstruction::LongBranchLink => self.thumb_long_branch_link(op_code),
            ThumbInstruction::Undefined => self.exception(Exception::Undefined),
        }
    }

    /// Refills both pipeline stages from the current PC. After this the PC
    /// reads two instructions ahead again.
    pub fn flush_pipeline(&mut self) {
        if self.cpsr.thumb_state() {
            let target = self.registers.program_counter() & !1;
            self.pipeline[0] = u32::from(self.bus.fetch_half(target, Access::NonSeq));
            self.pipeline[1] = u32::from(self.bus.fetch_half(target.wrapping_add(2), Access::Seq));
            self.registers.set_program_counter(target.wrapping_add(4));
        } else {
            let target = self.registers.program_counter() & !3;
            self.pipeline[0] = self.bus.fetch_word(target, Access::NonSeq);
            self.pipeline[1] = self.bus.fetch_word(target.wrapping_add(4), Access::Seq);
            self.registers.set_program_counter(target.wrapping_add(8));
        }
        self.flushed = true;
        self.sequential_fetch = true;
    }

    /// Register write that honours R15 semantics: a PC write redirects
    /// control flow.
    pub(crate) fn write_register(&mut self, rd: usize, value: u32) {
        self.registers.set_register_at(rd, value);
        if rd == REG_PC {
            self.flush_pipeline();
        }
    }

    /// Enters an exception: banks the registers of the target mode, saves
    /// CPSR into its SPSR, masks IRQs and branches to the vector in ARM
    /// state.
    pub fn exception(&mut self, exception: Exception) {
        let mode = exception.mode();
        let thumb = self.cpsr.thumb_state();
        let pc = self.registers.program_counter();

        // LR is chosen so the canonical return sequence of each handler
        // resumes at the right spot.
        let return_address = match exception {
            Exception::SoftwareInterrupt | Exception::Undefined => {
                pc.wrapping_sub(if thumb { 2 } else { 4 })
            }
            Exception::Irq | Exception::Fiq | Exception::PrefetchAbort => {
                pc.wrapping_sub(if thumb { 0 } else { 4 })
            }
            Exception::DataAbort => pc.wrapping_sub(if thumb { 0 } else { 4 }).wrapping_add(4),
        };

        let old_cpsr = self.cpsr;
        self.swap_mode(mode);
        self.cpsr.set_mode(mode);
        self.spsr = old_cpsr;

        self.registers.set_register_at(REG_LR, return_address);
        self.cpsr.set_thumb_state(false);
        self.cpsr.set_irq_disable(true);
        if exception == Exception::Fiq {
            self.cpsr.set_fiq_disable(true);
        }

        self.registers.set_program_counter(exception.vector());
        self.flush_pipeline();
    }

    /// Restores CPSR from the current mode's SPSR (the tail of `MOVS PC`,
    /// `SUBS PC, LR` and LDM with the S bit).
    pub(crate) fn restore_spsr(&mut self) {
        let spsr = self.spsr;
        self.swap_mode(spsr.mode());
        self.cpsr = spsr;
    }

    /// Projects the banked registers of `new_mode` into the active register
    /// file, writing the outgoing mode's bank out first. The CPSR mode bits
    /// are not touched.
    pub fn swap_mode(&mut self, new_mode: Mode) {
        let old_mode = self.cpsr.mode();
        if old_mode == new_mode {
            return;
        }

        // Write the outgoing bank out.
        match old_mode {
            Mode::Fiq => {
                self.register_bank.r8_fiq = self.registers.register_at(8);
                self.register_bank.r9_fiq = self.registers.register_at(9);
                self.register_bank.r10_fiq = self.registers.register_at(10);
                self.register_bank.r11_fiq = self.registers.register_at(11);
                self.register_bank.r12_fiq = self.registers.register_at(12);
                self.register_bank.r13_fiq = self.registers.register_at(13);
                self.register_bank.r14_fiq = self.registers.register_at(14);
                self.register_bank.spsr_fiq = self.spsr;

                self.registers.set_register_at(8, self.register_bank.r8_old);
                self.registers.set_register_at(9, self.register_bank.r9_old);
                self.registers.set_register_at(10, self.register_bank.r10_old);
                self.registers.set_register_at(11, self.register_bank.r11_old);
                self.registers.set_register_at(12, self.register_bank.r12_old);
            }
            Mode::User | Mode::System => {
                self.register_bank.r13_old = self.registers.register_at(13);
                self.register_bank.r14_old = self.registers.register_at(14);
            }
            Mode::Supervisor => {
                self.register_bank.r13_svc = self.registers.register_at(13);
                self.register_bank.r14_svc = self.registers.register_at(14);
                self.register_bank.spsr_svc = self.spsr;
            }
            Mode::Abort => {
                self.register_bank.r13_abt = self.registers.register_at(13);
                self.register_bank.r14_abt = self.registers.register_at(14);
                self.register_bank.spsr_abt = self.spsr;
            }
            Mode::Irq => {
                self.register_bank.r13_irq = self.registers.register_at(13);
                self.register_bank.r14_irq = self.registers.register_at(14);
                self.register_bank.spsr_irq = self.spsr;
            }
            Mode::Undefined => {
                self.register_bank.r13_und = self.registers.register_at(13);
                self.register_bank.r14_und = self.registers.register_at(14);
                self.register_bank.spsr_und = self.spsr;
            }
        }

        // Load the incoming one.
        match new_mode {
            Mode::Fiq => {
                self.register_bank.r8_old = self.registers.register_at(8);
                self.register_bank.r9_old = self.registers.register_at(9);
                self.register_bank.r10_old = self.registers.register_at(10);
                self.register_bank.r11_old = self.registers.register_at(11);
                self.register_bank.r12_old = self.registers.register_at(12);

                self.registers.set_register_at(8, self.register_bank.r8_fiq);
                self.registers.set_register_at(9, self.register_bank.r9_fiq);
                self.registers.set_register_at(10, self.register_bank.r10_fiq);
                self.registers.set_register_at(11, self.register_bank.r11_fiq);
                self.registers.set_register_at(12, self.register_bank.r12_fiq);
                self.registers.set_register_at(13, self.register_bank.r13_fiq);
                self.registers.set_register_at(14, self.register_bank.r14_fiq);
                self.spsr = self.register_bank.spsr_fiq;
            }
            Mode::User | Mode::System => {
                self.registers.set_register_at(13, self.register_bank.r13_old);
                self.registers.set_register_at(14, self.register_bank.r14_old);
            }
            Mode::Supervisor => {
                self.registers.set_register_at(13, self.register_bank.r13_svc);
                self.registers.set_register_at(14, self.register_bank.r14_svc);
                self.spsr = self.register_bank.spsr_svc;
            }
            Mode::Abort => {
                self.registers.set_register_at(13, self.register_bank.r13_abt);
                self.registers.set_register_at(14, self.register_bank.r14_abt);
                self.spsr = self.register_bank.spsr_abt;
            }
            Mode::Irq => {
                self.registers.set_register_at(13, self.register_bank.r13_irq);
                self.registers.set_register_at(14, self.register_bank.r14_irq);
                self.spsr = self.register_bank.spsr_irq;
            }
            Mode::Undefined => {
                self.registers.set_register_at(13, self.register_bank.r13_und);
                self.registers.set_register_at(14, self.register_bank.r14_und);
                self.spsr = self.register_bank.spsr_und;
            }
        }
    }

    /// Reads a User/System bank register regardless of the current mode
    /// (LDM/STM with the S bit and no PC in the list).
    pub(crate) fn user_register(&self, index: usize) -> u32 {
        match (self.cpsr.mode(), index) {
            (Mode::User | Mode::System, _) => self.registers.register_at(index),
            (Mode::Fiq, 8) => self.register_bank.r8_old,
            (Mode::Fiq, 9) => self.register_bank.r9_old,
            (Mode::Fiq, 10) => self.register_bank.r10_old,
            (Mode::Fiq, 11) => self.register_bank.r11_old,
            (Mode::Fiq, 12) => self.register_bank.r12_old,
            (_, 13) => self.register_bank.r13_old,
            (_, 14) => self.register_bank.r14_old,
            _ => self.registers.register_at(index),
        }
    }

    pub(crate) fn set_user_register(&mut self, index: usize, value: u32) {
        match (self.cpsr.mode(), index) {
            (Mode::User | Mode::System, _) => self.registers.set_register_at(index, value),
            (Mode::Fiq, 8) => self.register_bank.r8_old = value,
            (Mode::Fiq, 9) => self.register_bank.r9_old = value,
            (Mode::Fiq, 10) => self.register_bank.r10_old = value,
            (Mode::Fiq, 11) => self.register_bank.r11_old = value,
            (Mode::Fiq, 12) => self.register_bank.r12_old = value,
            (_, 13) => self.register_bank.r13_old = value,
            (_, 14) => self.register_bank.r14_old = value,
            _ => self.registers.set_register_at(index, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_enters_supervisor_with_interrupts_masked() {
        let cpu = Arm7tdmi::default();
        assert_eq!(cpu.cpsr.mode(), Mode::Supervisor);
        assert!(cpu.cpsr.irq_disable());
        assert!(cpu.cpsr.fiq_disable());
        assert!(!cpu.cpsr.thumb_state());
        // PC reads two instructions ahead of the reset vector.
        assert_eq!(cpu.registers.program_counter(), 8);
    }

    #[test]
    fn mode_roundtrip_preserves_banked_registers() {
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_mode(Mode::System);
        cpu.registers.set_register_at(13, 0x0300_7F00);
        cpu.registers.set_register_at(14, 0x0800_0123);

        cpu.swap_mode(Mode::Irq);
        cpu.cpsr.set_mode(Mode::Irq);
        cpu.registers.set_register_at(13, 0x0300_7FA0);
        cpu.registers.set_register_at(14, 0xDEAD_BEEF);

        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_mode(Mode::System);
        assert_eq!(cpu.registers.register_at(13), 0x0300_7F00);
        assert_eq!(cpu.registers.register_at(14), 0x0800_0123);

        cpu.swap_mode(Mode::Irq);
        assert_eq!(cpu.registers.register_at(13), 0x0300_7FA0);
        assert_eq!(cpu.registers.register_at(14), 0xDEAD_BEEF);
    }

    #[test]
    fn exception_mode_spsr_banks_survive_a_roundtrip() {
        let mut cpu = Arm7tdmi::default();
        // In Supervisor after reset; give its SPSR a recognizable value.
        let mut marker = Psr::from(Mode::User);
        marker.set_carry_flag(true);
        cpu.spsr = marker;

        cpu.swap_mode(Mode::Irq);
        cpu.cpsr.set_mode(Mode::Irq);
        cpu.spsr = Psr::from(Mode::System);

        cpu.swap_mode(Mode::Supervisor);
        cpu.cpsr.set_mode(Mode::Supervisor);
        assert_eq!(u32::from(cpu.spsr), u32::from(marker));

        cpu.swap_mode(Mode::Irq);
        assert_eq!(u32::from(cpu.spsr), u32::from(Psr::from(Mode::System)));
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_mode(Mode::System);
        for index in 8..=12 {
            cpu.registers.set_register_at(index, index as u32 * 0x111);
        }

        cpu.swap_mode(Mode::Fiq);
        cpu.cpsr.set_mode(Mode::Fiq);
        for index in 8..=12 {
            cpu.registers.set_register_at(index, 0xF000 + index as u32);
        }

        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_mode(Mode::System);
        for index in 8..=12 {
            assert_eq!(cpu.registers.register_at(index), index as u32 * 0x111);
        }
    }

    #[test]
    fn swi_enters_supervisor_and_saves_cpsr() {
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_mode(Mode::System);
        cpu.cpsr.set_irq_disable(false);
        cpu.cpsr.set_carry_flag(true);
        let old_cpsr: u32 = cpu.cpsr.into();

        // Pretend we're executing at 0x0800_0000 (PC = +8).
        cpu.registers.set_program_counter(0x0800_0008);
        cpu.exception(Exception::SoftwareInterrupt);

        assert_eq!(cpu.cpsr.mode(), Mode::Supervisor);
        assert!(cpu.cpsr.irq_disable());
        assert!(!cpu.cpsr.thumb_state());
        // LR points at the instruction after the SWI.
        assert_eq!(cpu.registers.register_at(REG_LR), 0x0800_0004);
        assert_eq!(u32::from(cpu.spsr), old_cpsr);
        // Vector is 0x08; the PC reads two instructions further.
        assert_eq!(cpu.registers.program_counter(), 0x10);
    }

    #[test]
    fn irq_return_address_allows_subs_pc_lr_minus_4() {
        let mut cpu = Arm7tdmi::default();
        cpu.registers.set_program_counter(0x0800_0108); // executing 0x0800_0100
        cpu.exception(Exception::Irq);
        assert_eq!(cpu.cpsr.mode(), Mode::Irq);
        assert_eq!(cpu.registers.register_at(REG_LR), 0x0800_0104);

        // Thumb: executing 0x0800_0100, PC = +4.
        let mut cpu = Arm7tdmi::default();
        cpu.cpsr.set_thumb_state(true);
        cpu.registers.set_program_counter(0x0800_0104);
        cpu.exception(Exception::Irq);
        assert_eq!(cpu.registers.register_at(REG_LR), 0x0800_0104);
        // Exceptions always execute in ARM state.
        assert!(!cpu.cpsr.thumb_state());
    }

    #[test]
    fn restore_spsr_returns_to_the_interrupted_mode() {
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_mode(Mode::System);
        cpu.cpsr.set_zero_flag(true);
        cpu.registers.set_register_at(13, 0xCAFE);

        cpu.registers.set_program_counter(0x0800_0008);
        cpu.exception(Exception::Irq);
        assert_ne!(cpu.registers.register_at(13), 0xCAFE);

        cpu.restore_spsr();
        assert_eq!(cpu.cpsr.mode(), Mode::System);
        assert!(cpu.cpsr.zero_flag());
        assert_eq!(cpu.registers.register_at(13), 0xCAFE);
    }
}
