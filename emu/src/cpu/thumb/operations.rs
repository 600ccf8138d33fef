//! Execution of the 19 Thumb formats.

use crate::bitwise::{sign_extend, Bits};
use crate::bus::Access;
use crate::cpu::alu::{self, shift_imm, shift_reg, ShiftKind};
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::condition::Condition;
use crate::cpu::registers::{REG_LR, REG_PC, REG_SP};

impl Arm7tdmi {
    /// Format 1: LSL/LSR/ASR by immediate.
    pub(crate) fn thumb_move_shifted_register(&mut self, op_code: u16) {
        let kind = ShiftKind::from(u32::from(op_code.get_bits(11..=12)));
        let amount = u32::from(op_code.get_bits(6..=10));
        let rs = usize::from(op_code.get_bits(3..=5));
        let rd = usize::from(op_code.get_bits(0..=2));

        let out = shift_imm(kind, amount, self.registers.register_at(rs), self.cpsr.carry_flag());
        self.registers.set_register_at(rd, out.value);
        self.cpsr.set_nz(out.value);
        self.cpsr.set_carry_flag(out.carry);
    }

    /// Format 2: ADD/SUB with a register or 3-bit immediate.
    pub(crate) fn thumb_add_subtract(&mut self, op_code: u16) {
        let immediate = op_code.get_bit(10);
        let subtract = op_code.get_bit(9);
        let rn_or_imm = u32::from(op_code.get_bits(6..=8));
        let rs = usize::from(op_code.get_bits(3..=5));
        let rd = usize::from(op_code.get_bits(0..=2));

        let operand1 = self.registers.register_at(rs);
        let operand2 = if immediate {
            rn_or_imm
        } else {
            self.registers.register_at(rn_or_imm as usize)
        };

        let result = if subtract {
            alu::sub(operand1, operand2)
        } else {
            alu::add(operand1, operand2)
        };

        self.registers.set_register_at(rd, result.value);
        self.cpsr.set_nz(result.value);
        self.cpsr.set_carry_flag(result.carry);
        self.cpsr.set_overflow_flag(result.overflow);
    }

    /// Format 3: MOV/CMP/ADD/SUB with an 8-bit immediate.
    pub(crate) fn thumb_move_compare_add_sub_imm(&mut self, op_code: u16) {
        let operation = op_code.get_bits(11..=12);
        let rd = usize::from(op_code.get_bits(8..=10));
        let immediate = u32::from(op_code.get_bits(0..=7));
        let current = self.registers.register_at(rd);

        match operation {
            0b00 => {
                self.registers.set_register_at(rd, immediate);
                self.cpsr.set_nz(immediate);
            }
            0b01 => {
                let result = alu::sub(current, immediate);
                self.cpsr.set_nz(result.value);
                self.cpsr.set_carry_flag(result.carry);
                self.cpsr.set_overflow_flag(result.overflow);
            }
            0b10 | 0b11 => {
                let result = if operation == 0b10 {
                    alu::add(current, immediate)
                } else {
                    alu::sub(current, immediate)
                };
                self.registers.set_register_at(rd, result.value);
                self.cpsr.set_nz(result.value);
                self.cpsr.set_carry_flag(result.carry);
                self.cpsr.set_overflow_flag(result.overflow);
            }
            _ => unreachable!(),
        }
    }

    /// Format 4: the register-to-register ALU block.
    pub(crate) fn thumb_alu_operation(&mut self, op_code: u16) {
        let operation = op_code.get_bits(6..=9);
        let rs = usize::from(op_code.get_bits(3..=5));
        let rd = usize::from(op_code.get_bits(0..=2));

        let operand1 = self.registers.register_at(rd);
        let operand2 = self.registers.register_at(rs);
        let carry_in = self.cpsr.carry_flag();

        let result = match operation {
            0x0 => Some(self.thumb_logical(operand1 & operand2, carry_in)),
            0x1 => Some(self.thumb_logical(operand1 ^ operand2, carry_in)),
            0x2 | 0x3 | 0x4 | 0x7 => {
                // Shifts by register consume an internal cycle.
                let kind = match operation {
                    0x2 => ShiftKind::Lsl,
                    0x3 => ShiftKind::Lsr,
                    0x4 => ShiftKind::Asr,
                    _ => ShiftKind::Ror,
                };
                self.bus.idle();
                let out = shift_reg(kind, operand2 & 0xFF, operand1, carry_in);
                self.cpsr.set_nz(out.value);
                self.cpsr.set_carry_flag(out.carry);
                Some(out.value)
            }
            0x5 => Some(self.thumb_arithmetic(alu::adc(operand1, operand2, carry_in))),
            0x6 => Some(self.thumb_arithmetic(alu::sbc(operand1, operand2, carry_in))),
            0x8 => {
                self.thumb_logical(operand1 & operand2, carry_in);
                None
            }
            0x9 => Some(self.thumb_arithmetic(alu::sub(0, operand2))),
            0xA => {
                self.thumb_arithmetic(alu::sub(operand1, operand2));
                None
            }
            0xB => {
                self.thumb_arithmetic(alu::add(operand1, operand2));
                None
            }
            0xC => Some(self.thumb_logical(operand1 | operand2, carry_in)),
            0xD => {
                let value = operand1.wrapping_mul(operand2);
                self.bus.idle();
                self.cpsr.set_nz(value);
                Some(value)
            }
            0xE => Some(self.thumb_logical(operand1 & !operand2, carry_in)),
            _ => Some(self.thumb_logical(!operand2, carry_in)),
        };

        if let Some(value) = result {
            self.registers.set_register_at(rd, value);
        }
    }

    fn thumb_logical(&mut self, value: u32, carry: bool) -> u32 {
        self.cpsr.set_nz(value);
        self.cpsr.set_carry_flag(carry);
        value
    }

    fn thumb_arithmetic(&mut self, result: alu::AluResult) -> u32 {
        self.cpsr.set_nz(result.value);
        self.cpsr.set_carry_flag(result.carry);
        self.cpsr.set_overflow_flag(result.overflow);
        result.value
    }

    /// Format 5: ADD/CMP/MOV on the high registers, plus BX.
    pub(crate) fn thumb_hi_register_op_bx(&mut self, op_code: u16) {
        let operation = op_code.get_bits(8..=9);
        let rs = usize::from(op_code.get_bits(3..=6));
        let rd = usize::from(op_code.get_bits(0..=2)) | (usize::from(op_code.get_bit(7)) << 3);

        let source = self.registers.register_at(rs);

        match operation {
            0b00 => {
                let value = self.registers.register_at(rd).wrapping_add(source);
                if rd == REG_PC {
                    self.registers.set_program_counter(value);
                    self.flush_pipeline();
                } else {
                    self.registers.set_register_at(rd, value);
                }
            }
            0b01 => {
                let result = alu::sub(self.registers.register_at(rd), source);
                self.thumb_arithmetic(result);
            }
            0b10 => {
                if rd == REG_PC {
                    self.registers.set_program_counter(source);
                    self.flush_pipeline();
                } else {
                    self.registers.set_register_at(rd, source);
                }
            }
            _ => {
                // BX: bit 0 of the target selects the state.
                self.cpsr.set_thumb_state(source.get_bit(0));
                self.registers.set_program_counter(source);
                self.flush_pipeline();
            }
        }
    }

    /// Format 6: LDR rd, [PC, #imm].
    pub(crate) fn thumb_pc_relative_load(&mut self, op_code: u16) {
        let rd = usize::from(op_code.get_bits(8..=10));
        let offset = u32::from(op_code.get_bits(0..=7)) * 4;

        // The PC reads word-aligned here.
        let address = (self.registers.program_counter() & !2).wrapping_add(offset);
        let value = self.bus.read_word(address, Access::NonSeq);
        self.bus.idle();
        self.registers.set_register_at(rd, value);
    }

    /// Format 7: LDR/STR with a register offset.
    pub(crate) fn thumb_load_store_reg_offset(&mut self, op_code: u16) {
        let load = op_code.get_bit(11);
        let byte = op_code.get_bit(10);
        let ro = usize::from(op_code.get_bits(6..=8));
        let rb = usize::from(op_code.get_bits(3..=5));
        let rd = usize::from(op_code.get_bits(0..=2));

        let address = self
            .registers
            .register_at(rb)
            .wrapping_add(self.registers.register_at(ro));

        if load {
            let value = if byte {
                u32::from(self.bus.read_byte(address, Access::NonSeq))
            } else {
                self.bus.read_word(address, Access::NonSeq)
            };
            self.bus.idle();
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd);
            if byte {
                self.bus.write_byte(address, value as u8, Access::NonSeq);
            } else {
                self.bus.write_word(address, value, Access::NonSeq);
            }
        }
    }

    /// Format 8: sign/halfword transfers with a register offset.
    pub(crate) fn thumb_load_store_sign_ext(&mut self, op_code: u16) {
        let h = op_code.get_bit(11);
        let sign = op_code.get_bit(10);
        let ro = usize::from(op_code.get_bits(6..=8));
        let rb = usize::from(op_code.get_bits(3..=5));
        let rd = usize::from(op_code.get_bits(0..=2));

        let address = self
            .registers
            .register_at(rb)
            .wrapping_add(self.registers.register_at(ro));

        match (sign, h) {
            (false, false) => {
                let value = self.registers.register_at(rd);
                self.bus.write_half(address, value as u16, Access::NonSeq);
            }
            (false, true) => {
                let value = self.bus.read_half(address, Access::NonSeq);
                self.bus.idle();
                self.registers.set_register_at(rd, value);
            }
            (true, false) => {
                let value = sign_extend(u32::from(self.bus.read_byte(address, Access::NonSeq)), 8);
                self.bus.idle();
                self.registers.set_register_at(rd, value);
            }
            (true, true) => {
                let value = if address & 1 != 0 {
                    sign_extend(u32::from(self.bus.read_byte(address, Access::NonSeq)), 8)
                } else {
                    sign_extend(self.bus.read_half(address, Access::NonSeq) & 0xFFFF, 16)
                };
                self.bus.idle();
                self.registers.set_register_at(rd, value);
            }
        }
    }

    /// Format 9: LDR/STR with a 5-bit immediate offset.
    pub(crate) fn thumb_load_store_imm_offset(&mut self, op_code: u16) {
        let byte = op_code.get_bit(12);
        let load = op_code.get_bit(11);
        let offset = u32::from(op_code.get_bits(6..=10));
        let rb = usize::from(op_code.get_bits(3..=5));
        let rd = usize::from(op_code.get_bits(0..=2));

        let offset = if byte { offset } else { offset * 4 };
        let address = self.registers.register_at(rb).wrapping_add(offset);

        if load {
            let value = if byte {
                u32::from(self.bus.read_byte(address, Access::NonSeq))
            } else {
                self.bus.read_word(address, Access::NonSeq)
            };
            self.bus.idle();
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd);
            if byte {
                self.bus.write_byte(address, value as u8, Access::NonSeq);
            } else {
                self.bus.write_word(address, value, Access::NonSeq);
            }
        }
    }

    /// Format 10: LDRH/STRH with a 5-bit immediate offset.
    pub(crate) fn thumb_load_store_halfword(&mut self, op_code: u16) {
        let load = op_code.get_bit(11);
        let offset = u32::from(op_code.get_bits(6..=10)) * 2;
        let rb = usize::from(op_code.get_bits(3..=5));
        let rd = usize::from(op_code.get_bits(0..=2));

        let address = self.registers.register_at(rb).wrapping_add(offset);

        if load {
            let value = self.bus.read_half(address, Access::NonSeq);
            self.bus.idle();
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd);
            self.bus.write_half(address, value as u16, Access::NonSeq);
        }
    }

    /// Format 11: LDR/STR relative to SP.
    pub(crate) fn thumb_sp_relative_load_store(&mut self, op_code: u16) {
        let load = op_code.get_bit(11);
        let rd = usize::from(op_code.get_bits(8..=10));
        let offset = u32::from(op_code.get_bits(0..=7)) * 4;

        let address = self.registers.register_at(REG_SP).wrapping_add(offset);

        if load {
            let value = self.bus.read_word(address, Access::NonSeq);
            self.bus.idle();
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd);
            self.bus.write_word(address, value, Access::NonSeq);
        }
    }

    /// Format 12: ADD rd, PC/SP, #imm.
    pub(crate) fn thumb_load_address(&mut self, op_code: u16) {
        let from_sp = op_code.get_bit(11);
        let rd = usize::from(op_code.get_bits(8..=10));
        let offset = u32::from(op_code.get_bits(0..=7)) * 4;

        let base = if from_sp {
            self.registers.register_at(REG_SP)
        } else {
            self.registers.program_counter() & !2
        };

        self.registers.set_register_at(rd, base.wrapping_add(offset));
    }

    /// Format 13: ADD SP, #±imm.
    pub(crate) fn thumb_add_offset_sp(&mut self, op_code: u16) {
        let offset = u32::from(op_code.get_bits(0..=6)) * 4;
        let sp = self.registers.register_at(REG_SP);

        let sp = if op_code.get_bit(7) {
            sp.wrapping_sub(offset)
        } else {
            sp.wrapping_add(offset)
        };
        self.registers.set_register_at(REG_SP, sp);
    }

    /// Format 14: PUSH/POP, optionally with LR/PC.
    pub(crate) fn thumb_push_pop_registers(&mut self, op_code: u16) {
        let load = op_code.get_bit(11);
        let store_lr_load_pc = op_code.get_bit(8);
        let register_list = op_code.get_bits(0..=7);

        let mut access = Access::NonSeq;
        if load {
            let mut address = self.registers.register_at(REG_SP);
            for index in 0..8 {
                if register_list.get_bit(index) {
                    let value = self.bus.read_word(address, access);
                    access = Access::Seq;
                    self.registers.set_register_at(usize::from(index), value);
                    address = address.wrapping_add(4);
                }
            }
            if store_lr_load_pc {
                // ARMv4T stays in Thumb state on a popped PC.
                let value = self.bus.read_word(address, access) & !1;
                address = address.wrapping_add(4);
                self.registers.set_register_at(REG_SP, address);
                self.bus.idle();
                self.registers.set_program_counter(value);
                self.flush_pipeline();
                return;
            }
            self.registers.set_register_at(REG_SP, address);
            self.bus.idle();
        } else {
            let count = register_list.count_ones() + u32::from(store_lr_load_pc);
            let mut address = self.registers.register_at(REG_SP).wrapping_sub(4 * count);
            self.registers.set_register_at(REG_SP, address);

            for index in 0..8 {
                if register_list.get_bit(index) {
                    let value = self.registers.register_at(usize::from(index));
                    self.bus.write_word(address, value, access);
                    access = Access::Seq;
                    address = address.wrapping_add(4);
                }
            }
            if store_lr_load_pc {
                let value = self.registers.register_at(REG_LR);
                self.bus.write_word(address, value, access);
            }
        }
    }

    /// Format 15: LDMIA/STMIA with writeback.
    pub(crate) fn thumb_multiple_load_store(&mut self, op_code: u16) {
        let load = op_code.get_bit(11);
        let rb = usize::from(op_code.get_bits(8..=10));
        let register_list = op_code.get_bits(0..=7);

        let mut address = self.registers.register_at(rb);

        // An empty list transfers the PC and moves the base by 0x40.
        if register_list == 0 {
            if load {
                let value = self.bus.read_word(address, Access::NonSeq) & !1;
                self.registers.set_program_counter(value);
                self.flush_pipeline();
            } else {
                let value = self.registers.program_counter().wrapping_add(2);
                self.bus.write_word(address, value, Access::NonSeq);
            }
            self.registers.set_register_at(rb, address.wrapping_add(0x40));
            return;
        }

        let mut access = Access::NonSeq;
        let final_base = address.wrapping_add(4 * register_list.count_ones());

        if load {
            self.registers.set_register_at(rb, final_base);
            for index in 0..8 {
                if register_list.get_bit(index) {
                    let value = self.bus.read_word(address, access);
                    access = Access::Seq;
                    self.registers.set_register_at(usize::from(index), value);
                    address = address.wrapping_add(4);
                }
            }
            self.bus.idle();
        } else {
            for index in 0..8 {
                if register_list.get_bit(index) {
                    let value = self.registers.register_at(usize::from(index));
                    self.bus.write_word(address, value, access);
                    access = Access::Seq;
                    address = address.wrapping_add(4);
                }
            }
            self.registers.set_register_at(rb, final_base);
        }
    }

    /// Format 16: conditional branch.
    pub(crate) fn thumb_conditional_branch(&mut self, op_code: u16) {
        let condition = Condition::from(op_code.get_bits(8..=11) as u8);
        if !self.cpsr.matches(condition) {
            return;
        }

        let offset = sign_extend(u32::from(op_code.get_bits(0..=7)), 8).wrapping_shl(1);
        let target = self.registers.program_counter().wrapping_add(offset);
        self.registers.set_program_counter(target);
        self.flush_pipeline();
    }

    /// Format 18: unconditional branch.
    pub(crate) fn thumb_unconditional_branch(&mut self, op_code: u16) {
        let offset = sign_extend(u32::from(op_code.get_bits(0..=10)), 11).wrapping_shl(1);
        let target = self.registers.program_counter().wrapping_add(offset);
        self.registers.set_program_counter(target);
        self.flush_pipeline();
    }

    /// Format 19: BL, split over two halfwords.
    pub(crate) fn thumb_long_branch_link(&mut self, op_code: u16) {
        let offset = u32::from(op_code.get_bits(0..=10));

        if op_code.get_bit(11) {
            // Second half: jump and leave the return address in LR.
            let target = self
                .registers
                .register_at(REG_LR)
                .wrapping_add(offset << 1);
            let return_address = self.registers.program_counter().wrapping_sub(2);

            self.registers.set_register_at(REG_LR, return_address | 1);
            self.registers.set_program_counter(target);
            self.flush_pipeline();
        } else {
            // First half: stage the upper offset bits in LR.
            let value = self
                .registers
                .program_counter()
                .wrapping_add(sign_extend(offset, 11).wrapping_shl(12));
            self.registers.set_register_at(REG_LR, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thumb_cpu() -> Arm7tdmi {
        let mut cpu = Arm7tdmi::default();
        cpu.cpsr.set_thumb_state(true);
        cpu
    }

    #[test]
    fn lsl_immediate_sets_flags() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(2, 0x4000_0001);

        // LSL r1, r2, #1
        cpu.execute_thumb(0x0051);
        assert_eq!(cpu.registers.register_at(1), 0x8000_0002);
        assert!(cpu.cpsr.sign_flag());
        assert!(!cpu.cpsr.carry_flag());
    }

    #[test]
    fn add_subtract_register_and_immediate() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(2, 40);

        // ADD r1, r2, r2
        cpu.execute_thumb(0x1891);
        assert_eq!(cpu.registers.register_at(1), 80);

        // SUB r1, r2, #2
        cpu.execute_thumb(0x1E91);
        assert_eq!(cpu.registers.register_at(1), 38);
        assert!(cpu.cpsr.carry_flag());
    }

    #[test]
    fn move_compare_immediate() {
        let mut cpu = thumb_cpu();

        // MOV r1, #200
        cpu.execute_thumb(0x21C8);
        assert_eq!(cpu.registers.register_at(1), 200);

        // CMP r1, #200
        cpu.execute_thumb(0x29C8);
        assert!(cpu.cpsr.zero_flag());

        // SUB r1, #10
        cpu.execute_thumb(0x390A);
        assert_eq!(cpu.registers.register_at(1), 190);
    }

    #[test]
    fn alu_neg_and_mvn() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(1, 5);

        // NEG r0, r1
        cpu.execute_thumb(0x4248);
        assert_eq!(cpu.registers.register_at(0) as i32, -5);

        // MVN r0, r1
        cpu.execute_thumb(0x43C8);
        assert_eq!(cpu.registers.register_at(0), !5);
        assert!(cpu.cpsr.sign_flag());
    }

    #[test]
    fn hi_register_add_and_mov() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(9, 0x100);
        cpu.registers.set_register_at(1, 0x23);

        // ADD r9, r1 (h1=1, rd=1 -> r9)
        cpu.execute_thumb(0x4489);
        assert_eq!(cpu.registers.register_at(9), 0x123);

        // MOV r2, r9
        cpu.execute_thumb(0x464A);
        assert_eq!(cpu.registers.register_at(2), 0x123);
    }

    #[test]
    fn bx_back_to_arm_clears_thumb_bit() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(0, 0x0800_0000);

        // BX r0 - bit 0 clear, so the T bit clears with it.
        cpu.execute_thumb(0x4700);
        assert!(!cpu.cpsr.thumb_state());
        // ARM pipeline: PC = target + 8.
        assert_eq!(cpu.registers.program_counter(), 0x0800_0008);
    }

    #[test]
    fn pc_relative_load_aligns_pc() {
        let mut cpu = thumb_cpu();
        cpu.bus.write_word(0x0200_0008, 0x1234_5678, Access::NonSeq);
        cpu.registers.set_program_counter(0x0200_0002);

        // LDR r1, [pc, #8]
        cpu.execute_thumb(0x4902);
        assert_eq!(cpu.registers.register_at(1), 0x1234_5678);
    }

    #[test]
    fn store_load_roundtrip_with_register_offset(){
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(1, 0x0300_0000);
        cpu.registers.set_register_at(2, 0x10);
        cpu.registers.set_register_at(0, 0xAABB_CCDD);

        // STR r0, [r1, r2]
        cpu.execute_thumb(0x5088);
        // LDR r3, [r1, r2]
        cpu.execute_thumb(0x588B);
        assert_eq!(cpu.registers.register_at(3), 0xAABB_CCDD);

        // LDRB r3, [r1, r2]
        cpu.execute_thumb(0x5C8B);
        assert_eq!(cpu.registers.register_at(3), 0xDD);
    }

    #[test]
    fn sign_extended_loads() {
        let mut cpu = thumb_cpu();
        cpu.bus.write_half(0x0300_0000, 0x80F0, Access::NonSeq);
        cpu.registers.set_register_at(1, 0x0300_0000);
        cpu.registers.set_register_at(2, 0);

        // LDSH r3, [r1, r2]
        cpu.execute_thumb(0x5E8B);
        assert_eq!(cpu.registers.register_at(3), 0xFFFF_80F0);

        // LDSB r3, [r1, r2]
        cpu.execute_thumb(0x568B);
        assert_eq!(cpu.registers.register_at(3), 0xFFFF_FFF0);
    }

    #[test]
    fn sp_relative_and_address_generation() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(REG_SP, 0x0300_7F00);
        cpu.registers.set_register_at(0, 0x5555_5555);

        // STR r0, [sp, #16]
        cpu.execute_thumb(0x9004);
        // LDR r1, [sp, #16]
        cpu.execute_thumb(0x9904);
        assert_eq!(cpu.registers.register_at(1), 0x5555_5555);

        // ADD r2, sp, #8
        cpu.execute_thumb(0xAA02);
        assert_eq!(cpu.registers.register_at(2), 0x0300_7F08);

        // SUB sp, #8
        cpu.execute_thumb(0xB082);
        assert_eq!(cpu.registers.register_at(REG_SP), 0x0300_7EF8);
    }

    #[test]
    fn push_pop_roundtrip() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(REG_SP, 0x0300_7F00);
        cpu.registers.set_register_at(4, 0x4444);
        cpu.registers.set_register_at(REG_LR, 0x0800_0101);

        // PUSH {r4, lr}
        cpu.execute_thumb(0xB510);
        assert_eq!(cpu.registers.register_at(REG_SP), 0x0300_7EF8);

        cpu.registers.set_register_at(4, 0);

        // POP {r4, pc}
        cpu.execute_thumb(0xBD10);
        assert_eq!(cpu.registers.register_at(4), 0x4444);
        assert_eq!(cpu.registers.register_at(REG_SP), 0x0300_7F00);
        // Popped PC stays in Thumb; pipeline makes it +4.
        assert_eq!(cpu.registers.program_counter(), 0x0800_0104);
        assert!(cpu.cpsr.thumb_state());
    }

    #[test]
    fn multiple_load_store_advances_base() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_register_at(0, 0x0300_0100);
        cpu.registers.set_register_at(1, 0x1111);
        cpu.registers.set_register_at(2, 0x2222);

        // STMIA r0!, {r1, r2}
        cpu.execute_thumb(0xC006);
        assert_eq!(cpu.registers.register_at(0), 0x0300_0108);

        cpu.registers.set_register_at(0, 0x0300_0100);
        cpu.registers.set_register_at(1, 0);
        cpu.registers.set_register_at(2, 0);

        // LDMIA r0!, {r1, r2}
        cpu.execute_thumb(0xC806);
        assert_eq!(cpu.registers.register_at(1), 0x1111);
        assert_eq!(cpu.registers.register_at(2), 0x2222);
        assert_eq!(cpu.registers.register_at(0), 0x0300_0108);
    }

    #[test]
    fn conditional_branch_taken_and_skipped() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_program_counter(0x0200_0104);
        cpu.cpsr.set_zero_flag(false);

        // BEQ +4: skipped.
        cpu.execute_thumb(0xD002);
        assert_eq!(cpu.registers.program_counter(), 0x0200_0104);

        // BNE +4: taken, lands at PC + 4, reads +4 more.
        cpu.execute_thumb(0xD102);
        assert_eq!(cpu.registers.program_counter(), 0x0200_0108 + 4);
    }

    #[test]
    fn unconditional_branch_backwards() {
        let mut cpu = thumb_cpu();
        cpu.registers.set_program_counter(0x0200_0104);

        // B -4 (offset11 = -2)
        cpu.execute_thumb(0xE7FE);
        assert_eq!(cpu.registers.program_counter(), 0x0200_0100 + 4);
    }

    #[test]
    fn long_branch_link_pair() {
        let mut cpu = thumb_cpu();
        // Executing at 0x0200_0100: BL to 0x0200_0400.
        cpu.registers.set_program_counter(0x0200_0104);

        // First half: LR = PC + (0 << 12).
        cpu.execute_thumb(0xF000);
        assert_eq!(cpu.registers.register_at(REG_LR), 0x0200_0104);

        // Second half as the next instruction (PC advanced by 2).
        cpu.registers.set_program_counter(0x0200_0106);
        cpu.execute_thumb(0xF800 | 0x17E); // offset 0x17E << 1 = 0x2FC
        assert_eq!(cpu.registers.program_counter(), 0x0200_0400 + 4);
        // LR holds the return address with the Thumb bit set.
        assert_eq!(cpu.registers.register_at(REG_LR), 0x0200_0105);
    }
}
