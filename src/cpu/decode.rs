//! Opcode decoding. The table is carved up by the top two opcode bits: block
//! 01 is the register-to-register load grid, block 10 the accumulator ALU
//! grid, and blocks 00/11 are handled arm by arm. Decoding is total:
//! undocumented opcodes lower to [`Op::Hang`].

use crate::cpu::ops::{AluOp, Condition, Op, Operand, ShiftOp};
use crate::cpu::registers::{Reg16, Reg8};
use crate::memory::Bus;

/// Decode the instruction at `pc`, returning it along with the address of
/// the next instruction.
///
/// With `halt_bug` set, the fetched byte is consumed without moving PC past
/// it, so the same byte gets decoded again on the following step.
pub(crate) fn decode(bus: &mut Bus, pc: u16, halt_bug: bool) -> (Op, u16) {
    let opcode = bus.read(pc);
    let pc = if halt_bug { pc.wrapping_sub(1) } else { pc };

    match opcode >> 6 {
        0b01 if opcode != 0x76 => {
            let op = Op::Ld { dst: operand(opcode >> 3), src: operand(opcode) };
            (op, pc.wrapping_add(1))
        }
        0b01 => (Op::Halt, pc.wrapping_add(1)),
        0b10 => (Op::Alu(alu_op(opcode >> 3), operand(opcode)), pc.wrapping_add(1)),
        0b00 => decode_block0(bus, pc, opcode),
        _ => decode_block3(bus, pc, opcode),
    }
}

// 0x00-0x3F: 16-bit loads/arithmetic, the accumulator rotates, relative
// jumps, and the (rr)/A transfer column
fn decode_block0(bus: &mut Bus, pc: u16, opcode: u8) -> (Op, u16) {
    let op = match opcode {
        0x00 => Op::Nop,
        0x10 => return (Op::Stop, pc.wrapping_add(2)),
        0x08 => return (Op::StoreSp(imm16(bus, pc)), pc.wrapping_add(3)),
        0x18 => return (Op::Jr(None, imm8(bus, pc) as i8), pc.wrapping_add(2)),
        0x20 | 0x28 | 0x30 | 0x38 => {
            return (Op::Jr(Some(condition(opcode)), imm8(bus, pc) as i8), pc.wrapping_add(2));
        }
        0x07 => accumulator_rotate(ShiftOp::Rlc),
        0x0F => accumulator_rotate(ShiftOp::Rrc),
        0x17 => accumulator_rotate(ShiftOp::Rl),
        0x1F => accumulator_rotate(ShiftOp::Rr),
        0x27 => Op::Daa,
        0x2F => Op::Cpl,
        0x37 => Op::Scf,
        0x3F => Op::Ccf,
        0x02 => Op::Ld { dst: Operand::BcIndirect, src: Operand::Reg(Reg8::A) },
        0x12 => Op::Ld { dst: Operand::DeIndirect, src: Operand::Reg(Reg8::A) },
        0x22 => Op::Ld { dst: Operand::HlIncrement, src: Operand::Reg(Reg8::A) },
        0x32 => Op::Ld { dst: Operand::HlDecrement, src: Operand::Reg(Reg8::A) },
        0x0A => Op::Ld { dst: Operand::Reg(Reg8::A), src: Operand::BcIndirect },
        0x1A => Op::Ld { dst: Operand::Reg(Reg8::A), src: Operand::DeIndirect },
        0x2A => Op::Ld { dst: Operand::Reg(Reg8::A), src: Operand::HlIncrement },
        0x3A => Op::Ld { dst: Operand::Reg(Reg8::A), src: Operand::HlDecrement },
        _ => match opcode & 0x0F {
            0x01 => {
                return (
                    Op::Ld16Imm(wide_reg(opcode >> 4, Reg16::SP), imm16(bus, pc)),
                    pc.wrapping_add(3),
                );
            }
            0x03 => Op::Inc16(wide_reg(opcode >> 4, Reg16::SP)),
            0x09 => Op::AddHl(wide_reg(opcode >> 4, Reg16::SP)),
            0x0B => Op::Dec16(wide_reg(opcode >> 4, Reg16::SP)),
            0x04 | 0x0C => Op::Inc(operand(opcode >> 3)),
            0x05 | 0x0D => Op::Dec(operand(opcode >> 3)),
            0x06 | 0x0E => {
                return (
                    Op::Ld { dst: operand(opcode >> 3), src: Operand::Imm(imm8(bus, pc)) },
                    pc.wrapping_add(2),
                );
            }
            _ => unreachable!("block 00 column {:02X} already matched above", opcode & 0x0F),
        },
    };

    (op, pc.wrapping_add(1))
}

// 0xC0-0xFF: control flow, the stack column, high-page loads, and the CB page
fn decode_block3(bus: &mut Bus, pc: u16, opcode: u8) -> (Op, u16) {
    let op = match opcode {
        0xC3 => return (Op::Jp(None, imm16(bus, pc)), pc.wrapping_add(3)),
        0xC2 | 0xCA | 0xD2 | 0xDA => {
            return (Op::Jp(Some(condition(opcode)), imm16(bus, pc)), pc.wrapping_add(3));
        }
        0xE9 => Op::JpHl,
        0xC9 => Op::Ret(None),
        0xD9 => Op::Reti,
        0xC0 | 0xC8 | 0xD0 | 0xD8 => Op::Ret(Some(condition(opcode))),
        0xCD => return (Op::Call(None, imm16(bus, pc)), pc.wrapping_add(3)),
        0xC4 | 0xCC | 0xD4 | 0xDC => {
            return (Op::Call(Some(condition(opcode)), imm16(bus, pc)), pc.wrapping_add(3));
        }
        0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => Op::Rst(opcode & 0x38),
        0xC1 | 0xD1 | 0xE1 | 0xF1 => Op::Pop(wide_reg(opcode >> 4, Reg16::AF)),
        0xC5 | 0xD5 | 0xE5 | 0xF5 => Op::Push(wide_reg(opcode >> 4, Reg16::AF)),
        0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
            return (
                Op::Alu(alu_op(opcode >> 3), Operand::Imm(imm8(bus, pc))),
                pc.wrapping_add(2),
            );
        }
        0xCB => return decode_cb(bus, pc),
        0xE0 => {
            return (
                Op::Ld { dst: Operand::HighImm(imm8(bus, pc)), src: Operand::Reg(Reg8::A) },
                pc.wrapping_add(2),
            );
        }
        0xF0 => {
            return (
                Op::Ld { dst: Operand::Reg(Reg8::A), src: Operand::HighImm(imm8(bus, pc)) },
                pc.wrapping_add(2),
            );
        }
        0xE2 => Op::Ld { dst: Operand::HighC, src: Operand::Reg(Reg8::A) },
        0xF2 => Op::Ld { dst: Operand::Reg(Reg8::A), src: Operand::HighC },
        0xEA => {
            return (
                Op::Ld { dst: Operand::Abs(imm16(bus, pc)), src: Operand::Reg(Reg8::A) },
                pc.wrapping_add(3),
            );
        }
        0xFA => {
            return (
                Op::Ld { dst: Operand::Reg(Reg8::A), src: Operand::Abs(imm16(bus, pc)) },
                pc.wrapping_add(3),
            );
        }
        0xE8 => return (Op::AddSp(imm8(bus, pc) as i8), pc.wrapping_add(2)),
        0xF8 => return (Op::HlFromSpOffset(imm8(bus, pc) as i8), pc.wrapping_add(2)),
        0xF9 => Op::SpFromHl,
        0xF3 => Op::Di,
        0xFB => Op::Ei,
        _ => Op::Hang(opcode),
    };

    (op, pc.wrapping_add(1))
}

// The CB page is perfectly regular: two bits pick the operation family,
// three bits pick the bit index or shift kind, three bits pick the target
fn decode_cb(bus: &mut Bus, pc: u16) -> (Op, u16) {
    let opcode = bus.read(pc.wrapping_add(1));
    let target = operand(opcode);
    let bit = (opcode >> 3) & 0x07;

    let op = match opcode >> 6 {
        0b00 => Op::Shift { op: shift_op(opcode >> 3), target, accumulator_form: false },
        0b01 => Op::Bit(bit, target),
        0b10 => Op::Res(bit, target),
        _ => Op::Set(bit, target),
    };

    (op, pc.wrapping_add(2))
}

fn accumulator_rotate(op: ShiftOp) -> Op {
    Op::Shift { op, target: Operand::Reg(Reg8::A), accumulator_form: true }
}

fn imm8(bus: &mut Bus, pc: u16) -> u8 {
    bus.read(pc.wrapping_add(1))
}

fn imm16(bus: &mut Bus, pc: u16) -> u16 {
    bus.read_u16(pc.wrapping_add(1))
}

/// The 3-bit register code shared by most opcode grids; code 6 means the
/// byte behind HL.
fn operand(code: u8) -> Operand {
    match code & 0x07 {
        0 => Operand::Reg(Reg8::B),
        1 => Operand::Reg(Reg8::C),
        2 => Operand::Reg(Reg8::D),
        3 => Operand::Reg(Reg8::E),
        4 => Operand::Reg(Reg8::H),
        5 => Operand::Reg(Reg8::L),
        6 => Operand::HlIndirect,
        _ => Operand::Reg(Reg8::A),
    }
}

/// The 2-bit register-pair code. The last slot is SP for most instructions
/// but AF for PUSH/POP, so the caller picks.
fn wide_reg(code: u8, last: Reg16) -> Reg16 {
    match code & 0x03 {
        0 => Reg16::BC,
        1 => Reg16::DE,
        2 => Reg16::HL,
        _ => last,
    }
}

fn alu_op(code: u8) -> AluOp {
    match code & 0x07 {
        0 => AluOp::Add,
        1 => AluOp::Adc,
        2 => AluOp::Sub,
        3 => AluOp::Sbc,
        4 => AluOp::And,
        5 => AluOp::Xor,
        6 => AluOp::Or,
        _ => AluOp::Cp,
    }
}

fn shift_op(code: u8) -> ShiftOp {
    match code & 0x07 {
        0 => ShiftOp::Rlc,
        1 => ShiftOp::Rrc,
        2 => ShiftOp::Rl,
        3 => ShiftOp::Rr,
        4 => ShiftOp::Sla,
        5 => ShiftOp::Sra,
        6 => ShiftOp::Swap,
        _ => ShiftOp::Srl,
    }
}

fn condition(opcode: u8) -> Condition {
    match (opcode >> 3) & 0x03 {
        0 => Condition::NotZero,
        1 => Condition::Zero,
        2 => Condition::NotCarry,
        _ => Condition::Carry,
    }
}
