//! The executable operation model. The decoder lowers opcodes into [`Op`]
//! values; [`run_op`] performs one and reports the master clocks it consumed,
//! folding taken/not-taken branch timing into the same pass.

use crate::cpu::registers::{CpuRegisters, Flag, Reg16, Reg8};
use crate::memory::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Condition {
    NotZero,
    Zero,
    NotCarry,
    Carry,
}

impl Condition {
    fn holds(self, cpu: &CpuRegisters) -> bool {
        match self {
            Self::NotZero => !cpu.flag(Flag::Zero),
            Self::Zero => cpu.flag(Flag::Zero),
            Self::NotCarry => !cpu.flag(Flag::Carry),
            Self::Carry => cpu.flag(Flag::Carry),
        }
    }
}

/// Anywhere an 8-bit operation can read from or write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand {
    Reg(Reg8),
    Imm(u8),
    HlIndirect,
    HlIncrement,
    HlDecrement,
    BcIndirect,
    DeIndirect,
    HighC,
    HighImm(u8),
    Abs(u16),
}

impl Operand {
    fn load(self, cpu: &mut CpuRegisters, bus: &mut Bus) -> u8 {
        match self {
            Self::Reg(reg) => cpu.reg8(reg),
            Self::Imm(value) => value,
            Self::HlIndirect => bus.read(cpu.pair(Reg16::HL)),
            Self::HlIncrement => {
                let addr = cpu.pair(Reg16::HL);
                cpu.set_pair(Reg16::HL, addr.wrapping_add(1));
                bus.read(addr)
            }
            Self::HlDecrement => {
                let addr = cpu.pair(Reg16::HL);
                cpu.set_pair(Reg16::HL, addr.wrapping_sub(1));
                bus.read(addr)
            }
            Self::BcIndirect => bus.read(cpu.pair(Reg16::BC)),
            Self::DeIndirect => bus.read(cpu.pair(Reg16::DE)),
            Self::HighC => bus.read(0xFF00 | u16::from(cpu.c)),
            Self::HighImm(offset) => bus.read(0xFF00 | u16::from(offset)),
            Self::Abs(addr) => bus.read(addr),
        }
    }

    fn store(self, value: u8, cpu: &mut CpuRegisters, bus: &mut Bus) {
        match self {
            Self::Reg(reg) => cpu.set_reg8(reg, value),
            Self::Imm(..) => unreachable!("immediates are never write targets"),
            Self::HlIndirect => bus.write(cpu.pair(Reg16::HL), value),
            Self::HlIncrement => {
                let addr = cpu.pair(Reg16::HL);
                bus.write(addr, value);
                cpu.set_pair(Reg16::HL, addr.wrapping_add(1));
            }
            Self::HlDecrement => {
                let addr = cpu.pair(Reg16::HL);
                bus.write(addr, value);
                cpu.set_pair(Reg16::HL, addr.wrapping_sub(1));
            }
            Self::BcIndirect => bus.write(cpu.pair(Reg16::BC), value),
            Self::DeIndirect => bus.write(cpu.pair(Reg16::DE), value),
            Self::HighC => bus.write(0xFF00 | u16::from(cpu.c), value),
            Self::HighImm(offset) => bus.write(0xFF00 | u16::from(offset), value),
            Self::Abs(addr) => bus.write(addr, value),
        }
    }

    // Clocks a single access through this operand costs on top of the
    // 4-clock opcode fetch: nothing for registers, 4 per memory touch, plus
    // 4 per operand byte that had to be fetched
    fn mem_clocks(self) -> u32 {
        match self {
            Self::Reg(..) => 0,
            Self::Imm(..) => 4,
            Self::HlIndirect
            | Self::HlIncrement
            | Self::HlDecrement
            | Self::BcIndirect
            | Self::DeIndirect
            | Self::HighC => 4,
            Self::HighImm(..) => 8,
            Self::Abs(..) => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShiftOp {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Srl,
    Swap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Nop,
    Ld { dst: Operand, src: Operand },
    Ld16Imm(Reg16, u16),
    StoreSp(u16),
    SpFromHl,
    HlFromSpOffset(i8),
    Push(Reg16),
    Pop(Reg16),
    Alu(AluOp, Operand),
    Inc(Operand),
    Dec(Operand),
    Inc16(Reg16),
    Dec16(Reg16),
    AddHl(Reg16),
    AddSp(i8),
    Shift { op: ShiftOp, target: Operand, accumulator_form: bool },
    Bit(u8, Operand),
    Res(u8, Operand),
    Set(u8, Operand),
    Daa,
    Cpl,
    Scf,
    Ccf,
    Jp(Option<Condition>, u16),
    JpHl,
    Jr(Option<Condition>, i8),
    Call(Option<Condition>, u16),
    Ret(Option<Condition>),
    Reti,
    Rst(u8),
    Halt,
    Stop,
    Di,
    Ei,
    // Undocumented opcode: hangs the CPU for good
    Hang(u8),
}

/// Perform one operation and return the master clocks it consumed. PC must
/// already point past the instruction.
pub(crate) fn run_op(op: Op, cpu: &mut CpuRegisters, bus: &mut Bus) -> u32 {
    let clocks = execute(op, cpu, bus);

    // IME from EI only counts once one more instruction has retired; every
    // operation other than EI itself ends the holdoff
    cpu.ei_pending = matches!(op, Op::Ei);

    clocks
}

fn execute(op: Op, cpu: &mut CpuRegisters, bus: &mut Bus) -> u32 {
    match op {
        Op::Nop => 4,
        Op::Ld { dst, src } => {
            let value = src.load(cpu, bus);
            dst.store(value, cpu, bus);
            4 + src.mem_clocks() + dst.mem_clocks()
        }
        Op::Ld16Imm(reg, value) => {
            cpu.set_pair(reg, value);
            12
        }
        Op::StoreSp(addr) => {
            bus.write_u16(addr, cpu.sp);
            20
        }
        Op::SpFromHl => {
            cpu.sp = cpu.pair(Reg16::HL);
            8
        }
        Op::HlFromSpOffset(offset) => {
            let (result, half, carry) = offset_sp(cpu.sp, offset);
            cpu.set_pair(Reg16::HL, result);
            cpu.write_flags(false, false, half, carry);
            12
        }
        Op::Push(reg) => {
            let value = cpu.pair(reg);
            push16(cpu, bus, value);
            16
        }
        Op::Pop(reg) => {
            let value = pop16(cpu, bus);
            cpu.set_pair(reg, value);
            12
        }
        Op::Alu(alu, operand) => {
            let value = operand.load(cpu, bus);
            alu_accumulator(cpu, alu, value);
            4 + operand.mem_clocks()
        }
        Op::Inc(operand) => {
            let value = operand.load(cpu, bus);
            let result = value.wrapping_add(1);
            operand.store(result, cpu, bus);
            cpu.set_flag(Flag::Zero, result == 0);
            cpu.set_flag(Flag::Subtract, false);
            cpu.set_flag(Flag::HalfCarry, value & 0x0F == 0x0F);
            4 + 2 * operand.mem_clocks()
        }
        Op::Dec(operand) => {
            let value = operand.load(cpu, bus);
            let result = value.wrapping_sub(1);
            operand.store(result, cpu, bus);
            cpu.set_flag(Flag::Zero, result == 0);
            cpu.set_flag(Flag::Subtract, true);
            cpu.set_flag(Flag::HalfCarry, value & 0x0F == 0x00);
            4 + 2 * operand.mem_clocks()
        }
        Op::Inc16(reg) => {
            cpu.set_pair(reg, cpu.pair(reg).wrapping_add(1));
            8
        }
        Op::Dec16(reg) => {
            cpu.set_pair(reg, cpu.pair(reg).wrapping_sub(1));
            8
        }
        Op::AddHl(reg) => {
            let hl = cpu.pair(Reg16::HL);
            let addend = cpu.pair(reg);
            let (result, carry) = hl.overflowing_add(addend);
            cpu.set_pair(Reg16::HL, result);
            cpu.set_flag(Flag::Subtract, false);
            cpu.set_flag(Flag::HalfCarry, (hl & 0x0FFF) + (addend & 0x0FFF) > 0x0FFF);
            cpu.set_flag(Flag::Carry, carry);
            8
        }
        Op::AddSp(offset) => {
            let (result, half, carry) = offset_sp(cpu.sp, offset);
            cpu.sp = result;
            cpu.write_flags(false, false, half, carry);
            16
        }
        Op::Shift { op, target, accumulator_form } => {
            let value = target.load(cpu, bus);
            let (result, carry) = shifted(op, value, cpu.flag(Flag::Carry));
            target.store(result, cpu, bus);
            // The one-byte accumulator rotates always report Z=0
            cpu.write_flags(!accumulator_form && result == 0, false, false, carry);
            if accumulator_form {
                4
            } else {
                8 + 2 * target.mem_clocks()
            }
        }
        Op::Bit(bit, operand) => {
            let value = operand.load(cpu, bus);
            cpu.set_flag(Flag::Zero, value & (1 << bit) == 0);
            cpu.set_flag(Flag::Subtract, false);
            cpu.set_flag(Flag::HalfCarry, true);
            8 + operand.mem_clocks()
        }
        Op::Res(bit, operand) => {
            let value = operand.load(cpu, bus);
            operand.store(value & !(1 << bit), cpu, bus);
            8 + 2 * operand.mem_clocks()
        }
        Op::Set(bit, operand) => {
            let value = operand.load(cpu, bus);
            operand.store(value | (1 << bit), cpu, bus);
            8 + 2 * operand.mem_clocks()
        }
        Op::Daa => {
            decimal_adjust(cpu);
            4
        }
        Op::Cpl => {
            cpu.a = !cpu.a;
            cpu.set_flag(Flag::Subtract, true);
            cpu.set_flag(Flag::HalfCarry, true);
            4
        }
        Op::Scf => {
            cpu.set_flag(Flag::Subtract, false);
            cpu.set_flag(Flag::HalfCarry, false);
            cpu.set_flag(Flag::Carry, true);
            4
        }
        Op::Ccf => {
            let carry = cpu.flag(Flag::Carry);
            cpu.set_flag(Flag::Subtract, false);
            cpu.set_flag(Flag::HalfCarry, false);
            cpu.set_flag(Flag::Carry, !carry);
            4
        }
        Op::Jp(condition, target) => {
            if condition_met(condition, cpu) {
                cpu.pc = target;
                16
            } else {
                12
            }
        }
        Op::JpHl => {
            cpu.pc = cpu.pair(Reg16::HL);
            4
        }
        Op::Jr(condition, offset) => {
            if condition_met(condition, cpu) {
                // i8 -> u16 sign-extends, so wrapping addition walks backwards
                cpu.pc = cpu.pc.wrapping_add(offset as u16);
                12
            } else {
                8
            }
        }
        Op::Call(condition, target) => {
            if condition_met(condition, cpu) {
                push16(cpu, bus, cpu.pc);
                cpu.pc = target;
                24
            } else {
                12
            }
        }
        Op::Ret(None) => {
            cpu.pc = pop16(cpu, bus);
            16
        }
        Op::Ret(Some(condition)) => {
            if condition.holds(cpu) {
                cpu.pc = pop16(cpu, bus);
                20
            } else {
                8
            }
        }
        Op::Reti => {
            cpu.pc = pop16(cpu, bus);
            // No EI-style holdoff here; IME counts immediately
            cpu.ime = true;
            16
        }
        Op::Rst(vector) => {
            push16(cpu, bus, cpu.pc);
            cpu.pc = vector.into();
            16
        }
        Op::Halt => {
            if !cpu.ime && bus.interrupts.pending() != 0 {
                // HALT bug: the CPU falls straight through and the next
                // fetch repeats a byte instead of halting
                cpu.halt_bug = true;
            } else {
                cpu.halted = true;
            }
            4
        }
        Op::Stop => {
            log::debug!("entering STOP, a button press will resume");
            cpu.stopped = true;
            4
        }
        Op::Di => {
            cpu.ime = false;
            4
        }
        Op::Ei => {
            cpu.ime = true;
            4
        }
        Op::Hang(opcode) => {
            log::warn!("opcode {opcode:02X} has no defined behavior, locking the CPU");
            cpu.locked = true;
            4
        }
    }
}

fn condition_met(condition: Option<Condition>, cpu: &CpuRegisters) -> bool {
    condition.map_or(true, |condition| condition.holds(cpu))
}

fn push16(cpu: &mut CpuRegisters, bus: &mut Bus, value: u16) {
    cpu.sp = cpu.sp.wrapping_sub(2);
    bus.write_u16(cpu.sp, value);
}

fn pop16(cpu: &mut CpuRegisters, bus: &mut Bus) -> u16 {
    let value = bus.read_u16(cpu.sp);
    cpu.sp = cpu.sp.wrapping_add(2);
    value
}

/// The eight accumulator operations, with their flag effects.
fn alu_accumulator(cpu: &mut CpuRegisters, op: AluOp, value: u8) {
    match op {
        AluOp::Add | AluOp::Adc => {
            let carry_in = u8::from(op == AluOp::Adc && cpu.flag(Flag::Carry));
            let wide = u16::from(cpu.a) + u16::from(value) + u16::from(carry_in);
            let half = (cpu.a & 0x0F) + (value & 0x0F) + carry_in > 0x0F;
            let result = wide as u8;
            cpu.write_flags(result == 0, false, half, wide > 0xFF);
            cpu.a = result;
        }
        AluOp::Sub | AluOp::Sbc | AluOp::Cp => {
            let carry_in = u8::from(op == AluOp::Sbc && cpu.flag(Flag::Carry));
            let borrow = u16::from(value) + u16::from(carry_in) > u16::from(cpu.a);
            let half_borrow = (value & 0x0F) + carry_in > cpu.a & 0x0F;
            let result = cpu.a.wrapping_sub(value).wrapping_sub(carry_in);
            cpu.write_flags(result == 0, true, half_borrow, borrow);
            // CP is a subtraction that throws the result away
            if op != AluOp::Cp {
                cpu.a = result;
            }
        }
        AluOp::And => {
            cpu.a &= value;
            cpu.write_flags(cpu.a == 0, false, true, false);
        }
        AluOp::Xor => {
            cpu.a ^= value;
            cpu.write_flags(cpu.a == 0, false, false, false);
        }
        AluOp::Or => {
            cpu.a |= value;
            cpu.write_flags(cpu.a == 0, false, false, false);
        }
    }
}

/// Rotate/shift a byte; returns the result and the bit that fell out.
fn shifted(op: ShiftOp, value: u8, carry_in: bool) -> (u8, bool) {
    match op {
        ShiftOp::Rlc => (value.rotate_left(1), value & 0x80 != 0),
        ShiftOp::Rrc => (value.rotate_right(1), value & 0x01 != 0),
        ShiftOp::Rl => ((value << 1) | u8::from(carry_in), value & 0x80 != 0),
        ShiftOp::Rr => ((value >> 1) | (u8::from(carry_in) << 7), value & 0x01 != 0),
        ShiftOp::Sla => (value << 1, value & 0x80 != 0),
        ShiftOp::Sra => (((value as i8) >> 1) as u8, value & 0x01 != 0),
        ShiftOp::Srl => (value >> 1, value & 0x01 != 0),
        ShiftOp::Swap => (value.rotate_left(4), false),
    }
}

/// BCD fixup after an ADD/SUB chain. The adjustment byte is built from the
/// N/H/C flags plus the accumulator's nibbles, then applied in the direction
/// the last operation went.
fn decimal_adjust(cpu: &mut CpuRegisters) {
    let mut adjust = 0x00_u8;
    let mut carry = cpu.flag(Flag::Carry);

    if cpu.flag(Flag::Subtract) {
        if cpu.flag(Flag::HalfCarry) {
            adjust |= 0x06;
        }
        if carry {
            adjust |= 0x60;
        }
        cpu.a = cpu.a.wrapping_sub(adjust);
    } else {
        if cpu.flag(Flag::HalfCarry) || cpu.a & 0x0F > 0x09 {
            adjust |= 0x06;
        }
        if carry || cpu.a > 0x99 {
            adjust |= 0x60;
            carry = true;
        }
        cpu.a = cpu.a.wrapping_add(adjust);
    }

    cpu.set_flag(Flag::Zero, cpu.a == 0);
    cpu.set_flag(Flag::HalfCarry, false);
    cpu.set_flag(Flag::Carry, carry);
}

/// SP plus a signed byte. Both flags come from unsigned addition of the low
/// byte, even when the offset is negative.
fn offset_sp(sp: u16, offset: i8) -> (u16, bool, bool) {
    let unsigned = offset as u8;
    let half = (sp & 0x000F) + u16::from(unsigned & 0x0F) > 0x000F;
    let carry = (sp & 0x00FF) + u16::from(unsigned) > 0x00FF;

    (sp.wrapping_add(offset as u16), half, carry)
}
