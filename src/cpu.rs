mod decode;
mod ops;
mod registers;


pub use registers::CpuRegisters;

use crate::memory::Bus;

/// Master clocks spent entering an interrupt handler (5 machine cycles).
pub const INTERRUPT_DISPATCH_CLOCKS: u32 = 20;

/// Drive the CPU through one unit of work: an interrupt dispatch, a single
/// instruction, or an idle machine cycle while halted, stopped, or locked.
///
/// The return value is the number of master clocks the work consumed; the
/// caller owes the rest of the hardware that many clocks of catch-up.
pub fn tick(cpu: &mut CpuRegisters, bus: &mut Bus) -> u32 {
    if cpu.locked || cpu.stopped {
        return 4;
    }

    let pending = bus.interrupts.pending();
    if cpu.halted {
        if pending == 0 {
            return 4;
        }
        // Any requested-and-enabled interrupt ends HALT, with or without IME
        cpu.halted = false;
    }

    if pending != 0 && cpu.ime && !cpu.ei_pending {
        return dispatch_interrupt(cpu, bus);
    }

    let (op, next_pc) = decode::decode(bus, cpu.pc, cpu.halt_bug);
    cpu.halt_bug = false;

    log::trace!("{:04X}  {op:02X?}", cpu.pc);
    cpu.pc = next_pc;

    ops::run_op(op, cpu, bus)
}

fn dispatch_interrupt(cpu: &mut CpuRegisters, bus: &mut Bus) -> u32 {
    let interrupt = bus
        .interrupts
        .highest_priority_pending()
        .expect("pending mask was non-zero");

    log::trace!(
        "taking {interrupt:?} interrupt, handler at {:04X}",
        interrupt.handler_address()
    );

    cpu.ime = false;
    cpu.sp = cpu.sp.wrapping_sub(2);
    bus.write_u16(cpu.sp, cpu.pc);
    bus.interrupts.clear(interrupt);
    cpu.pc = interrupt.handler_address();

    INTERRUPT_DISPATCH_CLOCKS
}
