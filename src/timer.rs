use crate::interrupts::{InterruptLine, InterruptType};
use serde::{Deserialize, Serialize};

/// DIV/TIMA/TMA/TAC as a computed view over a free-running 16-bit counter.
///
/// TIMA increments are driven by a falling-edge detector on one bit of the
/// counter, selected by TAC bits 0-1 and gated by TAC bit 2. Because DIV
/// writes clear the whole counter, they are run through the same detector and
/// can themselves clock TIMA; likewise for TAC writes that change the
/// selected bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    counter: u16,
    tima: u8,
    tma: u8,
    tac: u8,
    last_signal: bool,
    // Machine cycles until an overflowed TIMA is reloaded from TMA
    reload_delay: Option<u8>,
}

const OVERFLOW_RELOAD_DELAY_M_CYCLES: u8 = 4;

impl TimerState {
    pub fn new() -> Self {
        Self {
            counter: 0,
            tima: 0x00,
            tma: 0x00,
            tac: 0x00,
            last_signal: false,
            reload_delay: None,
        }
    }

    /// DIV is the upper byte of the internal counter.
    pub fn read_div(&self) -> u8 {
        (self.counter >> 8) as u8
    }

    /// Any write clears the full 16-bit counter, regardless of value.
    pub fn write_div(&mut self, _value: u8) {
        self.counter = 0;
        self.detect_falling_edge();
    }

    pub fn read_tima(&self) -> u8 {
        self.tima
    }

    pub fn write_tima(&mut self, value: u8) {
        // A write during the overflow delay cancels the pending reload
        self.reload_delay = None;
        self.tima = value;
    }

    pub fn read_tma(&self) -> u8 {
        self.tma
    }

    pub fn write_tma(&mut self, value: u8) {
        self.tma = value;
    }

    pub fn read_tac(&self) -> u8 {
        self.tac | 0xF8
    }

    pub fn write_tac(&mut self, value: u8) {
        self.tac = value & 0x07;
        self.detect_falling_edge();
    }

    /// Advance the counter by one machine cycle (4 master clocks), applying
    /// the overflow-reload protocol: after TIMA overflows it reads 0x00 for
    /// 4 machine cycles, then is reloaded from TMA and the Timer interrupt is
    /// requested.
    pub fn tick_m_cycle(&mut self, interrupts: &mut InterruptLine) {
        if let Some(delay) = &mut self.reload_delay {
            *delay -= 1;
            if *delay == 0 {
                self.reload_delay = None;
                self.tima = self.tma;
                interrupts.request(InterruptType::Timer);
            }
        }

        for _ in 0..4 {
            self.counter = self.counter.wrapping_add(1);
            self.detect_falling_edge();
        }
    }

    fn signal(&self) -> bool {
        if self.tac & 0x04 == 0 {
            return false;
        }

        let bit = match self.tac & 0x03 {
            0x00 => 9, // 4096 Hz
            0x01 => 3, // 262144 Hz
            0x02 => 5, // 65536 Hz
            0x03 => 7, // 16384 Hz
            _ => unreachable!("value & 0x03 is always 0-3"),
        };
        self.counter & (1 << bit) != 0
    }

    fn detect_falling_edge(&mut self) {
        let new_signal = self.signal();
        if self.last_signal && !new_signal {
            self.increment_tima();
        }
        self.last_signal = new_signal;
    }

    fn increment_tima(&mut self) {
        if self.tima == 0xFF {
            self.tima = 0x00;
            self.reload_delay = Some(OVERFLOW_RELOAD_DELAY_M_CYCLES);
        } else {
            self.tima += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(timer: &mut TimerState, interrupts: &mut InterruptLine, m_cycles: u32) {
        for _ in 0..m_cycles {
            timer.tick_m_cycle(interrupts);
        }
    }

    #[test]
    fn divider_register() {
        let mut timer = TimerState::new();
        let mut interrupts = InterruptLine::new();

        // All DIV writes reset the counter regardless of value
        timer.write_div(0x46);
        assert_eq!(0x00, timer.read_div());

        // DIV increments every 256 master clocks (64 machine cycles)
        step(&mut timer, &mut interrupts, 63);
        assert_eq!(0x00, timer.read_div());

        step(&mut timer, &mut interrupts, 1);
        assert_eq!(0x01, timer.read_div());

        step(&mut timer, &mut interrupts, 64 * 254);
        assert_eq!(0xFF, timer.read_div());

        step(&mut timer, &mut interrupts, 64);
        assert_eq!(0x00, timer.read_div());

        timer.write_div(0x00);
        step(&mut timer, &mut interrupts, 32);
        timer.write_div(0x00);
        assert_eq!(0x00, timer.read_div());
    }

    #[test]
    fn tima_increment_rates() {
        let mut timer = TimerState::new();
        let mut interrupts = InterruptLine::new();

        // Enabled at 262144 Hz: one increment per 16 master clocks
        timer.write_tac(0x05);

        step(&mut timer, &mut interrupts, 3);
        assert_eq!(0x00, timer.read_tima());

        step(&mut timer, &mut interrupts, 1);
        assert_eq!(0x01, timer.read_tima());

        step(&mut timer, &mut interrupts, 40);
        assert_eq!(0x0B, timer.read_tima());

        // Disabled: no increments
        timer.write_tac(0x01);
        step(&mut timer, &mut interrupts, 64);
        assert_eq!(0x0B, timer.read_tima());

        // 65536 Hz: one increment per 64 master clocks
        timer.write_div(0x00);
        timer.write_tima(0x00);
        timer.write_tac(0x06);
        step(&mut timer, &mut interrupts, 16 * 10);
        assert_eq!(0x0A, timer.read_tima());
    }

    #[test]
    fn overflow_reload_protocol() {
        let mut timer = TimerState::new();
        let mut interrupts = InterruptLine::new();

        timer.write_tma(0x78);
        timer.write_tac(0x05);
        timer.write_tima(0xFF);

        // Overflow happens on the 4th machine cycle (counter bit 3 falls)
        step(&mut timer, &mut interrupts, 4);
        assert_eq!(0x00, timer.read_tima());
        assert!(!interrupts.requested(InterruptType::Timer));

        // TIMA stays 0x00 for 4 machine cycles
        step(&mut timer, &mut interrupts, 3);
        assert_eq!(0x00, timer.read_tima());
        assert!(!interrupts.requested(InterruptType::Timer));

        // At the end of the delay TIMA is reloaded and the interrupt raised
        step(&mut timer, &mut interrupts, 1);
        assert_eq!(0x78, timer.read_tima());
        assert!(interrupts.requested(InterruptType::Timer));
    }

    #[test]
    fn tima_write_cancels_reload() {
        let mut timer = TimerState::new();
        let mut interrupts = InterruptLine::new();

        timer.write_tma(0x78);
        timer.write_tac(0x05);
        timer.write_tima(0xFF);

        step(&mut timer, &mut interrupts, 4);
        assert_eq!(0x00, timer.read_tima());

        timer.write_tima(0x42);

        step(&mut timer, &mut interrupts, 8);
        assert!(!interrupts.requested(InterruptType::Timer));
        // 8 machine cycles = 2 more increments at this rate
        assert_eq!(0x44, timer.read_tima());
    }

    #[test]
    fn div_write_falling_edge_clocks_tima() {
        let mut timer = TimerState::new();
        let mut interrupts = InterruptLine::new();

        timer.write_tac(0x05);

        // Advance until counter bit 3 is set, then clear DIV: the selected
        // bit falls, which clocks TIMA once.
        step(&mut timer, &mut interrupts, 2);
        assert_eq!(0x00, timer.read_tima());

        timer.write_div(0x00);
        assert_eq!(0x01, timer.read_tima());
    }
}
