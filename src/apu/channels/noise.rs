use crate::apu::channels::{Channel, Envelope, LengthCounter};
use serde::{Deserialize, Serialize};

// NR43 divisor codes 0-7
const DIVISOR_TABLE: [u64; 8] = [8, 16, 32, 48, 64, 80, 96, 112];

/// Noise channel (channel 4): a 15-bit LFSR clocked at a rate derived from
/// NR43, with an optional 7-bit feedback mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct NoiseChannel {
    channel_on: bool,
    length: LengthCounter,
    envelope: Envelope,
    clock_shift: u8,
    short_mode: bool,
    divisor_code: u8,
    lfsr: u16,
    clock: u64,
}

impl NoiseChannel {
    pub(crate) fn new() -> Self {
        Self {
            channel_on: false,
            length: LengthCounter::new(64),
            envelope: Envelope::new(),
            clock_shift: 0,
            short_mode: false,
            divisor_code: 0,
            lfsr: 0x7FFF,
            clock: 0,
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.channel_on
    }

    pub(crate) fn write_nr41(&mut self, value: u8) {
        self.length.load(value & 0x3F);
    }

    pub(crate) fn read_nr42(&self) -> u8 {
        self.envelope.register_value()
    }

    pub(crate) fn write_nr42(&mut self, value: u8) {
        self.envelope = Envelope::from_register(value);
        if !self.envelope.dac_enabled() {
            self.channel_on = false;
        }
    }

    pub(crate) fn read_nr43(&self) -> u8 {
        (self.clock_shift << 4) | (u8::from(self.short_mode) << 3) | self.divisor_code
    }

    pub(crate) fn write_nr43(&mut self, value: u8) {
        self.clock_shift = value >> 4;
        self.short_mode = value & 0x08 != 0;
        self.divisor_code = value & 0x07;
    }

    pub(crate) fn read_nr44(&self) -> u8 {
        if self.length.enabled() {
            0xFF
        } else {
            0xBF
        }
    }

    pub(crate) fn write_nr44(&mut self, value: u8) {
        self.length.set_enabled(value & 0x40 != 0);

        if value & 0x80 != 0 {
            self.trigger();
        }
    }

    fn trigger(&mut self) {
        self.channel_on = self.envelope.dac_enabled();
        self.length.trigger();
        self.envelope.trigger();
        self.lfsr = 0x7FFF;
        self.clock = 0;
    }

    /// Advance the LFSR by one machine cycle. The shift rate divisor is
    /// `divisor * 2^shift` master clocks per step.
    pub(crate) fn tick_m_cycle(&mut self) {
        let prev_clock = self.clock;
        self.clock += 4;

        let lfsr_period = DIVISOR_TABLE[usize::from(self.divisor_code)] << self.clock_shift;
        if prev_clock / lfsr_period != self.clock / lfsr_period {
            self.step_lfsr();
        }
    }

    fn step_lfsr(&mut self) {
        let feedback = (self.lfsr ^ (self.lfsr >> 1)) & 0x0001;
        self.lfsr = (self.lfsr >> 1) | (feedback << 14);
        if self.short_mode {
            self.lfsr = (self.lfsr & !(1 << 6)) | (feedback << 6);
        }
    }

    /// 256 Hz sequencer step.
    pub(crate) fn clock_length(&mut self) {
        if self.length.clock() {
            self.channel_on = false;
        }
    }

    /// 64 Hz sequencer step.
    pub(crate) fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    /// APU power-off: register state cleared, length counter survives.
    pub(crate) fn power_off(&mut self) {
        self.channel_on = false;
        self.envelope = Envelope::new();
        self.clock_shift = 0;
        self.short_mode = false;
        self.divisor_code = 0;
        self.lfsr = 0x7FFF;
        self.clock = 0;
        self.length.power_off();
    }
}

impl Channel for NoiseChannel {
    fn sample_digital(&self) -> Option<u8> {
        if !self.envelope.dac_enabled() {
            return None;
        }

        if !self.channel_on {
            return Some(0);
        }

        // Output is the inverted low LFSR bit
        if self.lfsr & 0x0001 == 0 {
            Some(self.envelope.volume())
        } else {
            Some(0)
        }
    }
}
