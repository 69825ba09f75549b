use crate::apu::channels::{Channel, Envelope, EnvelopeDirection, LengthCounter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum DutyCycle {
    OneEighth,
    OneFourth,
    OneHalf,
    ThreeFourths,
}

impl DutyCycle {
    fn waveform(self) -> [u8; 8] {
        match self {
            Self::OneEighth => [0, 0, 0, 0, 0, 0, 0, 1],
            Self::OneFourth => [1, 0, 0, 0, 0, 0, 0, 1],
            Self::OneHalf => [1, 0, 0, 0, 0, 1, 1, 1],
            Self::ThreeFourths => [0, 1, 1, 1, 1, 1, 1, 0],
        }
    }

    fn from_register_bits(value: u8) -> Self {
        match value & 0xC0 {
            0x00 => Self::OneEighth,
            0x40 => Self::OneFourth,
            0x80 => Self::OneHalf,
            0xC0 => Self::ThreeFourths,
            _ => unreachable!("value & 0xC0 is always 0x00/0x40/0x80/0xC0"),
        }
    }

    fn register_bits(self) -> u8 {
        match self {
            Self::OneEighth => 0x00,
            Self::OneFourth => 0x40,
            Self::OneHalf => 0x80,
            Self::ThreeFourths => 0xC0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SweepUnit {
    pace: u8,
    direction: EnvelopeDirection,
    shift: u8,
    timer: u8,
    shadow_frequency: u16,
}

impl SweepUnit {
    fn new() -> Self {
        Self {
            pace: 0,
            direction: EnvelopeDirection::Increasing,
            shift: 0,
            timer: 0,
            shadow_frequency: 0,
        }
    }

    fn register_value(&self) -> u8 {
        let direction_bit = match self.direction {
            EnvelopeDirection::Decreasing => 0x08,
            EnvelopeDirection::Increasing => 0x00,
        };
        0x80 | (self.pace << 4) | direction_bit | self.shift
    }

    fn next_frequency(&self) -> u16 {
        let delta = self.shadow_frequency >> self.shift;
        match self.direction {
            EnvelopeDirection::Increasing => self.shadow_frequency + delta,
            EnvelopeDirection::Decreasing => self.shadow_frequency.saturating_sub(delta),
        }
    }
}

/// Square-wave channel (channels 1 and 2; only channel 1 has the sweep unit).
/// Output frequency is 131072 / (2048 - f) Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PulseChannel {
    channel_on: bool,
    duty_cycle: DutyCycle,
    length: LengthCounter,
    envelope: Envelope,
    frequency: u16,
    sweep: Option<SweepUnit>,
    clock: u64,
    phase_position: u8,
}

impl PulseChannel {
    pub(crate) fn new(with_sweep: bool) -> Self {
        Self {
            channel_on: false,
            duty_cycle: DutyCycle::OneEighth,
            length: LengthCounter::new(64),
            envelope: Envelope::new(),
            frequency: 0,
            sweep: with_sweep.then(SweepUnit::new),
            clock: 0,
            phase_position: 0,
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.channel_on
    }

    pub(crate) fn read_nrx0(&self) -> u8 {
        match &self.sweep {
            Some(sweep) => sweep.register_value(),
            None => 0xFF,
        }
    }

    pub(crate) fn write_nrx0(&mut self, value: u8) {
        if let Some(sweep) = &mut self.sweep {
            sweep.pace = (value & 0x70) >> 4;
            sweep.direction = if value & 0x08 != 0 {
                EnvelopeDirection::Decreasing
            } else {
                EnvelopeDirection::Increasing
            };
            sweep.shift = value & 0x07;
        }
    }

    pub(crate) fn read_nrx1(&self) -> u8 {
        self.duty_cycle.register_bits() | 0x3F
    }

    pub(crate) fn write_nrx1(&mut self, value: u8) {
        self.duty_cycle = DutyCycle::from_register_bits(value);
        self.length.load(value & 0x3F);
    }

    pub(crate) fn read_nrx2(&self) -> u8 {
        self.envelope.register_value()
    }

    pub(crate) fn write_nrx2(&mut self, value: u8) {
        self.envelope = Envelope::from_register(value);
        if !self.envelope.dac_enabled() {
            self.channel_on = false;
        }
    }

    pub(crate) fn write_nrx3(&mut self, value: u8) {
        self.frequency = (self.frequency & 0x0700) | u16::from(value);
    }

    pub(crate) fn read_nrx4(&self) -> u8 {
        if self.length.enabled() {
            0xFF
        } else {
            0xBF
        }
    }

    pub(crate) fn write_nrx4(&mut self, value: u8) {
        self.frequency = (u16::from(value & 0x07) << 8) | (self.frequency & 0x00FF);
        self.length.set_enabled(value & 0x40 != 0);

        if value & 0x80 != 0 {
            self.trigger();
        }
    }

    fn trigger(&mut self) {
        self.channel_on = self.envelope.dac_enabled();
        self.length.trigger();
        self.envelope.trigger();
        self.clock = 0;

        if let Some(sweep) = &mut self.sweep {
            sweep.shadow_frequency = self.frequency;
            sweep.timer = 0;
            // Overflow is checked immediately on trigger when shift is non-zero
            if sweep.shift > 0 && sweep.next_frequency() > 0x07FF {
                self.channel_on = false;
            }
        }
    }

    /// Advance the waveform generator by one machine cycle (4 master clocks).
    pub(crate) fn tick_m_cycle(&mut self) {
        let prev_clock = self.clock;
        self.clock += 4;

        let pulse_period = u64::from(4 * (2048 - self.frequency));
        if prev_clock / pulse_period != self.clock / pulse_period {
            self.phase_position = (self.phase_position + 1) % 8;
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

    /// 128 Hz sequencer step. Adjusts the frequency by f / 2^shift every
    /// `pace` steps; overflowing 0x7FF disables the channel.
    pub(crate) fn clock_sweep(&mut self) {
        let Some(sweep) = &mut self.sweep else { return; };

        if sweep.pace == 0 || !self.channel_on {
            return;
        }

        sweep.timer += 1;
        if sweep.timer < sweep.pace {
            return;
        }
        sweep.timer = 0;

        let new_frequency = sweep.next_frequency();
        if new_frequency > 0x07FF {
            self.channel_on = false;
        } else if sweep.shift > 0 {
            sweep.shadow_frequency = new_frequency;
            self.frequency = new_frequency;
        }
    }

    /// APU power-off: all register state is cleared except the length counter.
    pub(crate) fn power_off(&mut self) {
        let has_sweep = self.sweep.is_some();
        self.channel_on = false;
        self.duty_cycle = DutyCycle::OneEighth;
        self.envelope = Envelope::new();
        self.frequency = 0;
        self.sweep = has_sweep.then(SweepUnit::new);
        self.clock = 0;
        self.phase_position = 0;
        self.length.power_off();
    }
}

impl Channel for PulseChannel {
    fn sample_digital(&self) -> Option<u8> {
        if !self.envelope.dac_enabled() {
            return None;
        }

        if !self.channel_on {
            return Some(0);
        }

        let wave_step = self.duty_cycle.waveform()[self.phase_position as usize];
        Some(wave_step * self.envelope.volume())
    }
}
