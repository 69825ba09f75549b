//! Behavior shared by the four sound channels: length counters, volume
//! envelopes, and the DAC on/off rule.

pub(crate) mod noise;
pub(crate) mod pulse;
pub(crate) mod wave;

use serde::{Deserialize, Serialize};
use std::cmp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum EnvelopeDirection {
    Increasing,
    Decreasing,
}

/// Volume envelope as configured through an NRx2 register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    initial_volume: u8,
    direction: EnvelopeDirection,
    period: u8,
    volume: u8,
    timer: u8,
}

impl Envelope {
    pub(crate) fn new() -> Self {
        Self {
            initial_volume: 0,
            direction: EnvelopeDirection::Decreasing,
            period: 0,
            volume: 0,
            timer: 0,
        }
    }

    pub(crate) fn from_register(byte: u8) -> Self {
        Self {
            initial_volume: byte >> 4,
            direction: if byte & 0x08 != 0 {
                EnvelopeDirection::Increasing
            } else {
                EnvelopeDirection::Decreasing
            },
            period: byte & 0x07,
            volume: byte >> 4,
            timer: 0,
        }
    }

    pub(crate) fn register_value(&self) -> u8 {
        let direction_bit = match self.direction {
            EnvelopeDirection::Increasing => 0x08,
            EnvelopeDirection::Decreasing => 0x00,
        };
        (self.initial_volume << 4) | direction_bit | self.period
    }

    /// A channel's DAC is powered whenever initial volume is non-zero or the
    /// envelope direction is increase.
    pub(crate) fn dac_enabled(&self) -> bool {
        self.initial_volume != 0 || self.direction == EnvelopeDirection::Increasing
    }

    pub(crate) fn trigger(&mut self) {
        self.volume = self.initial_volume;
        self.timer = 0;
    }

    /// 64 Hz sequencer step. Period 0 disables envelope updates.
    pub(crate) fn clock(&mut self) {
        if self.period == 0 {
            return;
        }

        self.timer += 1;
        if self.timer >= self.period {
            self.timer = 0;
            self.volume = match self.direction {
                EnvelopeDirection::Increasing => cmp::min(0x0F, self.volume + 1),
                EnvelopeDirection::Decreasing => self.volume.saturating_sub(1),
            };
        }
    }

    pub(crate) fn volume(&self) -> u8 {
        self.volume
    }
}

/// Length counter: when enabled it decrements at 256 Hz and silences the
/// channel on reaching zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LengthCounter {
    counter: u16,
    max: u16,
    enabled: bool,
}

impl LengthCounter {
    pub(crate) fn new(max: u16) -> Self {
        Self { counter: 0, max, enabled: false }
    }

    pub(crate) fn load(&mut self, value: u8) {
        self.counter = self.max - u16::from(value);
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn trigger(&mut self) {
        if self.counter == 0 {
            self.counter = self.max;
        }
    }

    /// 256 Hz sequencer step. Returns true when the counter just expired and
    /// the channel should be disabled.
    pub(crate) fn clock(&mut self) -> bool {
        if !self.enabled || self.counter == 0 {
            return false;
        }

        self.counter -= 1;
        self.counter == 0
    }

    /// APU power-off clears the enable bit but the counter value survives.
    pub(crate) fn power_off(&mut self) {
        self.enabled = false;
    }
}

pub(crate) trait Channel {
    // Digital sample in the range [0, 15]; None when the DAC is off
    fn sample_digital(&self) -> Option<u8>;

    // "Analog" sample in the range [-1, 1]
    fn sample_analog(&self) -> f64 {
        let Some(digital_sample) = self.sample_digital() else { return 0.0; };

        (f64::from(digital_sample) - 7.5) / 7.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_decreases_after_period_steps() {
        let mut envelope = Envelope::from_register(0xF3);
        envelope.trigger();
        assert_eq!(0x0F, envelope.volume());

        // Period 3: exactly one decrement after three 64 Hz steps
        envelope.clock();
        envelope.clock();
        assert_eq!(0x0F, envelope.volume());

        envelope.clock();
        assert_eq!(0x0E, envelope.volume());

        envelope.clock();
        envelope.clock();
        assert_eq!(0x0E, envelope.volume());
    }

    #[test]
    fn envelope_saturates() {
        let mut envelope = Envelope::from_register(0x19);
        envelope.trigger();
        assert_eq!(0x01, envelope.volume());

        envelope.clock();
        assert_eq!(0x00, envelope.volume());

        envelope.clock();
        assert_eq!(0x00, envelope.volume());

        let mut envelope = Envelope::from_register(0xE9);
        envelope.trigger();
        envelope.clock();
        assert_eq!(0x0F, envelope.volume());
        envelope.clock();
        assert_eq!(0x0F, envelope.volume());
    }

    #[test]
    fn dac_enable_rule() {
        assert!(!Envelope::from_register(0x00).dac_enabled());
        assert!(Envelope::from_register(0x08).dac_enabled());
        assert!(Envelope::from_register(0x10).dac_enabled());
        assert!(!Envelope::from_register(0x07).dac_enabled());
    }

    #[test]
    fn length_counter_expiry() {
        let mut length = LengthCounter::new(64);
        length.load(62);
        length.set_enabled(true);

        assert!(!length.clock());
        assert!(length.clock());
        // Already expired: no further disable events
        assert!(!length.clock());
    }

    #[test]
    fn length_counter_disabled_does_not_tick() {
        let mut length = LengthCounter::new(64);
        length.load(63);

        assert!(!length.clock());
        assert!(!length.clock());

        length.set_enabled(true);
        assert!(length.clock());
    }

    #[test]
    fn trigger_reloads_expired_counter() {
        let mut length = LengthCounter::new(64);
        length.load(63);
        length.set_enabled(true);
        assert!(length.clock());

        length.trigger();
        for _ in 0..63 {
            assert!(!length.clock());
        }
        assert!(length.clock());
    }
}
