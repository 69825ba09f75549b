mod channels;

use crate::memory::address;
use channels::noise::NoiseChannel;
use channels::pulse::PulseChannel;
use channels::wave::WaveChannel;
use channels::Channel;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const MASTER_CLOCK_SPEED: u64 = 4 * 1024 * 1024;

// Keep at most ~85ms of stereo samples queued at 48000Hz if the host stops
// draining
const MAX_QUEUED_SAMPLES: usize = 8192;

pub type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

/// The four-channel APU. A 512 Hz frame sequencer, clocked from falling edges
/// of DIV bit 4, drives length counters (256 Hz, steps 0/2/4/6), the channel 1
/// sweep (128 Hz, steps 2/6), and volume envelopes (64 Hz, step 7). Rendered
/// stereo sample pairs are pushed into a shared queue that the host's audio
/// thread drains.
#[derive(Serialize, Deserialize)]
pub struct ApuState {
    enabled: bool,
    last_divider: u8,
    frame_sequencer_step: u8,
    clock_ticks: u64,
    sample_rate: u32,
    channel_1: PulseChannel,
    channel_2: PulseChannel,
    channel_3: WaveChannel,
    channel_4: NoiseChannel,
    nr50: u8,
    nr51: u8,
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    wave_ram: [u8; 16],
    #[serde(skip)]
    sample_queue: SampleQueue,
}

impl ApuState {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            enabled: false,
            last_divider: 0x00,
            frame_sequencer_step: 0,
            clock_ticks: 0,
            sample_rate,
            channel_1: PulseChannel::new(true),
            channel_2: PulseChannel::new(false),
            channel_3: WaveChannel::new(),
            channel_4: NoiseChannel::new(),
            nr50: 0x00,
            nr51: 0x00,
            wave_ram: [0; 16],
            sample_queue: SampleQueue::default(),
        }
    }

    /// Register values left behind by the boot ROM, for hosts that skip it.
    pub fn apply_post_boot_defaults(&mut self) {
        self.enabled = true;
        self.nr50 = 0x77;
        self.nr51 = 0xF3;
        self.channel_1.write_nrx1(0xBF);
        self.channel_1.write_nrx2(0xF3);
    }

    pub fn sample_queue(&self) -> SampleQueue {
        Arc::clone(&self.sample_queue)
    }

    pub fn read_register(&self, reg_address: u16) -> u8 {
        match reg_address {
            0xFF10 => self.channel_1.read_nrx0(),
            0xFF11 => self.channel_1.read_nrx1(),
            0xFF12 => self.channel_1.read_nrx2(),
            0xFF13 => 0xFF,
            0xFF14 => self.channel_1.read_nrx4(),
            0xFF16 => self.channel_2.read_nrx1(),
            0xFF17 => self.channel_2.read_nrx2(),
            0xFF18 => 0xFF,
            0xFF19 => self.channel_2.read_nrx4(),
            0xFF1A => self.channel_3.read_nr30(),
            0xFF1B => 0xFF,
            0xFF1C => self.channel_3.read_nr32(),
            0xFF1D => 0xFF,
            0xFF1E => self.channel_3.read_nr34(),
            0xFF20 => 0xFF,
            0xFF21 => self.channel_4.read_nr42(),
            0xFF22 => self.channel_4.read_nr43(),
            0xFF23 => self.channel_4.read_nr44(),
            0xFF24 => self.nr50,
            0xFF25 => self.nr51,
            address::NR52 => {
                0x70 | (u8::from(self.enabled) << 7)
                    | (u8::from(self.channel_4.enabled()) << 3)
                    | (u8::from(self.channel_3.enabled()) << 2)
                    | (u8::from(self.channel_2.enabled()) << 1)
                    | u8::from(self.channel_1.enabled())
            }
            address::WAVE_RAM_START..=address::WAVE_RAM_END => {
                self.wave_ram[(reg_address - address::WAVE_RAM_START) as usize]
            }
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, reg_address: u16, value: u8) {
        // While powered off only NR52 and wave RAM respond
        if !self.enabled
            && reg_address != address::NR52
            && !(address::WAVE_RAM_START..=address::WAVE_RAM_END).contains(&reg_address)
        {
            log::trace!("APU register write of {value:02X} to {reg_address:04X} ignored, APU off");
            return;
        }

        match reg_address {
            0xFF10 => self.channel_1.write_nrx0(value),
            0xFF11 => self.channel_1.write_nrx1(value),
            0xFF12 => self.channel_1.write_nrx2(value),
            0xFF13 => self.channel_1.write_nrx3(value),
            0xFF14 => self.channel_1.write_nrx4(value),
            0xFF16 => self.channel_2.write_nrx1(value),
            0xFF17 => self.channel_2.write_nrx2(value),
            0xFF18 => self.channel_2.write_nrx3(value),
            0xFF19 => self.channel_2.write_nrx4(value),
            0xFF1A => self.channel_3.write_nr30(value),
            0xFF1B => self.channel_3.write_nr31(value),
            0xFF1C => self.channel_3.write_nr32(value),
            0xFF1D => self.channel_3.write_nr33(value),
            0xFF1E => self.channel_3.write_nr34(value),
            0xFF20 => self.channel_4.write_nr41(value),
            0xFF21 => self.channel_4.write_nr42(value),
            0xFF22 => self.channel_4.write_nr43(value),
            0xFF23 => self.channel_4.write_nr44(value),
            0xFF24 => self.nr50 = value,
            0xFF25 => self.nr51 = value,
            address::NR52 => {
                let enable = value & 0x80 != 0;
                if self.enabled && !enable {
                    self.power_off();
                } else if !self.enabled && enable {
                    self.enabled = true;
                    self.frame_sequencer_step = 0;
                }
            }
            address::WAVE_RAM_START..=address::WAVE_RAM_END => {
                self.wave_ram[(reg_address - address::WAVE_RAM_START) as usize] = value;
            }
            _ => {}
        }
    }

    /// NR52 bit 7 cleared: all channels are disabled and every APU register
    /// is zeroed except the length counters and wave RAM.
    fn power_off(&mut self) {
        self.enabled = false;
        self.channel_1.power_off();
        self.channel_2.power_off();
        self.channel_3.power_off();
        self.channel_4.power_off();
        self.nr50 = 0x00;
        self.nr51 = 0x00;
    }

    /// Advance the APU by one machine cycle: channel waveform generators, the
    /// frame sequencer (from DIV bit 4 falling edges), and the output sample
    /// accumulator.
    pub fn tick_m_cycle(&mut self, divider: u8) {
        let prev_clock = self.clock_ticks;
        self.clock_ticks += 4;

        if self.enabled {
            self.channel_1.tick_m_cycle();
            self.channel_2.tick_m_cycle();
            self.channel_3.tick_m_cycle(&self.wave_ram);
            self.channel_4.tick_m_cycle();

            if self.last_divider & 0x10 != 0 && divider & 0x10 == 0 {
                self.clock_frame_sequencer();
            }
        }
        self.last_divider = divider;

        if self.should_sample(prev_clock) {
            let (sample_l, sample_r) = if self.enabled { self.sample() } else { (0, 0) };

            let mut sample_queue = self.sample_queue.lock().unwrap();
            sample_queue.push_back(sample_l);
            sample_queue.push_back(sample_r);

            while sample_queue.len() > MAX_QUEUED_SAMPLES {
                sample_queue.pop_front();
            }
        }
    }

    fn clock_frame_sequencer(&mut self) {
        let step = self.frame_sequencer_step;
        self.frame_sequencer_step = (step + 1) % 8;

        if step % 2 == 0 {
            self.channel_1.clock_length();
            self.channel_2.clock_length();
            self.channel_3.clock_length();
            self.channel_4.clock_length();
        }

        if step == 2 || step == 6 {
            self.channel_1.clock_sweep();
        }

        if step == 7 {
            self.channel_1.clock_envelope();
            self.channel_2.clock_envelope();
            self.channel_4.clock_envelope();
        }
    }

    fn should_sample(&self, prev_clock_ticks: u64) -> bool {
        let rate = u64::from(self.sample_rate);
        prev_clock_ticks * rate / MASTER_CLOCK_SPEED != self.clock_ticks * rate / MASTER_CLOCK_SPEED
    }

    fn sample(&self) -> (i16, i16) {
        let mut sample_l = 0.0;
        let mut sample_r = 0.0;

        let ch1_sample = self.channel_1.sample_analog();
        sample_l += ch1_sample * f64::from(self.nr51 & 0x10 != 0);
        sample_r += ch1_sample * f64::from(self.nr51 & 0x01 != 0);

        let ch2_sample = self.channel_2.sample_analog();
        sample_l += ch2_sample * f64::from(self.nr51 & 0x20 != 0);
        sample_r += ch2_sample * f64::from(self.nr51 & 0x02 != 0);

        let ch3_sample = self.channel_3.sample_analog();
        sample_l += ch3_sample * f64::from(self.nr51 & 0x40 != 0);
        sample_r += ch3_sample * f64::from(self.nr51 & 0x04 != 0);

        let ch4_sample = self.channel_4.sample_analog();
        sample_l += ch4_sample * f64::from(self.nr51 & 0x80 != 0);
        sample_r += ch4_sample * f64::from(self.nr51 & 0x08 != 0);

        let l_volume = ((self.nr50 & 0x70) >> 4) + 1;
        let r_volume = (self.nr50 & 0x07) + 1;

        // Map [-4, 4] to [-30000, 30000] and apply L/R volume multipliers
        let sample_l = (sample_l / 4.0 * 30000.0 * f64::from(l_volume) / 8.0).round() as i16;
        let sample_r = (sample_r / 4.0 * 30000.0 * f64::from(r_volume) / 8.0).round() as i16;

        (sample_l, sample_r)
    }

    pub(crate) fn move_unserializable_fields_from(&mut self, other: Self) {
        self.sample_queue = other.sample_queue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered_apu() -> ApuState {
        let mut apu = ApuState::new(48000);
        apu.write_register(address::NR52, 0x80);
        apu
    }

    // Alternate DIV bit 4 to produce `count` frame sequencer ticks
    fn pulse_frame_sequencer(apu: &mut ApuState, count: u32) {
        for _ in 0..count {
            apu.tick_m_cycle(0x10);
            apu.tick_m_cycle(0x00);
        }
    }

    #[test]
    fn nr52_reports_power_and_channel_status() {
        let mut apu = powered_apu();
        assert_eq!(0xF0, apu.read_register(address::NR52));

        apu.write_register(0xFF12, 0xF0);
        apu.write_register(0xFF14, 0x80);
        assert_eq!(0xF1, apu.read_register(address::NR52));

        apu.write_register(address::NR52, 0x00);
        assert_eq!(0x70, apu.read_register(address::NR52));
    }

    #[test]
    fn power_off_masks_all_registers() {
        let mut apu = powered_apu();

        apu.write_register(0xFF10, 0x5E);
        apu.write_register(0xFF11, 0x81);
        apu.write_register(0xFF12, 0xF3);
        apu.write_register(0xFF17, 0xA5);
        apu.write_register(0xFF1A, 0x80);
        apu.write_register(0xFF22, 0x5A);
        apu.write_register(0xFF24, 0x77);
        apu.write_register(0xFF25, 0xF3);

        apu.write_register(address::NR52, 0x00);

        // Documented "APU off" read masks: every register reads as if zeroed
        assert_eq!(0x80, apu.read_register(0xFF10));
        assert_eq!(0x3F, apu.read_register(0xFF11));
        assert_eq!(0x00, apu.read_register(0xFF12));
        assert_eq!(0xFF, apu.read_register(0xFF13));
        assert_eq!(0xBF, apu.read_register(0xFF14));
        assert_eq!(0x3F, apu.read_register(0xFF16));
        assert_eq!(0x00, apu.read_register(0xFF17));
        assert_eq!(0x7F, apu.read_register(0xFF1A));
        assert_eq!(0x9F, apu.read_register(0xFF1C));
        assert_eq!(0xBF, apu.read_register(0xFF1E));
        assert_eq!(0x00, apu.read_register(0xFF21));
        assert_eq!(0x00, apu.read_register(0xFF22));
        assert_eq!(0xBF, apu.read_register(0xFF23));
        assert_eq!(0x00, apu.read_register(0xFF24));
        assert_eq!(0x00, apu.read_register(0xFF25));
    }

    #[test]
    fn writes_ignored_while_powered_off() {
        let mut apu = ApuState::new(48000);

        apu.write_register(0xFF12, 0xF3);
        assert_eq!(0x00, apu.read_register(0xFF12));

        // Wave RAM stays writable
        apu.write_register(0xFF30, 0xAB);
        assert_eq!(0xAB, apu.read_register(0xFF30));
    }

    #[test]
    fn wave_ram_survives_power_cycle() {
        let mut apu = powered_apu();

        apu.write_register(0xFF30, 0x12);
        apu.write_register(0xFF3F, 0x34);

        apu.write_register(address::NR52, 0x00);
        apu.write_register(address::NR52, 0x80);

        assert_eq!(0x12, apu.read_register(0xFF30));
        assert_eq!(0x34, apu.read_register(0xFF3F));
    }

    #[test]
    fn envelope_decreases_at_64hz() {
        let mut apu = powered_apu();

        // Channel 1: duty 25%, frequency 0x6C1, envelope F decreasing with
        // period 3
        apu.write_register(0xFF11, 0x40);
        apu.write_register(0xFF12, 0xF3);
        apu.write_register(0xFF13, 0xC1);
        apu.write_register(0xFF14, 0x86);

        assert_eq!(0xF3, apu.read_register(0xFF12));
        assert_eq!(0xF1, apu.read_register(address::NR52));

        // 3/64 s = 24 frame sequencer ticks (3 envelope steps at period 3
        // means exactly one decrement)
        pulse_frame_sequencer(&mut apu, 24);

        // The envelope's register view keeps the initial volume; observe the
        // decrement through the mixed output amplitude instead
        let volume = current_channel_1_volume(&apu);
        assert_eq!(0x0E, volume);
    }

    fn current_channel_1_volume(apu: &ApuState) -> u8 {
        // Walk the duty waveform until a high step is sampled
        let mut channel = apu.channel_1.clone();
        for _ in 0..2048 * 8 {
            channel.tick_m_cycle();
            if let Some(sample) = channel.sample_digital() {
                if sample != 0 {
                    return sample;
                }
            }
        }
        0
    }

    #[test]
    fn length_counter_at_256hz() {
        let mut apu = powered_apu();

        apu.write_register(0xFF12, 0xF0);
        apu.write_register(0xFF11, 0x3E); // length 62 -> 2 steps
        apu.write_register(0xFF14, 0xC0); // trigger with length enabled

        assert_eq!(0xF1, apu.read_register(address::NR52));

        // Length clocks on every second sequencer tick (steps 0, 2, 4, 6)
        pulse_frame_sequencer(&mut apu, 4);
        assert_eq!(0xF0, apu.read_register(address::NR52));
    }

    #[test]
    fn samples_accumulate_at_output_rate() {
        let mut apu = powered_apu();
        let queue = apu.sample_queue();

        // One second of emulated time
        for _ in 0..(MASTER_CLOCK_SPEED / 4) {
            apu.tick_m_cycle(0x00);
        }

        // Queue is bounded, so just verify samples were produced and capped
        let queue = queue.lock().unwrap();
        assert!(!queue.is_empty());
        assert!(queue.len() <= MAX_QUEUED_SAMPLES + 2);
    }
}
