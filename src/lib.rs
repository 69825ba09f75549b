//! Cycle-driven emulator core for the original Game Boy.
//!
//! The [`Emulator`] owns every hardware component and advances them in
//! lockstep one machine cycle (4 master clocks) at a time. Host integration
//! happens through callbacks and queues: a frame callback fired at VBlank, a
//! shared audio sample queue drained from the host's audio thread, and a
//! battery callback fired when a game closes its battery-backed RAM window.

mod apu;
mod config;
mod cpu;
mod dma;
mod interrupts;
mod joypad;
mod memory;
mod ppu;
mod serial;
mod serialize;
mod timer;

use crate::cpu::CpuRegisters;
use crate::memory::{Bus, Cartridge};

pub use apu::SampleQueue;
pub use config::CoreConfig;
pub use joypad::Button;
pub use memory::{BatteryCallback, CartridgeLoadError};
pub use ppu::{FrameBuffer, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use serialize::SaveStateError;

pub type FrameCallback = Box<dyn FnMut(&FrameBuffer)>;

pub struct Emulator {
    cpu_registers: CpuRegisters,
    bus: Bus,
    // Master clocks still owed by the instruction currently executing
    pending_clocks: u32,
    frame_callback: Option<FrameCallback>,
}

impl Emulator {
    /// Build an emulator around the given cartridge ROM image.
    ///
    /// # `CartridgeLoadError`
    ///
    /// Fails if the cartridge header is invalid (unknown mapper byte, bad
    /// ROM/RAM size code, or ROM length mismatch). No emulation state exists
    /// on failure.
    pub fn new(rom: Vec<u8>, config: CoreConfig) -> Result<Self, CartridgeLoadError> {
        log::info!("Initializing emulator with config:\n{config}");

        let cartridge = Cartridge::new(rom)?;

        let cpu_registers = if config.boot_rom.is_some() {
            CpuRegisters::new_power_on()
        } else {
            CpuRegisters::new()
        };
        let bus = Bus::new(cartridge, config.boot_rom, config.audio_sample_rate);

        Ok(Self {
            cpu_registers,
            bus,
            pending_clocks: 0,
            frame_callback: None,
        })
    }

    /// Advance the whole machine by one machine cycle (4 master clocks).
    ///
    /// The CPU executes a full step (instruction, interrupt dispatch, or idle
    /// cycle) at the start of its timing window; the PPU, OAM DMA, timer, and
    /// APU then advance in that fixed order for each cycle of the window.
    ///
    /// Returns true if the PPU completed a frame during this cycle.
    pub fn step_one_machine_cycle(&mut self) -> bool {
        if self.pending_clocks == 0 {
            self.pending_clocks = cpu::tick(&mut self.cpu_registers, &mut self.bus);
        }

        self.bus.tick_m_cycle();
        self.pending_clocks = self.pending_clocks.saturating_sub(4);

        if self.bus.ppu.poll_frame_ready() {
            if let Some(frame_callback) = &mut self.frame_callback {
                frame_callback(self.bus.ppu.front_buffer());
            }
            true
        } else {
            false
        }
    }

    /// Advance by `n` machine cycles.
    pub fn step_n_cycles(&mut self, n: u64) {
        for _ in 0..n {
            self.step_one_machine_cycle();
        }
    }

    /// Advance until the PPU hands off a completed frame. When the LCD is
    /// disabled this returns after one frame's worth of machine cycles
    /// instead (17556 cycles, 70224 master clocks).
    pub fn step_one_frame(&mut self) {
        for _ in 0..(ppu::FRAME_CLOCKS / 4) {
            if self.step_one_machine_cycle() {
                return;
            }
        }
    }

    /// Register the callback invoked with the front buffer at every VBlank.
    pub fn set_frame_callback(&mut self, frame_callback: FrameCallback) {
        self.frame_callback = Some(frame_callback);
    }

    /// Register the callback invoked with a snapshot of external RAM whenever
    /// the game disables cartridge RAM access. Runs synchronously from inside
    /// the triggering bus write, so it must be fast.
    pub fn set_battery_callback(&mut self, battery_callback: BatteryCallback) {
        self.bus.cartridge.set_battery_callback(battery_callback);
    }

    /// Handle to the queue of rendered stereo sample pairs. Safe to drain
    /// from another thread (typically the host's audio callback).
    pub fn audio_sample_queue(&self) -> SampleQueue {
        self.bus.apu.sample_queue()
    }

    /// The most recently completed frame.
    pub fn frame_buffer(&self) -> &FrameBuffer {
        self.bus.ppu.front_buffer()
    }

    /// Update one of the 8 buttons. A press edge requests the Joypad
    /// interrupt and wakes the CPU from STOP.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        if self.bus.joypad.set_pressed(button, pressed) {
            self.bus.interrupts.request(crate::interrupts::InterruptType::Joypad);
            self.cpu_registers.stopped = false;
        }
    }

    /// Load a previously saved external-RAM image. On size mismatch a warning
    /// is logged and the zeroed RAM image is kept.
    pub fn load_external_ram(&mut self, image: &[u8]) {
        self.bus.cartridge.load_ram_image(image);
    }

    /// Current contents of cartridge external RAM.
    pub fn external_ram(&self) -> &[u8] {
        self.bus.cartridge.external_ram()
    }

    /// Capture the complete emulation state as a versioned binary blob.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        serialize::save_state(&self.cpu_registers, &self.bus, self.pending_clocks)
    }

    /// Restore a state previously captured with [`Emulator::save_state`]. On
    /// any error (including a version mismatch) the current state is left
    /// untouched and emulation can continue.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let (cpu_registers, bus, pending_clocks) = serialize::load_state(bytes)?;

        let old_bus = std::mem::replace(&mut self.bus, bus);
        self.bus.move_unserializable_fields_from(old_bus);
        self.cpu_registers = cpu_registers;
        self.pending_clocks = pending_clocks;

        Ok(())
    }
}
