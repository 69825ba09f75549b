pub mod address;
mod mapper;
mod mmio;

use crate::apu::ApuState;
use crate::dma::OamDma;
use crate::interrupts::InterruptLine;
use crate::joypad::JoypadState;
use crate::memory::mapper::{Mapper, RamMapResult};
use crate::ppu::{self, PpuMode, PpuState};
use crate::serial::SerialPort;
use crate::timer::TimerState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CartridgeLoadError {
    #[error("header should be at least 336 bytes, was {header_len} bytes")]
    HeaderTooShort { header_len: usize },
    #[error("invalid or unsupported mapper byte in cartridge header: {mapper_byte:02X}")]
    InvalidMapper { mapper_byte: u8 },
    #[error("invalid ROM size code, expected 0-8: {rom_size_code}")]
    InvalidRomSize { rom_size_code: u8 },
    #[error("ROM is {actual} bytes but the header size code implies {expected} bytes")]
    RomSizeMismatch { expected: u32, actual: usize },
    #[error("invalid RAM size code, expected 0 or 2-5: {ram_size_code}")]
    InvalidRamSize { ram_size_code: u8 },
}

pub type BatteryCallback = Box<dyn FnMut(&[u8])>;

#[derive(Serialize, Deserialize)]
pub struct Cartridge {
    #[serde(skip)]
    rom: Vec<u8>,
    mapper: Mapper,
    ram: Vec<u8>,
    has_battery: bool,
    #[serde(skip)]
    battery_callback: Option<BatteryCallback>,
}

impl Cartridge {
    /// Create a new Cartridge value from the given ROM image.
    ///
    /// # `CartridgeLoadError`
    ///
    /// This function will return an error in the following scenarios:
    /// * The ROM is too short (must be at least 0x150 bytes)
    /// * The mapper byte in the cartridge header is invalid (or not implemented)
    /// * The ROM size byte is invalid or does not match the actual ROM length
    /// * The RAM size byte in the cartridge header is invalid
    pub fn new(rom: Vec<u8>) -> Result<Self, CartridgeLoadError> {
        log::info!("Initializing cartridge using {} bytes of data", rom.len());

        if rom.len() < 0x0150 {
            return Err(CartridgeLoadError::HeaderTooShort { header_len: rom.len() });
        }

        let title_bytes = &rom[address::TITLE_START as usize..=address::TITLE_END as usize];
        let title_len = title_bytes.iter().position(|&b| b == 0x00).unwrap_or(title_bytes.len());
        let title = String::from_utf8_lossy(&title_bytes[..title_len]).into_owned();
        log::info!("Cartridge title: '{title}'");

        let mapper_byte = rom[address::MAPPER as usize];
        let Some((mapper_type, mapper_features)) = mapper::parse_byte(mapper_byte) else {
            return Err(CartridgeLoadError::InvalidMapper { mapper_byte });
        };

        log::info!("Detected mapper type {mapper_type:?} (byte: {mapper_byte:02X})");
        log::info!("Mapper features: {mapper_features}");

        let rom_size_code = rom[address::ROM_SIZE as usize];
        if rom_size_code > 0x08 {
            return Err(CartridgeLoadError::InvalidRomSize { rom_size_code });
        }
        let expected_rom_size = 32768_u32 << rom_size_code;
        if rom.len() != expected_rom_size as usize {
            return Err(CartridgeLoadError::RomSizeMismatch {
                expected: expected_rom_size,
                actual: rom.len(),
            });
        }

        let ram = if mapper_features.has_ram {
            let ram_size_code = rom[address::RAM_SIZE as usize];
            let ram_size: usize = match ram_size_code {
                0x00 => 0,
                0x02 => 8192,   // 8 KB
                0x03 => 32768,  // 32 KB
                0x04 => 131072, // 128 KB
                0x05 => 65536,  // 64 KB
                _ => return Err(CartridgeLoadError::InvalidRamSize { ram_size_code }),
            };
            vec![0; ram_size]
        } else {
            Vec::new()
        };

        let mapper = Mapper::new(mapper_type, mapper_features, rom.len() as u32, ram.len() as u32);

        log::info!("Cartridge has {} bytes of external RAM", ram.len());
        log::info!("Cartridge has battery: {}", mapper_features.has_battery);

        Ok(Self {
            rom,
            mapper,
            ram,
            has_battery: mapper_features.has_battery,
            battery_callback: None,
        })
    }

    /// Read a value from the given ROM address.
    ///
    /// # Panics
    ///
    /// This method will panic if the ROM address is invalid. ROM addresses must
    /// be in the range \[0x0000, 0x7FFF\].
    pub fn read_rom_address(&self, address: u16) -> u8 {
        let mapped_address = self.mapper.map_rom_address(address);
        self.rom.get(mapped_address as usize).copied().unwrap_or(0xFF)
    }

    /// Write a value to the given ROM address (or in reality, latch a
    /// cartridge bank register). Turning RAM-enable off emits a snapshot of
    /// external RAM through the battery callback.
    pub fn write_rom_address(&mut self, address: u16, value: u8) {
        let was_enabled = self.mapper.ram_enabled();
        self.mapper.write_rom_address(address, value);

        if was_enabled && !self.mapper.ram_enabled() && self.has_battery && !self.ram.is_empty() {
            if let Some(battery_callback) = &mut self.battery_callback {
                battery_callback(&self.ram);
            }
        }
    }

    /// Read a value from the given cartridge RAM address. Returns 0xFF if the
    /// address is not valid or RAM is disabled.
    pub fn read_ram_address(&self, address: u16) -> u8 {
        match self.mapper.map_ram_address(address) {
            RamMapResult::RamAddress(mapped_address) => {
                self.ram.get(mapped_address as usize).copied().unwrap_or(0xFF)
            }
            RamMapResult::MapperRegister => {
                self.mapper.read_ram_addressed_register().unwrap_or(0xFF)
            }
            RamMapResult::None => 0xFF,
        }
    }

    /// Write a value to the given cartridge RAM address. Does nothing if the
    /// address is not valid or RAM is disabled.
    pub fn write_ram_address(&mut self, address: u16, value: u8) {
        match self.mapper.map_ram_address(address) {
            RamMapResult::RamAddress(mapped_address) => {
                if let Some(ram_value) = self.ram.get_mut(mapped_address as usize) {
                    *ram_value = value;
                }
            }
            RamMapResult::MapperRegister => {
                self.mapper.write_ram_addressed_register(value);
            }
            RamMapResult::None => {}
        }
    }

    /// Replace external RAM contents with a previously saved image. On size
    /// mismatch the image is rejected and the zeroed RAM is kept.
    pub fn load_ram_image(&mut self, image: &[u8]) {
        if image.len() != self.ram.len() {
            log::warn!(
                "save RAM image is {} bytes but cartridge has {} bytes of RAM, ignoring",
                image.len(),
                self.ram.len()
            );
            return;
        }

        self.ram.copy_from_slice(image);
        log::info!("Loaded {} bytes of external RAM", image.len());
    }

    pub fn set_battery_callback(&mut self, callback: BatteryCallback) {
        self.battery_callback = Some(callback);
    }

    pub fn external_ram(&self) -> &[u8] {
        &self.ram
    }

    fn move_unserializable_fields_from(&mut self, other: Self) {
        self.rom = other.rom;
        self.battery_callback = other.battery_callback;
    }
}

/// The memory bus: owns every piece of addressable hardware state and routes
/// CPU reads/writes to the right component. Also drives the non-CPU hardware
/// forward in lockstep, one machine cycle at a time.
#[derive(Serialize, Deserialize)]
pub struct Bus {
    pub(crate) cartridge: Cartridge,
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    vram: [u8; 8192],
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    wram: [u8; 8192],
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    oam: [u8; 160],
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    hram: [u8; 127],
    #[serde(skip)]
    boot_rom: Option<Vec<u8>>,
    boot_rom_enabled: bool,
    pub(crate) ppu: PpuState,
    pub(crate) apu: ApuState,
    pub(crate) timer: TimerState,
    pub(crate) interrupts: InterruptLine,
    pub(crate) joypad: JoypadState,
    pub(crate) serial: SerialPort,
    pub(crate) dma: OamDma,
    // One bit per MMIO address that has already produced an
    // unimplemented-register warning
    #[serde(skip)]
    warned_mmio: u128,
}

impl Bus {
    pub fn new(cartridge: Cartridge, boot_rom: Option<Vec<u8>>, audio_sample_rate: u32) -> Self {
        let boot_rom_enabled = boot_rom.is_some();

        let mut bus = Self {
            cartridge,
            vram: [0; 8192],
            wram: [0; 8192],
            oam: [0; 160],
            hram: [0; 127],
            boot_rom,
            boot_rom_enabled,
            ppu: PpuState::new(),
            apu: ApuState::new(audio_sample_rate),
            timer: TimerState::new(),
            interrupts: InterruptLine::new(),
            joypad: JoypadState::new(),
            serial: SerialPort::new(),
            dma: OamDma::new(),
            warned_mmio: 0,
        };

        if !bus.boot_rom_enabled {
            bus.ppu.apply_post_boot_defaults();
            bus.apu.apply_post_boot_defaults();
        }

        bus
    }

    fn is_hram_address(address: u16) -> bool {
        (address::HRAM_START..=address::HRAM_END).contains(&address)
    }

    fn is_ppu_access_blocked(&self, address: u16) -> bool {
        // OAM is inaccessible while the PPU is scanning OAM or rendering
        if self.ppu.enabled()
            && matches!(self.ppu.mode(), PpuMode::ScanningOam | PpuMode::Rendering)
            && (address::OAM_START..=address::OAM_END).contains(&address)
        {
            return true;
        }

        // VRAM is inaccessible while the PPU is rendering a line
        self.ppu.enabled()
            && self.ppu.mode() == PpuMode::Rendering
            && (address::VRAM_START..=address::VRAM_END).contains(&address)
    }

    fn is_cpu_read_allowed(&self, address: u16) -> bool {
        // Only HRAM is reachable while an OAM DMA transfer is running
        if self.dma.is_active() && !Self::is_hram_address(address) {
            return false;
        }

        !self.is_ppu_access_blocked(address)
    }

    fn is_cpu_write_allowed(&self, address: u16) -> bool {
        // The DMA register itself stays writable during a transfer (the write
        // restarts the transfer); everything else outside HRAM is cut off
        if self.dma.is_active() && !Self::is_hram_address(address) && address != address::DMA {
            return false;
        }

        !self.is_ppu_access_blocked(address)
    }

    /// Read the value at the given address from the perspective of the CPU.
    /// Returns 0xFF if the CPU cannot currently access the address because of
    /// PPU mode or an in-flight OAM DMA transfer.
    pub fn read(&mut self, address: u16) -> u8 {
        if !self.is_cpu_read_allowed(address) {
            return 0xFF;
        }

        self.read_no_access_check(address)
    }

    /// Assign a value to the given address from the perspective of the CPU.
    /// The write is dropped if the CPU cannot currently access the address.
    pub fn write(&mut self, address: u16, value: u8) {
        if !self.is_cpu_write_allowed(address) {
            log::warn!("CPU write of {value:02X} to {address:04X} dropped, address inaccessible");
            return;
        }

        self.write_no_access_check(address, value);
    }

    /// Read the value at the given address and the following address as a
    /// little-endian 16-bit value.
    pub fn read_u16(&mut self, address: u16) -> u16 {
        let lsb = self.read(address);
        let msb = self.read(address.wrapping_add(1));
        u16::from_le_bytes([lsb, msb])
    }

    /// Assign a 16-bit value to the given address and the following address,
    /// using little-endian byte order.
    pub fn write_u16(&mut self, address: u16, value: u16) {
        let [lsb, msb] = value.to_le_bytes();
        self.write(address, lsb);
        self.write(address.wrapping_add(1), msb);
    }

    fn read_no_access_check(&mut self, address: u16) -> u8 {
        match address {
            address @ address::ROM_START..=address::ROM_END => {
                if self.boot_rom_enabled && address <= address::BOOT_ROM_END {
                    if let Some(boot_rom) = &self.boot_rom {
                        return boot_rom.get(address as usize).copied().unwrap_or(0xFF);
                    }
                }
                self.cartridge.read_rom_address(address)
            }
            address @ address::VRAM_START..=address::VRAM_END => {
                self.vram[(address - address::VRAM_START) as usize]
            }
            address @ address::EXTERNAL_RAM_START..=address::EXTERNAL_RAM_END => {
                self.cartridge.read_ram_address(address)
            }
            address @ address::WORKING_RAM_START..=address::WORKING_RAM_END => {
                self.wram[(address - address::WORKING_RAM_START) as usize]
            }
            address @ address::ECHO_RAM_START..=address::ECHO_RAM_END => {
                self.wram[(address - address::ECHO_RAM_START) as usize]
            }
            address @ address::OAM_START..=address::OAM_END => {
                self.oam[(address - address::OAM_START) as usize]
            }
            _address @ address::UNUSABLE_START..=address::UNUSABLE_END => 0xFF,
            address @ address::IO_REGISTERS_START..=address::IO_REGISTERS_END => {
                self.mmio_read(address)
            }
            address @ address::HRAM_START..=address::HRAM_END => {
                self.hram[(address - address::HRAM_START) as usize]
            }
            address::IE_REGISTER => self.interrupts.read_enable(),
        }
    }

    fn write_no_access_check(&mut self, address: u16, value: u8) {
        match address {
            address @ address::ROM_START..=address::ROM_END => {
                self.cartridge.write_rom_address(address, value);
            }
            address @ address::VRAM_START..=address::VRAM_END => {
                self.vram[(address - address::VRAM_START) as usize] = value;
            }
            address @ address::EXTERNAL_RAM_START..=address::EXTERNAL_RAM_END => {
                self.cartridge.write_ram_address(address, value);
            }
            address @ address::WORKING_RAM_START..=address::WORKING_RAM_END => {
                self.wram[(address - address::WORKING_RAM_START) as usize] = value;
            }
            address @ address::ECHO_RAM_START..=address::ECHO_RAM_END => {
                self.wram[(address - address::ECHO_RAM_START) as usize] = value;
            }
            address @ address::OAM_START..=address::OAM_END => {
                self.oam[(address - address::OAM_START) as usize] = value;
            }
            _address @ address::UNUSABLE_START..=address::UNUSABLE_END => {}
            address @ address::IO_REGISTERS_START..=address::IO_REGISTERS_END => {
                self.mmio_write(address, value);
            }
            address @ address::HRAM_START..=address::HRAM_END => {
                self.hram[(address - address::HRAM_START) as usize] = value;
            }
            address::IE_REGISTER => {
                self.interrupts.write_enable(value);
            }
        }
    }

    /// Advance all non-CPU hardware by one machine cycle, in a fixed order:
    /// PPU (4 master clocks), OAM DMA (1 byte), timer (+4 with overflow
    /// pulse), APU sample accumulator.
    pub fn tick_m_cycle(&mut self) {
        ppu::tick_m_cycle(&mut self.ppu, &self.vram, &self.oam, &mut self.interrupts);

        self.progress_oam_dma();

        self.timer.tick_m_cycle(&mut self.interrupts);

        let divider = self.timer.read_div();
        self.apu.tick_m_cycle(divider);
    }

    fn progress_oam_dma(&mut self) {
        if let Some((source, oam_index)) = self.dma.next_copy() {
            let byte = self.read_no_access_check(source);
            self.oam[oam_index as usize] = byte;
        }
    }

    pub(crate) fn disable_boot_rom(&mut self) {
        if self.boot_rom_enabled {
            log::info!("Boot ROM disabled");
        }
        self.boot_rom_enabled = false;
    }

    pub(crate) fn move_unserializable_fields_from(&mut self, other: Self) {
        self.cartridge.move_unserializable_fields_from(other.cartridge);
        self.boot_rom = other.boot_rom;
        self.apu.move_unserializable_fields_from(other.apu);
        self.warned_mmio = other.warned_mmio;
    }

    pub(crate) fn warn_unimplemented_mmio(&mut self, address: u16, write: bool) {
        let bit = 1_u128 << (address - address::IO_REGISTERS_START);
        if self.warned_mmio & bit == 0 {
            self.warned_mmio |= bit;
            let direction = if write { "write to" } else { "read from" };
            log::warn!("unimplemented MMIO register, {direction} {address:04X}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppu::test_support;

    pub(crate) fn test_cartridge() -> Cartridge {
        // 32KB ROM, no mapper
        let mut rom = vec![0; 0x8000];
        rom[address::ROM_SIZE as usize] = 0x00;
        Cartridge::new(rom).expect("synthesized test ROM should be valid")
    }

    pub(crate) fn test_cartridge_with_ram() -> Cartridge {
        // 64KB ROM, MBC1 with 8KB battery-backed RAM
        let mut rom = vec![0; 0x10000];
        rom[address::MAPPER as usize] = 0x03;
        rom[address::ROM_SIZE as usize] = 0x01;
        rom[address::RAM_SIZE as usize] = 0x02;
        Cartridge::new(rom).expect("synthesized test ROM should be valid")
    }

    fn test_bus() -> Bus {
        Bus::new(test_cartridge(), None, 48000)
    }

    #[test]
    fn cartridge_header_validation() {
        assert!(matches!(
            Cartridge::new(vec![0; 0x100]),
            Err(CartridgeLoadError::HeaderTooShort { .. })
        ));

        let mut rom = vec![0; 0x8000];
        rom[address::MAPPER as usize] = 0x42;
        assert!(matches!(
            Cartridge::new(rom),
            Err(CartridgeLoadError::InvalidMapper { mapper_byte: 0x42 })
        ));

        let mut rom = vec![0; 0x8000];
        rom[address::ROM_SIZE as usize] = 0x09;
        assert!(matches!(
            Cartridge::new(rom),
            Err(CartridgeLoadError::InvalidRomSize { rom_size_code: 0x09 })
        ));

        // Header says 64KB but the image is 32KB
        let mut rom = vec![0; 0x8000];
        rom[address::ROM_SIZE as usize] = 0x01;
        assert!(matches!(
            Cartridge::new(rom),
            Err(CartridgeLoadError::RomSizeMismatch { expected: 0x10000, actual: 0x8000 })
        ));

        let mut rom = vec![0; 0x8000];
        rom[address::MAPPER as usize] = 0x02;
        rom[address::RAM_SIZE as usize] = 0x01;
        assert!(matches!(
            Cartridge::new(rom),
            Err(CartridgeLoadError::InvalidRamSize { ram_size_code: 0x01 })
        ));
    }

    #[test]
    fn working_ram_and_echo() {
        let mut bus = test_bus();

        bus.write(0xC123, 0xAB);
        assert_eq!(0xAB, bus.read(0xC123));
        assert_eq!(0xAB, bus.read(0xE123));

        bus.write(0xE456, 0xCD);
        assert_eq!(0xCD, bus.read(0xC456));
    }

    #[test]
    fn unusable_region_reads_ff() {
        let mut bus = test_bus();

        bus.write(0xFEA0, 0x12);
        assert_eq!(0xFF, bus.read(0xFEA0));
        assert_eq!(0xFF, bus.read(0xFEFF));
    }

    #[test]
    fn external_ram_round_trip() {
        let mut bus = Bus::new(test_cartridge_with_ram(), None, 48000);

        // RAM disabled: writes dropped, reads 0xFF
        bus.write(0xA000, 0x55);
        assert_eq!(0xFF, bus.read(0xA000));

        // Enable RAM
        bus.write(0x0000, 0x0A);
        bus.write(0xA000, 0x55);
        assert_eq!(0x55, bus.read(0xA000));

        // Disable again
        bus.write(0x0000, 0x00);
        assert_eq!(0xFF, bus.read(0xA000));
    }

    #[test]
    fn battery_snapshot_on_ram_disable() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut bus = Bus::new(test_cartridge_with_ram(), None, 48000);

        let snapshot: Rc<RefCell<Vec<u8>>> = Rc::default();
        let snapshot_handle = Rc::clone(&snapshot);
        bus.cartridge.set_battery_callback(Box::new(move |ram| {
            *snapshot_handle.borrow_mut() = ram.to_vec();
        }));

        bus.write(0x0000, 0x0A);
        bus.write(0xA000, 0x99);
        assert!(snapshot.borrow().is_empty());

        bus.write(0x0000, 0x00);
        assert_eq!(8192, snapshot.borrow().len());
        assert_eq!(0x99, snapshot.borrow()[0]);
    }

    #[test]
    fn save_ram_image_size_mismatch_rejected() {
        let mut cartridge = test_cartridge_with_ram();

        cartridge.load_ram_image(&[0xAA; 100]);
        assert!(cartridge.external_ram().iter().all(|&b| b == 0x00));

        cartridge.load_ram_image(&[0xAA; 8192]);
        assert!(cartridge.external_ram().iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn oam_dma_locks_bus_to_hram() {
        let mut bus = test_bus();

        // Keep the PPU out of the picture so OAM is readable afterwards
        bus.write(address::LCDC, 0x00);

        for i in 0..160 {
            bus.write(0xC000 + i, i as u8);
        }
        bus.write(0xFF80, 0x42);

        bus.write(address::DMA, 0xC0);

        // While the transfer runs, only HRAM reads succeed
        for _ in 0..160 {
            assert_eq!(0xFF, bus.read(0xFE00));
            assert_eq!(0xFF, bus.read(0xC000));
            assert_eq!(0x42, bus.read(0xFF80));
            bus.tick_m_cycle();
        }

        assert!(!bus.dma.is_active());
        for i in 0..160_u16 {
            assert_eq!(i as u8, bus.read(0xFE00 + i));
        }
    }

    #[test]
    fn vram_blocked_while_rendering() {
        let mut bus = test_bus();

        test_support::force_mode(&mut bus.ppu, PpuMode::Rendering);

        bus.write(0x8000, 0x12);
        assert_eq!(0xFF, bus.read(0x8000));

        test_support::force_mode(&mut bus.ppu, PpuMode::HBlank);
        assert_eq!(0x00, bus.read(0x8000));

        bus.write(0x8000, 0x12);
        assert_eq!(0x12, bus.read(0x8000));
    }

    #[test]
    fn oam_blocked_while_scanning_and_rendering() {
        let mut bus = test_bus();

        for mode in [PpuMode::ScanningOam, PpuMode::Rendering] {
            test_support::force_mode(&mut bus.ppu, mode);
            bus.write(0xFE00, 0x34);
            assert_eq!(0xFF, bus.read(0xFE00));
        }

        test_support::force_mode(&mut bus.ppu, PpuMode::VBlank);
        bus.write(0xFE00, 0x34);
        assert_eq!(0x34, bus.read(0xFE00));
    }

    #[test]
    fn boot_rom_overlay() {
        let mut boot_rom = vec![0xE7; 256];
        boot_rom[0] = 0x31;
        let mut bus = Bus::new(test_cartridge(), Some(boot_rom), 48000);

        assert_eq!(0x31, bus.read(0x0000));
        assert_eq!(0xE7, bus.read(0x00FF));
        // Past the overlay the cartridge is visible
        assert_eq!(0x00, bus.read(0x0100));

        bus.write(address::BOOT_ROM_DISABLE, 0x01);
        assert_eq!(0x00, bus.read(0x0000));

        // The disable is one-way
        bus.write(address::BOOT_ROM_DISABLE, 0x00);
        assert_eq!(0x00, bus.read(0x0000));
    }
}
