use std::fmt::Formatter;

/// Construction-time configuration for the emulator core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Optional 256-byte boot ROM image mapped over 0000-00FF until a write
    /// to FF50. Without one, the CPU and MMIO registers start in the
    /// documented post-boot state.
    pub boot_rom: Option<Vec<u8>>,
    /// Output sample rate for the audio sample queue, in Hz.
    pub audio_sample_rate: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            boot_rom: None,
            audio_sample_rate: 48000,
        }
    }
}

impl std::fmt::Display for CoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.boot_rom {
            Some(boot_rom) => writeln!(f, "boot_rom: {} bytes", boot_rom.len())?,
            None => writeln!(f, "boot_rom: <None>")?,
        }
        writeln!(f, "audio_sample_rate: {}", self.audio_sample_rate)?;

        Ok(())
    }
}
