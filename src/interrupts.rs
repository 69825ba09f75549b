use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    VBlank,
    LcdStatus,
    Timer,
    Serial,
    Joypad,
}

impl InterruptType {
    pub fn handler_address(self) -> u16 {
        match self {
            Self::VBlank => 0x0040,
            Self::LcdStatus => 0x0048,
            Self::Timer => 0x0050,
            Self::Serial => 0x0058,
            Self::Joypad => 0x0060,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::VBlank => 1 << 0,
            Self::LcdStatus => 1 << 1,
            Self::Timer => 1 << 2,
            Self::Serial => 1 << 3,
            Self::Joypad => 1 << 4,
        }
    }
}

/// The IF/IE register pair. Both sides of the bus can set request bits; the
/// CPU clears them one at a time as interrupts are serviced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptLine {
    flags: u8,
    enable: u8,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self { flags: 0x00, enable: 0x00 }
    }

    pub fn request(&mut self, interrupt: InterruptType) {
        self.flags |= interrupt.bit();
    }

    pub fn clear(&mut self, interrupt: InterruptType) {
        self.flags &= !interrupt.bit();
    }

    pub fn requested(&self, interrupt: InterruptType) -> bool {
        self.flags & interrupt.bit() != 0
    }

    /// IF bits 5-7 are not wired and always read as 1.
    pub fn read_flags(&self) -> u8 {
        self.flags | 0xE0
    }

    pub fn write_flags(&mut self, value: u8) {
        self.flags = value & 0x1F;
    }

    pub fn read_enable(&self) -> u8 {
        self.enable
    }

    pub fn write_enable(&mut self, value: u8) {
        self.enable = value;
    }

    /// Requested-and-enabled bits.
    pub fn pending(&self) -> u8 {
        self.flags & self.enable & 0x1F
    }

    /// The pending interrupt that will be serviced next (lowest set bit wins).
    pub fn highest_priority_pending(&self) -> Option<InterruptType> {
        let pending = self.pending();
        [
            InterruptType::VBlank,
            InterruptType::LcdStatus,
            InterruptType::Timer,
            InterruptType::Serial,
            InterruptType::Joypad,
        ]
        .into_iter()
        .find(|interrupt| pending & interrupt.bit() != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_upper_bits_read_as_set() {
        let mut interrupts = InterruptLine::new();
        assert_eq!(0xE0, interrupts.read_flags());

        interrupts.write_flags(0xFF);
        assert_eq!(0xFF, interrupts.read_flags());

        interrupts.write_flags(0x00);
        assert_eq!(0xE0, interrupts.read_flags());
    }

    #[test]
    fn priority_is_lowest_bit_first() {
        let mut interrupts = InterruptLine::new();
        interrupts.write_enable(0x1F);

        interrupts.request(InterruptType::Joypad);
        interrupts.request(InterruptType::Timer);
        assert_eq!(Some(InterruptType::Timer), interrupts.highest_priority_pending());

        interrupts.request(InterruptType::VBlank);
        assert_eq!(Some(InterruptType::VBlank), interrupts.highest_priority_pending());

        interrupts.clear(InterruptType::VBlank);
        interrupts.clear(InterruptType::Timer);
        assert_eq!(Some(InterruptType::Joypad), interrupts.highest_priority_pending());
    }

    #[test]
    fn pending_requires_enable() {
        let mut interrupts = InterruptLine::new();
        interrupts.request(InterruptType::Serial);
        assert_eq!(0x00, interrupts.pending());
        assert_eq!(None, interrupts.highest_priority_pending());

        interrupts.write_enable(0x08);
        assert_eq!(0x08, interrupts.pending());
    }
}
