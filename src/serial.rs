use crate::interrupts::{InterruptLine, InterruptType};
use serde::{Deserialize, Serialize};

/// Serial port stub. There is no link partner: a transfer started via SC
/// completes immediately, the outgoing byte is collected into a line buffer
/// that is logged on newline, and 0xFF is shifted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPort {
    data: u8,
    control: u8,
    line_buffer: String,
}

impl SerialPort {
    pub fn new() -> Self {
        Self {
            data: 0x00,
            control: 0x00,
            line_buffer: String::new(),
        }
    }

    pub fn read_data(&self) -> u8 {
        self.data
    }

    pub fn write_data(&mut self, value: u8) {
        self.data = value;
    }

    pub fn read_control(&self) -> u8 {
        // Bits 1-6 are not wired
        self.control | 0x7E
    }

    pub fn write_control(&mut self, value: u8, interrupts: &mut InterruptLine) {
        self.control = value & 0x81;

        if value & 0x80 != 0 {
            self.emit_byte(self.data);

            // Transfer "completes" instantly: clear the start bit, shift in
            // the disconnected-line value, and raise the Serial interrupt.
            self.control &= 0x01;
            self.data = 0xFF;
            interrupts.request(InterruptType::Serial);
        }
    }

    fn emit_byte(&mut self, byte: u8) {
        if byte == b'\n' {
            log::info!("serial: {}", self.line_buffer);
            self.line_buffer.clear();
        } else if byte.is_ascii() && !byte.is_ascii_control() {
            self.line_buffer.push(char::from(byte));
        }
    }
}
