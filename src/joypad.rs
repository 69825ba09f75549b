use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

/// State of the 8 hardware buttons plus the JOYP row-select bits.
///
/// The JOYP register is a computed view: the game writes bits 4-5 to select a
/// row, and the low nibble reads back the selected row active-low.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoypadState {
    up: bool,
    down: bool,
    left: bool,
    right: bool,
    a: bool,
    b: bool,
    start: bool,
    select: bool,
    // JOYP bits 4-5 as last written by the program
    select_bits: u8,
}

impl JoypadState {
    pub fn new() -> Self {
        Self {
            up: false,
            down: false,
            left: false,
            right: false,
            a: false,
            b: false,
            start: false,
            select: false,
            select_bits: 0x30,
        }
    }

    /// Update a button's pressed state. Returns true if this was a press edge
    /// (the button was up and is now down).
    pub fn set_pressed(&mut self, button: Button, pressed: bool) -> bool {
        let state = match button {
            Button::Right => &mut self.right,
            Button::Left => &mut self.left,
            Button::Up => &mut self.up,
            Button::Down => &mut self.down,
            Button::A => &mut self.a,
            Button::B => &mut self.b,
            Button::Select => &mut self.select,
            Button::Start => &mut self.start,
        };

        let newly_pressed = pressed && !*state;
        *state = pressed;

        log::debug!("Button {button:?} pressed={pressed}, current state: {self:?}");

        newly_pressed
    }

    pub fn write_joyp(&mut self, value: u8) {
        self.select_bits = value & 0x30;
    }

    pub fn read_joyp(&self) -> u8 {
        let actions_select = self.select_bits & 0x20 == 0;
        let directions_select = self.select_bits & 0x10 == 0;

        let bit_3 = !((actions_select && self.start) || (directions_select && self.down));
        let bit_2 = !((actions_select && self.select) || (directions_select && self.up));
        let bit_1 = !((actions_select && self.b) || (directions_select && self.left));
        let bit_0 = !((actions_select && self.a) || (directions_select && self.right));

        0xC0 | self.select_bits
            | (u8::from(bit_3) << 3)
            | (u8::from(bit_2) << 2)
            | (u8::from(bit_1) << 1)
            | u8::from(bit_0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_row_selected_reads_high() {
        let mut joypad = JoypadState::new();
        joypad.set_pressed(Button::A, true);
        joypad.set_pressed(Button::Down, true);

        joypad.write_joyp(0x30);
        assert_eq!(0xFF, joypad.read_joyp());
    }

    #[test]
    fn action_row_active_low() {
        let mut joypad = JoypadState::new();
        joypad.write_joyp(0x10);

        assert_eq!(0xDF, joypad.read_joyp());

        joypad.set_pressed(Button::A, true);
        assert_eq!(0xDE, joypad.read_joyp());

        joypad.set_pressed(Button::Start, true);
        assert_eq!(0xD6, joypad.read_joyp());

        joypad.set_pressed(Button::A, false);
        assert_eq!(0xD7, joypad.read_joyp());
    }

    #[test]
    fn direction_row_active_low() {
        let mut joypad = JoypadState::new();
        joypad.write_joyp(0x20);

        joypad.set_pressed(Button::Left, true);
        joypad.set_pressed(Button::Up, true);
        assert_eq!(0xE9, joypad.read_joyp());

        // Direction buttons must not leak into the action row
        joypad.write_joyp(0x10);
        assert_eq!(0xDF, joypad.read_joyp());
    }

    #[test]
    fn press_edge_detection() {
        let mut joypad = JoypadState::new();

        assert!(joypad.set_pressed(Button::B, true));
        assert!(!joypad.set_pressed(Button::B, true));
        assert!(!joypad.set_pressed(Button::B, false));
        assert!(joypad.set_pressed(Button::B, true));
    }
}
