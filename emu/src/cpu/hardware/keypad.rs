use serde::{Deserialize, Serialize};

use crate::cpu::hardware::interrupt_control::{Interrupt, InterruptControl};

/// GBA button bit positions in the KEYINPUT register (active-low).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A = 1 << 0,
    B = 1 << 1,
    Select = 1 << 2,
    Start = 1 << 3,
    Right = 1 << 4,
    Left = 1 << 5,
    Up = 1 << 6,
    Down = 1 << 7,
    R = 1 << 8,
    L = 1 << 9,
}

#[derive(Serialize, Deserialize)]
pub struct Keypad {
    /// KEYINPUT: bit clear = pressed.
    pub key_input: u16,
    /// KEYCNT: interrupt enable and condition.
    pub key_control: u16,
}

impl Default for Keypad {
    fn default() -> Self {
        Self {
            // All ten buttons released.
            key_input: 0x03FF,
            key_control: 0,
        }
    }
}

impl Keypad {
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        if pressed {
            self.key_input &= !(button as u16);
        } else {
            self.key_input |= button as u16;
        }
    }

    /// Raises the keypad interrupt when the KEYCNT condition holds.
    /// Bit 15 selects AND (all selected keys down) over OR (any).
    pub fn scan_interrupt(&self, interrupt_control: &mut InterruptControl) {
        if self.key_control & (1 << 14) == 0 {
            return;
        }

        let selected = self.key_control & 0x03FF;
        let pressed = !self.key_input & 0x03FF;

        let triggered = if self.key_control & (1 << 15) != 0 {
            selected != 0 && pressed & selected == selected
        } else {
            pressed & selected != 0
        };

        if triggered {
            interrupt_control.request(Interrupt::Keypad);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buttons_are_active_low() {
        let mut keypad = Keypad::default();
        assert_eq!(keypad.key_input, 0x03FF);

        keypad.set_button(Button::A, true);
        assert_eq!(keypad.key_input & 1, 0);

        keypad.set_button(Button::A, false);
        assert_eq!(keypad.key_input, 0x03FF);
    }

    #[test]
    fn keypad_irq_in_or_mode() {
        let mut keypad = Keypad::default();
        let mut interrupt_control = InterruptControl::default();

        keypad.key_control = (1 << 14) | 0b11; // IRQ on A or B
        keypad.set_button(Button::B, true);
        keypad.scan_interrupt(&mut interrupt_control);

        assert_ne!(interrupt_control.interrupt_flags & (1 << 12), 0);
    }

    #[test]
    fn keypad_irq_in_and_mode_needs_all_keys() {
        let mut keypad = Keypad::default();
        let mut interrupt_control = InterruptControl::default();

        keypad.key_control = (1 << 15) | (1 << 14) | 0b11; // IRQ on A and B
        keypad.set_button(Button::A, true);
        keypad.scan_interrupt(&mut interrupt_control);
        assert_eq!(interrupt_control.interrupt_flags & (1 << 12), 0);

        keypad.set_button(Button::B, true);
        keypad.scan_interrupt(&mut interrupt_control);
        assert_ne!(interrupt_control.interrupt_flags & (1 << 12), 0);
    }
}
