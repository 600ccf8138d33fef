//! Cartridge GPIO port and the S-3511 real-time clock behind it.
//!
//! Three 16-bit registers overlap the ROM image at `0xC4` (data), `0xC6`
//! (pin direction) and `0xC8` (read enable). The RTC talks a 3-wire serial
//! protocol over pins SCK (0), SIO (1) and CS (2): a command byte selects a
//! register, then its bytes are clocked out (or in) LSB first on SCK rising
//! edges while CS is held high.

use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

const PIN_SCK: u16 = 1 << 0;
const PIN_SIO: u16 = 1 << 1;
const PIN_CS: u16 = 1 << 2;

#[derive(Default, Serialize, Deserialize)]
pub struct Gpio {
    pub data: u16,
    pub direction: u16,
    pub control: u16,
    pub rtc_enabled: bool,
    rtc: Rtc,
}

impl Gpio {
    /// Register reads only succeed when the read-enable bit is set;
    /// otherwise the port is write-only and reads fall through to the ROM.
    #[must_use]
    pub const fn readable(&self) -> bool {
        self.control & 1 != 0
    }

    #[must_use]
    pub fn read(&self, offset: u32) -> u16 {
        match offset {
            0xC4 => self.data,
            0xC6 => self.direction,
            _ => self.control,
        }
    }

    pub fn write(&mut self, offset: u32, value: u16) {
        match offset {
            0xC4 => {
                // Pins configured as inputs (to the cartridge) keep their
                // previous level.
                let value = value & 0xF;
                self.data = (self.data & !self.direction) | (value & self.direction);
                if self.rtc_enabled {
                    let sio = self.rtc.clock(self.data);
                    self.data = (self.data & !PIN_SIO) | (sio & PIN_SIO);
                }
            }
            0xC6 => self.direction = value & 0xF,
            0xC8 => self.control = value & 1,
            _ => {}
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum RtcState {
    #[default]
    Idle,
    Command,
    Reading,
    Writing,
}

#[derive(Default, Serialize, Deserialize)]
struct Rtc {
    state: RtcState,
    previous_pins: u16,
    bit_count: u32,
    shift: u8,
    command: u8,
    /// Response bytes still to clock out, front first.
    response: Vec<u8>,
    /// Parameter bytes still expected from the CPU.
    write_bytes_left: u32,
    status: u8,
}

impl Rtc {
    /// Advances the serial state machine with the new pin levels and
    /// returns the SIO level the RTC drives.
    fn clock(&mut self, pins: u16) -> u16 {
        let previous = self.previous_pins;
        self.previous_pins = pins;

        if pins & PIN_CS == 0 {
            self.state = RtcState::Idle;
            return pins;
        }

        if previous & PIN_CS == 0 && pins & PIN_CS != 0 {
            // Chip select rising edge opens a transaction.
            self.state = RtcState::Command;
            self.bit_count = 0;
            self.shift = 0;
            return pins;
        }

        let sck_rose = previous & PIN_SCK == 0 && pins & PIN_SCK != 0;
        if !sck_rose {
            return pins;
        }

        match self.state {
            RtcState::Idle => pins,
            RtcState::Command => {
                self.shift |= u8::from(pins & PIN_SIO != 0) << self.bit_count;
                self.bit_count += 1;
                if self.bit_count == 8 {
                    self.start_command(self.shift);
                }
                pins
            }
            RtcState::Reading => {
                let byte = self.response.first().copied().unwrap_or(0);
                let bit = (byte >> self.bit_count) & 1;
                self.bit_count += 1;
                if self.bit_count == 8 {
                    self.bit_count = 0;
                    if !self.response.is_empty() {
                        self.response.remove(0);
                    }
                    if self.response.is_empty() {
                        self.state = RtcState::Idle;
                    }
                }
                (pins & !PIN_SIO) | (u16::from(bit) << 1)
            }
            RtcState::Writing => {
                self.shift |= u8::from(pins & PIN_SIO != 0) << self.bit_count;
                self.bit_count += 1;
                if self.bit_count == 8 {
                    self.finish_write_byte(self.shift);
                    self.bit_count = 0;
                    self.shift = 0;
                }
                pins
            }
        }
    }

    /// The command byte carries the register number in bits 4:6 and the
    /// read flag in bit 7, framed by a fixed 0110 signature.
    fn start_command(&mut self, byte: u8) {
        if byte & 0xF != 0b0110 {
            tracing::debug!("rtc: malformed command byte {byte:#04X}");
            self.state = RtcState::Idle;
            return;
        }

        self.command = (byte >> 4) & 0b111;
        let read = byte & 0x80 != 0;
        self.bit_count = 0;
        self.shift = 0;

        if read {
            self.response = match self.command {
                1 => vec![self.status],
                2 => self.date_time_bytes().to_vec(),
                3 => self.date_time_bytes()[4..].to_vec(),
                _ => vec![0],
            };
            self.state = RtcState::Reading;
        } else {
            self.write_bytes_left = match self.command {
                0 => {
                    // Force reset.
                    self.status = 0;
                    self.state = RtcState::Idle;
                    return;
                }
                1 => 1,
                2 => 7,
                3 => 3,
                _ => 0,
            };
            if self.write_bytes_left == 0 {
                self.state = RtcState::Idle;
            } else {
                self.state = RtcState::Writing;
            }
        }
    }

    fn finish_write_byte(&mut self, byte: u8) {
        if self.command == 1 {
            self.status = byte;
        }
        // Writes to the time registers are accepted and dropped: the clock
        // always tracks the host.
        self.write_bytes_left -= 1;
        if self.write_bytes_left == 0 {
            self.state = RtcState::Idle;
        }
    }

    /// year, month, day, weekday, hour, minute, second - all BCD.
    fn date_time_bytes(&self) -> [u8; 7] {
        let now = Local::now();
        let hour = if self.status & 0x40 != 0 {
            now.hour()
        } else {
            now.hour() % 12
        };
        [
            bcd((now.year() % 100) as u8),
            bcd(now.month() as u8),
            bcd(now.day() as u8),
            bcd(now.weekday().num_days_from_sunday() as u8),
            bcd(hour as u8),
            bcd(now.minute() as u8),
            bcd(now.second() as u8),
        ]
    }
}

const fn bcd(value: u8) -> u8 {
    (value / 10) << 4 | (value % 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_byte(gpio: &mut Gpio, byte: u8) {
        for i in 0..8 {
            let sio = u16::from((byte >> i) & 1) << 1;
            gpio.write(0xC4, PIN_CS | sio);
            gpio.write(0xC4, PIN_CS | PIN_SCK | sio);
        }
    }

    fn receive_byte(gpio: &mut Gpio) -> u8 {
        let mut byte = 0u8;
        for i in 0..8 {
            gpio.write(0xC4, PIN_CS);
            gpio.write(0xC4, PIN_CS | PIN_SCK);
            byte |= (gpio.read(0xC4) as u8 >> 1 & 1) << i;
        }
        byte
    }

    fn open_transaction(gpio: &mut Gpio) {
        gpio.write(0xC6, 0b0111); // SCK, SIO, CS driven by the CPU
        gpio.write(0xC8, 1);
        gpio.write(0xC4, 0);
        gpio.write(0xC4, PIN_CS);
    }

    #[test]
    fn registers_only_read_back_when_enabled() {
        let mut gpio = Gpio::default();
        gpio.write(0xC8, 0);
        assert!(!gpio.readable());

        gpio.write(0xC8, 1);
        assert!(gpio.readable());
        assert_eq!(gpio.read(0xC8), 1);
    }

    #[test]
    fn status_register_roundtrip() {
        let mut gpio = Gpio {
            rtc_enabled: true,
            ..Gpio::default()
        };

        // Write 0x40 (24h mode) into the status register (command 1).
        open_transaction(&mut gpio);
        send_byte(&mut gpio, 0b0001_0110);
        send_byte(&mut gpio, 0x40);
        gpio.write(0xC4, 0);

        // Read it back.
        gpio.write(0xC6, 0b0101); // SIO now an input
        gpio.write(0xC4, PIN_CS);
        gpio.write(0xC6, 0b0111);
        send_byte(&mut gpio, 0b1001_0110);
        gpio.write(0xC6, 0b0101);
        assert_eq!(receive_byte(&mut gpio), 0x40);
    }

    #[test]
    fn date_time_response_is_seven_bcd_bytes() {
        let mut gpio = Gpio {
            rtc_enabled: true,
            ..Gpio::default()
        };

        open_transaction(&mut gpio);
        send_byte(&mut gpio, 0b1010_0110); // read command 2
        gpio.write(0xC6, 0b0101);

        let year = receive_byte(&mut gpio);
        let year = (year >> 4) * 10 + (year & 0xF);
        assert!(year <= 99);

        let month = receive_byte(&mut gpio);
        let month = (month >> 4) * 10 + (month & 0xF);
        assert!((1..=12).contains(&month));
    }

    #[test]
    fn bcd_encoding() {
        assert_eq!(bcd(0), 0x00);
        assert_eq!(bcd(9), 0x09);
        assert_eq!(bcd(10), 0x10);
        assert_eq!(bcd(59), 0x59);
    }
}
