//! The game pak: ROM image, GPIO window, backup storage.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::cpu::hardware::backup::BackupStorage;
use crate::cpu::hardware::gpio::Gpio;

/// Maximum ROM image size (32 MiB).
pub const ROM_MAX_SIZE: usize = 0x0200_0000;

/// A ROM must at least contain the 192-byte header.
pub const ROM_MIN_SIZE: usize = 192;

#[serde_as]
#[derive(Default, Serialize, Deserialize)]
pub struct Cartridge {
    #[serde_as(as = "Bytes")]
    pub rom: Vec<u8>,
    pub gpio: Gpio,
    pub backup: BackupStorage,
}

impl Cartridge {
    /// Byte read anywhere in the three ROM mirrors. `offset` is the address
    /// with the region bits masked off.
    #[must_use]
    pub fn read(&self, offset: u32) -> u8 {
        if (0xC4..0xCA).contains(&offset) && self.gpio.readable() {
            let half = self.gpio.read(offset & !1);
            return (half >> ((offset & 1) * 8)) as u8;
        }

        match self.rom.get(offset as usize) {
            Some(byte) => *byte,
            None => {
                // The game pak bus is halfword addressed; past the end of
                // the image nothing drives AD0-15, so reads see the low bits
                // of the requested halfword address.
                let half = (offset >> 1) as u16;
                (half >> ((offset & 1) * 8)) as u8
            }
        }
    }

    /// Halfword write in the ROM mirrors; everything except the GPIO window
    /// is read-only and dropped.
    pub fn write_half(&mut self, offset: u32, value: u16) {
        if (0xC4..0xCA).contains(&offset) {
            self.gpio.write(offset & !1, value);
        } else {
            tracing::debug!("write to read-only game pak address {offset:#X}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_come_from_the_image() {
        let cartridge = Cartridge {
            rom: vec![0x11, 0x22, 0x33, 0x44],
            ..Cartridge::default()
        };
        assert_eq!(cartridge.read(0), 0x11);
        assert_eq!(cartridge.read(3), 0x44);
    }

    #[test]
    fn out_of_bounds_reads_return_the_address_bus() {
        let cartridge = Cartridge::default();
        // Halfword address 0x0080 -> bytes 0x80, 0x00
        assert_eq!(cartridge.read(0x100), 0x80);
        assert_eq!(cartridge.read(0x101), 0x00);
        assert_eq!(cartridge.read(0x1FF_FFFE), 0xFF);
    }

    #[test]
    fn rom_writes_are_dropped() {
        let mut cartridge = Cartridge {
            rom: vec![0u8; 0x200],
            ..Cartridge::default()
        };
        cartridge.write_half(0x100, 0xBEEF);
        assert_eq!(cartridge.read(0x100), 0);
    }
}
