//! # GBA Cartridge Header
//!
//! Every ROM starts with a 192-byte header:
//!
//! | Offset | Size | Description                                  |
//! |--------|------|----------------------------------------------|
//! | 0x000  |  4   | ROM entry point (ARM branch instruction)     |
//! | 0x004  | 156  | Nintendo logo (verified by the BIOS)         |
//! | 0x0A0  |  12  | Game title (uppercase ASCII)                 |
//! | 0x0AC  |   4  | Game code (e.g. "BPEE" for Pokemon Emerald)  |
//! | 0x0B0  |   2  | Maker code                                   |
//! | 0x0B2  |   1  | Fixed value (must be 0x96)                   |
//! | 0x0BC  |   1  | Software version                             |
//! | 0x0BD  |   1  | Complement check (header checksum)           |
//!
//! The game code also keys the [game database](lookup_game) used to resolve
//! the backup storage type and RTC presence of known cartridges, the same
//! information the save libraries would otherwise have to be probed for.

use serde::{Deserialize, Serialize};

use crate::cpu::hardware::backup::BackupType;

/// The compressed logo bitmap the BIOS compares against its internal copy.
#[rustfmt::skip]
pub const NINTENDO_LOGO: [u8; 156] = [
    0x24, 0xFF, 0xAE, 0x51, 0x69, 0x9A, 0xA2, 0x21, 0x3D, 0x84, 0x82, 0x0A,
    0x84, 0xE4, 0x09, 0xAD, 0x11, 0x24, 0x8B, 0x98, 0xC0, 0x81, 0x7F, 0x21,
    0xA3, 0x52, 0xBE, 0x19, 0x93, 0x09, 0xCE, 0x20, 0x10, 0x46, 0x4A, 0x4A,
    0xF8, 0x27, 0x31, 0xEC, 0x58, 0xC7, 0xE8, 0x33, 0x82, 0xE3, 0xCE, 0xBF,
    0x85, 0xF4, 0xDF, 0x94, 0xCE, 0x4B, 0x09, 0xC1, 0x94, 0x56, 0x8A, 0xC0,
    0x13, 0x72, 0xA7, 0xFC, 0x9F, 0x84, 0x4D, 0x73, 0xA3, 0xCA, 0x9A, 0x61,
    0x58, 0x97, 0xA3, 0x27, 0xFC, 0x03, 0x98, 0x76, 0x23, 0x1D, 0xC7, 0x61,
    0x03, 0x04, 0xAE, 0x56, 0xBF, 0x38, 0x84, 0x00, 0x40, 0xA7, 0x0E, 0xFD,
    0xFF, 0x52, 0xFE, 0x03, 0x6F, 0x95, 0x30, 0xF1, 0x97, 0xFB, 0xC0, 0x85,
    0x60, 0xD6, 0x80, 0x25, 0xA9, 0x63, 0xBE, 0x03, 0x01, 0x4E, 0x38, 0xE2,
    0xF9, 0xA2, 0x34, 0xFF, 0xBB, 0x3E, 0x03, 0x44, 0x78, 0x00, 0x90, 0xCB,
    0x88, 0x11, 0x3A, 0x94, 0x65, 0xC0, 0x7C, 0x63, 0x87, 0xF0, 0x3C, 0xAF,
    0xD6, 0x25, 0xE4, 0x8B, 0x38, 0x0A, 0xAC, 0x72, 0x21, 0xD4, 0xF8, 0x07,
];

/// Parsed ROM header with the validation results of the boot-critical
/// fields.
#[derive(Clone, Serialize, Deserialize)]
pub struct CartridgeHeader {
    pub game_title: String,
    pub game_code: String,
    pub maker_code: String,
    pub fixed_value: u8,
    pub software_version: u8,
    pub complement_check: u8,
    pub calculated_checksum: u8,

    pub logo_valid: bool,
    pub checksum_valid: bool,
    pub fixed_value_valid: bool,
}

impl CartridgeHeader {
    /// Parses the header. Fails when `data` cannot contain one.
    pub fn new(data: &[u8]) -> Result<Self, String> {
        if data.len() < 192 {
            return Err(format!(
                "ROM too small to contain a cartridge header: {} bytes",
                data.len()
            ));
        }

        let fixed_value = data[0x0B2];
        let complement_check = data[0x0BD];
        let calculated_checksum = Self::calculate_checksum(data);

        let logo_valid = data[0x004..0x0A0] == NINTENDO_LOGO;
        let checksum_valid = complement_check == calculated_checksum;
        let fixed_value_valid = fixed_value == 0x96;

        if !logo_valid {
            tracing::warn!("Nintendo logo does not match the expected bitmap");
        }
        if !checksum_valid {
            tracing::warn!(
                "header checksum mismatch: stored {complement_check:#04X}, calculated {calculated_checksum:#04X}"
            );
        }
        if !fixed_value_valid {
            tracing::warn!("fixed value at 0xB2 is {fixed_value:#04X}, expected 0x96");
        }

        Ok(Self {
            game_title: extract_string(&data[0x0A0..0x0AC]),
            game_code: extract_string(&data[0x0AC..0x0B0]),
            maker_code: extract_string(&data[0x0B0..0x0B2]),
            fixed_value,
            software_version: data[0x0BC],
            complement_check,
            calculated_checksum,
            logo_valid,
            checksum_valid,
            fixed_value_valid,
        })
    }

    /// checksum = -(sum of bytes 0xA0..0xBD) - 0x19
    fn calculate_checksum(data: &[u8]) -> u8 {
        data[0xA0..0xBD]
            .iter()
            .fold(0u8, |acc, &byte| acc.wrapping_sub(byte))
            .wrapping_sub(0x19)
    }

    /// Whether the BIOS would accept this cartridge at boot.
    #[must_use]
    pub const fn is_bootable(&self) -> bool {
        self.logo_valid && self.checksum_valid && self.fixed_value_valid
    }
}

fn extract_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
}

/// One known cartridge: backup hardware and RTC presence by game code.
pub struct GameEntry {
    pub code: &'static str,
    pub backup: BackupType,
    pub rtc: bool,
}

/// Cartridges whose hardware cannot be reliably probed, mostly because the
/// save-library ID string scan misidentifies them or because they carry an
/// RTC. Codes are region-less three-character prefixes.
static GAME_DATABASE: &[GameEntry] = &[
    // Pokemon Ruby / Sapphire
    GameEntry { code: "AXV", backup: BackupType::Flash128, rtc: true },
    GameEntry { code: "AXP", backup: BackupType::Flash128, rtc: true },
    // Pokemon Emerald
    GameEntry { code: "BPE", backup: BackupType::Flash128, rtc: true },
    // Pokemon FireRed / LeafGreen
    GameEntry { code: "BPR", backup: BackupType::Flash128, rtc: false },
    GameEntry { code: "BPG", backup: BackupType::Flash128, rtc: false },
    // Boktai carries a solar sensor and an RTC
    GameEntry { code: "U3I", backup: BackupType::Eeprom8K, rtc: true },
    GameEntry { code: "U32", backup: BackupType::Eeprom8K, rtc: true },
    // Super Mario Advance 4
    GameEntry { code: "AX4", backup: BackupType::Flash128, rtc: false },
    // WarioWare: Twisted
    GameEntry { code: "RZW", backup: BackupType::Sram, rtc: false },
    // Drill Dozer
    GameEntry { code: "V49", backup: BackupType::Sram, rtc: false },
    // The Legend of Zelda: The Minish Cap
    GameEntry { code: "BZM", backup: BackupType::Eeprom8K, rtc: false },
    // Final Fantasy Tactics Advance
    GameEntry { code: "AFX", backup: BackupType::Flash64, rtc: false },
    // Golden Sun: The Lost Age
    GameEntry { code: "AGF", backup: BackupType::Flash64, rtc: false },
];

/// Looks a game up by the 4-character code of its header.
#[must_use]
pub fn lookup_game(game_code: &str) -> Option<&'static GameEntry> {
    GAME_DATABASE.iter().find(|entry| game_code.starts_with(entry.code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header() -> Vec<u8> {
        let mut data = vec![0u8; 0x200];
        data[0x004..0x0A0].copy_from_slice(&NINTENDO_LOGO);
        data[0x0A0..0x0AC].copy_from_slice(b"POKEMON EMER");
        data[0x0AC..0x0B0].copy_from_slice(b"BPEE");
        data[0x0B0..0x0B2].copy_from_slice(b"01");
        data[0x0B2] = 0x96;
        data[0x0BD] = CartridgeHeader::calculate_checksum(&data);
        data
    }

    #[test]
    fn parses_a_valid_header() {
        let header = CartridgeHeader::new(&valid_header()).unwrap();
        assert_eq!(header.game_title, "POKEMON EMER");
        assert_eq!(header.game_code, "BPEE");
        assert_eq!(header.maker_code, "01");
        assert!(header.logo_valid);
        assert!(header.checksum_valid);
        assert!(header.fixed_value_valid);
        assert!(header.is_bootable());
    }

    #[test]
    fn detects_a_corrupted_checksum() {
        let mut data = valid_header();
        data[0x0A3] ^= 0xFF;
        let header = CartridgeHeader::new(&data).unwrap();
        assert!(!header.checksum_valid);
        assert!(!header.is_bootable());
    }

    #[test]
    fn rejects_a_truncated_rom() {
        assert!(CartridgeHeader::new(&[0u8; 100]).is_err());
    }

    #[test]
    fn database_lookup_by_game_code() {
        let emerald = lookup_game("BPEE").unwrap();
        assert_eq!(emerald.backup, BackupType::Flash128);
        assert!(emerald.rtc);

        let fire_red = lookup_game("BPRJ").unwrap();
        assert!(!fire_red.rtc);

        assert!(lookup_game("ZZZZ").is_none());
    }
}
