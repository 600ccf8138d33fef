//! The memory bus: address decoding over the GBA memory map, region
//! mirroring, access timing, unaligned rotation and open-bus reads.
//!
//! Every access routes by the top address byte:
//!
//! | Region | Range                    | Backing                       |
//! |--------|--------------------------|-------------------------------|
//! | 0x00   | `0x0000_0000..0x0000_3FFF` | BIOS (protected reads)      |
//! | 0x02   | `0x0200_0000..`          | 256 KiB EWRAM, mirrored       |
//! | 0x03   | `0x0300_0000..`          | 32 KiB IWRAM, mirrored        |
//! | 0x04   | `0x0400_0000..`          | I/O registers                 |
//! | 0x05   | `0x0500_0000..`          | palette RAM, mirrored         |
//! | 0x06   | `0x0600_0000..`          | 96 KiB VRAM, mirrored         |
//! | 0x07   | `0x0700_0000..`          | OAM, mirrored                 |
//! | 0x08-0x0D | three wait-state mirrors | game pak ROM (EEPROM at 0x0D) |
//! | 0x0E   | `0x0E00_0000..`          | SRAM / Flash                  |
//!
//! Reads return the consumed value; the cycle cost of every access
//! accumulates in the bus and is drained once per CPU step (or DMA burst)
//! with [`Bus::take_cycles`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::bitwise::Bits;
use crate::cpu::hardware::cartridge::Cartridge;
use crate::cpu::hardware::dma::Dma;
use crate::cpu::hardware::interrupt_control::InterruptControl;
use crate::cpu::hardware::keypad::Keypad;
use crate::cpu::hardware::lcd::Lcd;
use crate::cpu::hardware::sound::Sound;
use crate::cpu::hardware::timers::Timers;
use crate::scheduler::Scheduler;

pub const BIOS_SIZE: usize = 0x4000;
const EWRAM_SIZE: usize = 0x4_0000;
const IWRAM_SIZE: usize = 0x8000;

/// Whether an access follows the previous one sequentially; sequential game
/// pak accesses are cheaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    NonSeq,
    Seq,
}

#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct Bus {
    #[serde_as(as = "Bytes")]
    bios: Vec<u8>,
    #[serde_as(as = "Bytes")]
    working_ram: Vec<u8>,
    #[serde_as(as = "Bytes")]
    working_iram: Vec<u8>,

    pub cartridge: Cartridge,
    pub lcd: Lcd,
    pub sound: Sound,
    pub dma: Dma,
    pub timers: Timers,
    pub keypad: Keypad,
    pub interrupt_control: InterruptControl,
    pub scheduler: Scheduler,

    unused_region: BTreeMap<u32, u8>,

    /// Cycle cost accumulated since the last [`Self::take_cycles`].
    pending_cycles: u32,
    /// Last opcode on the prefetch bus; what open-bus reads observe.
    last_fetched: u32,
    /// Address of the most recent opcode fetch, for the BIOS read lock.
    last_fetch_address: u32,
    /// Last word fetched while executing inside the BIOS.
    bios_latch: u32,
    /// Latched HALTCNT write: `Some(true)` for stop, `Some(false)` for halt.
    halt_request: Option<bool>,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            bios: vec![0; BIOS_SIZE],
            working_ram: vec![0; EWRAM_SIZE],
            working_iram: vec![0; IWRAM_SIZE],
            cartridge: Cartridge::default(),
            lcd: Lcd::default(),
            sound: Sound::default(),
            dma: Dma::default(),
            timers: Timers::default(),
            keypad: Keypad::default(),
            interrupt_control: InterruptControl::default(),
            scheduler: Scheduler::default(),
            unused_region: BTreeMap::new(),
            pending_cycles: 0,
            last_fetched: 0,
            last_fetch_address: 0,
            bios_latch: 0,
            halt_request: None,
        }
    }
}

impl Bus {
    #[must_use]
    pub fn with_bios(bios: [u8; BIOS_SIZE]) -> Self {
        Self {
            bios: bios.to_vec(),
            ..Self::default()
        }
    }

    pub fn load_bios(&mut self, image: &[u8]) {
        self.bios = vec![0; BIOS_SIZE];
        let len = image.len().min(BIOS_SIZE);
        self.bios[..len].copy_from_slice(&image[..len]);
    }

    /// Drains the cycle cost accumulated by accesses since the last call.
    pub fn take_cycles(&mut self) -> u32 {
        std::mem::take(&mut self.pending_cycles)
    }

    /// One internal CPU cycle.
    pub fn idle(&mut self) {
        self.pending_cycles += 1;
    }

    /// Takes the halt/stop request latched by a HALTCNT write, if any.
    pub fn take_halt_request(&mut self) -> Option<bool> {
        self.halt_request.take()
    }

    /// Clears every piece of state a console reset clears. The BIOS image,
    /// the cartridge and the host-facing audio plumbing survive.
    pub fn reset(&mut self) {
        self.working_ram.fill(0);
        self.working_iram.fill(0);
        self.lcd = Lcd::default();

        let resample_frequency = self.sound.resample_frequency;
        let sample_tx = self.sound.sample_tx.take();
        self.sound = Sound {
            resample_frequency,
            sample_tx,
            ..Sound::default()
        };

        self.dma = Dma::default();
        self.timers = Timers::default();
        self.keypad = Keypad::default();
        self.interrupt_control = InterruptControl::default();
        self.scheduler = Scheduler::new();
        self.cartridge.backup.reset_state_machines();

        self.unused_region.clear();
        self.pending_cycles = 0;
        self.last_fetched = 0;
        self.last_fetch_address = 0;
        self.bios_latch = 0;
        self.halt_request = None;
    }
}

// Access timing.
impl Bus {
    fn rom_wait_16(&self, pair: u32, access: Access) -> u32 {
        const NON_SEQ: [u32; 4] = [4, 3, 2, 8];
        let waitcnt = self.interrupt_control.wait_state_control;

        let (non_seq, seq) = match pair {
            0 => (NON_SEQ[waitcnt.get_bits(2..=3) as usize], if waitcnt.get_bit(4) { 1 } else { 2 }),
            1 => (NON_SEQ[waitcnt.get_bits(5..=6) as usize], if waitcnt.get_bit(7) { 1 } else { 4 }),
            _ => (NON_SEQ[waitcnt.get_bits(8..=9) as usize], if waitcnt.get_bit(10) { 1 } else { 8 }),
        };

        1 + match access {
            Access::NonSeq => non_seq,
            Access::Seq => seq,
        }
    }

    /// Cost of a byte or halfword access.
    fn cycles_16(&self, address: u32, access: Access) -> u32 {
        match address >> 24 {
            0x02 => 3,
            0x08 | 0x09 => self.rom_wait_16(0, access),
            0x0A | 0x0B => self.rom_wait_16(1, access),
            0x0C | 0x0D => self.rom_wait_16(2, access),
            0x0E | 0x0F => {
                const SRAM_WAIT: [u32; 4] = [4, 3, 2, 8];
                1 + SRAM_WAIT[self.interrupt_control.wait_state_control.get_bits(0..=1) as usize]
            }
            _ => 1,
        }
    }

    /// Cost of a word access; 16-bit buses pay for two halfword transfers.
    fn cycles_32(&self, address: u32, access: Access) -> u32 {
        match address >> 24 {
            0x02 => 6,
            0x05 | 0x06 => 2,
            0x08..=0x0D => {
                self.cycles_16(address, access) + self.cycles_16(address, Access::Seq)
            }
            _ => self.cycles_16(address, access),
        }
    }
}

// Raw (timing-free) routing.
impl Bus {
    fn open_bus_byte(&self, address: u32) -> u8 {
        self.last_fetched.get_byte((address & 3) as u8)
    }

    fn read_byte_raw(&mut self, address: u32) -> u8 {
        match address >> 24 {
            0x00 => {
                if address as usize >= BIOS_SIZE {
                    self.open_bus_byte(address)
                } else if self.last_fetch_address as usize >= BIOS_SIZE {
                    // Reading the BIOS from outside of it sees the last
                    // value the BIOS itself put on the bus.
                    self.bios_latch.get_byte((address & 3) as u8)
                } else {
                    self.bios[address as usize]
                }
            }
            0x02 => self.working_ram[address as usize % EWRAM_SIZE],
            0x03 => self.working_iram[address as usize % IWRAM_SIZE],
            0x04 => self.io_read_byte(address),
            0x05 => self.lcd.palette_ram[address as usize % 0x400],
            0x06 => self.lcd.video_ram[vram_offset(address)],
            0x07 => self.lcd.oam[address as usize % 0x400],
            0x08..=0x0C => self.cartridge.read(address & 0x01FF_FFFF),
            0x0D => {
                if self.cartridge.backup.is_eeprom() {
                    self.cartridge.backup.eeprom_read() as u8
                } else {
                    self.cartridge.read(address & 0x01FF_FFFF)
                }
            }
            0x0E | 0x0F => self.cartridge.backup.read(address & 0x00FF_FFFF),
            _ => {
                tracing::debug!("open bus read at {address:#010X}");
                self.open_bus_byte(address)
            }
        }
    }

    fn read_half_raw(&mut self, address: u32) -> u16 {
        debug_assert_eq!(address & 1, 0);
        match address >> 24 {
            0x04 => self.io_read_half(address),
            0x0D if self.cartridge.backup.is_eeprom() => self.cartridge.backup.eeprom_read(),
            0x0E | 0x0F => {
                // The save chip sits on an 8-bit bus; wide reads replicate.
                let byte = self.cartridge.backup.read(address & 0x00FF_FFFF);
                u16::from_le_bytes([byte, byte])
            }
            _ => {
                let low = self.read_byte_raw(address);
                let high = self.read_byte_raw(address + 1);
                u16::from_le_bytes([low, high])
            }
        }
    }

    fn write_byte_raw(&mut self, address: u32, value: u8) {
        match address >> 24 {
            0x00 => tracing::debug!("dropped write to BIOS at {address:#010X}"),
            0x02 => self.working_ram[address as usize % EWRAM_SIZE] = value,
            0x03 => self.working_iram[address as usize % IWRAM_SIZE] = value,
            0x04 => self.io_write_byte(address, value),
            0x05 => {
                // Palette byte writes replicate over the halfword.
                let aligned = address & !1;
                self.lcd.palette_ram[aligned as usize % 0x400] = value;
                self.lcd.palette_ram[(aligned + 1) as usize % 0x400] = value;
            }
            0x06 => {
                // Byte writes hit background pages replicated and are
                // ignored on object pages.
                let offset = vram_offset(address & !1);
                let obj_base = if self.lcd.bg_mode() >= 3 { 0x1_4000 } else { 0x1_0000 };
                if offset < obj_base {
                    self.lcd.video_ram[offset] = value;
                    self.lcd.video_ram[offset + 1] = value;
                }
            }
            0x07 => {
                // OAM ignores byte writes entirely.
            }
            0x08..=0x0D => tracing::debug!("dropped byte write to game pak at {address:#010X}"),
            0x0E | 0x0F => self.cartridge.backup.write(address & 0x00FF_FFFF, value),
            _ => {
                tracing::debug!("write to unused memory {address:#010X}");
                self.unused_region.insert(address, value);
            }
        }
    }

    fn write_half_raw(&mut self, address: u32, value: u16) {
        debug_assert_eq!(address & 1, 0);
        match address >> 24 {
            0x04 => self.io_write_half(address, value),
            0x05 => {
                let base = address as usize % 0x400;
                self.lcd.palette_ram[base..base + 2].copy_from_slice(&value.to_le_bytes());
            }
            0x06 => {
                let offset = vram_offset(address);
                self.lcd.video_ram[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            }
            0x07 => {
                let base = address as usize % 0x400;
                self.lcd.oam[base..base + 2].copy_from_slice(&value.to_le_bytes());
            }
            0x08..=0x0C => self.cartridge.write_half(address & 0x01FF_FFFF, value),
            0x0D => {
                if self.cartridge.backup.is_eeprom() {
                    self.cartridge.backup.eeprom_write(value);
                } else {
                    self.cartridge.write_half(address & 0x01FF_FFFF, value);
                }
            }
            0x0E | 0x0F => {
                // 8-bit bus: only one byte lane lands on the chip.
                self.cartridge.backup.write(address & 0x00FF_FFFF, value.get_byte(0));
            }
            _ => {
                self.write_byte_raw(address, value.get_byte(0));
                self.write_byte_raw(address + 1, value.get_byte(1));
            }
        }
    }
}

// Public, timed access interface.
impl Bus {
    pub fn read_byte(&mut self, address: u32, access: Access) -> u8 {
        self.pending_cycles += self.cycles_16(address, access);
        self.read_byte_raw(address)
    }

    /// 16-bit read. An odd address reads the aligned halfword rotated right
    /// by 8 bits, which is why the result is 32 bits wide.
    pub fn read_half(&mut self, address: u32, access: Access) -> u32 {
        self.pending_cycles += self.cycles_16(address, access);
        let value = u32::from(self.read_half_raw(address & !1));
        value.rotate_right((address & 1) * 8)
    }

    /// 32-bit read, rotated right by `8 * (address % 4)` when unaligned.
    pub fn read_word(&mut self, address: u32, access: Access) -> u32 {
        self.pending_cycles += self.cycles_32(address, access);
        let aligned = address & !3;
        let low = u32::from(self.read_half_raw(aligned));
        let high = u32::from(self.read_half_raw(aligned + 2));
        let value = (high << 16) | low;
        value.rotate_right((address & 3) * 8)
    }

    pub fn write_byte(&mut self, address: u32, value: u8, access: Access) {
        self.pending_cycles += self.cycles_16(address, access);
        self.write_byte_raw(address, value);
    }

    pub fn write_half(&mut self, address: u32, value: u16, access: Access) {
        self.pending_cycles += self.cycles_16(address, access);
        self.write_half_raw(address & !1, value);
    }

    pub fn write_word(&mut self, address: u32, value: u32, access: Access) {
        self.pending_cycles += self.cycles_32(address, access);
        let aligned = address & !3;
        self.write_half_raw(aligned, value as u16);
        self.write_half_raw(aligned + 2, (value >> 16) as u16);
    }

    /// Opcode fetch in Thumb state; keeps the prefetch bus value that feeds
    /// open-bus reads.
    pub fn fetch_half(&mut self, address: u32, access: Access) -> u16 {
        self.pending_cycles += self.cycles_16(address, access);
        let value = self.read_half_raw(address & !1);
        self.last_fetch_address = address;
        self.last_fetched = u32::from(value) * 0x0001_0001;
        if address >> 24 == 0 {
            self.bios_latch = self.last_fetched;
        }
        value
    }

    /// Opcode fetch in ARM state.
    pub fn fetch_word(&mut self, address: u32, access: Access) -> u32 {
        self.pending_cycles += self.cycles_32(address, access);
        let aligned = address & !3;
        let low = u32::from(self.read_half_raw(aligned));
        let high = u32::from(self.read_half_raw(aligned + 2));
        let value = (high << 16) | low;
        self.last_fetch_address = address;
        self.last_fetched = value;
        if address >> 24 == 0 {
            self.bios_latch = value;
        }
        value
    }
}

// I/O register file.
impl Bus {
    #[allow(clippy::too_many_lines)]
    fn io_read_half(&mut self, address: u32) -> u16 {
        let offset = address & 0x00FF_FFFE;
        match offset {
            0x000 => self.lcd.dispcnt,
            0x002 => self.lcd.green_swap,
            0x004 => self.lcd.dispstat,
            0x006 => self.lcd.vcount,
            0x008..=0x00E => self.lcd.bgcnt[((offset - 8) / 2) as usize],
            0x048 => self.lcd.winin,
            0x04A => self.lcd.winout,
            0x050 => self.lcd.bldcnt,
            0x052 => self.lcd.bldalpha,

            0x060 => self.sound.channel1_sweep,
            0x062 => self.sound.channel1_duty_length_envelope,
            0x064 => self.sound.channel1_frequency_control,
            0x068 => self.sound.channel2_duty_length_envelope,
            0x06C => self.sound.channel2_frequency_control,
            0x070 => self.sound.channel3_stop_wave_ram_select,
            0x072 => self.sound.channel3_length_volume,
            0x074 => self.sound.channel3_frequency_control,
            0x078 => self.sound.channel4_length_envelope,
            0x07C => self.sound.channel4_frequency_control,
            0x080 => self.sound.control_stereo_volume_enable,
            0x082 => self.sound.control_mixing_dma_control,
            0x084 => self.sound.control_sound_on_off,
            0x088 => self.sound.sound_pwm_control,
            0x090..=0x09E => {
                let index = wave_ram_index(&self.sound, offset);
                u16::from_le_bytes([
                    self.sound.channel3_wave_pattern_ram[index],
                    self.sound.channel3_wave_pattern_ram[index + 1],
                ])
            }

            0x0BA => self.dma.channels[0].control,
            0x0C6 => self.dma.channels[1].control,
            0x0D2 => self.dma.channels[2].control,
            0x0DE => self.dma.channels[3].control,

            0x100 | 0x104 | 0x108 | 0x10C => {
                let n = ((offset - 0x100) / 4) as usize;
                self.timers.channels[n].read_counter(self.scheduler.now())
            }
            0x102 | 0x106 | 0x10A | 0x10E => {
                let n = ((offset - 0x102) / 4) as usize;
                self.timers.channels[n].control
            }

            0x130 => self.keypad.key_input,
            0x132 => self.keypad.key_control,

            0x200 => self.interrupt_control.interrupt_enable,
            0x202 => self.interrupt_control.interrupt_flags,
            0x204 => self.interrupt_control.wait_state_control,
            0x208 => self.interrupt_control.interrupt_master_enable,
            0x20A => 0,
            0x300 => u16::from(self.interrupt_control.post_boot_flag),

            _ => {
                tracing::debug!("read from unhandled I/O register {address:#010X}");
                let low = self.unused_region.get(&offset).copied().unwrap_or(0);
                let high = self.unused_region.get(&(offset + 1)).copied().unwrap_or(0);
                u16::from_le_bytes([low, high])
            }
        }
    }

    fn io_read_byte(&mut self, address: u32) -> u8 {
        self.io_read_half(address).get_byte((address & 1) as u8)
    }

    #[allow(clippy::too_many_lines)]
    fn io_write_half(&mut self, address: u32, value: u16) {
        let offset = address & 0x00FF_FFFE;
        match offset {
            0x000 => self.lcd.dispcnt = value,
            0x002 => self.lcd.green_swap = value,
            // The flag bits (0-2) are read-only.
            0x004 => self.lcd.dispstat = (self.lcd.dispstat & 0b111) | (value & !0b111),
            0x006 => {}
            0x008..=0x00E => self.lcd.bgcnt[((offset - 8) / 2) as usize] = value,
            0x010..=0x01E => {
                let index = ((offset - 0x10) / 4) as usize;
                if offset % 4 == 0 {
                    self.lcd.bghofs[index] = value & 0x1FF;
                } else {
                    self.lcd.bgvofs[index] = value & 0x1FF;
                }
            }
            0x020..=0x026 => self.lcd.bg2p[((offset - 0x20) / 2) as usize] = value,
            0x028 => self.lcd.bg2x.set_bits(0..=15, u32::from(value)),
            0x02A => self.lcd.bg2x.set_bits(16..=31, u32::from(value)),
            0x02C => self.lcd.bg2y.set_bits(0..=15, u32::from(value)),
            0x02E => self.lcd.bg2y.set_bits(16..=31, u32::from(value)),
            0x030..=0x036 => self.lcd.bg3p[((offset - 0x30) / 2) as usize] = value,
            0x038 => self.lcd.bg3x.set_bits(0..=15, u32::from(value)),
            0x03A => self.lcd.bg3x.set_bits(16..=31, u32::from(value)),
            0x03C => self.lcd.bg3y.set_bits(0..=15, u32::from(value)),
            0x03E => self.lcd.bg3y.set_bits(16..=31, u32::from(value)),
            0x040 => self.lcd.win0h = value,
            0x042 => self.lcd.win1h = value,
            0x044 => self.lcd.win0v = value,
            0x046 => self.lcd.win1v = value,
            0x048 => self.lcd.winin = value,
            0x04A => self.lcd.winout = value,
            0x04C => self.lcd.mosaic = value,
            0x050 => self.lcd.bldcnt = value,
            0x052 => self.lcd.bldalpha = value,
            0x054 => self.lcd.bldy = value,

            0x060 => self.sound.channel1_sweep = value,
            0x062 => self.sound.channel1_duty_length_envelope = value,
            0x064 => {
                self.sound.channel1_frequency_control = value;
                self.sound.handle_trigger(1);
            }
            0x068 => self.sound.channel2_duty_length_envelope = value,
            0x06C => {
                self.sound.channel2_frequency_control = value;
                self.sound.handle_trigger(2);
            }
            0x070 => self.sound.channel3_stop_wave_ram_select = value,
            0x072 => self.sound.channel3_length_volume = value,
            0x074 => {
                self.sound.channel3_frequency_control = value;
                self.sound.handle_trigger(3);
            }
            0x078 => self.sound.channel4_length_envelope = value,
            0x07C => {
                self.sound.channel4_frequency_control = value;
                self.sound.handle_trigger(4);
            }
            0x080 => self.sound.control_stereo_volume_enable = value,
            0x082 => {
                // Bits 11/15 reset the FIFOs and read back as zero.
                if value.get_bit(11) {
                    self.sound.reset_fifo(0);
                }
                if value.get_bit(15) {
                    self.sound.reset_fifo(1);
                }
                self.sound.control_mixing_dma_control = value & !(1 << 11 | 1 << 15);
            }
            0x084 => self.sound.control_sound_on_off = value,
            0x088 => self.sound.sound_pwm_control = value,
            0x090..=0x09E => {
                let index = wave_ram_index(&self.sound, offset);
                self.sound.channel3_wave_pattern_ram[index] = value.get_byte(0);
                self.sound.channel3_wave_pattern_ram[index + 1] = value.get_byte(1);
            }
            0x0A0 => self.sound.write_fifo_a_half(value),
            0x0A2 => self.sound.write_fifo_a_half(value),
            0x0A4 => self.sound.write_fifo_b_half(value),
            0x0A6 => self.sound.write_fifo_b_half(value),

            0x0B0..=0x0DE => self.dma_write_half(offset, value),

            0x100 | 0x104 | 0x108 | 0x10C => {
                let n = ((offset - 0x100) / 4) as usize;
                self.timers.channels[n].reload = value;
            }
            0x102 | 0x106 | 0x10A | 0x10E => {
                let n = ((offset - 0x102) / 4) as usize;
                self.timers.write_control(n, value, &mut self.scheduler);
            }

            0x130 => {}
            0x132 => {
                self.keypad.key_control = value;
                self.keypad.scan_interrupt(&mut self.interrupt_control);
            }

            0x200 => self.interrupt_control.interrupt_enable = value & 0x3FFF,
            0x202 => self.interrupt_control.acknowledge(value),
            0x204 => self.interrupt_control.wait_state_control = value,
            0x208 => self.interrupt_control.interrupt_master_enable = value & 1,
            0x300 => {
                self.interrupt_control.post_boot_flag = value.get_byte(0);
                self.halt_request = Some(value.get_byte(1) & 0x80 != 0);
            }

            _ => {
                tracing::debug!("write to unhandled I/O register {address:#010X}");
                self.unused_region.insert(offset, value.get_byte(0));
                self.unused_region.insert(offset + 1, value.get_byte(1));
            }
        }
    }

    fn io_write_byte(&mut self, address: u32, value: u8) {
        let offset = address & 0x00FF_FFFF;
        match offset {
            // IF is acknowledge-on-write; merging the other byte in would
            // clear interrupts the write never named.
            0x202 => self.interrupt_control.acknowledge(u16::from(value)),
            0x203 => self.interrupt_control.acknowledge(u16::from(value) << 8),
            0x300 => self.interrupt_control.post_boot_flag = value,
            0x301 => self.halt_request = Some(value & 0x80 != 0),
            0x0A0..=0x0A3 => self.sound.write_fifo_a_byte(value),
            0x0A4..=0x0A7 => self.sound.write_fifo_b_byte(value),
            _ => {
                let mut half = self.io_read_half(address);
                half.set_byte((address & 1) as u8, value);
                self.io_write_half(address, half);
            }
        }
    }

    fn dma_write_half(&mut self, offset: u32, value: u16) {
        let n = ((offset - 0xB0) / 12) as usize;
        match (offset - 0xB0) % 12 {
            0 => self.dma.channels[n].source.set_bits(0..=15, u32::from(value)),
            2 => self.dma.channels[n].source.set_bits(16..=31, u32::from(value) & 0x0FFF),
            4 => self.dma.channels[n].destination.set_bits(0..=15, u32::from(value)),
            6 => self.dma.channels[n].destination.set_bits(16..=31, u32::from(value) & 0x0FFF),
            8 => self.dma.channels[n].word_count = value,
            _ => self.dma.write_control(n, value, &mut self.scheduler),
        }
    }
}

/// VRAM is 96 KiB mirrored in 128 KiB steps, with the upper 32 KiB of each
/// step mirroring the object pages.
fn vram_offset(address: u32) -> usize {
    let offset = address as usize % 0x2_0000;
    if offset >= 0x1_8000 {
        offset - 0x8000
    } else {
        offset
    }
}

/// CPU accesses hit the wave bank that is not currently playing.
fn wave_ram_index(sound: &Sound, offset: u32) -> usize {
    let bank = if sound.channel3_stop_wave_ram_select.get_bit(6) { 0 } else { 16 };
    bank + ((offset - 0x90) as usize & 0xE)
}
