//! Top-level GBA system: the deterministic core the run loop drives.
//!
//! All subsystems hang off one state tree (`Gba` -> CPU -> bus -> hardware)
//! and scheduler events are dispatched by tag from [`Gba::dispatch`], so no
//! callbacks or borrow cycles are involved. [`Gba::run_for`] is the heart:
//! it pops due events, lets the CPU consume the cycles in between and keeps
//! the ordering between CPU, DMA, timers, PPU and APU reproducible.

use serde::{Deserialize, Serialize};

use crate::bus::{Access, Bus, BIOS_SIZE};
use crate::cartridge_header::{lookup_game, CartridgeHeader};
use crate::cpu::arm7tdmi::{Arm7tdmi, Exception};
use crate::cpu::hardware::backup::{detect_backup_type, BackupSource, BackupType};
use crate::cpu::hardware::cartridge::{ROM_MAX_SIZE, ROM_MIN_SIZE};
use crate::cpu::hardware::dma::DmaTiming;
use crate::cpu::hardware::interrupt_control::Interrupt;
use crate::cpu::hardware::keypad::Button;
use crate::cpu::hardware::lcd::{DISPLAY_HEIGHT, DISPLAY_WIDTH, TOTAL_LINES};
use crate::scheduler::{Event, CYCLES_PER_HDRAW, CYCLES_PER_LINE, CYCLES_PER_SECOND};

/// One published frame: RGB888, row major.
pub type VideoFrame = Box<[u8; DISPLAY_WIDTH * DISPLAY_HEIGHT * 3]>;

/// Ring capacity between the emulator and the display.
pub const FRAME_RING_CAPACITY: usize = 4;

/// Default audio output rate.
pub const DEFAULT_RESAMPLE_FREQUENCY: u32 = 48_000;

#[derive(Serialize, Deserialize)]
pub struct Gba {
    pub cpu: Arm7tdmi,
    pub cartridge_header: Option<CartridgeHeader>,

    /// Set on the first Run command; backup/RTC configuration is frozen
    /// afterwards.
    pub started: bool,
    pub color_correction: bool,
    pub rtc_auto_detect: bool,

    #[serde(skip)]
    pub frame_tx: Option<rtrb::Producer<VideoFrame>>,
}

impl Default for Gba {
    fn default() -> Self {
        Self::new()
    }
}

impl Gba {
    #[must_use]
    pub fn new() -> Self {
        let mut bus = Bus::default();
        bus.sound.resample_frequency = DEFAULT_RESAMPLE_FREQUENCY;

        let mut gba = Self {
            cpu: Arm7tdmi::new(bus),
            cartridge_header: None,
            started: false,
            color_correction: false,
            rtc_auto_detect: true,
            frame_tx: None,
        };
        gba.reset();
        gba
    }

    /// Console reset: clears RAM, I/O and the scheduler, restarts the CPU at
    /// the reset vector and registers the recurring hardware events. BIOS,
    /// ROM and backup contents survive.
    pub fn reset(&mut self) {
        self.cpu.bus.reset();
        self.cpu.reset();
        self.started = false;

        let scheduler = &mut self.cpu.bus.scheduler;
        scheduler.schedule(CYCLES_PER_HDRAW, Event::HBlank);
        scheduler.schedule(CYCLES_PER_LINE, Event::EndOfLine);
        scheduler.schedule(CYCLES_PER_SECOND / 256, Event::ApuLength);
        scheduler.schedule(CYCLES_PER_SECOND / 64, Event::ApuEnvelope);
        scheduler.schedule(CYCLES_PER_SECOND / 128, Event::ApuSweep);
        let sample_period = self.cpu.bus.sound.cycles_per_sample();
        self.cpu.bus.scheduler.schedule(sample_period, Event::ApuSample);

        self.cpu.bus.lcd.latch_affine_references();
    }

    /// Loads a BIOS image. The hardware ROM is exactly 16 KiB.
    pub fn load_bios(&mut self, image: &[u8]) -> Result<(), String> {
        if image.len() != BIOS_SIZE {
            return Err(format!(
                "BIOS image must be {BIOS_SIZE} bytes, got {}",
                image.len()
            ));
        }
        self.cpu.bus.load_bios(image);
        Ok(())
    }

    /// Loads a ROM image, parses its header and configures backup storage
    /// and RTC from the game database (or a ROM scan when unknown).
    pub fn load_rom(&mut self, image: Vec<u8>) -> Result<(), String> {
        if image.len() < ROM_MIN_SIZE {
            return Err(format!("ROM too small: {} bytes", image.len()));
        }
        if image.len() > ROM_MAX_SIZE {
            return Err(format!("ROM too large: {} bytes", image.len()));
        }

        let header = CartridgeHeader::new(&image)?;
        tracing::info!(
            "loaded \"{}\" ({}, maker {})",
            header.game_title,
            header.game_code,
            header.maker_code
        );

        let database_entry = lookup_game(&header.game_code);

        if self.cpu.bus.cartridge.backup.source != BackupSource::Manual {
            let kind = database_entry
                .map(|entry| entry.backup)
                .unwrap_or_else(|| detect_backup_type(&image));
            tracing::info!("backup storage: {kind:?}");
            self.cpu.bus.cartridge.backup.set_kind(kind, BackupSource::AutoDetected);
        }

        if self.rtc_auto_detect {
            self.cpu.bus.cartridge.gpio.rtc_enabled =
                database_entry.is_some_and(|entry| entry.rtc);
        }

        self.cartridge_header = Some(header);
        self.cpu.bus.cartridge.rom = image;
        Ok(())
    }

    /// Installs a save blob pushed by the front-end.
    pub fn load_backup(&mut self, blob: &[u8]) {
        self.cpu.bus.cartridge.backup.load(blob);
    }

    /// Front-end override of the backup type; `None` re-runs auto detection.
    pub fn set_backup_type(&mut self, kind: Option<BackupType>) {
        match kind {
            Some(kind) => {
                self.cpu.bus.cartridge.backup.set_kind(kind, BackupSource::Manual);
            }
            None => {
                let detected = self
                    .cartridge_header
                    .as_ref()
                    .and_then(|header| lookup_game(&header.game_code))
                    .map(|entry| entry.backup)
                    .unwrap_or_else(|| detect_backup_type(&self.cpu.bus.cartridge.rom));
                self.cpu.bus.cartridge.backup.set_kind(detected, BackupSource::AutoDetected);
            }
        }
    }

    pub fn key_input(&mut self, button: Button, pressed: bool) {
        let bus = &mut self.cpu.bus;
        bus.keypad.set_button(button, pressed);
        bus.keypad.scan_interrupt(&mut bus.interrupt_control);
    }

    /// Runs the scheduler for `cycles` master cycles: due events first, then
    /// the CPU (or a halt skip) for the stretch until the next one.
    pub fn run_for(&mut self, cycles: u64) {
        let target = self.cpu.bus.scheduler.now() + cycles;

        while self.cpu.bus.scheduler.now() < target {
            while let Some(event) = self.cpu.bus.scheduler.pop_due() {
                self.dispatch(event);
                // DMA bursts consume bus time with the CPU stalled.
                let spent = u64::from(self.cpu.bus.take_cycles());
                self.cpu.bus.scheduler.advance(spent);
            }

            if self.cpu.halted || self.cpu.stopped {
                if self.cpu.bus.interrupt_control.wake_line() {
                    self.cpu.halted = false;
                    self.cpu.stopped = false;
                } else {
                    // Nothing to execute: jump to the next event.
                    let remaining = target - self.cpu.bus.scheduler.now();
                    let skip = self
                        .cpu
                        .bus
                        .scheduler
                        .next_event_in()
                        .map_or(remaining, |delay| delay.min(remaining));
                    self.cpu.bus.scheduler.advance(skip.max(1));
                    continue;
                }
            }

            if self.cpu.bus.interrupt_control.irq_line() && !self.cpu.cpsr.irq_disable() {
                self.cpu.exception(Exception::Irq);
                let spent = u64::from(self.cpu.bus.take_cycles());
                self.cpu.bus.scheduler.advance(spent);
            }

            let spent = u64::from(self.cpu.step());
            self.cpu.bus.scheduler.advance(spent.max(1));
        }

        // The last instruction may overshoot the budget; whatever came due
        // in that overshoot still belongs to this slice.
        while let Some(event) = self.cpu.bus.scheduler.pop_due() {
            self.dispatch(event);
            let spent = u64::from(self.cpu.bus.take_cycles());
            self.cpu.bus.scheduler.advance(spent);
        }
    }

    /// Frame-boundary clock rebase so the cycle counter never overflows
    /// over a long session.
    pub fn normalize_clock(&mut self) {
        let base = self.cpu.bus.scheduler.normalize();
        if base != 0 {
            self.cpu.bus.timers.rebase(base);
        }
    }

    /// Scheduler event dispatch, one match over the handler tags.
    pub fn dispatch(&mut self, event: Event) {
        match event {
            Event::HBlank => self.handle_hblank(),
            Event::EndOfLine => self.handle_end_of_line(),
            Event::TimerOverflow(n) => self.handle_timer_overflow(usize::from(n)),
            Event::DmaTransfer(n) => self.run_dma(usize::from(n)),
            Event::ApuLength => {
                self.cpu.bus.sound.length_tick();
                self.cpu.bus.scheduler.schedule(CYCLES_PER_SECOND / 256, Event::ApuLength);
            }
            Event::ApuEnvelope => {
                self.cpu.bus.sound.envelope_tick();
                self.cpu.bus.scheduler.schedule(CYCLES_PER_SECOND / 64, Event::ApuEnvelope);
            }
            Event::ApuSweep => {
                self.cpu.bus.sound.sweep_tick();
                self.cpu.bus.scheduler.schedule(CYCLES_PER_SECOND / 128, Event::ApuSweep);
            }
            Event::ApuSample => {
                let period = self.cpu.bus.sound.cycles_per_sample();
                self.cpu.bus.sound.sample(period as u32);
                self.cpu.bus.scheduler.schedule(period, Event::ApuSample);
            }
        }
    }

    fn handle_hblank(&mut self) {
        let bus = &mut self.cpu.bus;
        bus.lcd.set_hblank_flag(true);

        let visible = bus.lcd.vcount < DISPLAY_HEIGHT as u16;
        if visible {
            bus.lcd.render_scanline();
            bus.dma.trigger(DmaTiming::HBlank, &mut bus.scheduler);
        }

        if bus.lcd.hblank_irq_enabled() {
            bus.interrupt_control.request(Interrupt::HBlank);
        }

        // Video capture DMA services lines 2..=161.
        if (2..=161).contains(&bus.lcd.vcount)
            && bus.dma.channels[3].enabled()
            && bus.dma.channels[3].timing() == DmaTiming::Special
        {
            bus.scheduler.schedule(2, Event::DmaTransfer(3));
        }

        bus.scheduler.schedule(CYCLES_PER_LINE, Event::HBlank);
    }

    fn handle_end_of_line(&mut self) {
        let bus = &mut self.cpu.bus;
        bus.lcd.set_hblank_flag(false);

        bus.lcd.vcount += 1;
        if bus.lcd.vcount == TOTAL_LINES {
            bus.lcd.vcount = 0;
            bus.lcd.latch_affine_references();
        } else if bus.lcd.vcount <= DISPLAY_HEIGHT as u16 {
            bus.lcd.step_affine_references();
        }

        if bus.lcd.vcount == DISPLAY_HEIGHT as u16 {
            // Entering vblank.
            bus.lcd.set_vblank_flag(true);
            if bus.lcd.vblank_irq_enabled() {
                bus.interrupt_control.request(Interrupt::VBlank);
            }
            bus.dma.trigger(DmaTiming::VBlank, &mut bus.scheduler);
            self.publish_frame();
        } else if self.cpu.bus.lcd.vcount == TOTAL_LINES - 1 {
            self.cpu.bus.lcd.set_vblank_flag(false);
        }

        let bus = &mut self.cpu.bus;
        let matches = bus.lcd.vcount == bus.lcd.vcount_setting();
        bus.lcd.set_vcounter_flag(matches);
        if matches && bus.lcd.vcounter_irq_enabled() {
            bus.interrupt_control.request(Interrupt::VCount);
        }

        bus.scheduler.schedule(CYCLES_PER_LINE, Event::EndOfLine);
    }

    fn handle_timer_overflow(&mut self, n: usize) {
        self.timer_overflow_effects(n);
        let bus = &mut self.cpu.bus;
        bus.timers.reload_after_overflow(n, &mut bus.scheduler);
    }

    /// IRQ, FIFO feeding and cascade propagation of one timer overflow.
    fn timer_overflow_effects(&mut self, n: usize) {
        let bus = &mut self.cpu.bus;

        if bus.timers.channels[n].irq_enabled() {
            bus.interrupt_control.request(Interrupt::timer(n as u8));
        }

        let refills = bus.sound.timer_overflow(n);
        for (fifo, wanted) in refills.iter().enumerate() {
            if !wanted {
                continue;
            }
            // FIFO A refills through DMA 1, FIFO B through DMA 2.
            let channel = fifo + 1;
            if bus.dma.channels[channel].enabled()
                && bus.dma.channels[channel].timing() == DmaTiming::Special
            {
                bus.scheduler.schedule(2, Event::DmaTransfer(channel as u8));
            }
        }

        if n < 3 && self.cpu.bus.timers.tick_cascade(n + 1) {
            self.timer_overflow_effects(n + 1);
        }
    }

    /// Executes one queued DMA transfer. The CPU is stalled for the whole
    /// burst: the bus cycles consumed here are drained by `run_for`.
    pub fn run_dma(&mut self, n: usize) {
        let bus = &mut self.cpu.bus;
        let channel = &bus.dma.channels[n];
        if !channel.enabled() {
            return;
        }

        let fifo_mode = (n == 1 || n == 2) && channel.timing() == DmaTiming::Special;
        let word_transfer = channel.word_transfer() || fifo_mode;
        let unit: u32 = if word_transfer { 4 } else { 2 };

        // Sound DMA ignores the programmed count and destination stepping.
        let count = if fifo_mode { 4 } else { channel.internal_count };
        let source_step = match channel.source_control() {
            0 => unit as i64,
            1 => -(i64::from(unit)),
            _ => 0,
        };
        let destination_step = if fifo_mode {
            0
        } else {
            match channel.destination_control() {
                1 => -(i64::from(unit)),
                2 => 0,
                _ => unit as i64,
            }
        };

        let mut source = channel.internal_source;
        let mut destination = channel.internal_destination;
        let irq = channel.irq_on_completion();
        let repeat = channel.repeat() && channel.timing() != DmaTiming::Immediate;
        let reload_destination = channel.destination_control() == 3;

        self.cpu.bus.idle();
        self.cpu.bus.idle();

        let mut access = Access::NonSeq;
        for _ in 0..count {
            if word_transfer {
                let value = self.cpu.bus.read_word(source & !3, access);
                self.cpu.bus.write_word(destination & !3, value, access);
            } else {
                let value = self.cpu.bus.read_half(source & !1, access) as u16;
                self.cpu.bus.write_half(destination & !1, value, access);
            }
            access = Access::Seq;
            source = (i64::from(source) + source_step) as u32;
            destination = (i64::from(destination) + destination_step) as u32;
        }

        let channel = &mut self.cpu.bus.dma.channels[n];
        channel.internal_source = source;
        channel.internal_destination = destination;

        if repeat {
            channel.internal_count = channel.latch_count(n);
            if reload_destination {
                channel.internal_destination = channel.destination;
            }
        } else {
            channel.disable();
        }

        if irq {
            self.cpu.bus.interrupt_control.request(Interrupt::dma(n as u8));
        }
    }

    /// Converts the finished RGB555 frame to RGB888 (optionally through the
    /// LCD color profile) and hands it to the display ring.
    fn publish_frame(&mut self) {
        let Some(tx) = self.frame_tx.as_mut() else {
            return;
        };

        let mut out: VideoFrame = vec![0u8; DISPLAY_WIDTH * DISPLAY_HEIGHT * 3]
            .into_boxed_slice()
            .try_into()
            .expect("frame buffer size");

        for (y, row) in self.cpu.bus.lcd.frame.iter().enumerate() {
            for (x, &pixel) in row.iter().enumerate() {
                let index = (y * DISPLAY_WIDTH + x) * 3;
                let rgb = if self.color_correction {
                    correct_color(pixel)
                } else {
                    expand_color(pixel)
                };
                out[index..index + 3].copy_from_slice(&rgb);
            }
        }

        // Dropped when the display is behind; it will pick up the next one.
        let _ = tx.push(out);
    }
}

/// Plain 5-to-8 bit channel expansion.
fn expand_color(pixel: u16) -> [u8; 3] {
    let r = (pixel & 0x1F) as u8;
    let g = ((pixel >> 5) & 0x1F) as u8;
    let b = ((pixel >> 10) & 0x1F) as u8;
    [(r << 3) | (r >> 2), (g << 3) | (g >> 2), (b << 3) | (b >> 2)]
}

/// Channel-bleed approximation of the AGB panel response.
fn correct_color(pixel: u16) -> [u8; 3] {
    let r = u32::from(pixel & 0x1F);
    let g = u32::from((pixel >> 5) & 0x1F);
    let b = u32::from((pixel >> 10) & 0x1F);

    let mix_r = (r * 26 + g * 4 + b * 2).min(480);
    let mix_g = (g * 24 + b * 8).min(480);
    let mix_b = (r * 6 + g * 4 + b * 22).min(480);

    [
        (mix_r * 255 / 480) as u8,
        (mix_g * 255 / 480) as u8,
        (mix_b * 255 / 480) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::CYCLES_PER_FRAME;

    #[test]
    fn run_for_advances_the_clock_exactly() {
        let mut gba = Gba::new();
        let start = gba.cpu.bus.scheduler.now();
        gba.run_for(1000);
        // The CPU overshoots by at most one instruction.
        let elapsed = gba.cpu.bus.scheduler.now() - start;
        assert!(elapsed >= 1000);
        assert!(elapsed < 1000 + 64);
    }

    #[test]
    fn vcount_cycles_through_all_lines() {
        let mut gba = Gba::new();
        gba.run_for(CYCLES_PER_FRAME);
        // After exactly one frame we're back on line 0.
        assert!(gba.cpu.bus.lcd.vcount < 2);
    }

    #[test]
    fn vblank_flag_set_during_vblank_lines() {
        let mut gba = Gba::new();
        gba.run_for(CYCLES_PER_LINE * 161);
        assert_eq!(gba.cpu.bus.lcd.dispstat & 1, 1);
        assert!(gba.cpu.bus.lcd.vcount >= 160);
    }

    #[test]
    fn first_vblank_interrupt_fires_at_line_160() {
        let mut gba = Gba::new();
        // Enable the vblank IRQ in DISPSTAT.
        gba.cpu.bus.lcd.dispstat |= 1 << 3;

        gba.run_for(CYCLES_PER_LINE * 160 - 64);
        assert_eq!(gba.cpu.bus.interrupt_control.interrupt_flags & 1, 0);

        gba.run_for(128);
        assert_eq!(gba.cpu.bus.interrupt_control.interrupt_flags & 1, 1);
    }

    #[test]
    fn immediate_dma_copies_and_self_disables() {
        let mut gba = Gba::new();

        for i in 0..64u32 {
            gba.cpu.bus.write_half(0x0200_0000 + i * 2, 0x1100 + i as u16, Access::NonSeq);
        }

        let bus = &mut gba.cpu.bus;
        bus.dma.channels[3].source = 0x0200_0000;
        bus.dma.channels[3].destination = 0x0600_0000;
        bus.dma.channels[3].word_count = 64;
        bus.dma.write_control(3, 1 << 15, &mut bus.scheduler);

        gba.run_for(512);

        for i in 0..64u32 {
            assert_eq!(
                gba.cpu.bus.read_half(0x0600_0000 + i * 2, Access::NonSeq),
                0x1100 + u32::from(i as u16)
            );
        }
        assert!(!gba.cpu.bus.dma.channels[3].enabled());
    }

    #[test]
    fn dma_completion_interrupt() {
        let mut gba = Gba::new();
        let bus = &mut gba.cpu.bus;
        bus.dma.channels[0].source = 0x0200_0000;
        bus.dma.channels[0].destination = 0x0300_0000;
        bus.dma.channels[0].word_count = 1;
        bus.dma.write_control(0, (1 << 15) | (1 << 14), &mut bus.scheduler);

        gba.run_for(64);
        assert_ne!(gba.cpu.bus.interrupt_control.interrupt_flags & (1 << 8), 0);
    }

    #[test]
    fn timer_cascade_counts_overflows() {
        let mut gba = Gba::new();
        let bus = &mut gba.cpu.bus;

        // Timer 0 overflows every 2 cycles, timer 1 cascades and raises an
        // IRQ on its own overflows only when enabled.
        bus.timers.channels[0].reload = 0xFFFE;
        bus.timers.write_control(0, (1 << 7) | (1 << 6), &mut bus.scheduler);
        bus.timers.write_control(1, (1 << 7) | (1 << 2), &mut bus.scheduler);

        gba.run_for(9);

        // 4 overflows of timer 0 -> timer 1 counted 4.
        assert_eq!(gba.cpu.bus.timers.channels[1].counter, 4);
        assert_ne!(gba.cpu.bus.interrupt_control.interrupt_flags & (1 << 3), 0);
    }

    #[test]
    fn halted_cpu_skips_to_events_and_wakes_on_interrupt() {
        let mut gba = Gba::new();
        gba.cpu.halted = true;

        // With IE empty the CPU stays asleep the whole frame.
        gba.run_for(CYCLES_PER_FRAME);
        assert!(gba.cpu.halted);

        // A pending, enabled source wakes it even with IME clear.
        gba.cpu.bus.interrupt_control.interrupt_enable = 1 << 3;
        gba.cpu.bus.interrupt_control.request(Interrupt::Timer0);
        gba.run_for(64);
        assert!(!gba.cpu.halted);
    }

    #[test]
    fn normalize_preserves_timer_alignment() {
        let mut gba = Gba::new();
        let bus = &mut gba.cpu.bus;
        bus.timers.channels[0].reload = 0;
        bus.timers.write_control(0, 1 << 7, &mut bus.scheduler);

        gba.run_for(1000);
        let counter_before = {
            let now = gba.cpu.bus.scheduler.now();
            gba.cpu.bus.timers.channels[0].read_counter(now)
        };

        gba.normalize_clock();
        let counter_after = {
            let now = gba.cpu.bus.scheduler.now();
            gba.cpu.bus.timers.channels[0].read_counter(now)
        };
        assert_eq!(counter_before, counter_after);
    }

    #[test]
    fn color_conversion() {
        assert_eq!(expand_color(0x7FFF), [255, 255, 255]);
        assert_eq!(expand_color(0x001F), [255, 0, 0]);
        assert_eq!(correct_color(0), [0, 0, 0]);
        // Pure red bleeds into blue on the panel.
        let corrected = correct_color(0x001F);
        assert!(corrected[0] > 200);
        assert!(corrected[2] > 0);
    }

    #[test]
    fn load_rom_validates_and_configures_backup() {
        let mut gba = Gba::new();
        assert!(gba.load_rom(vec![0; 64]).is_err());
        assert!(gba.load_bios(&[0; 100]).is_err());

        let mut rom = vec![0u8; 0x1000];
        rom[0x0AC..0x0B0].copy_from_slice(b"BPEE");
        gba.load_rom(rom).unwrap();

        assert_eq!(gba.cpu.bus.cartridge.backup.kind, BackupType::Flash128);
        assert!(gba.cpu.bus.cartridge.gpio.rtc_enabled);
        assert_eq!(
            gba.cartridge_header.as_ref().unwrap().game_code,
            "BPEE"
        );
    }
}
