//! End-to-end scenarios exercising the whole core through its public
//! surface: boot, memory semantics, timers, DMA, mode switches and the
//! vblank schedule.

use emu::bus::Access;
use emu::gba::Gba;
use emu::scheduler::{CYCLES_PER_FRAME, CYCLES_PER_LINE};

const BIOS_SIZE: usize = 0x4000;

/// A legal BIOS image: correct size, with a branch-to-self at the reset
/// vector so the CPU idles inside the BIOS.
fn empty_bios() -> Vec<u8> {
    let mut bios = vec![0; BIOS_SIZE];
    bios[0..4].copy_from_slice(&0xEAFF_FFFEu32.to_le_bytes()); // B .
    bios
}

#[test]
fn bios_boot_runs_one_frame_inside_the_bios() {
    let mut gba = Gba::new();
    gba.load_bios(&empty_bios()).unwrap();
    gba.reset();

    gba.run_for(CYCLES_PER_FRAME);

    // The executing instruction sits two fetches behind the PC.
    let executing = gba.cpu.registers.program_counter().wrapping_sub(8);
    assert!(
        (executing as usize) < BIOS_SIZE,
        "PC left the BIOS: {executing:#010X}"
    );
}

#[test]
fn unaligned_word_load_rotates() {
    let mut gba = Gba::new();
    gba.cpu.bus.write_word(0x0200_0000, 0xDEAD_BEEF, Access::NonSeq);

    assert_eq!(gba.cpu.bus.read_word(0x0200_0001, Access::NonSeq), 0xEFDE_ADBE);
}

#[test]
fn timer_cascade_after_four_ticks() {
    let mut gba = Gba::new();
    let bus = &mut gba.cpu.bus;

    // Timer 0: reload 0xFFFE at prescaler 1, IRQ enabled. Timer 1 cascades.
    bus.timers.channels[0].reload = 0xFFFE;
    bus.timers.write_control(0, (1 << 7) | (1 << 6), &mut bus.scheduler);
    bus.timers.write_control(1, (1 << 7) | (1 << 2), &mut bus.scheduler);

    // Four timer-0 ticks are two overflows.
    gba.run_for(4);

    assert_eq!(gba.cpu.bus.timers.channels[1].counter, 2);
    // Timer 0 overflow IRQ latched in IF bit 3.
    assert_ne!(gba.cpu.bus.interrupt_control.interrupt_flags & (1 << 3), 0);
}

#[test]
fn thumb_bx_returns_to_arm() {
    let mut gba = Gba::new();
    gba.cpu.cpsr.set_thumb_state(true);
    gba.cpu.registers.set_register_at(0, 0x0800_0000);

    // BX r0 - bit 0 clear, so the T bit clears and fetches are 32-bit.
    gba.cpu.execute_thumb(0x4700);

    assert!(!gba.cpu.cpsr.thumb_state());
    assert_eq!(gba.cpu.registers.program_counter(), 0x0800_0008);
}

#[test]
fn immediate_dma_copies_ewram_to_vram() {
    let mut gba = Gba::new();

    for i in 0..64u32 {
        gba.cpu
            .bus
            .write_half(0x0200_0000 + i * 2, (0xA000 + i) as u16, Access::NonSeq);
    }

    let bus = &mut gba.cpu.bus;
    bus.dma.channels[3].source = 0x0200_0000;
    bus.dma.channels[3].destination = 0x0600_0000;
    bus.dma.channels[3].word_count = 64;
    bus.dma.write_control(3, 1 << 15, &mut bus.scheduler);

    gba.run_for(1024);

    for i in 0..64u32 {
        assert_eq!(
            gba.cpu.bus.read_half(0x0600_0000 + i * 2, Access::NonSeq),
            0xA000 + i
        );
    }
    // No repeat: the channel disabled itself.
    assert!(!gba.cpu.bus.dma.channels[3].enabled());
}

#[test]
fn first_vblank_fires_at_cycle_197120() {
    let mut gba = Gba::new();
    gba.cpu.bus.lcd.dispstat |= 1 << 3; // vblank IRQ enable

    // One cycle short of scanline 160: no vblank yet. run_for overshoots by
    // at most one (1-cycle) BIOS instruction, so stop well before.
    gba.run_for(160 * CYCLES_PER_LINE - 16);
    assert_eq!(gba.cpu.bus.interrupt_control.interrupt_flags & 1, 0);
    assert!(gba.cpu.bus.lcd.vcount < 160);

    gba.run_for(32);
    assert_eq!(gba.cpu.bus.interrupt_control.interrupt_flags & 1, 1);
    assert_eq!(gba.cpu.bus.lcd.vcount, 160);
}

#[test]
fn keyinput_reads_active_low_buttons() {
    use emu::cpu::hardware::keypad::Button;

    let mut gba = Gba::new();
    assert_eq!(gba.cpu.bus.read_half(0x0400_0130, Access::NonSeq), 0x03FF);

    gba.key_input(Button::A, true);
    gba.key_input(Button::Start, true);
    let keyinput = gba.cpu.bus.read_half(0x0400_0130, Access::NonSeq);
    assert_eq!(keyinput & 0x03FF, 0x03FF & !(1 | (1 << 3)));

    gba.key_input(Button::A, false);
    let keyinput = gba.cpu.bus.read_half(0x0400_0130, Access::NonSeq);
    assert_eq!(keyinput & 1, 1);
}

#[test]
fn halt_until_vblank_interrupt() {
    let mut gba = Gba::new();

    // IME on, vblank enabled in both DISPSTAT and IE, CPSR unmasked, halt.
    gba.cpu.bus.write_half(0x0400_0208, 1, Access::NonSeq);
    gba.cpu.bus.write_half(0x0400_0200, 1, Access::NonSeq);
    gba.cpu.bus.lcd.dispstat |= 1 << 3;
    gba.cpu.cpsr.set_irq_disable(false);
    gba.cpu.halted = true;

    gba.run_for(CYCLES_PER_FRAME);

    // The CPU woke up and took the IRQ vector.
    assert!(!gba.cpu.halted);
    assert_eq!(gba.cpu.cpsr.mode(), emu::cpu::mode::Mode::Irq);
}
