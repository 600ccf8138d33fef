//! The four DMA channels.
//!
//! Register writes only latch state; the actual transfer happens at a
//! scheduled [`Event::DmaTransfer`](crate::scheduler::Event) because it
//! needs the whole bus, see [`Gba::run_dma`](crate::gba::Gba).

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{Event, Scheduler};

/// What causes a latched channel to start transferring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Sound FIFO refill for channels 1/2, video capture for channel 3.
    Special,
}

#[derive(Default, Serialize, Deserialize)]
pub struct Dma {
    pub channels: [DmaChannel; 4],
}

#[derive(Default, Serialize, Deserialize)]
pub struct DmaChannel {
    pub source: u32,
    pub destination: u32,
    pub word_count: u16,
    pub control: u16,

    /// Operands latched when the enable bit rises.
    pub internal_source: u32,
    pub internal_destination: u32,
    pub internal_count: u32,
}

impl DmaChannel {
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.control & (1 << 15) != 0
    }

    #[must_use]
    pub const fn repeat(&self) -> bool {
        self.control & (1 << 9) != 0
    }

    #[must_use]
    pub const fn word_transfer(&self) -> bool {
        self.control & (1 << 10) != 0
    }

    #[must_use]
    pub const fn irq_on_completion(&self) -> bool {
        self.control & (1 << 14) != 0
    }

    #[must_use]
    pub fn timing(&self) -> DmaTiming {
        match self.control.get_bits(12..=13) {
            0 => DmaTiming::Immediate,
            1 => DmaTiming::VBlank,
            2 => DmaTiming::HBlank,
            _ => DmaTiming::Special,
        }
    }

    /// Destination adjustment per unit: 0 increment, 1 decrement, 2 fixed,
    /// 3 increment+reload.
    #[must_use]
    pub fn destination_control(&self) -> u16 {
        self.control.get_bits(5..=6)
    }

    /// Source adjustment per unit: 0 increment, 1 decrement, 2 fixed.
    #[must_use]
    pub fn source_control(&self) -> u16 {
        self.control.get_bits(7..=8)
    }

    /// The effective unit count; zero reads as the channel maximum.
    #[must_use]
    pub fn latch_count(&self, channel_index: usize) -> u32 {
        let max = if channel_index == 3 { 0x1_0000 } else { 0x4000 };
        match u32::from(self.word_count) {
            0 => max,
            n => n.min(max),
        }
    }

    pub fn disable(&mut self) {
        self.control &= !(1 << 15);
    }
}

impl Dma {
    /// Handles a `DMAxCNT_H` write. On an enable rising edge the operands
    /// are latched and an immediate channel is queued on the scheduler after
    /// the 2-cycle startup delay.
    pub fn write_control(&mut self, n: usize, value: u16, scheduler: &mut Scheduler) {
        let channel = &mut self.channels[n];
        let was_enabled = channel.enabled();
        channel.control = value;

        if channel.enabled() && !was_enabled {
            channel.internal_source = channel.source;
            channel.internal_destination = channel.destination;
            channel.internal_count = channel.latch_count(n);

            if channel.timing() == DmaTiming::Immediate {
                scheduler.schedule(2, Event::DmaTransfer(n as u8));
            }
        }
    }

    /// Queues every enabled channel matching `timing`, in priority order.
    pub fn trigger(&mut self, timing: DmaTiming, scheduler: &mut Scheduler) {
        for n in 0..4 {
            if self.channels[n].enabled() && self.channels[n].timing() == timing {
                scheduler.schedule(2, Event::DmaTransfer(n as u8));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_latches_operands() {
        let mut dma = Dma::default();
        let mut scheduler = Scheduler::new();

        dma.channels[3].source = 0x0200_0000;
        dma.channels[3].destination = 0x0600_0000;
        dma.channels[3].word_count = 64;
        dma.write_control(3, 1 << 15, &mut scheduler);

        let channel = &dma.channels[3];
        assert_eq!(channel.internal_source, 0x0200_0000);
        assert_eq!(channel.internal_destination, 0x0600_0000);
        assert_eq!(channel.internal_count, 64);

        // Immediate timing queues the transfer.
        scheduler.advance(2);
        assert_eq!(scheduler.pop_due(), Some(Event::DmaTransfer(3)));
    }

    #[test]
    fn zero_count_is_channel_maximum() {
        let channel = DmaChannel::default();
        assert_eq!(channel.latch_count(0), 0x4000);
        assert_eq!(channel.latch_count(3), 0x1_0000);
    }

    #[test]
    fn vblank_channels_only_start_on_trigger() {
        let mut dma = Dma::default();
        let mut scheduler = Scheduler::new();

        dma.write_control(1, (1 << 15) | (1 << 12), &mut scheduler);
        scheduler.advance(10);
        assert_eq!(scheduler.pop_due(), None);

        dma.trigger(DmaTiming::VBlank, &mut scheduler);
        scheduler.advance(2);
        assert_eq!(scheduler.pop_due(), Some(Event::DmaTransfer(1)));
    }
}
