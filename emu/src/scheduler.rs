//! # Event Scheduler
//!
//! Every piece of hardware outside the CPU is paced by this module: the PPU
//! line state machine, timer overflows, DMA transfers and the APU sequencer
//! all register events at an absolute cycle count. The main loop pops the
//! earliest event, lets the CPU consume the cycles in between, and dispatches
//! the event tag to its handler.
//!
//! Two entries scheduled for the same cycle fire in insertion order.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};

use serde::{Deserialize, Serialize};

/// Cycles per video frame: 228 scanlines of 1232 cycles each.
pub const CYCLES_PER_FRAME: u64 = 280_896;

/// Master clock frequency (16.78 MHz).
pub const CYCLES_PER_SECOND: u64 = 16_777_216;

/// Cycles per scanline (visible draw + hblank).
pub const CYCLES_PER_LINE: u64 = 1232;

/// Cycles of the visible part of a scanline.
pub const CYCLES_PER_HDRAW: u64 = 1006;

/// Everything the scheduler knows how to fire. Handlers are dispatched by
/// tag from a single match in [`crate::gba::Gba::dispatch`], so no callback
/// pointers have to live inside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// The visible part of the current scanline ended.
    HBlank,
    /// The current scanline (draw + hblank) ended.
    EndOfLine,
    /// Timer `n` reached 0x10000.
    TimerOverflow(u8),
    /// DMA channel `n` is due to transfer.
    DmaTransfer(u8),
    /// 256 Hz length-counter tick of the PSG channels.
    ApuLength,
    /// 64 Hz envelope tick of the PSG channels.
    ApuEnvelope,
    /// 128 Hz frequency-sweep tick of square 1.
    ApuSweep,
    /// Mix one output sample into the audio ring.
    ApuSample,
}

/// Token returned by [`Scheduler::schedule`], used to cancel the entry later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventHandle(u64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Entry {
    trigger: u64,
    seq: u64,
    event: Event,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.trigger, self.seq).cmp(&(other.trigger, other.seq))
    }
}

#[derive(Default, Serialize, Deserialize)]
pub struct Scheduler {
    /// Serialized as a sorted list so a quicksave/quickload roundtrip is
    /// byte-identical regardless of the heap's internal layout.
    #[serde(serialize_with = "serialize_heap", deserialize_with = "deserialize_heap")]
    heap: BinaryHeap<Reverse<Entry>>,
    cancelled: BTreeSet<u64>,
    cycles: u64,
    seq: u64,
}

fn serialize_heap<S>(heap: &BinaryHeap<Reverse<Entry>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let mut entries: Vec<Reverse<Entry>> = heap.iter().copied().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.serialize(serializer)
}

fn deserialize_heap<'de, D>(deserializer: D) -> Result<BinaryHeap<Reverse<Entry>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Vec::<Reverse<Entry>>::deserialize(deserializer)?.into())
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value of the master clock.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.cycles
    }

    pub fn advance(&mut self, cycles: u64) {
        self.cycles += cycles;
    }

    /// Registers `event` to fire `delay` cycles from now.
    ///
    /// A zero delay would fire within the current tick, which would let a
    /// handler re-queue itself forever without time moving forward. It is
    /// clamped to one cycle and flagged.
    pub fn schedule(&mut self, delay: u64, event: Event) -> EventHandle {
        let delay = if delay == 0 {
            tracing::warn!("event {event:?} scheduled in the past, clamping to now + 1");
            1
        } else {
            delay
        };

        self.seq += 1;
        self.heap.push(Reverse(Entry {
            trigger: self.cycles + delay,
            seq: self.seq,
            event,
        }));

        EventHandle(self.seq)
    }

    /// Marks the entry dead. It stays in the heap and is skipped at pop time.
    pub fn cancel(&mut self, handle: EventHandle) {
        self.cancelled.insert(handle.0);
    }

    /// Cycles until the next live entry fires, if any.
    #[must_use]
    pub fn next_event_in(&mut self) -> Option<u64> {
        self.skip_cancelled();
        self.heap
            .peek()
            .map(|Reverse(entry)| entry.trigger.saturating_sub(self.cycles))
    }

    /// Pops the earliest entry if its trigger has been reached.
    pub fn pop_due(&mut self) -> Option<Event> {
        self.skip_cancelled();
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.trigger <= self.cycles => {
                let Reverse(entry) = self.heap.pop().unwrap();
                Some(entry.event)
            }
            _ => None,
        }
    }

    fn skip_cancelled(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.cancelled.remove(&entry.seq) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }

    /// Discards every pending entry without touching the clock.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.cancelled.clear();
    }

    /// Rebases the clock so the counter cannot overflow over a long session.
    /// Called at frame boundaries; every pending trigger is shifted down by
    /// the current clock value, which is returned so the caller can rebase
    /// any absolute timestamps it keeps of its own.
    pub fn normalize(&mut self) -> u64 {
        let base = self.cycles;
        if base == 0 {
            return 0;
        }

        let entries: Vec<Reverse<Entry>> = self.heap.drain().collect();
        for Reverse(mut entry) in entries {
            entry.trigger = entry.trigger.saturating_sub(base);
            self.heap.push(Reverse(entry));
        }
        self.cycles = 0;
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fire_in_trigger_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(30, Event::EndOfLine);
        scheduler.schedule(10, Event::HBlank);
        scheduler.schedule(20, Event::TimerOverflow(0));

        scheduler.advance(30);
        assert_eq!(scheduler.pop_due(), Some(Event::HBlank));
        assert_eq!(scheduler.pop_due(), Some(Event::TimerOverflow(0)));
        assert_eq!(scheduler.pop_due(), Some(Event::EndOfLine));
        assert_eq!(scheduler.pop_due(), None);
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(5, Event::TimerOverflow(3));
        scheduler.schedule(5, Event::TimerOverflow(1));
        scheduler.schedule(5, Event::TimerOverflow(2));

        scheduler.advance(5);
        assert_eq!(scheduler.pop_due(), Some(Event::TimerOverflow(3)));
        assert_eq!(scheduler.pop_due(), Some(Event::TimerOverflow(1)));
        assert_eq!(scheduler.pop_due(), Some(Event::TimerOverflow(2)));
    }

    #[test]
    fn not_due_until_clock_reaches_trigger() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(100, Event::HBlank);

        scheduler.advance(99);
        assert_eq!(scheduler.pop_due(), None);
        assert_eq!(scheduler.next_event_in(), Some(1));

        scheduler.advance(1);
        assert_eq!(scheduler.pop_due(), Some(Event::HBlank));
    }

    #[test]
    fn cancelled_entries_are_skipped() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.schedule(10, Event::HBlank);
        scheduler.schedule(10, Event::EndOfLine);
        scheduler.cancel(handle);

        scheduler.advance(10);
        assert_eq!(scheduler.pop_due(), Some(Event::EndOfLine));
        assert_eq!(scheduler.pop_due(), None);
    }

    #[test]
    fn zero_delay_is_clamped_forward() {
        let mut scheduler = Scheduler::new();
        scheduler.advance(50);
        scheduler.schedule(0, Event::ApuSample);

        assert_eq!(scheduler.pop_due(), None);
        scheduler.advance(1);
        assert_eq!(scheduler.pop_due(), Some(Event::ApuSample));
    }

    #[test]
    fn normalize_preserves_relative_triggers() {
        let mut scheduler = Scheduler::new();
        scheduler.advance(1000);
        scheduler.schedule(32, Event::HBlank);
        scheduler.schedule(64, Event::EndOfLine);

        scheduler.normalize();
        assert_eq!(scheduler.now(), 0);
        assert_eq!(scheduler.next_event_in(), Some(32));

        scheduler.advance(32);
        assert_eq!(scheduler.pop_due(), Some(Event::HBlank));
        assert_eq!(scheduler.next_event_in(), Some(32));
    }
}
