//! The four 16-bit hardware timers.
//!
//! Running timers are not stepped cycle by cycle: the next overflow instant
//! is computed and registered with the scheduler, and reads of `TMxCNT_L`
//! reconstruct the counter from the clock. Cascade timers tick only when the
//! previous timer overflows.

use serde::{Deserialize, Serialize};

use crate::scheduler::{Event, EventHandle, Scheduler};

#[derive(Default, Serialize, Deserialize)]
pub struct Timers {
    pub channels: [Timer; 4],
}

#[derive(Default, Serialize, Deserialize)]
pub struct Timer {
    /// Reload value latched from writes to `TMxCNT_L`.
    pub reload: u16,
    /// `TMxCNT_H` control bits.
    pub control: u16,
    /// Counter value at `sync_cycle`, kept current for cascaded timers and
    /// while the timer is stopped.
    pub counter: u16,
    /// Clock value the `counter` field refers to.
    pub sync_cycle: u64,
    /// Absolute clock value of the registered overflow, when scheduled.
    pub overflow_at: u64,
    handle: Option<EventHandle>,
}

impl Timer {
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.control & (1 << 7) != 0
    }

    #[must_use]
    pub const fn cascade(&self) -> bool {
        self.control & (1 << 2) != 0
    }

    #[must_use]
    pub const fn irq_enabled(&self) -> bool {
        self.control & (1 << 6) != 0
    }

    #[must_use]
    pub const fn prescaler(&self) -> u64 {
        match self.control & 0b11 {
            0 => 1,
            1 => 64,
            2 => 256,
            _ => 1024,
        }
    }

    /// Cycles from `counter` to the next overflow at the current prescaler.
    #[must_use]
    pub fn cycles_until_overflow(&self) -> u64 {
        (0x1_0000 - u64::from(self.counter)) * self.prescaler()
    }

    /// The visible `TMxCNT_L` value.
    #[must_use]
    pub fn read_counter(&self, now: u64) -> u16 {
        if self.enabled() && !self.cascade() {
            let elapsed = (now - self.sync_cycle) / self.prescaler();
            (u64::from(self.counter) + elapsed) as u16
        } else {
            self.counter
        }
    }
}

impl Timers {
    /// Handles a `TMxCNT_H` write: (re)schedules the overflow event on an
    /// enable rising edge or prescaler change, cancels it on disable.
    pub fn write_control(&mut self, n: usize, value: u16, scheduler: &mut Scheduler) {
        let was_enabled = self.channels[n].enabled();

        // Freeze the counter under the old control value before switching.
        self.channels[n].counter = self.channels[n].read_counter(scheduler.now());
        self.channels[n].sync_cycle = scheduler.now();
        self.channels[n].control = value;

        if let Some(handle) = self.channels[n].handle.take() {
            scheduler.cancel(handle);
        }

        let timer = &mut self.channels[n];
        if timer.enabled() {
            if !was_enabled {
                timer.counter = timer.reload;
            }
            if !timer.cascade() {
                timer.overflow_at = scheduler.now() + timer.cycles_until_overflow();
                let delay = timer.overflow_at - scheduler.now();
                timer.handle = Some(scheduler.schedule(delay, Event::TimerOverflow(n as u8)));
            }
        }
    }

    /// Reloads timer `n` after an overflow and registers the next one.
    /// Returns which interrupts/cascades the caller has to propagate.
    pub fn reload_after_overflow(&mut self, n: usize, scheduler: &mut Scheduler) {
        let timer = &mut self.channels[n];
        timer.counter = timer.reload;
        timer.sync_cycle = timer.overflow_at;

        if !timer.cascade() {
            let period = timer.cycles_until_overflow();
            timer.overflow_at += period;
            let delay = timer.overflow_at.saturating_sub(scheduler.now()).max(1);
            timer.handle = Some(scheduler.schedule(delay, Event::TimerOverflow(n as u8)));
        }
    }

    /// Ticks a cascaded timer once. Returns true when it overflowed.
    pub fn tick_cascade(&mut self, n: usize) -> bool {
        let timer = &mut self.channels[n];
        if !timer.enabled() || !timer.cascade() {
            return false;
        }

        let (counter, overflowed) = timer.counter.overflowing_add(1);
        timer.counter = if overflowed { timer.reload } else { counter };
        overflowed
    }

    /// Rebase the absolute cycle fields after the scheduler clock was
    /// normalized down by `base`.
    pub fn rebase(&mut self, base: u64) {
        for timer in &mut self.channels {
            timer.sync_cycle = timer.sync_cycle.saturating_sub(base);
            timer.overflow_at = timer.overflow_at.saturating_sub(base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_scheduled_from_reload_and_prescaler() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();

        timers.channels[0].reload = 0xFFFE;
        timers.write_control(0, 1 << 7, &mut scheduler);

        assert_eq!(scheduler.next_event_in(), Some(2));

        scheduler.advance(2);
        assert_eq!(scheduler.pop_due(), Some(Event::TimerOverflow(0)));
    }

    #[test]
    fn prescaler_stretches_the_period() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();

        timers.channels[1].reload = 0xFFFF;
        timers.write_control(1, (1 << 7) | 0b01, &mut scheduler); // prescaler 64

        assert_eq!(scheduler.next_event_in(), Some(64));
    }

    #[test]
    fn counter_reads_track_the_clock() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();

        timers.channels[0].reload = 0x1000;
        timers.write_control(0, 1 << 7, &mut scheduler);

        scheduler.advance(0x20);
        assert_eq!(timers.channels[0].read_counter(scheduler.now()), 0x1020);
    }

    #[test]
    fn disable_cancels_the_pending_overflow() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();

        timers.write_control(0, 1 << 7, &mut scheduler);
        timers.write_control(0, 0, &mut scheduler);

        scheduler.advance(0x1_0000);
        assert_eq!(scheduler.pop_due(), None);
    }

    #[test]
    fn cascade_ticks_on_previous_overflow_only() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();

        timers.channels[1].reload = 0;
        timers.write_control(1, (1 << 7) | (1 << 2), &mut scheduler);

        // No event was scheduled for the cascaded timer itself.
        assert_eq!(scheduler.next_event_in(), None);

        assert!(!timers.tick_cascade(0));
        assert!(!timers.tick_cascade(1));
        assert_eq!(timers.channels[1].counter, 1);
    }
}
