//! Event scheduler for DRC emulation
//!
//! The emulator advances a global cycle counter as the CPU executes opcodes.
//! Peripherals queue work at absolute cycle counts; the run loop drains every
//! event whose stamp has been reached between instructions, never in the
//! middle of one.
//!
//! Cycle stamps are periodically rebased (see [`Scheduler::rebase`]) so the
//! counters stay within 31 bits of each other.

/// Interval of the self-rescheduling rebase task, in cycles.
pub const REBASE_INTERVAL: u64 = 0x7FFF_FFFF;

/// Work items the run loop knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Re-evaluate pending interrupt lines against the CPU state
    CheckIrqs,
    /// Prescaled tick for the two down-to-target timers
    TimerTick,
    /// Prescaled tick for the free-running counter
    CountTick,
    /// Render and queue one frame, raise V-blank
    DrawFrame,
    /// Rebase all cycle stamps to keep counters small
    ResetCycles,
}

/// A queued event with its absolute fire time.
#[derive(Debug, Clone, Copy)]
struct ScheduledEvent {
    cycles: u64,
    event: Event,
}

/// Priority queue of future events keyed by the global cycle counter.
#[derive(Debug)]
pub struct Scheduler {
    /// Pending events, ascending by cycle stamp (FIFO among equal stamps)
    queue: Vec<ScheduledEvent>,
    /// Cycles executed since reset (minus rebase adjustments)
    global_cycles: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Vec::new(),
            global_cycles: 0,
        }
    }

    /// Clear the queue and counters.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.global_cycles = 0;
    }

    /// Current global cycle count.
    pub fn now(&self) -> u64 {
        self.global_cycles
    }

    /// Advance the global counter after an executed opcode.
    pub fn advance(&mut self, cycles: u32) {
        self.global_cycles += cycles as u64;
    }

    /// Queue an event `cycles_from_now` cycles in the future.
    /// Returns the absolute cycle count it will fire at, which consumers that
    /// reschedule themselves keep as a generation check.
    pub fn schedule(&mut self, event: Event, cycles_from_now: u64) -> u64 {
        let cycles = self.global_cycles + cycles_from_now;
        let pos = self.queue.partition_point(|e| e.cycles <= cycles);
        self.queue.insert(pos, ScheduledEvent { cycles, event });
        cycles
    }

    /// Pop the next event whose stamp has been reached, if any, together
    /// with the absolute cycle it was scheduled for.
    pub fn pop_due(&mut self) -> Option<(Event, u64)> {
        if self.queue.first()?.cycles <= self.global_cycles {
            let entry = self.queue.remove(0);
            Some((entry.event, entry.cycles))
        } else {
            None
        }
    }

    /// Subtract the current global count from every queued stamp and from the
    /// counter itself. Returns the amount subtracted so components holding
    /// absolute stamps of their own can adjust them too.
    pub fn rebase(&mut self) -> u64 {
        let amount = self.global_cycles;
        for entry in &mut self.queue {
            entry.cycles = entry.cycles.saturating_sub(amount);
        }
        self.global_cycles = 0;
        amount
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_returns_absolute() {
        let mut sched = Scheduler::new();
        sched.advance(100);
        assert_eq!(sched.schedule(Event::CheckIrqs, 1), 101);
        assert_eq!(sched.schedule(Event::DrawFrame, 50), 150);
    }

    #[test]
    fn test_queue_stays_sorted() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::DrawFrame, 300);
        sched.schedule(Event::TimerTick, 100);
        sched.schedule(Event::CountTick, 200);

        sched.advance(300);
        assert_eq!(sched.pop_due().map(|(e, _)| e), Some(Event::TimerTick));
        assert_eq!(sched.pop_due().map(|(e, _)| e), Some(Event::CountTick));
        assert_eq!(sched.pop_due().map(|(e, _)| e), Some(Event::DrawFrame));
        assert_eq!(sched.pop_due(), None);
    }

    #[test]
    fn test_events_fire_only_when_due() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::TimerTick, 10);
        assert_eq!(sched.pop_due(), None);

        sched.advance(9);
        assert_eq!(sched.pop_due(), None);

        sched.advance(1);
        assert_eq!(sched.pop_due().map(|(e, _)| e), Some(Event::TimerTick));
    }

    #[test]
    fn test_equal_stamps_fifo() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::CheckIrqs, 5);
        sched.schedule(Event::DrawFrame, 5);
        sched.advance(5);
        assert_eq!(sched.pop_due().map(|(e, _)| e), Some(Event::CheckIrqs));
        assert_eq!(sched.pop_due().map(|(e, _)| e), Some(Event::DrawFrame));
    }

    #[test]
    fn test_rebase_shifts_queue() {
        let mut sched = Scheduler::new();
        sched.advance(1000);
        sched.schedule(Event::DrawFrame, 500);

        let amount = sched.rebase();
        assert_eq!(amount, 1000);
        assert_eq!(sched.now(), 0);

        // The event still fires 500 cycles out.
        sched.advance(499);
        assert_eq!(sched.pop_due(), None);
        sched.advance(1);
        assert_eq!(sched.pop_due().map(|(e, _)| e), Some(Event::DrawFrame));
    }
}
