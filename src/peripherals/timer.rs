//! DRC timers
//!
//! Memory-mapped at 0xF0000400. Two down-to-target timers driven by a shared
//! prescaled tick, plus a free-running counter with its own prescale. Each
//! timer keeps a raw 64-bit accumulator so the prescale-adjusted comparison
//! against the 32-bit target stays exact; the visible value is `raw >> shift`
//! with the shift taken from control bits 6:4.
//!
//! Timer 0 raises IRQ line 0, timer 1 raises line 1.

use crate::peripherals::interrupt::Interrupts;
use crate::scheduler::{Event, Scheduler};

/// Timer control bits
mod ctrl {
    /// Timer counts while set; clearing it discards the raw accumulator
    pub const ENABLE: u32 = 1 << 1;
    /// Prescale shift field
    pub const SHIFT_POS: u32 = 4;
    pub const SHIFT_MASK: u32 = 0x7;
}

/// Timer block state.
#[derive(Debug)]
pub struct Timers {
    /// Raw tick accumulators, one per timer
    raws: [u64; 2],
    controls: [u32; 2],
    targets: [u32; 2],
    /// Free-running counter
    counter: u32,
    /// Cycles between timer ticks minus one
    timer_scale: u32,
    /// Cycles between counter ticks minus one
    count_scale: u32,
    /// Absolute cycle stamps of the next scheduled ticks (generation checks)
    timer_stamp: u64,
    count_stamp: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            raws: [0; 2],
            controls: [0; 2],
            targets: [0; 2],
            counter: 0,
            timer_scale: 0,
            count_scale: 0,
            timer_stamp: 0,
            count_stamp: 0,
        }
    }

    /// Reset state and queue the initial ticks.
    pub fn reset(&mut self, sched: &mut Scheduler) {
        self.raws = [0; 2];
        self.controls = [0; 2];
        self.targets = [0; 2];
        self.counter = 0;
        self.timer_scale = 0;
        self.count_scale = 0;
        self.timer_stamp = sched.schedule(Event::TimerTick, 1);
        self.count_stamp = sched.schedule(Event::CountTick, 1);
    }

    fn shift(&self, i: usize) -> u32 {
        (self.controls[i] >> ctrl::SHIFT_POS) & ctrl::SHIFT_MASK
    }

    /// Handle a timer tick event. Stale firings (superseded by a prescale
    /// write) are recognized by their cycle stamp and dropped.
    pub fn timer_tick(&mut self, stamp: u64, sched: &mut Scheduler, irq: &mut Interrupts) {
        if stamp != self.timer_stamp {
            return;
        }

        for i in 0..2 {
            if self.controls[i] & ctrl::ENABLE == 0 {
                continue;
            }
            self.raws[i] += 1;
            if (self.raws[i] >> self.shift(i)) as u32 == self.targets[i] {
                self.raws[i] = 0;
                irq.request(i as u32, sched);
            }
        }

        self.timer_stamp = sched.schedule(Event::TimerTick, self.timer_scale as u64 + 1);
    }

    /// Handle a counter tick event.
    pub fn count_tick(&mut self, stamp: u64, sched: &mut Scheduler) {
        if stamp != self.count_stamp {
            return;
        }
        self.counter = self.counter.wrapping_add(1);
        self.count_stamp = sched.schedule(Event::CountTick, self.count_scale as u64 + 1);
    }

    /// Adjust the tick stamps after a scheduler rebase.
    pub fn rebase(&mut self, amount: u64) {
        self.timer_stamp = self.timer_stamp.saturating_sub(amount);
        self.count_stamp = self.count_stamp.saturating_sub(amount);
    }

    pub fn read_counter(&self) -> u32 {
        self.counter
    }

    pub fn read_control(&self, i: usize) -> u32 {
        self.controls[i]
    }

    /// Read a timer's visible (prescale-adjusted) value.
    pub fn read_timer(&self, i: usize) -> u32 {
        (self.raws[i] >> self.shift(i)) as u32
    }

    pub fn write_counter(&mut self, mask: u32, value: u32) {
        self.counter = (self.counter & !mask) | (value & mask);
    }

    /// Write the shared timer prescale and restart the tick cadence.
    pub fn write_timer_scale(&mut self, mask: u32, value: u32, sched: &mut Scheduler) {
        self.timer_scale = (self.timer_scale & !mask) | (value & mask);
        self.timer_stamp = sched.schedule(Event::TimerTick, self.timer_scale as u64 + 1);
    }

    /// Write the counter prescale and restart its cadence.
    pub fn write_count_scale(&mut self, mask: u32, value: u32, sched: &mut Scheduler) {
        self.count_scale = (self.count_scale & !mask) | (value & mask);
        self.count_stamp = sched.schedule(Event::CountTick, self.count_scale as u64 + 1);
    }

    pub fn write_control(&mut self, i: usize, mask: u32, value: u32) {
        let old = self.controls[i];
        let new = (old & !mask) | (value & mask);

        if old & ctrl::ENABLE != 0 && new & ctrl::ENABLE == 0 {
            // Disabling discards progress toward the target
            self.raws[i] = 0;
        } else {
            // Rescale the accumulator so the visible value is preserved
            let old_shift = (old >> ctrl::SHIFT_POS) & ctrl::SHIFT_MASK;
            let new_shift = (new >> ctrl::SHIFT_POS) & ctrl::SHIFT_MASK;
            if old_shift != new_shift {
                self.raws[i] = (self.raws[i] >> old_shift) << new_shift;
            }
        }
        self.controls[i] = new;
    }

    /// Write a timer's visible value; the raw accumulator is scaled up.
    pub fn write_timer(&mut self, i: usize, mask: u32, value: u32) {
        let visible = (self.read_timer(i) & !mask) | (value & mask);
        self.raws[i] = (visible as u64) << self.shift(i);
    }

    pub fn write_target(&mut self, i: usize, mask: u32, value: u32) {
        self.targets[i] = (self.targets[i] & !mask) | (value & mask);
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Timers, Scheduler, Interrupts) {
        let mut sched = Scheduler::new();
        let mut timers = Timers::new();
        timers.reset(&mut sched);
        (timers, sched, Interrupts::new())
    }

    /// Drive the scheduler/timer pair forward one cycle at a time.
    fn run(timers: &mut Timers, sched: &mut Scheduler, irq: &mut Interrupts, cycles: u64) {
        for _ in 0..cycles {
            sched.advance(1);
            while let Some((event, stamp)) = sched.pop_due() {
                match event {
                    Event::TimerTick => timers.timer_tick(stamp, sched, irq),
                    Event::CountTick => timers.count_tick(stamp, sched),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_counter_ticks() {
        let (mut timers, mut sched, mut irq) = setup();
        run(&mut timers, &mut sched, &mut irq, 10);
        assert_eq!(timers.read_counter(), 10);
    }

    #[test]
    fn test_counter_prescale() {
        let (mut timers, mut sched, mut irq) = setup();
        timers.write_count_scale(0xFFFF_FFFF, 3, &mut sched);
        run(&mut timers, &mut sched, &mut irq, 16);
        assert_eq!(timers.read_counter(), 4);
    }

    #[test]
    fn test_disabled_timer_holds_zero() {
        let (mut timers, mut sched, mut irq) = setup();
        run(&mut timers, &mut sched, &mut irq, 5);
        assert_eq!(timers.read_timer(0), 0);
    }

    #[test]
    fn test_timer_reaches_target_and_raises_irq() {
        let (mut timers, mut sched, mut irq) = setup();
        timers.write_target(0, 0xFFFF_FFFF, 4);
        timers.write_control(0, 0xFFFF_FFFF, ctrl::ENABLE);

        run(&mut timers, &mut sched, &mut irq, 3);
        assert_eq!(timers.read_timer(0), 3);
        assert_eq!(irq.pending() & 1, 0);

        run(&mut timers, &mut sched, &mut irq, 1);
        // Target reached: accumulator cleared, line 0 requested
        assert_eq!(timers.read_timer(0), 0);
        assert_eq!(irq.pending() & 1, 1);
    }

    #[test]
    fn test_prescaled_timer() {
        let (mut timers, mut sched, mut irq) = setup();
        timers.write_target(1, 0xFFFF_FFFF, 2);
        timers.write_control(1, 0xFFFF_FFFF, ctrl::ENABLE | (2 << ctrl::SHIFT_POS));

        // shift 2: visible value advances every 4 raw ticks
        run(&mut timers, &mut sched, &mut irq, 7);
        assert_eq!(timers.read_timer(1), 1);
        assert_eq!(irq.pending() & 2, 0);

        // The 8th raw tick reaches the target and clears the accumulator
        run(&mut timers, &mut sched, &mut irq, 1);
        assert_eq!(timers.read_timer(1), 0);
        assert_eq!(irq.pending() & 2, 2);
    }

    #[test]
    fn test_shift_change_preserves_visible_value() {
        let (mut timers, mut sched, mut irq) = setup();
        timers.write_target(0, 0xFFFF_FFFF, 100);
        timers.write_control(0, 0xFFFF_FFFF, ctrl::ENABLE);
        run(&mut timers, &mut sched, &mut irq, 6);
        assert_eq!(timers.read_timer(0), 6);

        timers.write_control(0, 0x70, 3 << ctrl::SHIFT_POS);
        assert_eq!(timers.read_timer(0), 6);
    }

    #[test]
    fn test_disable_clears_raw() {
        let (mut timers, mut sched, mut irq) = setup();
        timers.write_target(0, 0xFFFF_FFFF, 100);
        timers.write_control(0, 0xFFFF_FFFF, ctrl::ENABLE);
        run(&mut timers, &mut sched, &mut irq, 6);

        timers.write_control(0, ctrl::ENABLE, 0);
        timers.write_control(0, ctrl::ENABLE, ctrl::ENABLE);
        assert_eq!(timers.read_timer(0), 0);
    }

    #[test]
    fn test_stale_tick_ignored() {
        let (mut timers, mut sched, mut irq) = setup();
        // Rewriting the prescale supersedes the already-queued tick
        timers.write_timer_scale(0xFFFF_FFFF, 9, &mut sched);
        timers.write_control(0, 0xFFFF_FFFF, ctrl::ENABLE);
        timers.write_target(0, 0xFFFF_FFFF, 1000);

        run(&mut timers, &mut sched, &mut irq, 1);
        // The original 1-cycle tick was dropped as stale
        assert_eq!(timers.read_timer(0), 0);
        run(&mut timers, &mut sched, &mut irq, 9);
        assert_eq!(timers.read_timer(0), 1);
    }
}
