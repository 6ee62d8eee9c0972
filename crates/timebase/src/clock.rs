//! Monotonic clock built from the fine and coarse tick interrupts.
//!
//! Time since the epoch is `coarse_ms + fine_to_ms(fine_ticks)`: the coarse
//! (1 Hz) tick adds a second and zeroes the fine counter; the fine (1024 Hz)
//! tick counts up in between. Without a coarse source the fine counter simply
//! keeps counting.
//!
//! The two counters come from different oscillators, so a coarse tick may
//! arrive before or after the fine counter reaches 1024. The readouts are
//! clamped to never go below the last value returned.

use core::cell::RefCell;

use critical_section::Mutex;
use platform::clock_config::COARSE_TICK_MS;
use platform::config::CALLBACK_TABLE_SIZE;

use crate::scale::{fine_to_ms, fine_to_us, subtick_to_us, FINE_TICK_US_FLOOR};
use crate::scheduler::{CallbackId, CallbackScheduler, SchedulerError, TableId, TickCallback};
use crate::wait::is_before;

#[derive(Debug)]
struct ClockState {
    /// Milliseconds since the epoch at the last coarse tick.
    coarse_ms: u64,
    /// Fine ticks since the last coarse tick.
    fine_ticks: u32,
    /// Last value returned by `now_ms`; `None` right after `init`.
    last_ms: Option<u32>,
    /// Last value returned by the microsecond readouts.
    last_us: u64,
}

impl ClockState {
    const fn new() -> Self {
        Self {
            coarse_ms: 0,
            fine_ticks: 0,
            last_ms: None,
            last_us: 0,
        }
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: coarse_ms < 2^42 for any u32 epoch; fine part < 2^32
    fn elapsed_ms(&self) -> u64 {
        self.coarse_ms + u64::from(fine_to_ms(self.fine_ticks))
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: coarse_ms < 2^52 after 140 years of uptime; * 1000 < 2^62
    fn elapsed_us(&self) -> u64 {
        self.coarse_ms * 1000 + fine_to_us(self.fine_ticks)
    }

    fn ratchet_ms(&mut self, now: u32) -> u32 {
        match self.last_ms {
            Some(last) if is_before(now, last) => last,
            _ => {
                self.last_ms = Some(now);
                now
            }
        }
    }

    fn ratchet_us(&mut self, now: u64) -> u64 {
        self.last_us = self.last_us.max(now);
        self.last_us
    }
}

/// Time base: tick counters, readouts and the two callback tables.
///
/// ```ignore
/// static CLOCK: ClockBase = ClockBase::new();
///
/// #[interrupt]
/// fn TIMER2_COMPA() {
///     CLOCK.on_fine_tick();
/// }
/// ```
pub struct ClockBase<const N: usize = { CALLBACK_TABLE_SIZE }> {
    state: Mutex<RefCell<ClockState>>,
    scheduler: CallbackScheduler<N>,
}

impl<const N: usize> ClockBase<N> {
    /// A clock at time 0 with empty callback tables.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(ClockState::new())),
            scheduler: CallbackScheduler::new(),
        }
    }

    /// Restart the clock at `epoch_s` seconds.
    ///
    /// Use the RTC time as the epoch when one is available, 0 otherwise.
    /// Also clears the readout history and restarts every callback counter;
    /// registered callbacks stay registered.
    #[allow(clippy::arithmetic_side_effects)] // Safety: u32 * 1000 fits u64
    pub fn init(&self, epoch_s: u32) {
        critical_section::with(|cs| {
            *self.state.borrow_ref_mut(cs) = ClockState {
                coarse_ms: u64::from(epoch_s) * 1000,
                ..ClockState::new()
            };
            self.scheduler.reset_counters();
        });
        platform::log_info!("timebase: clock initialised at epoch {} s", epoch_s);
    }

    /// Milliseconds since the epoch.
    ///
    /// Wraps after about 49.7 days; comparisons must use wrapping arithmetic
    /// (see [`is_before`]). Never returns less than the previous call, modulo
    /// that wrap.
    #[allow(clippy::cast_possible_truncation)] // Safety: intentional wrap to the 32-bit readout
    pub fn now_ms(&self) -> u32 {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let now = state.elapsed_ms() as u32;
            state.ratchet_ms(now)
        })
    }

    /// Microseconds since the epoch, at fine-tick resolution. Never returns
    /// less than the previous call.
    pub fn now_us(&self) -> u64 {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let now = state.elapsed_us();
            state.ratchet_us(now)
        })
    }

    /// Microseconds since the epoch, refined with the sub-tick timer.
    ///
    /// `subtick_count` is the timer count since the last fine tick; it is
    /// capped at one fine tick so a late tick interrupt cannot push the
    /// readout past the next tick's value.
    #[allow(clippy::arithmetic_side_effects)] // Safety: offset < 1000
    pub fn now_us_with_subtick(&self, subtick_count: u16) -> u64 {
        let offset = u64::from(subtick_to_us(subtick_count).min(FINE_TICK_US_FLOOR));
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let now = state.elapsed_us() + offset;
            state.ratchet_us(now)
        })
    }

    /// Fine-tick interrupt entry point.
    pub fn on_fine_tick(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.fine_ticks = state.fine_ticks.wrapping_add(1);
        });
        self.scheduler.dispatch(TableId::Fast);
    }

    /// Coarse-tick interrupt entry point.
    pub fn on_coarse_tick(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.coarse_ms = state.coarse_ms.saturating_add(u64::from(COARSE_TICK_MS));
            state.fine_ticks = 0;
        });
        self.scheduler.dispatch(TableId::Slow);
    }

    /// Register a periodic callback. See [`CallbackScheduler::register`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Full`].
    pub fn register(
        &self,
        table: TableId,
        callback: TickCallback,
        divider: u16,
    ) -> Result<CallbackId, SchedulerError> {
        self.scheduler.register(table, callback, divider)
    }

    /// Remove a periodic callback. Returns `false` if it was not registered.
    pub fn unregister(&self, table: TableId, callback: TickCallback) -> bool {
        self.scheduler.unregister(table, callback)
    }

    /// The callback tables.
    pub fn scheduler(&self) -> &CallbackScheduler<N> {
        &self.scheduler
    }
}

impl<const N: usize> Default for ClockBase<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::arithmetic_side_effects)]

    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ticks(clock: &ClockBase, n: u32) {
        for _ in 0..n {
            clock.on_fine_tick();
        }
    }

    #[test]
    fn epoch_sets_the_start() {
        let clock: ClockBase = ClockBase::new();
        clock.init(60);
        assert_eq!(clock.now_ms(), 60_000);
        assert_eq!(clock.now_us(), 60_000_000);
    }

    #[test]
    fn fine_ticks_accumulate() {
        let clock: ClockBase = ClockBase::new();
        clock.init(0);
        ticks(&clock, 512);
        assert_eq!(clock.now_ms(), 500);
        assert_eq!(clock.now_us(), 500_000);
        ticks(&clock, 1);
        assert_eq!(clock.now_ms(), 500);
        assert_eq!(clock.now_us(), 500_976);
    }

    #[test]
    fn coarse_tick_adds_a_second_and_zeroes_fine() {
        let clock: ClockBase = ClockBase::new();
        clock.init(0);
        ticks(&clock, 1000);
        clock.on_coarse_tick();
        assert_eq!(clock.now_ms(), 1000);
        ticks(&clock, 1024);
        assert_eq!(clock.now_ms(), 2000);
    }

    #[test]
    fn late_coarse_tick_does_not_step_back() {
        let clock: ClockBase = ClockBase::new();
        clock.init(0);
        // Fine oscillator runs fast: 1100 ticks before the RTC second.
        ticks(&clock, 1100);
        let before = clock.now_ms();
        assert_eq!(before, 1074);
        clock.on_coarse_tick();
        assert_eq!(clock.now_ms(), before, "clamped, not 1000");
        ticks(&clock, 100);
        assert_eq!(clock.now_ms(), 1097);
    }

    #[test]
    fn microsecond_readout_is_clamped_too() {
        let clock: ClockBase = ClockBase::new();
        clock.init(0);
        ticks(&clock, 1100);
        let before = clock.now_us();
        clock.on_coarse_tick();
        assert_eq!(clock.now_us(), before);
    }

    #[test]
    fn subtick_refines_within_a_tick() {
        let clock: ClockBase = ClockBase::new();
        clock.init(0);
        ticks(&clock, 1);
        assert_eq!(clock.now_us_with_subtick(5_400), 976 + 488);
        // Capped at one fine tick.
        assert_eq!(clock.now_us_with_subtick(u16::MAX), 976 + 976);
    }

    #[test]
    fn init_forgets_the_ratchet() {
        let clock: ClockBase = ClockBase::new();
        clock.init(100);
        assert_eq!(clock.now_ms(), 100_000);
        clock.init(0);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn large_epoch_is_not_mistaken_for_the_past() {
        let clock: ClockBase = ClockBase::new();
        // Beyond 2^31 ms.
        clock.init(3_000_000);
        assert_eq!(clock.now_ms(), 3_000_000_000);
        clock.on_coarse_tick();
        assert_eq!(clock.now_ms(), 3_000_001_000);
    }

    #[test]
    fn ms_readout_wraps_forward() {
        let clock: ClockBase = ClockBase::new();
        clock.init(4_294_967); // 4_294_967_000 ms, 295 ms before the wrap
        let before = clock.now_ms();
        clock.on_coarse_tick();
        let after = clock.now_ms();
        assert_eq!(after, 704);
        assert!(is_before(before, after));
    }

    #[test]
    fn fast_callbacks_run_from_fine_tick() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn hit(_: u8) {
            HITS.fetch_add(1, Ordering::SeqCst);
        }

        let clock: ClockBase = ClockBase::new();
        clock.init(0);
        clock.register(TableId::Fast, hit, 9).expect("room");
        ticks(&clock, 100);
        assert_eq!(HITS.load(Ordering::SeqCst), 10);

        clock.on_coarse_tick();
        assert_eq!(HITS.load(Ordering::SeqCst), 10, "coarse tick runs the slow table");

        assert!(clock.unregister(TableId::Fast, hit));
        ticks(&clock, 100);
        assert_eq!(HITS.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn init_restarts_callback_counters() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn hit(_: u8) {
            HITS.fetch_add(1, Ordering::SeqCst);
        }

        let clock: ClockBase = ClockBase::new();
        clock.register(TableId::Slow, hit, 2).expect("room");
        clock.on_coarse_tick();
        clock.on_coarse_tick();
        clock.init(0);
        clock.on_coarse_tick();
        clock.on_coarse_tick();
        assert_eq!(HITS.load(Ordering::SeqCst), 0);
        clock.on_coarse_tick();
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
    }
}
