//! Waiting for the next boundary of a periodic grid.
//!
//! Sampling loops call [`wait_period`] once per iteration with the same
//! [`PeriodCursor`]; each call returns at the first grid point after the
//! previous one that has not already passed. Periods missed while the caller
//! was busy are skipped, not replayed, and the grid does not drift.
//!
//! Time readouts wrap, so every comparison is done modulo 2³²: `a` is before
//! `b` when `a - b` (wrapping) is in the upper half of the range. That holds
//! as long as the period and the time between calls stay below 2³¹ units.

use embedded_hal::delay::DelayNs;
use platform::config::{IDLE_POLL_US, MIN_WAIT_PERIOD_US};

use crate::clock::ClockBase;

const HALF_RANGE: u32 = 0x8000_0000;

/// `true` if `a` is strictly earlier than `b` on the wrapping 32-bit clock.
pub const fn is_before(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) >= HALF_RANGE
}

/// A wrapping 32-bit time readout.
pub trait TimeSource {
    /// Current time.
    fn now(&self) -> u32;
}

impl<const N: usize> TimeSource for ClockBase<N> {
    fn now(&self) -> u32 {
        self.now_ms()
    }
}

/// Microsecond view of a [`ClockBase`], truncated to 32 bits (wraps every
/// 71.6 minutes).
#[derive(Clone, Copy)]
pub struct Micros<'a, const N: usize>(pub &'a ClockBase<N>);

impl<const N: usize> TimeSource for Micros<'_, N> {
    #[allow(clippy::cast_possible_truncation)] // Safety: intentional wrap to the 32-bit readout
    fn now(&self) -> u32 {
        self.0.now_us() as u32
    }
}

/// Where a periodic wait is on its grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodCursor {
    last: Option<u32>,
}

impl PeriodCursor {
    /// A cursor that anchors its grid at the time of the first wait.
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// The grid point the last wait returned at, if any.
    pub fn boundary(&self) -> Option<u32> {
        self.last
    }

    /// Forget the grid; the next wait anchors a new one.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Idle-wait until the next grid point and return the time reached.
///
/// A zero `period` returns the current time at once and leaves the cursor
/// alone. Otherwise the grid is anchored at the first call's time, and each
/// call waits for `last + k * period` with the smallest `k >= 1` that is not
/// already in the past. The returned time is at or after that point.
pub fn wait_period<S: TimeSource + ?Sized>(
    source: &S,
    period: u32,
    cursor: &mut PeriodCursor,
    delay: &mut impl DelayNs,
) -> u32 {
    let mut now = source.now();
    if period == 0 {
        return now;
    }
    let anchor = *cursor.last.get_or_insert(now);

    let mut next = anchor.wrapping_add(period);
    while is_before(next, source.now()) {
        next = next.wrapping_add(period);
    }

    now = source.now();
    while is_before(now, next) {
        delay.delay_us(IDLE_POLL_US);
        now = source.now();
    }
    cursor.last = Some(next);
    now
}

/// [`wait_period`] on the millisecond readout.
pub fn wait_period_ms<const N: usize>(
    clock: &ClockBase<N>,
    period_ms: u16,
    cursor: &mut PeriodCursor,
    delay: &mut impl DelayNs,
) -> u32 {
    wait_period(clock, u32::from(period_ms), cursor, delay)
}

/// [`wait_period`] on the microsecond readout.
///
/// Periods below 50 µs return the current time immediately: polling the
/// clock takes about that long on the target.
pub fn wait_period_us<const N: usize>(
    clock: &ClockBase<N>,
    period_us: u32,
    cursor: &mut PeriodCursor,
    delay: &mut impl DelayNs,
) -> u32 {
    let micros = Micros(clock);
    if period_us < MIN_WAIT_PERIOD_US {
        return micros.now();
    }
    wait_period(&micros, period_us, cursor, delay)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::arithmetic_side_effects)]

    use core::cell::Cell;

    use super::*;

    /// Time that only moves when someone sleeps, or when the test jumps it.
    struct FakeTime {
        now: Cell<u32>,
        step: u32,
    }

    impl FakeTime {
        fn new(start: u32, step: u32) -> Self {
            Self {
                now: Cell::new(start),
                step,
            }
        }

        fn jump(&self, to: u32) {
            self.now.set(to);
        }
    }

    impl TimeSource for FakeTime {
        fn now(&self) -> u32 {
            self.now.get()
        }
    }

    struct Sleeper<'a>(&'a FakeTime);

    impl DelayNs for Sleeper<'_> {
        fn delay_ns(&mut self, _ns: u32) {
            let time = self.0;
            time.now.set(time.now.get().wrapping_add(time.step));
        }
    }

    #[test]
    fn boundaries_catch_up_without_replay() {
        let time = FakeTime::new(0, 1);
        let mut cursor = PeriodCursor::new();
        let mut boundaries = std::vec::Vec::new();

        for start in [0, 1700, 2100] {
            time.jump(start);
            let returned = wait_period(&time, 1000, &mut cursor, &mut Sleeper(&time));
            let boundary = cursor.boundary().unwrap_or_default();
            assert!(!is_before(returned, boundary));
            boundaries.push(boundary);
        }
        assert_eq!(boundaries, [1000, 2000, 3000]);
    }

    #[test]
    fn missed_periods_are_skipped() {
        let time = FakeTime::new(0, 1);
        let mut cursor = PeriodCursor::new();
        wait_period(&time, 1000, &mut cursor, &mut Sleeper(&time));

        time.jump(5500);
        wait_period(&time, 1000, &mut cursor, &mut Sleeper(&time));
        assert_eq!(cursor.boundary(), Some(6000));
    }

    #[test]
    fn exact_boundary_is_not_skipped() {
        let time = FakeTime::new(0, 1);
        let mut cursor = PeriodCursor::new();
        wait_period(&time, 1000, &mut cursor, &mut Sleeper(&time));

        time.jump(2000);
        let returned = wait_period(&time, 1000, &mut cursor, &mut Sleeper(&time));
        assert_eq!(cursor.boundary(), Some(2000));
        assert_eq!(returned, 2000);
    }

    #[test]
    fn grid_survives_the_wrap() {
        let start = u32::MAX - 300;
        let time = FakeTime::new(start, 7);
        let mut cursor = PeriodCursor::new();

        let returned = wait_period(&time, 1000, &mut cursor, &mut Sleeper(&time));
        assert_eq!(cursor.boundary(), Some(start.wrapping_add(1000)));
        assert_eq!(cursor.boundary(), Some(699));
        assert!(!is_before(returned, 699));
        assert!(returned < 720, "stopped shortly after the boundary");
    }

    #[test]
    fn zero_period_returns_at_once() {
        let time = FakeTime::new(1234, 1);
        let mut cursor = PeriodCursor::new();
        assert_eq!(wait_period(&time, 0, &mut cursor, &mut Sleeper(&time)), 1234);
        assert_eq!(cursor, PeriodCursor::new());
    }

    #[test]
    fn is_before_is_modular() {
        assert!(is_before(1, 2));
        assert!(!is_before(2, 1));
        assert!(!is_before(5, 5));
        assert!(is_before(u32::MAX, 3));
        assert!(!is_before(3, u32::MAX));
    }

    #[test]
    fn microsecond_wait_skips_tiny_periods() {
        let clock: ClockBase = ClockBase::new();
        clock.init(0);
        let mut cursor = PeriodCursor::new();
        let frozen = FakeTime::new(0, 0);
        let mut never = Sleeper(&frozen);
        assert_eq!(wait_period_us(&clock, 49, &mut cursor, &mut never), 0);
        assert_eq!(cursor.boundary(), None);
    }
}
