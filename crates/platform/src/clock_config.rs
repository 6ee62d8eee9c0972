//! Tick sources and fixed-point scaling constants for the time base.
//!
//! The node has two periodic interrupts:
//!
//! - a fine tick at [`FINE_TICK_HZ`] (timer 2 from the 32.768 kHz crystal,
//!   divided by 32), always present;
//! - a coarse 1 Hz tick from the RTC square-wave output, optional.
//!
//! A third source, the free-running timer 1 clocked at [`SUBTICK_TIMER_HZ`],
//! refines the microsecond readout inside a fine tick.
//!
//! All conversions avoid division: the AVR core has no divide instruction
//! and a 32-bit software divide costs several hundred cycles, which is too
//! slow inside the 1024 Hz interrupt.

/// Fine tick rate in Hz. Must stay a power of two; the conversions shift by
/// [`FINE_TICK_SHIFT`].
pub const FINE_TICK_HZ: u32 = 1024;

/// `log2(FINE_TICK_HZ)`.
pub const FINE_TICK_SHIFT: u32 = 10;

/// Mask selecting the sub-second part of a fine tick count.
pub const FINE_TICK_MASK: u32 = FINE_TICK_HZ - 1;

/// Coarse tick rate in Hz.
pub const COARSE_TICK_HZ: u32 = 1;

/// Milliseconds added to the coarse counter on every coarse tick.
pub const COARSE_TICK_MS: u32 = 1000;

/// Timer 1 clock (system clock, no prescaler).
pub const SUBTICK_TIMER_HZ: u32 = 11_059_200;

/// Numerator of the timer-1-count to microsecond scaling.
///
/// `count * SUBTICK_US_MUL >> SUBTICK_US_SHIFT` approximates
/// `count * 1_000_000 / SUBTICK_TIMER_HZ` (0.090422 µs per count) with a
/// relative error below 0.02 %, always rounding down.
pub const SUBTICK_US_MUL: u32 = 5925;

/// Shift of the timer-1-count to microsecond scaling.
pub const SUBTICK_US_SHIFT: u32 = 16;

/// Exact microseconds per fine tick, as the fraction `15625 / 16`.
pub const FINE_TICK_US_NUM: u64 = 15_625;

/// Denominator shift of [`FINE_TICK_US_NUM`].
pub const FINE_TICK_US_SHIFT: u32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fine_tick_shift_matches_rate() {
        assert_eq!(1u32 << FINE_TICK_SHIFT, FINE_TICK_HZ);
        assert!(FINE_TICK_HZ.is_power_of_two());
    }

    #[test]
    fn fine_tick_us_fraction_is_exact() {
        // 1_000_000 / 1024 = 976.5625 = 15625 / 16
        assert_eq!(FINE_TICK_US_NUM * 1024, 1_000_000 << FINE_TICK_US_SHIFT);
    }

    #[test]
    fn subtick_scaling_is_within_two_hundredths_of_a_percent() {
        let exact = 1_000_000f64 / f64::from(SUBTICK_TIMER_HZ);
        let approx = f64::from(SUBTICK_US_MUL) / f64::from(1u32 << SUBTICK_US_SHIFT);
        assert!(approx <= exact);
        assert!((exact - approx) / exact < 0.0002);
    }
}
