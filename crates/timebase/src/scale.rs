//! Tick-count conversions.
//!
//! Multiply-then-shift only; see [`platform::clock_config`] for the
//! constants. Every conversion truncates, so a readout is never ahead of
//! real time.

use platform::clock_config::{
    FINE_TICK_MASK, FINE_TICK_SHIFT, FINE_TICK_US_NUM, FINE_TICK_US_SHIFT, SUBTICK_US_MUL,
    SUBTICK_US_SHIFT,
};

/// Microseconds in one fine tick, rounded down.
pub const FINE_TICK_US_FLOOR: u32 = 976;

/// Fine ticks to milliseconds.
///
/// Whole seconds and the sub-second remainder are scaled separately so the
/// intermediate product stays below 2²⁰. The result is
/// `floor(ticks * 1000 / 1024)` for every input: it trails the exact value by
/// less than one millisecond and never leads it.
#[allow(clippy::arithmetic_side_effects)] // Safety: (ticks & 0x3FF) * 1000 < 2^20; seconds part wraps explicitly
pub const fn fine_to_ms(ticks: u32) -> u32 {
    let seconds = (ticks >> FINE_TICK_SHIFT).wrapping_mul(1000);
    let fraction = ((ticks & FINE_TICK_MASK) * 1000) >> FINE_TICK_SHIFT;
    seconds.wrapping_add(fraction)
}

/// Fine ticks to microseconds, exact up to the final truncation
/// (976.5625 µs per tick).
#[allow(clippy::arithmetic_side_effects)] // Safety: u32::MAX * 15625 < 2^46
pub const fn fine_to_us(ticks: u32) -> u64 {
    (ticks as u64 * FINE_TICK_US_NUM) >> FINE_TICK_US_SHIFT
}

/// Sub-tick timer counts to microseconds.
///
/// 0.090422 µs per count, approximated as `count * 5925 >> 16`. Under-reads
/// by less than 0.02 %.
#[allow(clippy::arithmetic_side_effects)] // Safety: u16::MAX * 5925 < 2^32
pub const fn subtick_to_us(count: u16) -> u32 {
    (count as u32 * SUBTICK_US_MUL) >> SUBTICK_US_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_second_of_ticks() {
        assert_eq!(fine_to_ms(1024), 1000);
        assert_eq!(fine_to_us(1024), 1_000_000);
    }

    #[test]
    fn single_tick_truncates() {
        assert_eq!(fine_to_ms(1), 0);
        assert_eq!(fine_to_ms(2), 1);
        assert_eq!(fine_to_us(1), 976);
        assert_eq!(u64::from(FINE_TICK_US_FLOOR), fine_to_us(1));
    }

    #[test]
    fn full_range_does_not_overflow() {
        assert_eq!(fine_to_ms(u32::MAX), 4_194_303_999);
        assert_eq!(fine_to_us(u32::MAX), 4_194_303_999_023);
    }

    #[test]
    fn subtick_fits_in_one_fine_tick() {
        // 11.0592 MHz / 1024 Hz = 10800 counts per fine tick.
        assert_eq!(subtick_to_us(10_800), 976);
        assert_eq!(subtick_to_us(0), 0);
    }
}
