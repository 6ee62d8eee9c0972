//! Time base: monotonic clock and periodic callbacks
//!
//! Driven by two interrupts: a fine tick at 1024 Hz and an optional coarse
//! tick at 1 Hz from the RTC. Both feed a [`ClockBase`], which keeps the
//! monotonic millisecond and microsecond readouts and dispatches the fast
//! and slow [`CallbackScheduler`] tables.
//!
//! ```text
//! fine tick  ──▶ ClockBase::on_fine_tick   ──▶ fast table (1024 Hz / (d+1))
//! coarse tick ─▶ ClockBase::on_coarse_tick ──▶ slow table (1 Hz / (d+1))
//!
//! background ──▶ now_ms / now_us / wait_period_ms / wait_period_us
//! ```
#![cfg_attr(not(test), no_std)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod scale;
pub mod scheduler;
pub mod wait;

pub use clock::ClockBase;
pub use scheduler::{
    CallbackEntry, CallbackId, CallbackScheduler, CallbackTable, SchedulerError, TableId,
    TickCallback,
};
pub use wait::{
    is_before, wait_period, wait_period_ms, wait_period_us, Micros, PeriodCursor, TimeSource,
};
