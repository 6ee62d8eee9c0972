//! Hardware seams for the BlueSense sensor-node core
//!
//! This crate holds everything the bus engine and the time base need to know
//! about the board, and nothing else. It lets both run unchanged on the
//! ATmega1284P target and on a development host.
//!
//! # Architecture Layers
//!
//! ```text
//! Node wiring and interrupt entry points (firmware crate)
//!         ↓
//! Bus engine (twi)          Time base (timebase)
//!         ↓                         ↓
//! Platform seams (this crate - controller trait, tick constants, capacities)
//!         ↓
//! TWI controller registers, 1024 Hz / 1 Hz tick timers
//! ```
//!
//! # Modules
//!
//! - [`peripheral`] - [`TwiController`] trait and the controller status codes
//! - [`clock_config`] - tick rates and fixed-point scaling constants
//! - [`config`] - compile-time capacities shared by the core crates
//! - [`log`] - `log_*!` macros routed to defmt or tracing
//! - [`mocks`] - scripted controller for host tests (`std` feature or `cfg(test)`)
//!
//! # Features
//!
//! - `std`: build the mock controller outside unit tests
//! - `defmt`: derive `defmt::Format` on platform types

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![allow(clippy::doc_markdown)] // register names and hex codes in doc comments
#![allow(clippy::must_use_candidate)] // accessors; callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod clock_config;
pub mod config;
pub mod log;
pub mod mocks;
pub mod peripheral;

pub use peripheral::{status, Direction, TwiController};
