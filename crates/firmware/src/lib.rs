//! BlueSense sensor-node firmware core
//!
//! Wires the bus engine and the time base to the node's interrupt sources
//! and runs the lifesign LED.
//!
//! # Architecture
//!
//! ```text
//! TWI interrupt      ──▶ Node::on_twi_interrupt ──▶ twi::BusEngine
//! 1024 Hz timer      ──▶ Node::on_tick_1024hz   ──▶ ClockBase fast table
//! RTC 1 Hz (falling) ──▶ Node::on_tick_1hz      ──▶ ClockBase slow table ──▶ lifesign
//!
//! background         ──▶ Node::bus / Node::clock (register helpers, waits)
//! ```
//!
//! # Features
//!
//! - `std` - build the host mock controller into `platform`
//! - `defmt` - log through defmt on the target
//! - `tracing` - log through tracing on the host
//! - `simulation` - host run of a scripted node (`cargo run --example node_simulation --features simulation`)

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![warn(clippy::dbg_macro)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod lifesign;
pub mod node;

pub use lifesign::{Lifesign, LifesignLed, LIFESIGN};
pub use node::{Node, NodeError};
