//! Interrupt-driven TWI (I²C) transaction engine
//!
//! Background code and interrupt handlers describe bus transfers as
//! [`Transaction`]s, submit them (alone or as linked chains) to a
//! [`BusEngine`], and learn the outcome from the record's status or its
//! completion callback. The engine is advanced one hardware event at a time
//! from the controller interrupt.
//!
//! ```ignore
//! let [select, read] = BUS.reserve::<2>()?;
//! BUS.with_transaction(select, |t| { t.setup(0x64, Direction::Write, false, 0)?; t.load(&[0x08]) })??;
//! BUS.with_transaction(read, |t| { t.setup(0x64, Direction::Read, true, 2)?; t.set_callback(Some(on_voltage)); Ok(()) })??;
//! BUS.submit(&[select, read])?;
//! ```
#![cfg_attr(not(test), no_std)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod engine;
pub mod error;
pub mod pool;
pub mod queue;
pub mod registers;
pub mod transaction;

pub use engine::{BusEngine, EnginePhase, Ticket};
pub use error::{BusError, FailPhase};
pub use pool::TransactionPool;
pub use queue::{QueueEntry, TransactionQueue};
pub use registers::TwiBus;
pub use transaction::{
    Callback, PoolIndex, Transaction, TransactionHandle, TransactionSlot, TransactionStatus,
    UserContext,
};

pub use platform::Direction;
