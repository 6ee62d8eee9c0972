//! Compile-time capacities for the bus engine and the time base
//!
//! These are the defaults for the const generics on `BusEngine`,
//! `TransactionPool`, `TransactionQueue`, `ClockBase` and the callback tables.
//! They are sized for the worst case of simultaneous in-flight chains on the
//! node: the motion sensor's two-transaction register read, the fuel gauge's
//! background sample and the RTC temperature read, with slack for debug
//! traffic.

/// Transactions in the shared pool.
pub const TRANSACTION_POOL_SIZE: usize = 8;

/// Entries in the transaction queue.
pub const TRANSACTION_QUEUE_SIZE: usize = 8;

/// Bytes in a transaction's inline buffer.
pub const INLINE_BUFFER_LEN: usize = 16;

/// Longest chain a single submission may carry.
pub const MAX_CHAIN_LEN: usize = TRANSACTION_QUEUE_SIZE;

/// Entries in each callback table (fast and slow).
pub const CALLBACK_TABLE_SIZE: usize = 6;

/// Idle delay between polls in blocking waits, in microseconds.
pub const IDLE_POLL_US: u32 = 10;

/// Periods below this many microseconds are not worth waiting for; the
/// microsecond period wait returns immediately.
pub const MIN_WAIT_PERIOD_US: u32 = 50;
