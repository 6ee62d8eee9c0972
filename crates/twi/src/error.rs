//! Bus engine errors.
//!
//! Everything here is reported synchronously at the call site. A transfer
//! that fails on the wire never produces an `Err` from the engine itself: it
//! is recorded in the transaction's [`TransactionStatus`] and delivered
//! through the completion callback. Only the blocking helpers in
//! [`registers`](crate::registers) turn that status into
//! [`BusError::Protocol`].
//!
//! [`TransactionStatus`]: crate::transaction::TransactionStatus

use thiserror_no_std::Error;

/// Bus phase in which a transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailPhase {
    /// START was not acknowledged by the controller.
    Start,
    /// Address byte not acknowledged (no device, or device busy).
    Address,
    /// A data byte failed after some bytes had been transferred.
    Data,
}

impl FailPhase {
    /// Legacy numeric phase code: 1 = start, 2 = address, 3 = data.
    pub const fn code(self) -> u8 {
        match self {
            Self::Start => 1,
            Self::Address => 2,
            Self::Data => 3,
        }
    }

    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Address => "address",
            Self::Data => "data",
        }
    }
}

impl core::fmt::Display for FailPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the bus engine and the register helpers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// Not enough free queue entries for the whole chain. Nothing was queued.
    #[error("transaction queue full")]
    QueueFull,
    /// Not enough free pool transactions. Nothing was reserved.
    #[error("transaction pool exhausted")]
    PoolExhausted,
    /// Peripheral address outside the 7-bit range.
    #[error("invalid 7-bit address {0:#04x}")]
    InvalidAddress(u8),
    /// Byte count larger than the transaction's active buffer.
    #[error("byte count {requested} exceeds buffer of {capacity}")]
    InvalidLength {
        /// Bytes asked for.
        requested: usize,
        /// Length of the active buffer.
        capacity: usize,
    },
    /// The transaction is being processed by the engine right now.
    #[error("transaction is in use by the engine")]
    SlotBusy,
    /// Pool handle that is not currently reserved.
    #[error("pool transaction {0} is not reserved")]
    UnknownHandle(usize),
    /// The transaction never ran: it was skipped after an earlier failure in
    /// its chain, or has not completed yet.
    #[error("transaction did not complete")]
    Incomplete,
    /// A transfer completed with a protocol failure.
    #[error("bus failure in {phase} phase after {bytes_done} bytes (status {hardware_code:#04x})")]
    Protocol {
        /// Phase that failed.
        phase: FailPhase,
        /// Data bytes transferred before the failure.
        bytes_done: u8,
        /// Raw controller status at the failure.
        hardware_code: u8,
    },
}
