//! Const-generic FIFO of pending transactions.
//!
//! `TransactionQueue<N>` holds up to `N` handles in submission order. Each
//! entry also carries the `chained` flag derived from its position in the
//! submission that queued it: every entry but the last of a submission is
//! chained to the one behind it.
//!
//! # Constraints
//!
//! - `no_std`, no allocation; the backing store lives inside the engine's
//!   `static`.
//! - The queue itself is not interrupt-safe. The engine keeps it inside its
//!   critical-section-protected state; nothing else touches it.

use platform::config::TRANSACTION_QUEUE_SIZE;

use crate::error::BusError;
use crate::transaction::TransactionHandle;

/// One queued transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// The record to run.
    pub handle: TransactionHandle,
    /// More members of the same submission follow this one.
    pub chained: bool,
}

/// A fixed-capacity FIFO of [`QueueEntry`].
pub struct TransactionQueue<const N: usize = { TRANSACTION_QUEUE_SIZE }> {
    entries: [Option<QueueEntry>; N],
    /// Index of the next entry to pop.
    read: usize,
    /// Index of the next free entry.
    write: usize,
    /// Number of queued entries.
    count: usize,
}

impl<const N: usize> TransactionQueue<N> {
    /// Create a new, empty queue.
    pub const fn new() -> Self {
        Self {
            entries: [None; N],
            read: 0,
            write: 0,
            count: 0,
        }
    }

    /// Append a whole submission.
    ///
    /// All entries but the last are marked `chained`.
    ///
    /// # Errors
    ///
    /// [`BusError::QueueFull`] if fewer than `handles.len()` entries are
    /// free. The queue is left unchanged on error (the push is
    /// all-or-nothing).
    #[allow(clippy::indexing_slicing)] // Safety: write < N invariant; handles.len() <= N - count checked above
    #[allow(clippy::arithmetic_side_effects)] // Safety: wrap via % N; count += len <= N
    pub fn push_chain(&mut self, handles: &[TransactionHandle]) -> Result<(), BusError> {
        if handles.len() > self.free_slots() {
            return Err(BusError::QueueFull);
        }
        let last = handles.len().saturating_sub(1);
        for (position, &handle) in handles.iter().enumerate() {
            self.entries[self.write] = Some(QueueEntry {
                handle,
                chained: position < last,
            });
            self.write = (self.write + 1) % N;
        }
        self.count += handles.len();
        Ok(())
    }

    /// Remove and return the oldest entry.
    #[allow(clippy::indexing_slicing)] // Safety: read < N invariant
    #[allow(clippy::arithmetic_side_effects)] // Safety: wrap via % N; count >= 1 checked above
    pub fn pop(&mut self) -> Option<QueueEntry> {
        if self.count == 0 {
            return None;
        }
        let entry = self.entries[self.read].take();
        self.read = (self.read + 1) % N;
        self.count -= 1;
        entry
    }

    /// The oldest entry, without removing it.
    pub fn peek(&self) -> Option<QueueEntry> {
        if self.count == 0 {
            return None;
        }
        self.entries.get(self.read).copied().flatten()
    }

    /// Queued entries, oldest first.
    #[allow(clippy::arithmetic_side_effects)] // Safety: read + offset < 2N; wrap via % N
    pub fn iter(&self) -> impl Iterator<Item = QueueEntry> + '_ {
        (0..self.count).filter_map(move |offset| {
            self.entries
                .get((self.read + offset) % N)
                .copied()
                .flatten()
        })
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Entries still available.
    #[allow(clippy::arithmetic_side_effects)] // Safety: count <= N invariant
    pub fn free_slots(&self) -> usize {
        N - self.count
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `true` when no entry is free.
    pub fn is_full(&self) -> bool {
        self.count == N
    }
}

impl<const N: usize> Default for TransactionQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
