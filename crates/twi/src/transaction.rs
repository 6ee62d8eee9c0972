//! Transaction records, slots and handles.
//!
//! A [`Transaction`] describes one addressed bus transfer: START, address
//! byte, `byte_count` data bytes, optional STOP. Records live in a
//! [`TransactionSlot`], which is either one of the engine's pool slots or a
//! `static` owned by the caller. The engine only ever sees a
//! [`TransactionHandle`], which says which of the two it is.

use core::any::Any;
use core::cell::{Cell, RefCell};

use critical_section::{CriticalSection, Mutex};
use platform::config::INLINE_BUFFER_LEN;
use platform::Direction;

use crate::error::{BusError, FailPhase};

/// Completion callback. Runs in interrupt context with the record borrowed.
///
/// May submit new work (including this same record), reserve and free pool
/// transactions. Must not call [`TransactionSlot::with`] on its own slot.
pub type Callback = fn(&mut Transaction);

/// Opaque caller data handed through to the callback. The engine never looks
/// at it and never takes ownership.
pub type UserContext = &'static (dyn Any + Send + Sync);

/// Outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionStatus {
    /// Set up but never submitted.
    #[default]
    Idle,
    /// Taken off the queue by the engine and on the wire.
    Pending,
    /// Completed without error.
    Success,
    /// Aborted by the hardware.
    Failed {
        /// Phase that failed.
        phase: FailPhase,
        /// Data bytes transferred before the failure (data phase only).
        bytes_done: u8,
        /// Raw controller status at the failure.
        hardware_code: u8,
    },
    /// Discarded without touching the bus because an earlier member of its
    /// chain failed. Skipped records never see their callback.
    Skipped,
}

impl TransactionStatus {
    /// Value of [`raw`](Self::raw) for records that have not completed.
    pub const RAW_INCOMPLETE: u8 = 0xFF;

    /// Single-byte status as drivers on the node report it: `0` success,
    /// `1` start, `2` address, `3 | bytes_done << 4` data.
    ///
    /// `bytes_done` saturates at 15 in this encoding.
    /// [`RAW_INCOMPLETE`](Self::RAW_INCOMPLETE) for anything not finished.
    pub const fn raw(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed {
                phase: FailPhase::Data,
                bytes_done,
                ..
            } => {
                let done = if bytes_done > 15 { 15 } else { bytes_done };
                FailPhase::Data.code() | done.wrapping_shl(4)
            }
            Self::Failed { phase, .. } => phase.code(),
            Self::Idle | Self::Pending | Self::Skipped => Self::RAW_INCOMPLETE,
        }
    }

    /// `true` once the transaction finished without error.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// `Ok` on success, the protocol failure otherwise.
    ///
    /// # Errors
    ///
    /// [`BusError::Protocol`] for a failed transfer, [`BusError::Incomplete`]
    /// for a record that never finished.
    pub const fn check(self) -> Result<(), BusError> {
        match self {
            Self::Success => Ok(()),
            Self::Failed {
                phase,
                bytes_done,
                hardware_code,
            } => Err(BusError::Protocol {
                phase,
                bytes_done,
                hardware_code,
            }),
            Self::Idle | Self::Pending | Self::Skipped => Err(BusError::Incomplete),
        }
    }
}

/// Storage a transaction transfers from or into.
#[derive(Debug)]
pub enum Buffer {
    /// The record's own small buffer.
    Inline([u8; INLINE_BUFFER_LEN]),
    /// Caller-owned memory, for transfers longer than the inline buffer.
    External(&'static mut [u8]),
}

impl Buffer {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Inline(bytes) => bytes,
            Self::External(bytes) => bytes,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Inline(bytes) => bytes,
            Self::External(bytes) => bytes,
        }
    }
}

/// One bus transfer.
///
/// `byte_count` never exceeds the active buffer's length; every setter that
/// could break that checks it.
pub struct Transaction {
    address: u8,
    direction: Direction,
    buffer: Buffer,
    byte_count: u8,
    send_stop: bool,
    callback: Option<Callback>,
    user_context: Option<UserContext>,
    chain_to_next: bool,
    status: TransactionStatus,
}

impl Transaction {
    /// An empty write to address 0 with no callback.
    pub const fn new() -> Self {
        Self {
            address: 0,
            direction: Direction::Write,
            buffer: Buffer::Inline([0; INLINE_BUFFER_LEN]),
            byte_count: 0,
            send_stop: true,
            callback: None,
            user_context: None,
            chain_to_next: false,
            status: TransactionStatus::Idle,
        }
    }

    /// Prepare the record for a new transfer.
    ///
    /// Switches back to the inline buffer (dropping any attached external
    /// buffer reference; [`detach_external`](Self::detach_external) it first
    /// to keep it), clears callback, user context and status.
    ///
    /// # Errors
    ///
    /// [`BusError::InvalidAddress`] above `0x7F`, [`BusError::InvalidLength`]
    /// when `byte_count` does not fit the inline buffer. The record is left
    /// untouched on error.
    pub fn setup(
        &mut self,
        address: u8,
        direction: Direction,
        send_stop: bool,
        byte_count: usize,
    ) -> Result<(), BusError> {
        if address > 0x7F {
            return Err(BusError::InvalidAddress(address));
        }
        let count = checked_count(byte_count, INLINE_BUFFER_LEN)?;
        *self = Self {
            address,
            direction,
            byte_count: count,
            send_stop,
            ..Self::new()
        };
        Ok(())
    }

    /// 7-bit peripheral address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Data bytes to transfer after the address.
    pub fn byte_count(&self) -> usize {
        usize::from(self.byte_count)
    }

    /// Change the number of data bytes.
    ///
    /// # Errors
    ///
    /// [`BusError::InvalidLength`] if it exceeds the active buffer.
    pub fn set_byte_count(&mut self, byte_count: usize) -> Result<(), BusError> {
        self.byte_count = checked_count(byte_count, self.buffer.as_slice().len())?;
        Ok(())
    }

    /// Whether a STOP ends the transfer. Without it the next transaction
    /// starts with a repeated START.
    pub fn send_stop(&self) -> bool {
        self.send_stop
    }

    /// Set whether a STOP ends the transfer.
    pub fn set_send_stop(&mut self, send_stop: bool) {
        self.send_stop = send_stop;
    }

    /// Install or clear the completion callback.
    pub fn set_callback(&mut self, callback: Option<Callback>) {
        self.callback = callback;
    }

    /// The completion callback.
    pub fn callback(&self) -> Option<Callback> {
        self.callback
    }

    /// Install or clear the opaque user context.
    pub fn set_user_context(&mut self, context: Option<UserContext>) {
        self.user_context = context;
    }

    /// The opaque user context.
    pub fn user_context(&self) -> Option<UserContext> {
        self.user_context
    }

    /// `true` while the engine runs this record as a non-final chain member.
    ///
    /// Set by the engine from the record's position in its submission.
    pub fn chain_to_next(&self) -> bool {
        self.chain_to_next
    }

    /// Outcome of the last submission.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Raw controller status of a failure, `0` otherwise.
    pub fn hardware_code(&self) -> u8 {
        match self.status {
            TransactionStatus::Failed { hardware_code, .. } => hardware_code,
            _ => 0,
        }
    }

    /// Transfer from/into caller memory instead of the inline buffer.
    ///
    /// The byte count is clamped to `buffer`'s length; set the real count
    /// afterwards with [`set_byte_count`](Self::set_byte_count). Returns the
    /// previously attached external buffer, if any.
    pub fn attach_external(&mut self, buffer: &'static mut [u8]) -> Option<&'static mut [u8]> {
        let limit = u8::try_from(buffer.len()).unwrap_or(u8::MAX);
        self.byte_count = self.byte_count.min(limit);
        match core::mem::replace(&mut self.buffer, Buffer::External(buffer)) {
            Buffer::External(previous) => Some(previous),
            Buffer::Inline(_) => None,
        }
    }

    /// Switch back to the inline buffer and return the external one.
    ///
    /// The byte count is clamped to the inline buffer.
    pub fn detach_external(&mut self) -> Option<&'static mut [u8]> {
        match core::mem::replace(&mut self.buffer, Buffer::Inline([0; INLINE_BUFFER_LEN])) {
            Buffer::External(previous) => {
                self.byte_count = self.byte_count.min(inline_len_u8());
                Some(previous)
            }
            inline @ Buffer::Inline(_) => {
                self.buffer = inline;
                None
            }
        }
    }

    /// `true` when an external buffer is active.
    pub fn is_external(&self) -> bool {
        matches!(self.buffer, Buffer::External(_))
    }

    /// The first `byte_count` bytes of the active buffer.
    pub fn data(&self) -> &[u8] {
        let count = self.byte_count();
        self.buffer.as_slice().get(..count).unwrap_or(&[])
    }

    /// Mutable view of the first `byte_count` bytes of the active buffer.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let count = self.byte_count();
        self.buffer.as_mut_slice().get_mut(..count).unwrap_or(&mut [])
    }

    /// Copy `bytes` into the active buffer and set the byte count to match.
    ///
    /// # Errors
    ///
    /// [`BusError::InvalidLength`] if `bytes` does not fit.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let buffer = self.buffer.as_mut_slice();
        let count = checked_count(bytes.len(), buffer.len())?;
        if let Some(dst) = buffer.get_mut(..bytes.len()) {
            dst.copy_from_slice(bytes);
        }
        self.byte_count = count;
        Ok(())
    }

    // ── Engine side ─────────────────────────────────────────────────────────

    pub(crate) fn begin(&mut self, chain_to_next: bool) {
        self.chain_to_next = chain_to_next;
        self.status = TransactionStatus::Pending;
    }

    pub(crate) fn byte_at(&self, index: usize) -> u8 {
        self.data().get(index).copied().unwrap_or(0)
    }

    pub(crate) fn store_byte(&mut self, index: usize, byte: u8) {
        if let Some(slot) = self.data_mut().get_mut(index) {
            *slot = byte;
        }
    }

    pub(crate) fn finish(&mut self, status: TransactionStatus) {
        self.status = status;
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transaction")
            .field("address", &self.address)
            .field("direction", &self.direction)
            .field("byte_count", &self.byte_count)
            .field("external", &self.is_external())
            .field("send_stop", &self.send_stop)
            .field("callback", &self.callback.is_some())
            .field("chain_to_next", &self.chain_to_next)
            .field("status", &self.status)
            .finish()
    }
}

#[allow(clippy::cast_possible_truncation)] // Safety: INLINE_BUFFER_LEN is 16
const fn inline_len_u8() -> u8 {
    INLINE_BUFFER_LEN as u8
}

fn checked_count(requested: usize, capacity: usize) -> Result<u8, BusError> {
    let invalid = BusError::InvalidLength {
        requested,
        capacity,
    };
    if requested > capacity {
        return Err(invalid);
    }
    u8::try_from(requested).map_err(|_| invalid)
}

// ── Slots and handles ───────────────────────────────────────────────────────

/// Interrupt-safe home of a [`Transaction`].
///
/// Caller-owned records are `static` slots:
///
/// ```
/// use twi::transaction::TransactionSlot;
///
/// static GAUGE_SELECT: TransactionSlot = TransactionSlot::new();
/// ```
pub struct TransactionSlot {
    inner: Mutex<RefCell<Transaction>>,
    /// Owned by a queue entry: queued or on the wire.
    queued: Mutex<Cell<bool>>,
}

impl TransactionSlot {
    /// Array-repeat initialiser: `[TransactionSlot::NEW; 2]`.
    #[allow(clippy::declare_interior_mutable_const)] // only used to initialise statics
    pub const NEW: Self = Self::new();

    /// A slot holding [`Transaction::new`].
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Transaction::new())),
            queued: Mutex::new(Cell::new(false)),
        }
    }

    /// Run `f` on the record inside a critical section.
    ///
    /// # Errors
    ///
    /// [`BusError::SlotBusy`] while the engine holds the record, which only
    /// happens when called from the record's own completion callback.
    pub fn with<R>(&self, f: impl FnOnce(&mut Transaction) -> R) -> Result<R, BusError> {
        critical_section::with(|cs| {
            let mut txn = self.cell(cs).try_borrow_mut().map_err(|_| BusError::SlotBusy)?;
            Ok(f(&mut txn))
        })
    }

    /// Status of the record, or `None` while the engine holds it.
    pub fn status(&self) -> Option<TransactionStatus> {
        self.with(|txn| txn.status()).ok()
    }

    /// `true` from submission until the engine has completed or discarded
    /// the record.
    pub fn is_queued(&self) -> bool {
        critical_section::with(|cs| self.queued_in(cs))
    }

    pub(crate) fn queued_in(&self, cs: CriticalSection<'_>) -> bool {
        self.queued.borrow(cs).get()
    }

    pub(crate) fn set_queued(&self, cs: CriticalSection<'_>, queued: bool) {
        self.queued.borrow(cs).set(queued);
    }

    pub(crate) fn cell<'cs>(&'cs self, cs: CriticalSection<'cs>) -> &'cs RefCell<Transaction> {
        self.inner.borrow(cs)
    }
}

impl Default for TransactionSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of a slot in the engine's pool. Only the pool hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolIndex(pub(crate) usize);

impl PoolIndex {
    /// Position in the pool.
    pub fn get(self) -> usize {
        self.0
    }
}

/// Reference to a transaction record, tagged with who owns it.
///
/// Pool records are returned to the pool when they complete; caller-owned
/// records are never freed by the engine and may be reused as soon as their
/// chain has completed.
#[derive(Clone, Copy)]
pub enum TransactionHandle {
    /// Record borrowed from the engine's pool.
    Pool(PoolIndex),
    /// Record in caller-owned static memory.
    Caller(&'static TransactionSlot),
}

impl TransactionHandle {
    /// `true` for pool-owned records.
    pub fn is_pool(self) -> bool {
        matches!(self, Self::Pool(_))
    }
}

impl From<&'static TransactionSlot> for TransactionHandle {
    fn from(slot: &'static TransactionSlot) -> Self {
        Self::Caller(slot)
    }
}

impl PartialEq for TransactionHandle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pool(a), Self::Pool(b)) => a == b,
            (Self::Caller(a), Self::Caller(b)) => core::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl Eq for TransactionHandle {}

impl core::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Pool(index) => write!(f, "Pool({})", index.0),
            Self::Caller(slot) => write!(f, "Caller({:p})", *slot),
        }
    }
}
