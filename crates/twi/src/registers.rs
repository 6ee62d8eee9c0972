//! Register-level access on top of the bus engine.
//!
//! Almost every device on the node is driven the same way: write a register
//! pointer, then read or write a few bytes from there. This module packages
//! that pattern three ways:
//!
//! - blocking helpers ([`read_regs`], [`write_regs`], ...) on caller-owned
//!   `static` slots, for background code;
//! - a pool-backed, callback-completed read ([`read_regs_async`]) that is safe
//!   to start from interrupt context;
//! - [`TwiBus`], an [`embedded_hal::i2c::I2c`] implementation so drivers
//!   written against embedded-hal run unchanged.
//!
//! [`probe`] and [`scan`] check which addresses answer at all.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation};
use heapless::Vec;
use platform::config::{IDLE_POLL_US, INLINE_BUFFER_LEN, MAX_CHAIN_LEN};
use platform::{status, Direction, TwiController};

use crate::engine::{BusEngine, Ticket};
use crate::error::{BusError, FailPhase};
use crate::transaction::{Callback, TransactionHandle, TransactionSlot, UserContext};

/// Submit, retrying while the queue is full. A chain longer than the whole
/// queue can never fit and fails at once with [`BusError::QueueFull`].
fn submit_when_queued<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    handles: &[TransactionHandle],
    delay: &mut impl DelayNs,
) -> Result<Ticket, BusError> {
    if handles.len() > Q {
        platform::log_debug!("twi: chain of {} exceeds queue of {}", handles.len(), Q);
        return Err(BusError::QueueFull);
    }
    loop {
        match engine.submit(handles) {
            Err(BusError::QueueFull) => delay.delay_us(IDLE_POLL_US),
            other => return other,
        }
    }
}

// ── Blocking helpers ────────────────────────────────────────────────────────

/// Read `out.len()` consecutive registers starting at `register`.
///
/// Runs a register-select write (no STOP) chained to a read, on the two
/// caller-owned `slots`, and idle-waits for completion. The read lands in
/// the slot's inline buffer, so `out` holds at most [`INLINE_BUFFER_LEN`]
/// bytes; longer bursts need a record with a buffer attached through
/// [`Transaction::attach_external`](crate::transaction::Transaction::attach_external).
///
/// # Errors
///
/// Setup errors ([`BusError::InvalidAddress`], [`BusError::InvalidLength`]
/// when `out` is longer than [`INLINE_BUFFER_LEN`]), [`BusError::SlotBusy`],
/// [`BusError::QueueFull`] on an engine whose queue cannot hold two entries,
/// or [`BusError::Protocol`] for the first transaction that failed on the
/// wire.
pub fn read_regs<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    slots: &'static [TransactionSlot; 2],
    address: u8,
    register: u8,
    out: &mut [u8],
    delay: &mut impl DelayNs,
) -> Result<(), BusError> {
    let [select, read] = slots;
    select.with(|txn| {
        txn.setup(address, Direction::Write, false, 0)?;
        txn.load(&[register])
    })??;
    read.with(|txn| txn.setup(address, Direction::Read, true, out.len()))??;

    let handles = [TransactionHandle::from(select), TransactionHandle::from(read)];
    let ticket = submit_when_queued(engine, &handles, delay)?;
    engine.wait(ticket, delay);

    select.with(|txn| txn.status().check())??;
    read.with(|txn| {
        txn.status().check()?;
        out.copy_from_slice(txn.data());
        Ok(())
    })?
}

/// Read one register.
///
/// # Errors
///
/// As [`read_regs`].
pub fn read_reg<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    slots: &'static [TransactionSlot; 2],
    address: u8,
    register: u8,
    delay: &mut impl DelayNs,
) -> Result<u8, BusError> {
    let mut value = [0u8; 1];
    read_regs(engine, slots, address, register, &mut value, delay)?;
    let [byte] = value;
    Ok(byte)
}

/// Write `values` to consecutive registers starting at `register`, as one
/// transaction `[register, values...]` with STOP.
///
/// # Errors
///
/// [`BusError::InvalidLength`] beyond `INLINE_BUFFER_LEN - 1` values, other
/// setup errors, [`BusError::SlotBusy`], or [`BusError::Protocol`].
pub fn write_regs<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    slot: &'static TransactionSlot,
    address: u8,
    register: u8,
    values: &[u8],
    delay: &mut impl DelayNs,
) -> Result<(), BusError> {
    let frame = register_frame(register, values)?;
    slot.with(|txn| {
        txn.setup(address, Direction::Write, true, 0)?;
        txn.load(&frame)
    })??;

    let ticket = submit_when_queued(engine, &[TransactionHandle::from(slot)], delay)?;
    engine.wait(ticket, delay);
    slot.with(|txn| txn.status().check())?
}

/// Write one register.
///
/// # Errors
///
/// As [`write_regs`].
pub fn write_reg<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    slot: &'static TransactionSlot,
    address: u8,
    register: u8,
    value: u8,
    delay: &mut impl DelayNs,
) -> Result<(), BusError> {
    write_regs(engine, slot, address, register, &[value], delay)
}

/// `true` if a device acknowledges `address`.
///
/// Sends an empty write (START, address, STOP). A missing ACK on the address
/// is the negative answer, not an error.
///
/// # Errors
///
/// [`BusError::InvalidAddress`], [`BusError::SlotBusy`], or
/// [`BusError::Protocol`] for a START or data-phase failure.
pub fn probe<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    slot: &'static TransactionSlot,
    address: u8,
    delay: &mut impl DelayNs,
) -> Result<bool, BusError> {
    slot.with(|txn| txn.setup(address, Direction::Write, true, 0))??;
    let ticket = submit_when_queued(engine, &[TransactionHandle::from(slot)], delay)?;
    engine.wait(ticket, delay);

    match slot.with(|txn| txn.status().check())? {
        Ok(()) => Ok(true),
        Err(BusError::Protocol {
            phase: FailPhase::Address,
            ..
        }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Probe every 7-bit address. Bit `n` of the result is set when a device
/// answered at address `n`.
///
/// # Errors
///
/// The first error [`probe`] reports.
pub fn scan<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    slot: &'static TransactionSlot,
    delay: &mut impl DelayNs,
) -> Result<u128, BusError> {
    let mut present = 0u128;
    for address in 0..=0x7Fu8 {
        if probe(engine, slot, address, delay)? {
            present |= 1u128.wrapping_shl(u32::from(address));
        }
    }
    platform::log_info!("twi: scan found {} devices", present.count_ones());
    Ok(present)
}

fn register_frame(register: u8, values: &[u8]) -> Result<Vec<u8, INLINE_BUFFER_LEN>, BusError> {
    let mut frame = Vec::new();
    let invalid = BusError::InvalidLength {
        requested: values.len().saturating_add(1),
        capacity: INLINE_BUFFER_LEN,
    };
    frame.push(register).map_err(|_| invalid)?;
    frame.extend_from_slice(values).map_err(|_| invalid)?;
    Ok(frame)
}

// ── Interrupt-safe helpers ──────────────────────────────────────────────────

/// Start a register read on pool records and return immediately.
///
/// `callback` runs once, in interrupt context, with the read transaction:
/// its [`data`](crate::transaction::Transaction::data) holds the register
/// contents on success, and its status carries the failure otherwise (also
/// when the register-select write was the one that failed, in which case the
/// callback sees the select transaction). `context` is passed through
/// untouched.
///
/// # Errors
///
/// [`BusError::PoolExhausted`], [`BusError::QueueFull`] or setup errors.
/// Nothing stays reserved or queued on error.
pub fn read_regs_async<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    address: u8,
    register: u8,
    len: usize,
    callback: Callback,
    context: Option<UserContext>,
) -> Result<(), BusError> {
    let [select, read] = engine.reserve::<2>()?;
    let queued = prepare_read(engine, [select, read], address, register, len, callback, context)
        .and_then(|()| engine.submit(&[select, read]));

    if let Err(e) = queued {
        engine.free(select);
        engine.free(read);
        return Err(e);
    }
    Ok(())
}

fn prepare_read<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    [select, read]: [TransactionHandle; 2],
    address: u8,
    register: u8,
    len: usize,
    callback: Callback,
    context: Option<UserContext>,
) -> Result<(), BusError> {
    engine.with_transaction(select, |txn| -> Result<(), BusError> {
        txn.setup(address, Direction::Write, false, 0)?;
        txn.load(&[register])?;
        txn.set_callback(Some(callback));
        txn.set_user_context(context);
        Ok(())
    })??;
    engine.with_transaction(read, |txn| -> Result<(), BusError> {
        txn.setup(address, Direction::Read, true, len)?;
        txn.set_callback(Some(callback));
        txn.set_user_context(context);
        Ok(())
    })?
}

/// Start a register write on a pool record and return immediately.
///
/// # Errors
///
/// As [`read_regs_async`].
pub fn write_regs_async<C: TwiController, const P: usize, const Q: usize>(
    engine: &BusEngine<C, P, Q>,
    address: u8,
    register: u8,
    values: &[u8],
    callback: Option<Callback>,
    context: Option<UserContext>,
) -> Result<(), BusError> {
    let frame = register_frame(register, values)?;
    let [handle] = engine.reserve::<1>()?;
    let queued = engine
        .with_transaction(handle, |txn| -> Result<(), BusError> {
            txn.setup(address, Direction::Write, true, 0)?;
            txn.load(&frame)?;
            txn.set_callback(callback);
            txn.set_user_context(context);
            Ok(())
        })
        .and_then(|prepared| prepared)
        .and_then(|()| engine.submit(&[handle]));

    if let Err(e) = queued {
        engine.free(handle);
        return Err(e);
    }
    Ok(())
}

// ── embedded-hal adapter ────────────────────────────────────────────────────

impl i2c::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Protocol {
                hardware_code: status::ARBITRATION_LOST,
                ..
            } => ErrorKind::ArbitrationLoss,
            Self::Protocol {
                hardware_code: status::BUS_ERROR,
                ..
            } => ErrorKind::Bus,
            Self::Protocol {
                phase: FailPhase::Address,
                ..
            } => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Self::Protocol {
                phase: FailPhase::Data,
                hardware_code: status::DATA_WRITE_NACK,
                ..
            } => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            _ => ErrorKind::Other,
        }
    }
}

/// Adjacent operations of one kind, run as a single transaction.
#[derive(Debug, Clone, Copy)]
struct Group {
    direction: Direction,
    first_op: usize,
    op_count: usize,
    len: usize,
}

/// [`embedded_hal::i2c::I2c`] over a [`BusEngine`].
///
/// Each call becomes one chain on caller-owned `slots` (one slot per run of
/// same-direction operations, at most [`MAX_CHAIN_LEN`]), with a repeated
/// START between runs and a STOP after the last. Each run must fit the
/// inline buffer, and a call with more runs than the engine's queue holds
/// fails with [`BusError::QueueFull`].
pub struct TwiBus<'e, C, D, const P: usize, const Q: usize> {
    engine: &'e BusEngine<C, P, Q>,
    slots: &'static [TransactionSlot],
    delay: D,
}

impl<'e, C: TwiController, D: DelayNs, const P: usize, const Q: usize> TwiBus<'e, C, D, P, Q> {
    /// Wrap `engine`, running transfers on `slots` and waiting with `delay`.
    pub fn new(engine: &'e BusEngine<C, P, Q>, slots: &'static [TransactionSlot], delay: D) -> Self {
        Self {
            engine,
            slots,
            delay,
        }
    }

    /// Give back the delay provider.
    pub fn release(self) -> D {
        self.delay
    }

    fn plan(&self, operations: &[Operation<'_>]) -> Result<Vec<Group, MAX_CHAIN_LEN>, BusError> {
        let mut groups: Vec<Group, MAX_CHAIN_LEN> = Vec::new();
        for (index, op) in operations.iter().enumerate() {
            let (direction, len) = match op {
                Operation::Read(buf) => (Direction::Read, buf.len()),
                Operation::Write(bytes) => (Direction::Write, bytes.len()),
            };
            match groups.last_mut() {
                Some(group) if group.direction == direction => {
                    group.op_count = group.op_count.saturating_add(1);
                    group.len = group.len.saturating_add(len);
                }
                _ => {
                    let too_long = BusError::InvalidLength {
                        requested: operations.len(),
                        capacity: MAX_CHAIN_LEN.min(self.slots.len()),
                    };
                    groups
                        .push(Group {
                            direction,
                            first_op: index,
                            op_count: 1,
                            len,
                        })
                        .map_err(|_| too_long)?;
                }
            }
        }
        if groups.len() > self.slots.len() {
            return Err(BusError::InvalidLength {
                requested: groups.len(),
                capacity: self.slots.len(),
            });
        }
        if groups.len() > Q {
            return Err(BusError::QueueFull);
        }
        if let Some(group) = groups.iter().find(|g| g.len > INLINE_BUFFER_LEN) {
            return Err(BusError::InvalidLength {
                requested: group.len,
                capacity: INLINE_BUFFER_LEN,
            });
        }
        Ok(groups)
    }
}

impl<C, D, const P: usize, const Q: usize> i2c::ErrorType for TwiBus<'_, C, D, P, Q> {
    type Error = BusError;
}

impl<C: TwiController, D: DelayNs, const P: usize, const Q: usize> i2c::I2c
    for TwiBus<'_, C, D, P, Q>
{
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let groups = self.plan(operations)?;
        let last = groups.len().saturating_sub(1);
        let mut handles: Vec<TransactionHandle, MAX_CHAIN_LEN> = Vec::new();

        for ((position, group), slot) in groups.iter().enumerate().zip(self.slots) {
            slot.with(|txn| {
                txn.setup(address, group.direction, position == last, group.len)?;
                let mut at = 0usize;
                let ops = operations.iter().skip(group.first_op).take(group.op_count);
                for op in ops {
                    if let Operation::Write(bytes) = op {
                        let end = at.saturating_add(bytes.len());
                        if let Some(dst) = txn.data_mut().get_mut(at..end) {
                            dst.copy_from_slice(bytes);
                        }
                        at = end;
                    }
                }
                Ok::<_, BusError>(())
            })??;
            handles
                .push(TransactionHandle::Caller(slot))
                .map_err(|_| BusError::QueueFull)?;
        }

        let ticket = submit_when_queued(self.engine, &handles, &mut self.delay)?;
        self.engine.wait(ticket, &mut self.delay);

        for (group, slot) in groups.iter().zip(self.slots) {
            slot.with(|txn| {
                txn.status().check()?;
                let mut at = 0usize;
                let ops = operations.iter_mut().skip(group.first_op).take(group.op_count);
                for op in ops {
                    if let Operation::Read(buf) = op {
                        let end = at.saturating_add(buf.len());
                        if let Some(src) = txn.data().get(at..end) {
                            buf.copy_from_slice(src);
                        }
                        at = end;
                    }
                }
                Ok::<_, BusError>(())
            })??;
        }
        Ok(())
    }
}
