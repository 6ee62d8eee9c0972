//! Interrupt-driven TWI protocol engine.
//!
//! `BusEngine` owns the transaction pool, the queue and the controller. It
//! walks one transaction at a time through
//!
//! ```text
//! Idle → Start → Address → AddressAck → DataSend ⇄ DataCheck → Stop → Idle
//! ```
//!
//! doing one hardware action per controller interrupt. Every entry point runs
//! inside `critical_section::with` and loops until the engine has to wait
//! for hardware or has nothing left to do, so a single call per interrupt is
//! enough and stack depth stays bounded.
//!
//! # Chains
//!
//! A submission of `k` handles runs back-to-back as one unit. On success
//! only the last member's callback fires. On failure the failing member's
//! callback fires, the bus is released with a STOP, and the remaining members
//! are dropped from the queue without touching the bus or their callbacks.
//! Pool-owned members are freed either way.
//!
//! # Reentrancy
//!
//! Callbacks run from inside the dispatch loop with no engine state borrowed.
//! A callback that submits new work only enqueues it; the running loop picks
//! it up when the callback returns.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use embedded_hal::delay::DelayNs;
use platform::config::{IDLE_POLL_US, TRANSACTION_POOL_SIZE, TRANSACTION_QUEUE_SIZE};
use platform::{status, Direction, TwiController};

use crate::error::{BusError, FailPhase};
use crate::pool::TransactionPool;
use crate::queue::{QueueEntry, TransactionQueue};
use crate::transaction::{Transaction, TransactionHandle, TransactionStatus};

/// Where the engine is within the current transaction.
///
/// The "awaiting" phases (`Address`, `AddressAck`, `DataCheck`) are entered
/// after a hardware action was started and are only advanced by
/// [`BusEngine::on_interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnginePhase {
    /// No transaction loaded.
    #[default]
    Idle,
    /// Transaction loaded; START not yet issued.
    Start,
    /// START issued; expecting start/repeated-start.
    Address,
    /// Address byte sent; expecting the address ACK.
    AddressAck,
    /// Data byte sent or requested; expecting its ACK/NACK.
    DataCheck,
    /// Ready to move the next data byte, or to finish.
    DataSend,
    /// All bytes moved; STOP (if requested) and complete.
    Stop,
}

/// Receipt for a submission. Completed once every member of the submitted
/// chain has finished or been discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticket(u32);

/// Half of the ticket counter range; completion is tested modulo 2³².
const TICKET_HALF_RANGE: u32 = 0x8000_0000;

struct EngineState<const Q: usize> {
    queue: TransactionQueue<Q>,
    phase: EnginePhase,
    current: Option<QueueEntry>,
    /// Data bytes started for the current transaction.
    transferred: usize,
    /// The dispatch loop is running further up the stack.
    dispatching: bool,
    /// Submissions accepted so far (wrapping).
    submitted: u32,
    /// Submissions finished so far (wrapping).
    retired: u32,
    /// Controller interrupts delivered (wrapping).
    events: u32,
}

impl<const Q: usize> EngineState<Q> {
    const fn new() -> Self {
        Self {
            queue: TransactionQueue::new(),
            phase: EnginePhase::Idle,
            current: None,
            transferred: 0,
            dispatching: false,
            submitted: 0,
            retired: 0,
            events: 0,
        }
    }

    fn retire(&mut self) {
        self.retired = self.retired.wrapping_add(1);
    }
}

/// What one pass of the phase machine ended with.
enum Step {
    /// Waiting for the controller, or nothing to do.
    Wait,
    /// The current transaction has finished.
    Done(Completion),
}

struct Completion {
    entry: QueueEntry,
    failed: bool,
}

/// The bus engine for one TWI controller.
///
/// Designed to live in a `static`:
///
/// ```ignore
/// static BUS: BusEngine<AvrTwi> = BusEngine::new(AvrTwi::new());
///
/// #[interrupt]
/// fn TWI() {
///     BUS.on_interrupt();
/// }
/// ```
pub struct BusEngine<
    C,
    const POOL: usize = { TRANSACTION_POOL_SIZE },
    const QUEUE: usize = { TRANSACTION_QUEUE_SIZE },
> {
    pool: TransactionPool<POOL>,
    state: Mutex<RefCell<EngineState<QUEUE>>>,
    controller: Mutex<RefCell<C>>,
}

impl<C: TwiController, const POOL: usize, const QUEUE: usize> BusEngine<C, POOL, QUEUE> {
    /// An idle engine with an empty queue and a fully free pool.
    pub const fn new(controller: C) -> Self {
        Self {
            pool: TransactionPool::new(),
            state: Mutex::new(RefCell::new(EngineState::new())),
            controller: Mutex::new(RefCell::new(controller)),
        }
    }

    // ── Pool ────────────────────────────────────────────────────────────────

    /// Reserve `K` pool records. See [`TransactionPool::reserve`].
    ///
    /// # Errors
    ///
    /// [`BusError::PoolExhausted`]; nothing is reserved.
    pub fn reserve<const K: usize>(&self) -> Result<[TransactionHandle; K], BusError> {
        self.pool.reserve::<K>()
    }

    /// Return a pool record; no-op for caller-owned, unreserved or still
    /// queued handles.
    ///
    /// Only needed for records that were reserved but never submitted; the
    /// engine frees submitted pool records itself.
    pub fn free(&self, handle: TransactionHandle) -> bool {
        self.pool.free(handle)
    }

    /// The engine's pool.
    pub fn pool(&self) -> &TransactionPool<POOL> {
        &self.pool
    }

    /// Run `f` on the record behind `handle`.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownHandle`] for a pool index outside the pool,
    /// [`BusError::SlotBusy`] while the engine holds the record.
    pub fn with_transaction<R>(
        &self,
        handle: TransactionHandle,
        f: impl FnOnce(&mut Transaction) -> R,
    ) -> Result<R, BusError> {
        let slot = self.pool.resolve(handle).ok_or(unknown(handle))?;
        slot.with(f)
    }

    /// [`Transaction::setup`] on the record behind `handle`.
    ///
    /// # Errors
    ///
    /// As [`Transaction::setup`] and [`with_transaction`](Self::with_transaction).
    pub fn setup(
        &self,
        handle: TransactionHandle,
        address: u8,
        direction: Direction,
        send_stop: bool,
        byte_count: usize,
    ) -> Result<(), BusError> {
        self.with_transaction(handle, |txn| {
            txn.setup(address, direction, send_stop, byte_count)
        })?
    }

    // ── Submission ──────────────────────────────────────────────────────────

    /// Queue `handles` as one chain and start the engine if it is idle.
    ///
    /// With the engine idle this runs the first hardware action before
    /// returning. An empty slice queues nothing; its ticket completes once
    /// everything submitted before it has.
    ///
    /// # Errors
    ///
    /// [`BusError::QueueFull`] if the whole chain does not fit,
    /// [`BusError::UnknownHandle`] for a pool handle that is not reserved,
    /// [`BusError::SlotBusy`] for a record that is already queued or appears
    /// twice in `handles`. Nothing is queued on error.
    pub fn submit(&self, handles: &[TransactionHandle]) -> Result<Ticket, BusError> {
        critical_section::with(|cs| {
            let (ticket, kick) = {
                let mut state = self.state.borrow_ref_mut(cs);
                if handles.is_empty() {
                    return Ok(Ticket(state.submitted));
                }
                if let Some(stray) = handles.iter().copied().find(|&h| !self.is_live(h)) {
                    return Err(unknown(stray));
                }
                if self.any_claimed(cs, handles) {
                    platform::log_debug!("twi: submission holds a record that is already queued");
                    return Err(BusError::SlotBusy);
                }
                if let Err(e) = state.queue.push_chain(handles) {
                    platform::log_debug!(
                        "twi: queue full, {} free, {} wanted",
                        state.queue.free_slots(),
                        handles.len()
                    );
                    return Err(e);
                }
                for &handle in handles {
                    self.set_queued(cs, handle, true);
                }
                state.submitted = state.submitted.wrapping_add(1);
                (Ticket(state.submitted), state.phase == EnginePhase::Idle)
            };
            if kick {
                self.dispatch(cs);
            }
            Ok(ticket)
        })
    }

    /// Submit and idle-wait until this chain has completed.
    ///
    /// Waits in [`IDLE_POLL_US`] sleeps so interrupts keep running. Only
    /// queueing errors are returned; check each record's status for the
    /// outcome of the transfer.
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit).
    pub fn submit_blocking(
        &self,
        handles: &[TransactionHandle],
        delay: &mut impl DelayNs,
    ) -> Result<(), BusError> {
        let ticket = self.submit(handles)?;
        self.wait(ticket, delay);
        Ok(())
    }

    /// Idle-wait until `ticket` has completed.
    pub fn wait(&self, ticket: Ticket, delay: &mut impl DelayNs) {
        while !self.is_complete(ticket) {
            delay.delay_us(IDLE_POLL_US);
        }
    }

    /// `true` once the submission behind `ticket` has completed.
    pub fn is_complete(&self, ticket: Ticket) -> bool {
        let retired = critical_section::with(|cs| self.state.borrow_ref(cs).retired);
        retired.wrapping_sub(ticket.0) < TICKET_HALF_RANGE
    }

    // ── Interrupt side ──────────────────────────────────────────────────────

    /// Controller interrupt entry point.
    pub fn on_interrupt(&self) {
        critical_section::with(|cs| {
            {
                let mut state = self.state.borrow_ref_mut(cs);
                state.events = state.events.wrapping_add(1);
            }
            self.dispatch(cs);
        });
    }

    /// `true` when no transaction is loaded. Queued work is started as soon
    /// as the engine goes idle, so an idle engine also has an empty queue
    /// outside of callbacks.
    pub fn is_idle(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).phase == EnginePhase::Idle)
    }

    /// Current phase.
    pub fn phase(&self) -> EnginePhase {
        critical_section::with(|cs| self.state.borrow_ref(cs).phase)
    }

    /// Entries waiting behind the current transaction.
    pub fn queued(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.len())
    }

    /// Controller interrupts delivered since start-up (wrapping).
    pub fn events(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).events)
    }

    /// Run `f` on the controller, e.g. to configure the bit rate.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        critical_section::with(|cs| f(&mut self.controller.borrow_ref_mut(cs)))
    }

    // ── Dispatch loop ───────────────────────────────────────────────────────

    fn is_live(&self, handle: TransactionHandle) -> bool {
        match handle {
            TransactionHandle::Pool(index) => self.pool.is_reserved(index),
            TransactionHandle::Caller(_) => true,
        }
    }

    /// `true` if any of `handles` is already owned by a queue entry, or
    /// appears more than once.
    fn any_claimed(&self, cs: CriticalSection<'_>, handles: &[TransactionHandle]) -> bool {
        handles.iter().enumerate().any(|(position, &handle)| {
            let repeated = handles.iter().take(position).any(|&earlier| earlier == handle);
            let queued = self
                .pool
                .resolve(handle)
                .is_some_and(|slot| slot.queued_in(cs));
            repeated || queued
        })
    }

    fn set_queued(&self, cs: CriticalSection<'_>, handle: TransactionHandle, queued: bool) {
        if let Some(slot) = self.pool.resolve(handle) {
            slot.set_queued(cs, queued);
        }
    }

    fn dispatch(&self, cs: CriticalSection<'_>) {
        {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        while let Step::Done(completion) = self.step(cs) {
            self.complete(cs, &completion);
        }
        self.state.borrow_ref_mut(cs).dispatching = false;
    }

    /// Advance the phase machine until it has to wait or a transaction ends.
    fn step(&self, cs: CriticalSection<'_>) -> Step {
        let mut state = self.state.borrow_ref_mut(cs);

        if state.phase == EnginePhase::Idle {
            let Some(entry) = state.queue.pop() else {
                return Step::Wait;
            };
            state.current = Some(entry);
            state.transferred = 0;
            state.phase = EnginePhase::Start;
        }

        let Some(entry) = state.current else {
            state.phase = EnginePhase::Idle;
            return Step::Wait;
        };
        let Some(slot) = self.pool.resolve(entry.handle) else {
            // Rejected by submit; only reachable if the pool shrank under us.
            state.current = None;
            state.phase = EnginePhase::Idle;
            return Step::Done(Completion { entry, failed: true });
        };
        let Ok(mut txn) = slot.cell(cs).try_borrow_mut() else {
            return Step::Wait;
        };
        let mut twi = self.controller.borrow_ref_mut(cs);

        loop {
            match state.phase {
                EnginePhase::Idle => return Step::Wait,
                EnginePhase::Start => {
                    txn.begin(entry.chained);
                    twi.send_start();
                    state.phase = EnginePhase::Address;
                    return Step::Wait;
                }
                EnginePhase::Address => {
                    let code = twi.status();
                    if code != status::START && code != status::REPEATED_START {
                        return fail(&mut state, &mut *twi, &mut txn, FailPhase::Start, code);
                    }
                    twi.send_address(txn.direction().address_byte(txn.address()));
                    state.phase = EnginePhase::AddressAck;
                    return Step::Wait;
                }
                EnginePhase::AddressAck => {
                    let code = twi.status();
                    let expected = match txn.direction() {
                        Direction::Write => status::ADDRESS_WRITE_ACK,
                        Direction::Read => status::ADDRESS_READ_ACK,
                    };
                    if code != expected {
                        return fail(&mut state, &mut *twi, &mut txn, FailPhase::Address, code);
                    }
                    state.phase = EnginePhase::DataSend;
                }
                EnginePhase::DataCheck => {
                    let code = twi.status();
                    let accepted = match txn.direction() {
                        Direction::Write => code == status::DATA_WRITE_ACK,
                        Direction::Read => {
                            code == status::DATA_READ_ACK || code == status::DATA_READ_NACK
                        }
                    };
                    if !accepted {
                        return fail(&mut state, &mut *twi, &mut txn, FailPhase::Data, code);
                    }
                    if txn.direction() == Direction::Read {
                        let index = state.transferred.saturating_sub(1);
                        txn.store_byte(index, twi.read_data());
                    }
                    state.phase = EnginePhase::DataSend;
                }
                EnginePhase::DataSend => {
                    let index = state.transferred;
                    let count = txn.byte_count();
                    if index < count {
                        match txn.direction() {
                            Direction::Write => twi.send_byte(txn.byte_at(index)),
                            Direction::Read => twi.receive_byte(index.saturating_add(1) < count),
                        }
                        state.transferred = index.saturating_add(1);
                        state.phase = EnginePhase::DataCheck;
                        return Step::Wait;
                    }
                    state.phase = EnginePhase::Stop;
                }
                EnginePhase::Stop => {
                    if txn.send_stop() {
                        twi.send_stop();
                    }
                    txn.finish(TransactionStatus::Success);
                    state.current = None;
                    state.phase = EnginePhase::Idle;
                    return Step::Done(Completion {
                        entry,
                        failed: false,
                    });
                }
            }
        }
    }

    /// Callback, free, chain cleanup. Runs with no engine state borrowed.
    fn complete(&self, cs: CriticalSection<'_>, completion: &Completion) {
        let QueueEntry { handle, chained } = completion.entry;
        self.set_queued(cs, handle, false);

        if completion.failed || !chained {
            self.notify(cs, handle);
        }
        self.pool.free(handle);

        if completion.failed && chained {
            self.discard_chain(cs);
        }
        if completion.failed || !chained {
            self.state.borrow_ref_mut(cs).retire();
        }
    }

    fn notify(&self, cs: CriticalSection<'_>, handle: TransactionHandle) {
        let Some(slot) = self.pool.resolve(handle) else {
            return;
        };
        let Ok(mut txn) = slot.cell(cs).try_borrow_mut() else {
            return;
        };
        if let Some(callback) = txn.callback() {
            callback(&mut txn);
        }
    }

    /// Drop the rest of a failed chain: up to and including the first entry
    /// that is not chained to the next.
    fn discard_chain(&self, cs: CriticalSection<'_>) {
        loop {
            let Some(entry) = self.state.borrow_ref_mut(cs).queue.pop() else {
                return;
            };
            self.set_queued(cs, entry.handle, false);
            if let Some(slot) = self.pool.resolve(entry.handle) {
                if let Ok(mut txn) = slot.cell(cs).try_borrow_mut() {
                    txn.finish(TransactionStatus::Skipped);
                }
            }
            self.pool.free(entry.handle);
            platform::log_trace!("twi: discarded linked transaction");
            if !entry.chained {
                return;
            }
        }
    }
}

/// Error path: release the bus and record the failure.
fn fail<C: TwiController, const Q: usize>(
    state: &mut EngineState<Q>,
    twi: &mut C,
    txn: &mut Transaction,
    phase: FailPhase,
    code: u8,
) -> Step {
    let bytes_done = match phase {
        FailPhase::Data => u8::try_from(state.transferred.saturating_sub(1)).unwrap_or(u8::MAX),
        FailPhase::Start | FailPhase::Address => 0,
    };
    twi.send_stop();
    txn.finish(TransactionStatus::Failed {
        phase,
        bytes_done,
        hardware_code: code,
    });
    platform::log_warn!(
        "twi: {} failure at {:#x} after {} bytes: {}",
        phase.as_str(),
        txn.address(),
        bytes_done,
        status::describe(code)
    );

    let entry = state.current.take();
    state.phase = EnginePhase::Idle;
    match entry {
        Some(entry) => Step::Done(Completion {
            entry,
            failed: true,
        }),
        None => Step::Wait,
    }
}

fn unknown(handle: TransactionHandle) -> BusError {
    match handle {
        TransactionHandle::Pool(index) => BusError::UnknownHandle(index.get()),
        TransactionHandle::Caller(_) => BusError::SlotBusy,
    }
}
