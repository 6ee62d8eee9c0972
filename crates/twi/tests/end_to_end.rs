//! Blocking submissions against a scripted controller whose "interrupts" are
//! delivered from inside the idle wait.
//!
//! Run with: cargo test -p twi --test end_to_end
#![allow(
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use embedded_hal::delay::DelayNs;
use platform::mocks::{BusAction, ScriptedTwi};
use platform::{status, Direction};
use twi::{
    BusEngine, BusError, Transaction, TransactionHandle, TransactionSlot, TransactionStatus,
};

type TestEngine = BusEngine<ScriptedTwi>;

/// Delay that stands in for the TWI interrupt: every sleep delivers one
/// controller event.
struct InterruptingDelay<'a> {
    engine: &'a TestEngine,
    sleeps: usize,
}

impl<'a> InterruptingDelay<'a> {
    fn new(engine: &'a TestEngine) -> Self {
        Self { engine, sleeps: 0 }
    }
}

impl DelayNs for InterruptingDelay<'_> {
    fn delay_ns(&mut self, _ns: u32) {
        self.sleeps += 1;
        assert!(self.sleeps < 1_000, "bus never completed");
        self.engine.on_interrupt();
    }
}

/// Raw status of the transaction whose callback ran last.
fn record_raw(txn: &mut Transaction) {
    if let Some(seen) = txn
        .user_context()
        .and_then(|ctx| ctx.downcast_ref::<AtomicU8>())
    {
        seen.store(txn.status().raw(), Ordering::SeqCst);
    }
}

// ─── Register read that fails on the read address ───────────────────────────

#[test]
fn nacked_read_address_reports_through_the_read_callback() {
    static SELECT_SEEN: AtomicU8 = AtomicU8::new(0xEE);
    static READ_SEEN: AtomicU8 = AtomicU8::new(0xEE);

    let engine = TestEngine::new(ScriptedTwi::new());
    engine.with_controller(|twi| {
        twi.script(&[
            status::START,
            status::ADDRESS_WRITE_ACK,
            status::DATA_WRITE_ACK,
            status::REPEATED_START,
            status::ADDRESS_READ_NACK,
        ]);
    });

    let [select, read] = engine.reserve::<2>().expect("reserve");
    engine
        .with_transaction(select, |txn| {
            txn.setup(0x64, Direction::Write, false, 0)?;
            txn.load(&[0x08])?;
            txn.set_callback(Some(record_raw));
            txn.set_user_context(Some(&SELECT_SEEN));
            Ok::<_, BusError>(())
        })
        .expect("slot")
        .expect("setup");
    engine
        .with_transaction(read, |txn| {
            txn.setup(0x64, Direction::Read, true, 2)?;
            txn.set_callback(Some(record_raw));
            txn.set_user_context(Some(&READ_SEEN));
            Ok::<_, BusError>(())
        })
        .expect("slot")
        .expect("setup");

    let mut delay = InterruptingDelay::new(&engine);
    engine
        .submit_blocking(&[select, read], &mut delay)
        .expect("queued");

    assert_eq!(SELECT_SEEN.load(Ordering::SeqCst), 0xEE, "chained member stays silent");
    assert_eq!(READ_SEEN.load(Ordering::SeqCst), 2, "address phase failure");
    assert_eq!(engine.pool().available(), engine.pool().capacity());
    assert!(engine.is_idle());
    engine.with_controller(|twi| {
        assert_eq!(
            twi.actions(),
            &[
                BusAction::Start,
                BusAction::Address(0xC8),
                BusAction::Send(0x08),
                BusAction::Start,
                BusAction::Address(0xC9),
                BusAction::Stop,
            ]
        );
        assert_eq!(twi.pending_codes(), 0);
    });

    // The bus is usable again straight away.
    static RETRY: TransactionSlot = TransactionSlot::new();
    engine.with_controller(|twi| twi.script_write(1, false));
    RETRY
        .with(|txn| {
            txn.setup(0x64, Direction::Write, true, 0)?;
            txn.load(&[0x01])
        })
        .expect("slot")
        .expect("setup");
    engine
        .submit_blocking(&[TransactionHandle::from(&RETRY)], &mut delay)
        .expect("queued");
    assert_eq!(RETRY.status(), Some(TransactionStatus::Success));
}

// ─── Ticket precision ───────────────────────────────────────────────────────

#[test]
fn blocking_submit_returns_when_its_own_chain_is_done() {
    static EARLY: TransactionSlot = TransactionSlot::new();
    static MINE: TransactionSlot = TransactionSlot::new();

    let engine = TestEngine::new(ScriptedTwi::new());
    engine.with_controller(|twi| {
        twi.script_write(1, false);
        twi.script_read(&[0x42], false);
    });
    EARLY
        .with(|txn| {
            txn.setup(0x50, Direction::Write, true, 0)?;
            txn.load(&[0x00])
        })
        .expect("slot")
        .expect("setup");
    MINE.with(|txn| txn.setup(0x51, Direction::Read, true, 1))
        .expect("slot")
        .expect("setup");

    let early = engine.submit(&[TransactionHandle::from(&EARLY)]).expect("submit");
    let mine = engine.submit(&[TransactionHandle::from(&MINE)]).expect("submit");
    assert!(!engine.is_complete(early));
    assert!(!engine.is_complete(mine));

    let mut delay = InterruptingDelay::new(&engine);
    engine.wait(early, &mut delay);
    assert!(engine.is_complete(early));
    assert!(!engine.is_complete(mine), "later submission still on the bus");

    engine.wait(mine, &mut delay);
    assert_eq!(MINE.status(), Some(TransactionStatus::Success));
    assert_eq!(MINE.with(|txn| txn.data()[0]).expect("slot"), 0x42);
}

#[test]
fn empty_submission_completes_with_everything_before_it() {
    static SLOT: TransactionSlot = TransactionSlot::new();
    let engine = TestEngine::new(ScriptedTwi::new());
    engine.with_controller(|twi| twi.script_write(0, false));
    SLOT.with(|txn| txn.setup(0x20, Direction::Write, true, 0))
        .expect("slot")
        .expect("setup");

    let real = engine.submit(&[TransactionHandle::from(&SLOT)]).expect("submit");
    let marker = engine.submit(&[]).expect("empty");
    assert_eq!(real, marker);
    assert!(!engine.is_complete(marker));

    let mut delay = InterruptingDelay::new(&engine);
    engine.wait(marker, &mut delay);
    assert_eq!(SLOT.status(), Some(TransactionStatus::Success));
}

// ─── Callback bookkeeping over many submissions ─────────────────────────────

#[test]
fn every_submission_completes_exactly_once() {
    static DONE: AtomicUsize = AtomicUsize::new(0);
    fn done(txn: &mut Transaction) {
        if txn.status().is_success() {
            DONE.fetch_add(1, Ordering::SeqCst);
        }
    }

    let engine = TestEngine::new(ScriptedTwi::new());
    let mut delay = InterruptingDelay::new(&engine);
    for round in 0..20u8 {
        engine.with_controller(|twi| {
            twi.clear_actions();
            twi.script_write(2, false);
        });
        let [handle] = engine.reserve::<1>().expect("pool drains back every round");
        engine
            .with_transaction(handle, |txn| {
                txn.setup(0x3C, Direction::Write, true, 0)?;
                txn.load(&[round, round.wrapping_mul(3)])?;
                txn.set_callback(Some(done));
                Ok::<_, BusError>(())
            })
            .expect("slot")
            .expect("setup");
        engine.submit_blocking(&[handle], &mut delay).expect("queued");
    }
    assert_eq!(DONE.load(Ordering::SeqCst), 20);
    assert_eq!(engine.pool().available(), engine.pool().capacity());
}
