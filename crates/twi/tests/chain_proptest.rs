//! Property-based tests for chain completion.
//! Any chain length, any failing member: exactly one callback, every pool
//! record back, nothing left queued.
#![allow(
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::atomic::{AtomicUsize, Ordering};

use platform::mocks::ScriptedTwi;
use platform::{status, Direction};
use proptest::prelude::*;
use twi::{BusEngine, BusError, Transaction};

type TestEngine = BusEngine<ScriptedTwi, 4, 4>;

fn count_hit(txn: &mut Transaction) {
    if let Some(hits) = txn
        .user_context()
        .and_then(|ctx| ctx.downcast_ref::<AtomicUsize>())
    {
        hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Chain length and, optionally, the member whose address is NACKed.
fn chain() -> impl Strategy<Value = (usize, Option<usize>)> {
    (1usize..=4).prop_flat_map(|len| (Just(len), prop::option::of(0..len)))
}

proptest! {
    #[test]
    fn one_callback_per_chain((len, failing) in chain()) {
        let engine = TestEngine::new(ScriptedTwi::new());
        let hits: &'static [AtomicUsize; 4] = Box::leak(Box::new([
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
        ]));

        let reserved = engine.reserve::<4>().expect("pool");
        let handles = &reserved[..len];
        for (index, &handle) in handles.iter().enumerate() {
            engine
                .with_transaction(handle, |txn| {
                    txn.setup(0x40, Direction::Write, index + 1 == len, 0)?;
                    txn.load(&[0xA5])?;
                    txn.set_callback(Some(count_hit));
                    txn.set_user_context(Some(&hits[index]));
                    Ok::<_, BusError>(())
                })
                .expect("record")
                .expect("setup");
        }
        for &unused in &reserved[len..] {
            engine.free(unused);
        }

        engine.with_controller(|twi| {
            let clean = failing.unwrap_or(len);
            for index in 0..clean {
                twi.script_write(1, index > 0);
            }
            if failing.is_some() {
                let start = if clean > 0 { status::REPEATED_START } else { status::START };
                twi.script(&[start, status::ADDRESS_WRITE_NACK]);
            }
        });

        let ticket = engine.submit(handles).expect("submit");
        for _ in 0..64 {
            if engine.is_idle() {
                break;
            }
            engine.on_interrupt();
        }

        prop_assert!(engine.is_complete(ticket));
        prop_assert!(engine.is_idle());
        prop_assert_eq!(engine.queued(), 0);
        prop_assert_eq!(engine.pool().available(), 4);

        let expected = failing.unwrap_or(len - 1);
        for (index, hit) in hits.iter().enumerate() {
            let want = usize::from(index == expected);
            prop_assert_eq!(hit.load(Ordering::SeqCst), want, "member {}", index);
        }
    }
}
