//! Node bring-up and interrupt wiring
//!
//! Boots a node on the scripted controller and drives it the way the board's
//! interrupt vectors would: TWI events from inside the delay loops, fine
//! ticks from the sampling loop, coarse ticks by hand.
//!
//! Run with: cargo test -p firmware --test integration_boot
#![allow(clippy::expect_used, clippy::panic)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use firmware::{Node, NodeError, LIFESIGN};
use platform::mocks::{BusAction, ScriptedTwi};
use platform::{status, TwiController};
use timebase::{PeriodCursor, TableId};
use twi::registers::read_reg;
use twi::{BusError, FailPhase, TransactionSlot};

struct Led(Arc<AtomicBool>);

impl ErrorType for Led {
    type Error = Infallible;
}

impl OutputPin for Led {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Delay that stands in for the TWI interrupt.
struct TwiEvents<'a, C: TwiController>(&'a Node<C>);

impl<C: TwiController> DelayNs for TwiEvents<'_, C> {
    fn delay_ns(&mut self, _ns: u32) {
        self.0.on_twi_interrupt();
    }
}

/// Delay during which exactly one 1024 Hz tick happens.
struct FineTicks<'a, C: TwiController>(&'a Node<C>);

impl<C: TwiController> DelayNs for FineTicks<'_, C> {
    fn delay_ns(&mut self, _ns: u32) {
        self.0.on_tick_1024hz();
    }
}

/// A bus with nothing on it: STARTs succeed, every address is NACKed.
struct EmptyBus {
    last: u8,
}

impl TwiController for EmptyBus {
    fn status(&mut self) -> u8 {
        self.last
    }

    fn send_start(&mut self) {
        self.last = status::START;
    }

    fn send_address(&mut self, _address_byte: u8) {
        self.last = status::ADDRESS_WRITE_NACK;
    }

    fn send_byte(&mut self, _byte: u8) {
        self.last = status::DATA_WRITE_NACK;
    }

    fn receive_byte(&mut self, _ack: bool) {
        self.last = status::DATA_READ_NACK;
    }

    fn read_data(&mut self) -> u8 {
        0xFF
    }

    fn send_stop(&mut self) {}
}

// ─── Boot ────────────────────────────────────────────────────────────────────

/// The only test that touches the global heartbeat.
#[test]
fn boot_starts_the_clock_and_the_heartbeat() {
    let node = Node::new(ScriptedTwi::new());
    let level = Arc::new(AtomicBool::new(true));
    LIFESIGN.attach(Box::leak(Box::new(Led(level.clone()))));

    node.init(100).expect("boot");
    node.init(100).expect("re-init");
    assert_eq!(node.clock().now_ms(), 100_000);
    assert_eq!(
        node.clock().scheduler().registered(TableId::Slow),
        1,
        "heartbeat registered once"
    );
    assert!(!level.load(Ordering::SeqCst));

    for _ in 0..3 {
        node.on_tick_1hz();
    }
    assert!(!level.load(Ordering::SeqCst));
    node.on_tick_1hz();
    assert!(level.load(Ordering::SeqCst), "lit on the fourth second");
    assert_eq!(node.clock().now_ms(), 104_000);

    node.on_tick_1hz();
    assert!(!level.load(Ordering::SeqCst));
    LIFESIGN.detach();
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

#[test]
fn register_read_completes_on_twi_interrupts() {
    static SLOTS: [TransactionSlot; 2] = [TransactionSlot::NEW; 2];
    let node = Node::new(ScriptedTwi::new());
    node.bus().with_controller(|twi| {
        twi.script_write(1, false);
        twi.script_read(&[0x5A], true);
    });

    let value = read_reg(node.bus(), &SLOTS, 0x68, 0x0F, &mut TwiEvents(&node)).expect("read");
    assert_eq!(value, 0x5A);
    assert!(node.bus().is_idle());
    node.bus().with_controller(|twi| {
        assert_eq!(
            twi.actions(),
            &[
                BusAction::Start,
                BusAction::Address(0xD0),
                BusAction::Send(0x0F),
                BusAction::Start,
                BusAction::Address(0xD1),
                BusAction::Receive(false),
                BusAction::Stop,
            ]
        );
    });
}

#[test]
fn scan_of_an_empty_bus_finds_nothing() {
    static SLOT: TransactionSlot = TransactionSlot::NEW;
    let node = Node::new(EmptyBus { last: status::NO_INFO });
    let present = node.scan_bus(&SLOT, &mut TwiEvents(&node)).expect("scan");
    assert_eq!(present, 0);
}

#[test]
fn scan_of_a_dead_bus_is_an_error() {
    static SLOT: TransactionSlot = TransactionSlot::NEW;
    // Nothing scripted: the controller never reports START.
    let node = Node::new(ScriptedTwi::new());
    let err = node
        .scan_bus(&SLOT, &mut TwiEvents(&node))
        .expect_err("no start condition");
    assert!(matches!(
        err,
        NodeError::Bus(BusError::Protocol {
            phase: FailPhase::Start,
            hardware_code: status::NO_INFO,
            ..
        })
    ));
}

// ─── Time base ───────────────────────────────────────────────────────────────

#[test]
fn sampling_loop_holds_its_period() {
    let node = Node::new(ScriptedTwi::new());
    let mut cursor = PeriodCursor::new();
    let mut returned = Vec::new();

    for _ in 0..3 {
        returned.push(node.wait_period_ms(100, &mut cursor, &mut FineTicks(&node)));
    }
    assert_eq!(returned, [100, 200, 300]);
    assert_eq!(cursor.boundary(), Some(300));
}
