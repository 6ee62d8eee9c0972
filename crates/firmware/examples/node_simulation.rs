//! Host simulation of a sensor node
//!
//! Boots a node on the scripted controller, then runs a 4 Hz sampling loop
//! for a few simulated seconds. Each period reads one register over the bus.
//! The delay loop stands in for the interrupt sources: timer ticks and TWI
//! events arrive while the loop idles.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p firmware --example node_simulation --features simulation
//! ```
#![allow(clippy::arithmetic_side_effects)]

use std::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use firmware::{Node, NodeError, LIFESIGN};
use platform::mocks::ScriptedTwi;
use timebase::PeriodCursor;
use tracing_subscriber::EnvFilter;
use twi::registers::read_regs;
use twi::TransactionSlot;

/// Simulated run length.
const SECONDS: u32 = 3;

/// Sampling period.
const PERIOD_MS: u16 = 250;

/// Fuel gauge on the node's bus, and its accumulated-charge register.
const GAUGE_ADDRESS: u8 = 0x64;
const CHARGE_REGISTER: u8 = 0x02;

static SELECT_AND_READ: [TransactionSlot; 2] = [TransactionSlot::NEW; 2];

struct ConsoleLed;

impl ErrorType for ConsoleLed {
    type Error = Infallible;
}

impl OutputPin for ConsoleLed {
    fn set_low(&mut self) -> Result<(), Infallible> {
        tracing::debug!("lifesign off");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        tracing::info!("lifesign on");
        Ok(())
    }
}

/// Simulated passage of time: each poll delivers a TWI event and one fine
/// tick, and every 1024 fine ticks the RTC second.
struct SimulatedTime<'a> {
    node: &'a Node<ScriptedTwi>,
    fine: u32,
}

impl DelayNs for SimulatedTime<'_> {
    fn delay_ns(&mut self, _ns: u32) {
        self.node.on_twi_interrupt();
        self.node.on_tick_1024hz();
        self.fine += 1;
        if self.fine % 1024 == 0 {
            self.node.on_tick_1hz();
        }
    }
}

fn main() -> Result<(), NodeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let node = Node::new(ScriptedTwi::new());
    LIFESIGN.attach(Box::leak(Box::new(ConsoleLed)));
    node.init(0)?;

    let mut time = SimulatedTime { node: &node, fine: 0 };
    let mut cursor = PeriodCursor::new();
    let mut charge: u16 = 0x7FFF;

    let samples = SECONDS * 1000 / u32::from(PERIOD_MS);
    for _ in 0..samples {
        let now = node.wait_period_ms(PERIOD_MS, &mut cursor, &mut time);

        charge = charge.wrapping_sub(3);
        node.bus().with_controller(|twi| {
            twi.clear_actions();
            twi.script_write(1, false);
            twi.script_read(&charge.to_be_bytes(), true);
        });

        let mut raw = [0u8; 2];
        match read_regs(
            node.bus(),
            &SELECT_AND_READ,
            GAUGE_ADDRESS,
            CHARGE_REGISTER,
            &mut raw,
            &mut time,
        ) {
            Ok(()) => tracing::info!(
                t_ms = now,
                charge = u16::from_be_bytes(raw),
                "sample"
            ),
            Err(e) => tracing::warn!(t_ms = now, error = %e, "sample failed"),
        }
    }

    tracing::info!(
        uptime_ms = node.clock().now_ms(),
        twi_events = node.bus().events(),
        heartbeat_s = LIFESIGN.seconds(),
        "simulation finished"
    );
    Ok(())
}
