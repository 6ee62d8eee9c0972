//! The node: one bus engine, one clock, and their interrupt entry points.
//!
//! A board crate owns a `static` [`Node`] and forwards its three interrupt
//! vectors to it:
//!
//! ```ignore
//! static NODE: Node<Avr1284Twi> = Node::new(Avr1284Twi::new());
//!
//! #[interrupt]
//! fn TWI() {
//!     NODE.on_twi_interrupt();
//! }
//!
//! #[interrupt]
//! fn TIMER3_COMPA() {
//!     NODE.on_tick_1024hz();
//! }
//!
//! #[interrupt]
//! fn PCINT0() {
//!     if rtc_int_is_low() {
//!         NODE.on_tick_1hz();
//!     }
//! }
//! ```

use embedded_hal::delay::DelayNs;
use platform::TwiController;
use thiserror_no_std::Error;
use timebase::{wait_period_ms, ClockBase, PeriodCursor, SchedulerError, TableId};
use twi::{registers, BusEngine, BusError, TransactionSlot};

use crate::lifesign::{self, LIFESIGN};

/// Errors raised while bringing the node up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeError {
    /// No room left for a periodic callback.
    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
    /// A bus operation failed.
    #[error("bus: {0}")]
    Bus(#[from] BusError),
}

/// Bus engine and time base of one sensor node.
pub struct Node<C> {
    bus: BusEngine<C>,
    clock: ClockBase,
}

impl<C: TwiController> Node<C> {
    /// A node with an idle bus and the clock at zero. Call [`init`](Self::init)
    /// before enabling interrupts.
    pub const fn new(controller: C) -> Self {
        Self {
            bus: BusEngine::new(controller),
            clock: ClockBase::new(),
        }
    }

    /// Start the clock at `epoch_s` and register the lifesign heartbeat on
    /// the slow table. Safe to call again; the heartbeat is registered once.
    ///
    /// # Errors
    ///
    /// [`NodeError::Scheduler`] if the slow table is full.
    pub fn init(&self, epoch_s: u32) -> Result<(), NodeError> {
        self.clock.init(epoch_s);
        LIFESIGN.reset();
        self.clock.unregister(TableId::Slow, lifesign::on_second);
        self.clock.register(TableId::Slow, lifesign::on_second, 0)?;
        platform::log_info!("node: up at epoch {} s", epoch_s);
        Ok(())
    }

    /// Probe every address on the bus. Bit `n` of the result is set when a
    /// device answered at address `n`.
    ///
    /// # Errors
    ///
    /// [`NodeError::Bus`] if the bus itself is not working.
    pub fn scan_bus(
        &self,
        slot: &'static TransactionSlot,
        delay: &mut impl DelayNs,
    ) -> Result<u128, NodeError> {
        Ok(registers::scan(&self.bus, slot, delay)?)
    }

    /// Idle-wait for the next `period_ms` boundary on the node clock.
    pub fn wait_period_ms(
        &self,
        period_ms: u16,
        cursor: &mut PeriodCursor,
        delay: &mut impl DelayNs,
    ) -> u32 {
        wait_period_ms(&self.clock, period_ms, cursor, delay)
    }

    /// TWI controller interrupt.
    pub fn on_twi_interrupt(&self) {
        self.bus.on_interrupt();
    }

    /// 1024 Hz timer interrupt.
    pub fn on_tick_1024hz(&self) {
        self.clock.on_fine_tick();
    }

    /// RTC once-per-second interrupt.
    pub fn on_tick_1hz(&self) {
        self.clock.on_coarse_tick();
    }

    /// The bus engine.
    pub fn bus(&self) -> &BusEngine<C> {
        &self.bus
    }

    /// The time base.
    pub fn clock(&self) -> &ClockBase {
        &self.clock
    }
}
