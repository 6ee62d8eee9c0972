//! Mock implementations for testing
//!
//! [`ScriptedTwi`] stands in for the TWI controller on the host. Tests queue
//! the status codes the "hardware" will report and the bytes it will receive,
//! deliver interrupts by calling the engine's interrupt entry point, and
//! afterwards inspect the [`BusAction`] log to see what the engine drove onto
//! the bus.

#![cfg(any(test, feature = "std"))]

use heapless::{Deque, Vec};

use crate::peripheral::{status, TwiController};

/// Capacity of the scripted status and receive queues.
pub const SCRIPT_CAPACITY: usize = 64;

/// Capacity of the recorded action log.
pub const ACTION_LOG_CAPACITY: usize = 128;

/// One hardware action issued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    /// START or repeated START.
    Start,
    /// Address byte, R/W bit included.
    Address(u8),
    /// Data byte transmitted.
    Send(u8),
    /// Receive requested; `true` when the byte is to be ACKed.
    Receive(bool),
    /// STOP.
    Stop,
}

/// Scripted TWI controller.
///
/// `status()` pops the next scripted code and reports
/// [`status::NO_INFO`] once the script runs dry, which the engine treats as a
/// protocol failure. `read_data()` pops the next scripted receive byte and
/// reports `0xFF` (an idle, pulled-up bus) when none is left.
pub struct ScriptedTwi {
    codes: Deque<u8, SCRIPT_CAPACITY>,
    rx: Deque<u8, SCRIPT_CAPACITY>,
    actions: Vec<BusAction, ACTION_LOG_CAPACITY>,
}

impl ScriptedTwi {
    /// Create a controller with an empty script.
    pub const fn new() -> Self {
        Self {
            codes: Deque::new(),
            rx: Deque::new(),
            actions: Vec::new(),
        }
    }

    /// Queue status codes, reported one per hardware event.
    pub fn script(&mut self, codes: &[u8]) {
        for &code in codes {
            let _ = self.codes.push_back(code);
        }
    }

    /// Queue bytes the bus will deliver on receive events.
    pub fn receive(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let _ = self.rx.push_back(byte);
        }
    }

    /// Script a clean write of `len` data bytes: start, address ack, data acks.
    pub fn script_write(&mut self, len: usize, repeated_start: bool) {
        self.script(&[start_code(repeated_start), status::ADDRESS_WRITE_ACK]);
        for _ in 0..len {
            self.script(&[status::DATA_WRITE_ACK]);
        }
    }

    /// Script a clean read of `bytes`: start, address ack, one receive event
    /// per byte (ACK on all but the last).
    pub fn script_read(&mut self, bytes: &[u8], repeated_start: bool) {
        self.script(&[start_code(repeated_start), status::ADDRESS_READ_ACK]);
        let last = bytes.len().saturating_sub(1);
        for (i, _) in bytes.iter().enumerate() {
            let code = if i == last {
                status::DATA_READ_NACK
            } else {
                status::DATA_READ_ACK
            };
            self.script(&[code]);
        }
        self.receive(bytes);
    }

    /// Everything the engine has driven onto the bus so far.
    pub fn actions(&self) -> &[BusAction] {
        &self.actions
    }

    /// Forget the recorded actions.
    pub fn clear_actions(&mut self) {
        self.actions.clear();
    }

    /// Scripted status codes not yet consumed.
    pub fn pending_codes(&self) -> usize {
        self.codes.len()
    }

    fn record(&mut self, action: BusAction) {
        let _ = self.actions.push(action);
    }
}

impl Default for ScriptedTwi {
    fn default() -> Self {
        Self::new()
    }
}

const fn start_code(repeated: bool) -> u8 {
    if repeated {
        status::REPEATED_START
    } else {
        status::START
    }
}

impl TwiController for ScriptedTwi {
    fn status(&mut self) -> u8 {
        self.codes.pop_front().map_or(status::NO_INFO, status::masked)
    }

    fn send_start(&mut self) {
        self.record(BusAction::Start);
    }

    fn send_address(&mut self, address_byte: u8) {
        self.record(BusAction::Address(address_byte));
    }

    fn send_byte(&mut self, byte: u8) {
        self.record(BusAction::Send(byte));
    }

    fn receive_byte(&mut self, ack: bool) {
        self.record(BusAction::Receive(ack));
    }

    fn read_data(&mut self) -> u8 {
        self.rx.pop_front().unwrap_or(0xFF)
    }

    fn send_stop(&mut self) {
        self.record(BusAction::Stop);
    }
}
