//! Two-wire (TWI/I²C) controller abstraction
//!
//! The bus engine never touches registers. It drives the controller through
//! [`TwiController`], one hardware action per call, and reads the controller's
//! status code once per hardware event. On the target the implementation is a
//! thin wrapper over TWCR/TWDR/TWSR; on the host it is
//! [`ScriptedTwi`](crate::mocks::ScriptedTwi).

/// Transfer direction, encoded as the R/W bit that follows the 7-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Controller transmits data bytes (R/W bit = 0).
    #[default]
    Write,
    /// Controller receives data bytes (R/W bit = 1).
    Read,
}

impl Direction {
    /// The R/W bit as transmitted on the wire.
    pub const fn bit(self) -> u8 {
        match self {
            Self::Write => 0,
            Self::Read => 1,
        }
    }

    /// Address byte for `address` in this direction: `(address << 1) | rw`.
    ///
    /// The top bit of `address` is discarded; callers validate the 7-bit range.
    pub const fn address_byte(self, address: u8) -> u8 {
        address.wrapping_shl(1) | self.bit()
    }
}

/// Controller status codes (TWSR with the prescaler bits masked off).
///
/// Codes are only meaningful right after a hardware event; the engine reads
/// exactly one per event.
pub mod status {
    /// Mask applied to the raw status register before comparison.
    pub const MASK: u8 = 0xF8;

    /// Illegal START or STOP seen on the bus.
    pub const BUS_ERROR: u8 = 0x00;
    /// START condition transmitted.
    pub const START: u8 = 0x08;
    /// Repeated START condition transmitted.
    pub const REPEATED_START: u8 = 0x10;
    /// SLA+W transmitted, ACK received.
    pub const ADDRESS_WRITE_ACK: u8 = 0x18;
    /// SLA+W transmitted, NACK received.
    pub const ADDRESS_WRITE_NACK: u8 = 0x20;
    /// Data byte transmitted, ACK received.
    pub const DATA_WRITE_ACK: u8 = 0x28;
    /// Data byte transmitted, NACK received.
    pub const DATA_WRITE_NACK: u8 = 0x30;
    /// Arbitration lost during SLA+R/W or data.
    pub const ARBITRATION_LOST: u8 = 0x38;
    /// SLA+R transmitted, ACK received.
    pub const ADDRESS_READ_ACK: u8 = 0x40;
    /// SLA+R transmitted, NACK received.
    pub const ADDRESS_READ_NACK: u8 = 0x48;
    /// Data byte received, ACK returned.
    pub const DATA_READ_ACK: u8 = 0x50;
    /// Data byte received, NACK returned.
    pub const DATA_READ_NACK: u8 = 0x58;
    /// No relevant state information; TWINT not set.
    pub const NO_INFO: u8 = 0xF8;

    /// Drop the prescaler bits from a raw TWSR value.
    pub const fn masked(raw: u8) -> u8 {
        raw & MASK
    }

    /// Short human-readable name for a status code, for log output.
    pub const fn describe(code: u8) -> &'static str {
        match masked(code) {
            BUS_ERROR => "bus error",
            START => "start",
            REPEATED_START => "repeated start",
            ADDRESS_WRITE_ACK => "SLA+W ack",
            ADDRESS_WRITE_NACK => "SLA+W nack",
            DATA_WRITE_ACK => "data tx ack",
            DATA_WRITE_NACK => "data tx nack",
            ARBITRATION_LOST => "arbitration lost",
            ADDRESS_READ_ACK => "SLA+R ack",
            ADDRESS_READ_NACK => "SLA+R nack",
            DATA_READ_ACK => "data rx ack",
            DATA_READ_NACK => "data rx nack",
            NO_INFO => "no info",
            _ => "unknown",
        }
    }
}

/// Register-level TWI controller.
///
/// Every `send_*`/`receive_byte` call starts exactly one hardware action and
/// arms the completion interrupt, except [`send_stop`](Self::send_stop), which
/// completes without an interrupt. Implementations must not block.
pub trait TwiController {
    /// Status of the last completed hardware action, masked with
    /// [`status::MASK`].
    fn status(&mut self) -> u8;

    /// Issue a START (or repeated START if the bus is still held).
    fn send_start(&mut self);

    /// Transmit the address byte `(address << 1) | rw`.
    fn send_address(&mut self, address_byte: u8);

    /// Transmit one data byte.
    fn send_byte(&mut self, byte: u8);

    /// Clock in one data byte, answering ACK when `ack` is set and NACK
    /// otherwise. The byte is available from [`read_data`](Self::read_data)
    /// after the next event.
    fn receive_byte(&mut self, ack: bool);

    /// The data register after a receive event.
    fn read_data(&mut self) -> u8;

    /// Issue a STOP and release the bus. No interrupt follows.
    fn send_stop(&mut self);
}
