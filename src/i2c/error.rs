// Licensed under the Apache-2.0 license

//! Error type shared by every core operation.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// Errors reported by the I2C core and by transfer engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum I2cError {
    /// Address out of range for its addressing mode
    #[error("invalid address 0x{addr:02x} (ten-bit: {ten_bit})")]
    InvalidAddress { addr: u16, ten_bit: bool },
    /// Malformed request (empty batch, oversized message, missing name)
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Address is mid-registration, or a fixed bus number is taken
    #[error("resource busy")]
    Busy,
    /// Encoded address already owned somewhere in the mux tree
    #[error("address already in use")]
    AddressInUse,
    /// Bus-number allocator exhausted
    #[error("no bus number available")]
    NoSpace,
    /// Engine lacks the capability, or the batch violates adapter quirks
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// Adapter is marked suspended
    #[error("adapter suspended")]
    Shutdown,
    /// Arbitration lost; retried by the dispatcher
    #[error("arbitration lost")]
    ArbitrationRetry,
    /// Bus lock held while in atomic context
    #[error("operation would block")]
    WouldBlock,
    /// Lookup miss
    #[error("not found")]
    NotFound,
    /// Detection callback found no supported chip
    #[error("no such device")]
    NoDevice,
    /// A dependency is not ready yet; retry the whole operation later
    #[error("probe deferred")]
    Deferred,
    /// Target did not acknowledge
    #[error("no acknowledge ({0:?})")]
    NoAcknowledge(NoAcknowledgeSource),
    /// Any other engine-reported failure
    #[error("bus error ({0:?})")]
    Bus(ErrorKind),
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, I2cError>;

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::ArbitrationRetry => ErrorKind::ArbitrationLoss,
            Self::NoAcknowledge(source) => ErrorKind::NoAcknowledge(source),
            Self::Bus(kind) => kind,
            _ => ErrorKind::Other,
        }
    }
}

impl From<ErrorKind> for I2cError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ArbitrationLoss => Self::ArbitrationRetry,
            ErrorKind::NoAcknowledge(source) => Self::NoAcknowledge(source),
            other => Self::Bus(other),
        }
    }
}
