// Licensed under the Apache-2.0 license

//! The message unit handed to transfer engines.

use embedded_hal::i2c::Operation;

use crate::i2c::common::I2C_MSG_MAX_LEN;
use crate::i2c::error::{I2cError, Result};

bitflags::bitflags! {
    /// Per-message modifiers. Direction is carried by the operation itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u16 {
        /// Target uses a ten-bit address
        const TEN = 0x0010;
        /// First received byte is the length of the rest
        const RECV_LEN = 0x0400;
        /// Treat NAK from the target as ACK
        const IGNORE_NAK = 0x1000;
        /// Skip the (repeated) START for this message
        const NOSTART = 0x4000;
        /// Force a STOP after this message
        const STOP = 0x8000;
    }
}

/// One segment of a transfer: target address, modifiers and a buffer.
///
/// Every message begins with a START; the batch ends with a single STOP.
#[derive(Debug)]
pub struct I2cMsg<'a> {
    pub addr: u16,
    pub flags: MsgFlags,
    pub op: Operation<'a>,
}

impl<'a> I2cMsg<'a> {
    #[must_use]
    pub fn read(addr: u16, buf: &'a mut [u8]) -> Self {
        Self {
            addr,
            flags: MsgFlags::empty(),
            op: Operation::Read(buf),
        }
    }

    #[must_use]
    pub fn write(addr: u16, buf: &'a [u8]) -> Self {
        Self {
            addr,
            flags: MsgFlags::empty(),
            op: Operation::Write(buf),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: MsgFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self.op, Operation::Read(_))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &self.op {
            Operation::Read(buf) => buf.len(),
            Operation::Write(buf) => buf.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject buffers longer than a message length field can describe.
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::InvalidArgument`] for oversized buffers.
    pub fn validate(&self) -> Result<()> {
        if self.len() > I2C_MSG_MAX_LEN {
            return Err(I2cError::InvalidArgument("message longer than 65535 bytes"));
        }
        Ok(())
    }

    pub(crate) fn direction(&self) -> &'static str {
        if self.is_read() {
            "read"
        } else {
            "write"
        }
    }
}
