// Licensed under the Apache-2.0 license

//! Transfer dispatch.
//!
//! [`Adapter::transfer`] locks the segment and runs the batch;
//! [`Adapter::transfer_locked`] runs it under a lock the caller already holds,
//! so several transfers can form one uninterrupted sequence.

use std::sync::Arc;
use std::time::Instant;

use embedded_hal::i2c::Operation;

use crate::i2c::adapter::Adapter;
use crate::i2c::client::Client;
use crate::i2c::common::ClientFlags;
use crate::i2c::error::{I2cError, Result};
use crate::i2c::lock::{BusGuard, LockScope};
use crate::i2c::msg::{I2cMsg, MsgFlags};
use crate::i2c::traits::XferCaps;

impl Adapter {
    /// Lock the segment, run `msgs`, unlock.
    ///
    /// # Returns
    ///
    /// Number of messages the engine executed.
    ///
    /// # Errors
    ///
    /// - [`I2cError::Unsupported`] if the engine has no I2C entry point or the
    ///   batch violates the adapter's quirks
    /// - [`I2cError::WouldBlock`] in atomic context when the bus is held
    /// - [`I2cError::Shutdown`] while the adapter is suspended
    /// - whatever the engine reports, after arbitration retries
    pub fn transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        if !self.algorithm().capabilities().contains(XferCaps::MASTER_XFER) {
            return Err(I2cError::Unsupported("I2C level transfers not supported"));
        }
        let guard = self.lock_for_transfer(LockScope::Segment)?;
        let ret = self.transfer_locked(&guard, msgs);
        drop(guard);
        ret
    }

    /// Run `msgs` under a bus lock taken earlier.
    ///
    /// The guard may come from this adapter or from an ancestor whose lock
    /// covers it, i.e. every branch in between locks through its parent.
    ///
    /// # Errors
    ///
    /// Same as [`Adapter::transfer`], plus [`I2cError::InvalidArgument`] if
    /// `guard` does not cover this adapter.
    pub fn transfer_locked(&self, guard: &BusGuard<'_>, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        if !self.covered_by(guard.adapter()) {
            return Err(I2cError::InvalidArgument("bus guard of another adapter"));
        }
        self.raw_transfer(msgs)
    }

    fn covered_by(&self, holder: &Adapter) -> bool {
        if core::ptr::eq(holder, self) {
            return true;
        }
        if !self.lock_ops().locks_parent() {
            return false;
        }
        let mut cur = self.parent();
        while let Some(adapter) = cur {
            if core::ptr::eq(holder, Arc::as_ptr(&adapter)) {
                return true;
            }
            if !adapter.lock_ops().locks_parent() {
                return false;
            }
            cur = adapter.parent();
        }
        false
    }

    /// Unlocked dispatch; the caller guarantees exclusive access to the bus.
    pub(crate) fn raw_transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        let caps = self.algorithm().capabilities();
        if !caps.contains(XferCaps::MASTER_XFER) {
            return Err(I2cError::Unsupported("I2C level transfers not supported"));
        }
        if msgs.is_empty() {
            return Err(I2cError::InvalidArgument("empty transfer"));
        }
        for msg in msgs.iter() {
            msg.validate()?;
        }

        if self.is_suspended() {
            if self.first_suspended_report() {
                log::warn!("{}: transfer while suspended", self.dev_name());
            }
            return Err(I2cError::Shutdown);
        }

        if let Some(quirks) = self.quirks() {
            if let Err(violation) = quirks.check(msgs) {
                if self.quirk_report_allowed() {
                    if let Some(msg) = msgs.get(violation.index) {
                        log::error!(
                            "{}: adapter quirk: {} (addr 0x{:04x}, size {}, {})",
                            self.dev_name(),
                            violation.reason,
                            msg.addr,
                            msg.len(),
                            msg.direction()
                        );
                    }
                }
                return Err(I2cError::Unsupported("adapter quirk"));
            }
        }

        let atomic = self.in_atomic() && caps.contains(XferCaps::MASTER_XFER_ATOMIC);
        let timeout = self.timeout_duration();
        let start = Instant::now();
        let mut ret = Err(I2cError::ArbitrationRetry);
        for _ in 0..=self.retries() {
            ret = if atomic {
                nb::block!(self.algorithm().master_xfer_atomic(self, msgs))
            } else {
                self.algorithm().master_xfer(self, msgs)
            };
            if ret != Err(I2cError::ArbitrationRetry) || start.elapsed() > timeout {
                break;
            }
        }
        ret
    }
}

impl Client {
    /// Single-message transfer to this client.
    ///
    /// # Returns
    ///
    /// Number of bytes moved.
    ///
    /// # Errors
    ///
    /// See [`Adapter::transfer`]; also [`I2cError::NotFound`] if the adapter
    /// is gone.
    pub fn transfer_buffer_flags(&self, op: Operation<'_>, flags: MsgFlags) -> Result<usize> {
        let adapter = self.adapter()?;
        let mut msg_flags = flags;
        if self.flags().contains(ClientFlags::TEN) {
            msg_flags |= MsgFlags::TEN;
        }
        let mut msgs = [I2cMsg {
            addr: self.addr(),
            flags: msg_flags,
            op,
        }];
        let count = msgs.first().map_or(0, I2cMsg::len);
        match adapter.transfer(&mut msgs)? {
            1 => Ok(count),
            other => Ok(other),
        }
    }

    /// Write `buf` to this client.
    ///
    /// # Errors
    ///
    /// See [`Client::transfer_buffer_flags`].
    pub fn master_send(&self, buf: &[u8]) -> Result<usize> {
        self.transfer_buffer_flags(Operation::Write(buf), MsgFlags::empty())
    }

    /// Fill `buf` from this client.
    ///
    /// # Errors
    ///
    /// See [`Client::transfer_buffer_flags`].
    pub fn master_recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.transfer_buffer_flags(Operation::Read(buf), MsgFlags::empty())
    }
}
