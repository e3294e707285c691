// Licensed under the Apache-2.0 license

//! Mux branches.
//!
//! A branch adapter is registered with its parent set. With
//! [`ParentLockedOps`] locking a branch locks the parent's whole tree, and
//! [`MuxChannel`] routes the branch's traffic through the parent after
//! switching the mux to the right channel.

use std::sync::Arc;

use crate::i2c::adapter::Adapter;
use crate::i2c::common::Functionality;
use crate::i2c::error::{I2cError, Result};
use crate::i2c::lock::{LockOps, LockScope};
use crate::i2c::msg::I2cMsg;
use crate::i2c::traits::Algorithm;

/// Lock policy for branches that share the parent's bus lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParentLockedOps;

impl LockOps for ParentLockedOps {
    fn lock_bus(&self, adapter: &Adapter, _scope: LockScope) {
        match adapter.parent() {
            Some(parent) => parent.lock_ops().lock_bus(&parent, LockScope::Root),
            None => adapter.bus_mutex().lock(),
        }
    }

    fn trylock_bus(&self, adapter: &Adapter, _scope: LockScope) -> bool {
        match adapter.parent() {
            Some(parent) => parent.lock_ops().trylock_bus(&parent, LockScope::Root),
            None => adapter.bus_mutex().try_lock(),
        }
    }

    fn unlock_bus(&self, adapter: &Adapter, _scope: LockScope) {
        match adapter.parent() {
            Some(parent) => parent.lock_ops().unlock_bus(&parent, LockScope::Root),
            None => adapter.bus_mutex().unlock(),
        }
    }

    fn locks_parent(&self) -> bool {
        true
    }
}

/// Switches a physical mux between its channels.
pub trait MuxSelect: Send + Sync {
    /// Route the parent bus to `chan`.
    ///
    /// # Errors
    ///
    /// Any error aborts the transfer on that channel.
    fn select(&self, parent: &Adapter, chan: u32) -> Result<()>;

    /// Release the channel after a transfer.
    ///
    /// # Errors
    ///
    /// Errors are logged only.
    fn deselect(&self, parent: &Adapter, chan: u32) -> Result<()> {
        let _ = (parent, chan);
        Ok(())
    }
}

/// Algorithm of one mux branch.
///
/// Must run under [`ParentLockedOps`], so that holding the branch lock means
/// holding the parent's.
pub struct MuxChannel<S: MuxSelect> {
    mux: Arc<S>,
    chan: u32,
}

impl<S: MuxSelect> MuxChannel<S> {
    #[must_use]
    pub fn new(mux: Arc<S>, chan: u32) -> Self {
        Self { mux, chan }
    }

    #[must_use]
    pub fn chan(&self) -> u32 {
        self.chan
    }
}

impl<S: MuxSelect> Algorithm for MuxChannel<S> {
    fn functionality(&self, adapter: &Adapter) -> Functionality {
        adapter
            .parent()
            .map_or(Functionality::empty(), |parent| parent.functionality())
    }

    fn master_xfer(&self, adapter: &Adapter, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        let parent = adapter.parent().ok_or(I2cError::NotFound)?;
        self.mux.select(&parent, self.chan)?;
        let ret = parent.raw_transfer(msgs);
        if let Err(err) = self.mux.deselect(&parent, self.chan) {
            log::warn!(
                "{}: failed to deselect channel {} ({err})",
                adapter.dev_name(),
                self.chan
            );
        }
        ret
    }
}
