// Licensed under the Apache-2.0 license

//! Bus locking.
//!
//! Every adapter carries a [`BusMutex`] tagged with its mux depth. How a lock
//! request maps onto mutexes is decided by the adapter's [`LockOps`]; the
//! default policy locks the adapter's own mutex whatever the scope.

use core::cell::RefCell;
use core::marker::PhantomData;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::i2c::adapter::Adapter;

/// How much of a mux tree a lock request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Only this branch
    Segment,
    /// The whole tree up to the root adapter
    Root,
}

/// Locking policy of an adapter.
///
/// Implementations must pair every successful `lock_bus`/`trylock_bus` with
/// exactly one `unlock_bus` of the same scope. [`BusGuard`] does this for
/// callers of [`Adapter::lock_bus`].
pub trait LockOps: Send + Sync {
    fn lock_bus(&self, adapter: &Adapter, scope: LockScope);
    fn trylock_bus(&self, adapter: &Adapter, scope: LockScope) -> bool;
    fn unlock_bus(&self, adapter: &Adapter, scope: LockScope);

    /// Whether locking an adapter under this policy locks its parent instead.
    fn locks_parent(&self) -> bool {
        false
    }
}

/// Default policy: one exclusive lock per adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdapterLockOps;

impl LockOps for AdapterLockOps {
    fn lock_bus(&self, adapter: &Adapter, _scope: LockScope) {
        adapter.bus_mutex().lock();
    }

    fn trylock_bus(&self, adapter: &Adapter, _scope: LockScope) -> bool {
        adapter.bus_mutex().try_lock()
    }

    fn unlock_bus(&self, adapter: &Adapter, _scope: LockScope) {
        adapter.bus_mutex().unlock();
    }
}

std::thread_local! {
    /// Bus mutexes held by this thread: (identity, depth).
    static HELD: RefCell<Vec<(usize, u32)>> = const { RefCell::new(Vec::new()) };
}

/// Blocking, non-recursive mutex without a data guard.
///
/// Lock and unlock may happen in different calls, as required by multi-call
/// sequences under one bus lock. The depth tag is the adapter's distance from
/// its root and drives the ordering diagnostics. The owning thread is
/// recorded so a recursive lock is told apart from an entry left behind by a
/// release on another thread.
#[derive(Debug)]
pub struct BusMutex {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    nr: u32,
    depth: u32,
}

impl BusMutex {
    #[must_use]
    pub fn new(nr: u32, depth: u32) -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
            nr,
            depth,
        }
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn id(&self) -> usize {
        core::ptr::from_ref(self) as usize
    }

    /// Whether the calling thread holds this mutex.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    fn check_order(&self) {
        if self.is_held_by_current_thread() {
            log::error!("bus-{}: recursive bus lock, this thread will deadlock", self.nr);
        }
        let id = self.id();
        HELD.with(|held| {
            for &(other, depth) in held.borrow().iter() {
                if other != id && depth == self.depth {
                    log::warn!(
                        "bus-{}: bus locked while holding another bus lock at depth {}",
                        self.nr,
                        depth
                    );
                }
            }
        });
    }

    fn mark_held(&self) {
        let id = self.id();
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            // drop what a release on another thread left behind
            held.retain(|&(other, _)| other != id);
            held.push((id, self.depth));
        });
    }

    pub fn lock(&self) {
        self.check_order();
        let mut owner = self.owner.lock();
        while owner.is_some() {
            self.released.wait(&mut owner);
        }
        *owner = Some(thread::current().id());
        drop(owner);
        self.mark_held();
    }

    pub fn try_lock(&self) -> bool {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return false;
        }
        *owner = Some(thread::current().id());
        drop(owner);
        self.mark_held();
        true
    }

    /// Release the mutex. Any thread may do this.
    pub fn unlock(&self) {
        let id = self.id();
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&(other, _)| other == id) {
                held.remove(pos);
            }
        });
        *self.owner.lock() = None;
        self.released.notify_one();
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }
}

/// Proof that a bus is locked; unlocks through the adapter's policy on drop.
///
/// Not `Send`: the lock is released on the thread that took it.
#[must_use = "the bus is unlocked as soon as the guard is dropped"]
pub struct BusGuard<'a> {
    adapter: &'a Adapter,
    scope: LockScope,
    _not_send: PhantomData<*const ()>,
}

impl<'a> BusGuard<'a> {
    pub(crate) fn new(adapter: &'a Adapter, scope: LockScope) -> Self {
        Self {
            adapter,
            scope,
            _not_send: PhantomData,
        }
    }

    #[must_use]
    pub fn adapter(&self) -> &'a Adapter {
        self.adapter
    }

    #[must_use]
    pub fn scope(&self) -> LockScope {
        self.scope
    }
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.adapter.lock_ops().unlock_bus(self.adapter, self.scope);
    }
}

impl core::fmt::Debug for BusGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusGuard")
            .field("adapter", &self.adapter.name())
            .field("scope", &self.scope)
            .finish()
    }
}
