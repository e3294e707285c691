// Licensed under the Apache-2.0 license

//! Bus segments.
//!
//! An [`Adapter`] is created by [`crate::i2c::I2cCore::add_adapter`] from an
//! [`AdapterBuilder`]. Adapters may hang below another adapter (mux
//! branches); the parent link is a weak reference so ownership only flows
//! from parent to child.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use fugit::MillisDurationU32;
use parking_lot::Mutex;

use crate::i2c::address::AddressSpace;
use crate::i2c::client::Client;
use crate::i2c::common::{ClassFlags, Functionality, I2cSpeed};
use crate::i2c::error::{I2cError, Result};
use crate::i2c::firmware::FirmwareNode;
use crate::i2c::lock::{AdapterLockOps, BusGuard, BusMutex, LockOps, LockScope};
use crate::i2c::quirks::AdapterQuirks;
use crate::i2c::traits::Algorithm;

/// Timeout applied when the builder leaves it unset.
pub const DEFAULT_TIMEOUT: MillisDurationU32 = MillisDurationU32::from_ticks(1000);

const QUIRK_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration of an adapter about to be registered.
pub struct AdapterBuilder {
    pub(crate) name: String,
    pub(crate) algo: Box<dyn Algorithm>,
    pub(crate) nr: Option<u32>,
    pub(crate) parent: Option<Arc<Adapter>>,
    class: ClassFlags,
    retries: u32,
    timeout: Option<MillisDurationU32>,
    quirks: Option<AdapterQuirks>,
    lock_ops: Option<Arc<dyn LockOps>>,
    fw_node: Option<Arc<dyn FirmwareNode>>,
    speed: Option<I2cSpeed>,
}

impl AdapterBuilder {
    #[must_use]
    pub fn new(name: &str, algo: impl Algorithm + 'static) -> Self {
        Self {
            name: name.to_owned(),
            algo: Box::new(algo),
            nr: None,
            parent: None,
            class: ClassFlags::empty(),
            retries: 0,
            timeout: None,
            quirks: None,
            lock_ops: None,
            fw_node: None,
            speed: None,
        }
    }

    /// Request a fixed bus number instead of a dynamic one.
    #[must_use]
    pub fn nr(mut self, nr: u32) -> Self {
        self.nr = Some(nr);
        self
    }

    /// Hang this adapter below `parent` as a mux branch.
    #[must_use]
    pub fn parent(mut self, parent: &Arc<Adapter>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    #[must_use]
    pub fn class(mut self, class: ClassFlags) -> Self {
        self.class = class;
        self
    }

    /// Extra attempts after an arbitration loss
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn quirks(mut self, quirks: AdapterQuirks) -> Self {
        self.quirks = Some(quirks);
        self
    }

    #[must_use]
    pub fn lock_ops(mut self, ops: Arc<dyn LockOps>) -> Self {
        self.lock_ops = Some(ops);
        self
    }

    #[must_use]
    pub fn fw_node(mut self, node: Arc<dyn FirmwareNode>) -> Self {
        self.fw_node = Some(node);
        self
    }

    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = Some(speed);
        self
    }

    pub(crate) fn build(self, nr: u32, atomic: Arc<AtomicBool>) -> Adapter {
        let depth = self.parent.as_ref().map_or(0, |p| adapter_depth(p) + 1);
        Adapter {
            nr,
            name: self.name,
            dev_name: format!("bus-{nr}"),
            algo: self.algo,
            lock_ops: self.lock_ops.unwrap_or_else(|| Arc::new(AdapterLockOps)),
            bus_mutex: BusMutex::new(nr, depth),
            quirks: self.quirks,
            class: self.class,
            retries: self.retries,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            speed: self.speed,
            parent: self.parent.as_ref().map(Arc::downgrade),
            depth,
            fw_node: self.fw_node,
            addrs: AddressSpace::new(),
            children: Mutex::new(Vec::new()),
            userspace_clients: Mutex::new(Vec::new()),
            suspended: AtomicBool::new(false),
            suspend_reported: AtomicBool::new(false),
            atomic,
            registered: AtomicBool::new(true),
            last_quirk_report: Mutex::new(None),
        }
    }
}

/// A direct child of an adapter.
#[derive(Clone)]
pub enum Child {
    Client(Arc<Client>),
    Adapter(Arc<Adapter>),
}

/// A registered bus segment.
pub struct Adapter {
    nr: u32,
    name: String,
    dev_name: String,
    algo: Box<dyn Algorithm>,
    lock_ops: Arc<dyn LockOps>,
    bus_mutex: BusMutex,
    quirks: Option<AdapterQuirks>,
    class: ClassFlags,
    retries: u32,
    timeout: MillisDurationU32,
    speed: Option<I2cSpeed>,
    parent: Option<Weak<Adapter>>,
    depth: u32,
    fw_node: Option<Arc<dyn FirmwareNode>>,
    addrs: AddressSpace,
    children: Mutex<Vec<Child>>,
    userspace_clients: Mutex<Vec<Arc<Client>>>,
    suspended: AtomicBool,
    suspend_reported: AtomicBool,
    atomic: Arc<AtomicBool>,
    registered: AtomicBool,
    last_quirk_report: Mutex<Option<Instant>>,
}

/// Number of mux levels between `adapter` and its root.
#[must_use]
pub fn adapter_depth(adapter: &Adapter) -> u32 {
    let mut depth = 0;
    let mut cur = adapter.parent();
    while let Some(parent) = cur {
        depth += 1;
        cur = parent.parent();
    }
    depth
}

impl Adapter {
    /// Start configuring a new adapter.
    #[must_use]
    pub fn builder(name: &str, algo: impl Algorithm + 'static) -> AdapterBuilder {
        AdapterBuilder::new(name, algo)
    }

    #[must_use]
    pub fn nr(&self) -> u32 {
        self.nr
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace name, `bus-{nr}`
    #[must_use]
    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    #[must_use]
    pub fn algorithm(&self) -> &dyn Algorithm {
        self.algo.as_ref()
    }

    #[must_use]
    pub fn functionality(&self) -> Functionality {
        self.algo.functionality(self)
    }

    #[must_use]
    pub fn check_functionality(&self, func: Functionality) -> bool {
        self.functionality().contains(func)
    }

    #[must_use]
    pub fn quirks(&self) -> Option<&AdapterQuirks> {
        self.quirks.as_ref()
    }

    #[must_use]
    pub fn class(&self) -> ClassFlags {
        self.class
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn timeout(&self) -> MillisDurationU32 {
        self.timeout
    }

    pub(crate) fn timeout_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout.to_millis()))
    }

    #[must_use]
    pub fn speed(&self) -> Option<I2cSpeed> {
        self.speed
    }

    #[must_use]
    pub fn fw_node(&self) -> Option<&Arc<dyn FirmwareNode>> {
        self.fw_node.as_ref()
    }

    /// Parent adapter when this is a mux branch.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Adapter>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Topmost ancestor, or this adapter itself.
    #[must_use]
    pub fn root(self: &Arc<Self>) -> Arc<Adapter> {
        let mut cur = Arc::clone(self);
        while let Some(parent) = cur.parent() {
            cur = parent;
        }
        cur
    }

    /// Mux nesting depth recorded at registration
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn address_space(&self) -> &AddressSpace {
        &self.addrs
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn mark_unregistered(&self) {
        self.registered.store(false, Ordering::Release);
    }

    pub(crate) fn in_atomic(&self) -> bool {
        self.atomic.load(Ordering::Acquire)
    }

    // ---- locking ----

    #[must_use]
    pub fn lock_ops(&self) -> &dyn LockOps {
        self.lock_ops.as_ref()
    }

    #[must_use]
    pub fn bus_mutex(&self) -> &BusMutex {
        &self.bus_mutex
    }

    /// Take exclusive access to the bus, blocking.
    pub fn lock_bus(&self, scope: LockScope) -> BusGuard<'_> {
        self.lock_ops.lock_bus(self, scope);
        BusGuard::new(self, scope)
    }

    /// Take exclusive access to the bus if it is free.
    #[must_use]
    pub fn try_lock_bus(&self, scope: LockScope) -> Option<BusGuard<'_>> {
        self.lock_ops
            .trylock_bus(self, scope)
            .then(|| BusGuard::new(self, scope))
    }

    /// Lock for a transfer: blocking normally, a single attempt in atomic context.
    pub(crate) fn lock_for_transfer(&self, scope: LockScope) -> Result<BusGuard<'_>> {
        if self.in_atomic() {
            self.try_lock_bus(scope).ok_or(I2cError::WouldBlock)
        } else {
            Ok(self.lock_bus(scope))
        }
    }

    // ---- suspend ----

    /// Reject further transfers until [`Adapter::mark_resumed`].
    pub fn mark_suspended(&self) {
        let _guard = self.lock_bus(LockScope::Root);
        self.suspended.store(true, Ordering::Release);
    }

    pub fn mark_resumed(&self) {
        let _guard = self.lock_bus(LockScope::Root);
        self.suspended.store(false, Ordering::Release);
        self.suspend_reported.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// True exactly once per suspension.
    pub(crate) fn first_suspended_report(&self) -> bool {
        !self.suspend_reported.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn quirk_report_allowed(&self) -> bool {
        let mut last = self.last_quirk_report.lock();
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < QUIRK_REPORT_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    // ---- children ----

    /// Snapshot of the direct children.
    #[must_use]
    pub fn children(&self) -> Vec<Child> {
        self.children.lock().clone()
    }

    /// Snapshot of the clients directly on this segment.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.children
            .lock()
            .iter()
            .filter_map(|child| match child {
                Child::Client(client) => Some(Arc::clone(client)),
                Child::Adapter(_) => None,
            })
            .collect()
    }

    /// Snapshot of the mux branches directly below this adapter.
    #[must_use]
    pub fn child_adapters(&self) -> Vec<Arc<Adapter>> {
        self.children
            .lock()
            .iter()
            .filter_map(|child| match child {
                Child::Adapter(adapter) => Some(Arc::clone(adapter)),
                Child::Client(_) => None,
            })
            .collect()
    }

    pub(crate) fn add_child(&self, child: Child) {
        self.children.lock().push(child);
    }

    pub(crate) fn remove_client(&self, client: &Arc<Client>) {
        self.children.lock().retain(|child| match child {
            Child::Client(c) => !Arc::ptr_eq(c, client),
            Child::Adapter(_) => true,
        });
        self.userspace_clients
            .lock()
            .retain(|c| !Arc::ptr_eq(c, client));
    }

    pub(crate) fn remove_child_adapter(&self, adapter: &Adapter) {
        self.children.lock().retain(|child| match child {
            Child::Adapter(a) => !core::ptr::eq(Arc::as_ptr(a), adapter),
            Child::Client(_) => true,
        });
    }

    pub(crate) fn add_userspace_client(&self, client: Arc<Client>) {
        self.userspace_clients.lock().push(client);
    }

    pub(crate) fn take_userspace_client(&self, encoded: u16) -> Option<Arc<Client>> {
        let mut list = self.userspace_clients.lock();
        let pos = list.iter().position(|c| c.encoded_addr() == encoded)?;
        Some(list.remove(pos))
    }

    pub(crate) fn drain_userspace_clients(&self) -> Vec<Arc<Client>> {
        core::mem::take(&mut *self.userspace_clients.lock())
    }

    #[must_use]
    pub fn userspace_clients(&self) -> Vec<Arc<Client>> {
        self.userspace_clients.lock().clone()
    }

    // ---- busy checks ----

    fn has_client_at(&self, encoded: u16) -> bool {
        self.children.lock().iter().any(|child| match child {
            Child::Client(client) => client.encoded_addr() == encoded,
            Child::Adapter(_) => false,
        })
    }

    /// Clients sitting directly on any ancestor segment.
    fn check_mux_parents(&self, encoded: u16) -> bool {
        let mut cur = self.parent();
        while let Some(parent) = cur {
            if parent.has_client_at(encoded) {
                return true;
            }
            cur = parent.parent();
        }
        false
    }

    /// Clients on this segment and on every branch below it.
    fn check_mux_children(&self, encoded: u16) -> bool {
        let mut pending = Vec::new();
        for child in self.children.lock().iter() {
            match child {
                Child::Client(client) if client.encoded_addr() == encoded => return true,
                Child::Client(_) => {}
                Child::Adapter(adapter) => pending.push(Arc::clone(adapter)),
            }
        }
        while let Some(adapter) = pending.pop() {
            for child in adapter.children.lock().iter() {
                match child {
                    Child::Client(client) if client.encoded_addr() == encoded => return true,
                    Child::Client(_) => {}
                    Child::Adapter(branch) => pending.push(Arc::clone(branch)),
                }
            }
        }
        false
    }

    /// Whether `encoded` is owned anywhere it would be electrically visible
    /// from this segment: ancestor segments first, then this subtree.
    #[must_use]
    pub fn is_address_busy(&self, encoded: u16) -> bool {
        self.check_mux_parents(encoded) || self.check_mux_children(encoded)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("nr", &self.nr)
            .field("name", &self.name)
            .field("class", &self.class)
            .field("retries", &self.retries)
            .field("timeout_ms", &self.timeout.to_millis())
            .field("depth", &self.depth)
            .field("suspended", &self.is_suspended())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(client) => f.debug_tuple("Client").field(&client.dev_name()).finish(),
            Self::Adapter(adapter) => f.debug_tuple("Adapter").field(&adapter.dev_name()).finish(),
        }
    }
}
