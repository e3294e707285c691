// Licensed under the Apache-2.0 license

//! The registry object.
//!
//! [`I2cCore`] owns the bus-number map, the board-info declarations and the
//! driver list. Nothing is global: every test or system builds its own core
//! and hands it to whoever registers adapters, clients or drivers.

use core::any::Any;
use core::ops::ControlFlow;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::i2c::adapter::{Adapter, AdapterBuilder, Child};
use crate::i2c::board_info::BoardInfoRegistry;
use crate::i2c::client::{Client, ClientOrigin, I2cBoardInfo};
use crate::i2c::driver::{DriverEntry, DummyDriver};
use crate::i2c::error::{I2cError, Result};
use crate::i2c::firmware::{board_info_from_node, FirmwareNode};

/// Process-wide I2C state: adapters, declared devices and drivers.
pub struct I2cCore {
    adapters: Mutex<BTreeMap<u32, Arc<Adapter>>>,
    board_info: BoardInfoRegistry,
    pub(crate) drivers: RwLock<Vec<Arc<DriverEntry>>>,
    atomic: Arc<AtomicBool>,
}

impl Default for I2cCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest unused number at or above `start`.
fn first_free_nr(map: &BTreeMap<u32, Arc<Adapter>>, start: u32) -> Option<u32> {
    let mut candidate = start;
    for &nr in map.range(start..).map(|(nr, _)| nr) {
        if nr != candidate {
            break;
        }
        candidate = candidate.checked_add(1)?;
    }
    Some(candidate)
}

impl I2cCore {
    /// Empty registry with the placeholder driver for dummy clients.
    #[must_use]
    pub fn new() -> Self {
        let dummy: Arc<dyn crate::i2c::traits::I2cDriver> = Arc::new(DummyDriver);
        Self {
            adapters: Mutex::new(BTreeMap::new()),
            board_info: BoardInfoRegistry::new(),
            drivers: RwLock::new(vec![Arc::new(DriverEntry::new(dummy))]),
            atomic: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn board_info(&self) -> &BoardInfoRegistry {
        &self.board_info
    }

    /// Declare devices for a bus that may not exist yet.
    pub fn register_board_info(&self, busnum: u32, infos: &[I2cBoardInfo]) {
        self.board_info.register(busnum, infos);
    }

    /// Enter or leave atomic context (late shutdown): transfers stop
    /// sleeping on the bus lock and prefer the engines' polled entry points.
    pub fn set_atomic(&self, atomic: bool) {
        self.atomic.store(atomic, Ordering::Release);
    }

    #[must_use]
    pub fn is_atomic(&self) -> bool {
        self.atomic.load(Ordering::Acquire)
    }

    // ---- adapter lifecycle ----

    /// Register an adapter under a fixed or dynamic bus number.
    ///
    /// After publication the adapter's declared devices are instantiated:
    /// board-info entries for its number, then children of its firmware
    /// node, then whatever registered drivers detect on it. Failures there
    /// are logged and do not undo the registration.
    ///
    /// # Errors
    ///
    /// - [`I2cError::InvalidArgument`] for an empty name or an unregistered parent
    /// - [`I2cError::Busy`] if the requested number is taken
    /// - [`I2cError::NoSpace`] if no dynamic number is left
    pub fn add_adapter(&self, builder: AdapterBuilder) -> Result<Arc<Adapter>> {
        if builder.name.is_empty() {
            log::error!("i2c-core: attempt to register an adapter without a name");
            return Err(I2cError::InvalidArgument("adapter has no name"));
        }
        if builder.parent.as_ref().is_some_and(|p| !p.is_registered()) {
            return Err(I2cError::InvalidArgument("parent adapter is not registered"));
        }

        let fixed = builder.nr.is_some();
        let adapter = {
            let mut map = self.adapters.lock();
            let nr = match builder.nr {
                Some(nr) if map.contains_key(&nr) => {
                    log::error!("i2c-core: bus number {nr} already in use");
                    return Err(I2cError::Busy);
                }
                Some(nr) => nr,
                None => first_free_nr(&map, self.board_info.first_dynamic_bus_num())
                    .ok_or(I2cError::NoSpace)?,
            };
            let parent = builder.parent.clone();
            let adapter = Arc::new(builder.build(nr, Arc::clone(&self.atomic)));
            map.insert(nr, Arc::clone(&adapter));
            if let Some(parent) = parent {
                parent.add_child(Child::Adapter(Arc::clone(&adapter)));
            }
            adapter
        };
        // only buses below the watermark can have declared devices
        let declared = adapter.nr() < self.board_info.first_dynamic_bus_num();
        if fixed {
            self.board_info.reserve(adapter.nr());
        }
        log::debug!("{}: adapter [{}] registered", adapter.dev_name(), adapter.name());

        if declared {
            self.scan_static_board_info(&adapter);
        }
        self.register_fw_children(&adapter);
        for entry in self.drivers_snapshot() {
            if let Err(err) = self.detect(&adapter, &entry) {
                log::debug!(
                    "{}: detection by {} stopped ({err})",
                    adapter.dev_name(),
                    entry.driver.name()
                );
            }
        }
        Ok(adapter)
    }

    fn scan_static_board_info(&self, adapter: &Arc<Adapter>) {
        for info in self.board_info.entries_for(adapter.nr()) {
            if let Err(err) = self.instantiate(adapter, &info, ClientOrigin::BoardInfo) {
                log::error!(
                    "{}: can't create device at 0x{:02x} ({err})",
                    adapter.dev_name(),
                    info.addr
                );
            }
        }
    }

    fn register_fw_children(&self, adapter: &Arc<Adapter>) {
        let Some(node) = adapter.fw_node().cloned() else {
            return;
        };
        for child in node.children() {
            if !child.is_available() || child.test_and_set_populated() {
                continue;
            }
            let created = board_info_from_node(&child)
                .and_then(|info| self.instantiate(adapter, &info, ClientOrigin::Firmware));
            if let Err(err) = created {
                log::error!(
                    "{}: failed to create I2C device for {} ({err})",
                    adapter.dev_name(),
                    child.name()
                );
                child.clear_populated();
            }
        }
    }

    /// Unregister an adapter and everything below it.
    ///
    /// Detected and user-created clients go first, then mux branches, then
    /// real devices, and dummy placeholders last. Never fails; an adapter
    /// that is not registered is left alone.
    pub fn del_adapter(&self, adapter: &Arc<Adapter>) {
        let found = self
            .adapters
            .lock()
            .get(&adapter.nr())
            .is_some_and(|a| Arc::ptr_eq(a, adapter));
        if !found {
            log::debug!("i2c-core: attempting to delete unregistered adapter [{}]", adapter.name());
            return;
        }

        for entry in self.drivers_snapshot() {
            for client in entry.take_detected_on(adapter) {
                self.unregister_device(Some(&client));
            }
        }

        for client in adapter.drain_userspace_clients() {
            self.unregister_device(Some(&client));
        }

        for branch in adapter.child_adapters() {
            self.del_adapter(&branch);
        }

        for client in adapter.clients() {
            if !client.is_dummy() {
                self.unregister_device(Some(&client));
            }
        }
        for client in adapter.clients() {
            self.unregister_device(Some(&client));
        }

        if let Some(parent) = adapter.parent() {
            parent.remove_child_adapter(adapter);
        }
        self.adapters.lock().remove(&adapter.nr());
        adapter.mark_unregistered();
        log::debug!("{}: adapter [{}] unregistered", adapter.dev_name(), adapter.name());
    }

    // ---- lookups ----

    /// Adapter registered under `nr`.
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::NotFound`] if no such bus exists.
    pub fn get_adapter(&self, nr: u32) -> Result<Arc<Adapter>> {
        self.adapters.lock().get(&nr).cloned().ok_or(I2cError::NotFound)
    }

    /// All registered adapters ordered by bus number.
    #[must_use]
    pub fn adapters(&self) -> Vec<Arc<Adapter>> {
        self.adapters.lock().values().cloned().collect()
    }

    /// # Errors
    ///
    /// Returns [`I2cError::NotFound`] if no adapter carries `node`.
    pub fn find_adapter_by_fwnode(&self, node: &dyn FirmwareNode) -> Result<Arc<Adapter>> {
        let id = node.id();
        self.adapters
            .lock()
            .values()
            .find(|adapter| adapter.fw_node().is_some_and(|n| n.id() == id))
            .cloned()
            .ok_or(I2cError::NotFound)
    }

    /// # Errors
    ///
    /// Returns [`I2cError::NotFound`] if no client was created from `node`.
    pub fn find_client_by_fwnode(&self, node: &dyn FirmwareNode) -> Result<Arc<Client>> {
        let id = node.id();
        self.adapters()
            .iter()
            .flat_map(|adapter| adapter.clients())
            .find(|client| client.fw_node().is_some_and(|n| n.id() == id))
            .ok_or(I2cError::NotFound)
    }

    /// Visit every client on every bus until the visitor breaks.
    pub fn for_each_client<B>(
        &self,
        mut visit: impl FnMut(&Arc<Client>) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        for adapter in self.adapters() {
            for client in adapter.clients() {
                visit(&client)?;
            }
        }
        ControlFlow::Continue(())
    }

    /// Pass a command to the drivers of all clients on `adapter`.
    pub fn clients_command(&self, adapter: &Adapter, cmd: u32, arg: &mut dyn Any) {
        for client in adapter.clients() {
            if let Some(driver) = client.driver() {
                driver.command(&client, cmd, arg);
            }
        }
    }
}

impl core::fmt::Debug for I2cCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("I2cCore")
            .field("adapters", &self.adapters.lock().keys().collect::<Vec<_>>())
            .field("board_info", &self.board_info.len())
            .field("drivers", &self.drivers.read().len())
            .field("atomic", &self.is_atomic())
            .finish()
    }
}
