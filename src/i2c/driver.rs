// Licensed under the Apache-2.0 license

//! Driver registration and binding.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::i2c::adapter::Adapter;
use crate::i2c::client::Client;
use crate::i2c::core::I2cCore;
use crate::i2c::error::{I2cError, Result};
use crate::i2c::traits::{I2cDeviceId, I2cDriver};

/// A registered driver and the clients its detection created.
pub(crate) struct DriverEntry {
    pub(crate) driver: Arc<dyn I2cDriver>,
    detected: Mutex<Vec<Arc<Client>>>,
}

impl DriverEntry {
    pub(crate) fn new(driver: Arc<dyn I2cDriver>) -> Self {
        Self {
            driver,
            detected: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_detected(&self, client: Arc<Client>) {
        self.detected.lock().push(client);
    }

    pub(crate) fn take_detected_on(&self, adapter: &Adapter) -> Vec<Arc<Client>> {
        let mut detected = self.detected.lock();
        let (gone, kept): (Vec<_>, Vec<_>) = detected
            .drain(..)
            .partition(|client| client.belongs_to(adapter));
        *detected = kept;
        gone
    }

    fn take_all_detected(&self) -> Vec<Arc<Client>> {
        core::mem::take(&mut *self.detected.lock())
    }

    pub(crate) fn forget(&self, client: &Arc<Client>) {
        self.detected.lock().retain(|c| !Arc::ptr_eq(c, client));
    }
}

/// Binds placeholder clients so their addresses stay reserved.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyDriver;

static DUMMY_ID: [I2cDeviceId; 2] = [
    I2cDeviceId::new("dummy", 0),
    I2cDeviceId::new("smbus_host_notify", 0),
];

impl I2cDriver for DummyDriver {
    fn name(&self) -> &str {
        "dummy"
    }

    fn id_table(&self) -> &[I2cDeviceId] {
        &DUMMY_ID
    }

    fn probe(&self, _client: &Arc<Client>) -> Result<()> {
        Ok(())
    }
}

impl I2cCore {
    pub(crate) fn drivers_snapshot(&self) -> Vec<Arc<DriverEntry>> {
        self.drivers.read().clone()
    }

    /// Register a driver, bind it to matching clients and let it detect
    /// devices on every adapter.
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::Busy`] if a driver of that name is registered.
    pub fn register_driver(&self, driver: Arc<dyn I2cDriver>) -> Result<()> {
        let entry = {
            let mut drivers = self.drivers.write();
            if drivers.iter().any(|e| e.driver.name() == driver.name()) {
                return Err(I2cError::Busy);
            }
            let entry = Arc::new(DriverEntry::new(driver));
            drivers.push(Arc::clone(&entry));
            entry
        };
        log::info!("i2c-core: driver [{}] registered", entry.driver.name());

        let _ = self.for_each_client(|client| {
            if client.driver().is_none() && entry.driver.matches(client) {
                self.try_probe(client, &entry.driver);
            }
            core::ops::ControlFlow::<()>::Continue(())
        });

        for adapter in self.adapters() {
            if let Err(err) = self.detect(&adapter, &entry) {
                log::debug!(
                    "{}: detection by {} stopped ({err})",
                    adapter.dev_name(),
                    entry.driver.name()
                );
            }
        }
        Ok(())
    }

    /// Unregister a driver: its detected clients are removed and every
    /// client bound to it is unbound.
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::NotFound`] for an unknown driver name.
    pub fn del_driver(&self, name: &str) -> Result<()> {
        let entry = {
            let mut drivers = self.drivers.write();
            let pos = drivers
                .iter()
                .position(|e| e.driver.name() == name)
                .ok_or(I2cError::NotFound)?;
            drivers.remove(pos)
        };

        for client in entry.take_all_detected() {
            log::debug!(
                "{}: removing {} at 0x{:02x}",
                client.dev_name(),
                client.type_name(),
                client.addr()
            );
            self.unregister_device(Some(&client));
        }

        let _ = self.for_each_client(|client| {
            if client
                .driver()
                .is_some_and(|d| Arc::ptr_eq(&d, &entry.driver))
            {
                self.unbind_client(client);
            }
            core::ops::ControlFlow::<()>::Continue(())
        });
        log::debug!("i2c-core: driver [{name}] unregistered");
        Ok(())
    }

    /// Clients created by `driver`'s detection that are still registered.
    #[must_use]
    pub fn detected_clients(&self, driver: &str) -> Vec<Arc<Client>> {
        self.drivers
            .read()
            .iter()
            .find(|e| e.driver.name() == driver)
            .map(|e| e.detected.lock().clone())
            .unwrap_or_default()
    }

    /// Retry binding every client that has no driver yet.
    pub fn probe_deferred(&self) {
        let _ = self.for_each_client(|client| {
            if client.driver().is_none() {
                self.bind_client(client);
            }
            core::ops::ControlFlow::<()>::Continue(())
        });
    }

    /// Probe the first matching driver. Returns true once bound or deferred.
    fn try_probe(&self, client: &Arc<Client>, driver: &Arc<dyn I2cDriver>) -> bool {
        if !client.claim_driver(driver) {
            return true;
        }
        match driver.probe(client) {
            Ok(()) => {
                log::debug!("{}: bound to driver {}", client.dev_name(), driver.name());
                true
            }
            Err(I2cError::Deferred) => {
                client.set_driver(None);
                log::info!("{}: probe with driver {} deferred", client.dev_name(), driver.name());
                true
            }
            Err(I2cError::NoDevice) => {
                client.set_driver(None);
                false
            }
            Err(err) => {
                client.set_driver(None);
                log::warn!(
                    "{}: probe with driver {} failed ({err})",
                    client.dev_name(),
                    driver.name()
                );
                true
            }
        }
    }

    /// Offer a freshly published client to the registered drivers.
    pub(crate) fn bind_client(&self, client: &Arc<Client>) {
        for entry in self.drivers_snapshot() {
            if entry.driver.matches(client) && self.try_probe(client, &entry.driver) {
                return;
            }
        }
    }

    pub(crate) fn unbind_client(&self, client: &Arc<Client>) {
        if let Some(driver) = client.take_driver() {
            if let Err(err) = driver.remove(client) {
                log::error!(
                    "{}: remove by driver {} failed ({err})",
                    client.dev_name(),
                    driver.name()
                );
            }
        }
    }

    pub(crate) fn forget_detected(&self, client: &Arc<Client>) {
        for entry in self.drivers.read().iter() {
            entry.forget(client);
        }
    }
}
