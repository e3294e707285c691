// Licensed under the Apache-2.0 license

//! Client creation and removal.

use std::sync::Arc;

use crate::i2c::adapter::{Adapter, Child};
use crate::i2c::address::{
    check_7bit_addr_validity_strict, check_addr_validity, decode_addr, encode_addr,
};
use crate::i2c::client::{type_name_from, Client, ClientOrigin, I2cBoardInfo};
use crate::i2c::common::ClientFlags;
use crate::i2c::core::I2cCore;
use crate::i2c::detect::default_probe;
use crate::i2c::error::{I2cError, Result};

/// Liveness test used by [`I2cCore::new_scanned_device`].
pub type ProbeFn<'a> = &'a dyn Fn(&Adapter, u16) -> bool;

impl I2cCore {
    /// Register a client described by `info` on `adapter`.
    ///
    /// A matching driver is probed before this returns.
    ///
    /// # Errors
    ///
    /// - [`I2cError::InvalidAddress`] for an out-of-range address
    /// - [`I2cError::Busy`] if the address is being registered concurrently
    /// - [`I2cError::AddressInUse`] if the address is taken in the mux tree
    /// - [`I2cError::NotFound`] if `adapter` is no longer registered
    pub fn new_client_device(
        &self,
        adapter: &Arc<Adapter>,
        info: &I2cBoardInfo,
    ) -> Result<Arc<Client>> {
        self.instantiate(adapter, info, ClientOrigin::Explicit)
    }

    pub(crate) fn instantiate(
        &self,
        adapter: &Arc<Adapter>,
        info: &I2cBoardInfo,
        origin: ClientOrigin,
    ) -> Result<Arc<Client>> {
        if !adapter.is_registered() {
            return Err(I2cError::NotFound);
        }
        if let Err(err) = check_addr_validity(info.addr, info.flags) {
            log::error!(
                "{}: invalid {}-bit I2C address 0x{:02x}",
                adapter.dev_name(),
                if info.flags.contains(ClientFlags::TEN) { 10 } else { 7 },
                info.addr
            );
            return Err(err);
        }

        // ten-bit addresses are not tracked by the address space
        let tracked = !info.flags.contains(ClientFlags::TEN);
        if tracked && !adapter.address_space().try_lock(info.addr) {
            return Err(I2cError::Busy);
        }
        let ret = self.publish_client(adapter, info, origin);
        if tracked {
            adapter.address_space().unlock(info.addr);
        }

        if let Err(err) = &ret {
            log::error!(
                "{}: failed to register i2c client {} at 0x{:02x} ({err})",
                adapter.dev_name(),
                info.type_name,
                info.addr
            );
        }
        ret
    }

    fn publish_client(
        &self,
        adapter: &Arc<Adapter>,
        info: &I2cBoardInfo,
        origin: ClientOrigin,
    ) -> Result<Arc<Client>> {
        if adapter.is_address_busy(encode_addr(info.addr, info.flags)) {
            return Err(I2cError::AddressInUse);
        }

        let client = Arc::new(Client::new(adapter, info, origin));
        adapter.add_child(Child::Client(Arc::clone(&client)));
        log::debug!(
            "{}: client [{}] registered with bus id {}",
            adapter.dev_name(),
            client.type_name(),
            client.dev_name()
        );
        self.bind_client(&client);
        Ok(client)
    }

    /// Remove a client. `None` and already removed clients are ignored.
    pub fn unregister_device(&self, client: Option<&Arc<Client>>) {
        let Some(client) = client else {
            return;
        };
        if !client.mark_unregistered() {
            return;
        }
        if let Some(node) = client.fw_node() {
            node.clear_populated();
        }
        self.unbind_client(client);
        if let Ok(adapter) = client.adapter() {
            adapter.remove_client(client);
        }
        self.forget_detected(client);
        log::debug!("{}: client unregistered", client.dev_name());
    }

    /// Reserve an extra address of a multi-address chip.
    ///
    /// # Errors
    ///
    /// See [`I2cCore::new_client_device`].
    pub fn new_dummy_device(&self, adapter: &Arc<Adapter>, addr: u16) -> Result<Arc<Client>> {
        let info = I2cBoardInfo::new("dummy", addr)?;
        self.instantiate(adapter, &info, ClientOrigin::Dummy)
    }

    /// Dummy companion of `client`, addressed by the `name` entry of its
    /// firmware node's `reg-names`, or by `default_addr`.
    ///
    /// # Errors
    ///
    /// See [`I2cCore::new_client_device`].
    pub fn new_ancillary_device(
        &self,
        client: &Client,
        name: &str,
        default_addr: u16,
    ) -> Result<Arc<Client>> {
        let adapter = client.adapter()?;
        let addr = client
            .fw_node()
            .and_then(|node| node.reg_by_name(name))
            .and_then(|reg| u16::try_from(reg).ok())
            .unwrap_or(default_addr);
        log::debug!("{}: address for {name}: 0x{addr:x}", client.dev_name());
        self.new_dummy_device(&adapter, addr)
    }

    /// Register `info` at the first address of `addr_list` that answers.
    ///
    /// Reserved and busy addresses are skipped. Without a custom `probe`
    /// the default liveness probe is used.
    ///
    /// # Errors
    ///
    /// [`I2cError::NoDevice`] if nothing answers, otherwise see
    /// [`I2cCore::new_client_device`].
    pub fn new_scanned_device(
        &self,
        adapter: &Arc<Adapter>,
        info: &I2cBoardInfo,
        addr_list: &[u16],
        probe: Option<ProbeFn<'_>>,
    ) -> Result<Arc<Client>> {
        let probe = probe.unwrap_or(&default_probe);
        let bus: &Adapter = adapter;
        let found = addr_list.iter().copied().find(|&addr| {
            if check_7bit_addr_validity_strict(addr).is_err() {
                log::warn!("{}: invalid 7-bit address 0x{addr:02x}", bus.dev_name());
                return false;
            }
            if bus.is_address_busy(addr) {
                log::debug!(
                    "{}: address 0x{addr:02x} already in use, not probing",
                    bus.dev_name()
                );
                return false;
            }
            probe(bus, addr)
        });
        let Some(addr) = found else {
            log::debug!("{}: probing failed, no device found", adapter.dev_name());
            return Err(I2cError::NoDevice);
        };
        let mut info = info.clone();
        info.addr = addr;
        self.new_client_device(adapter, &info)
    }

    /// Instantiate a device on user request.
    ///
    /// `encoded` may carry the ten-bit and slave offsets.
    ///
    /// # Errors
    ///
    /// See [`I2cCore::new_client_device`].
    pub fn new_user_device(
        &self,
        adapter: &Arc<Adapter>,
        type_name: &str,
        encoded: u16,
    ) -> Result<Arc<Client>> {
        let (addr, flags) = decode_addr(encoded);
        let info = I2cBoardInfo {
            type_name: type_name_from(type_name)?,
            flags,
            addr,
            ..I2cBoardInfo::default()
        };
        let client = self.instantiate(adapter, &info, ClientOrigin::User)?;
        adapter.add_userspace_client(Arc::clone(&client));
        log::info!(
            "{}: instantiated device {} at 0x{:02x}",
            adapter.dev_name(),
            client.type_name(),
            addr
        );
        Ok(client)
    }

    /// Remove a device created by [`I2cCore::new_user_device`].
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::NotFound`] if no user-created client has that
    /// encoded address.
    pub fn delete_user_device(&self, adapter: &Adapter, encoded: u16) -> Result<()> {
        let client = adapter.take_userspace_client(encoded).ok_or_else(|| {
            log::error!("{}: can't find device 0x{encoded:04x} in list", adapter.dev_name());
            I2cError::NotFound
        })?;
        log::info!(
            "{}: deleting device {} at 0x{:02x}",
            adapter.dev_name(),
            client.type_name(),
            client.addr()
        );
        self.unregister_device(Some(&client));
        Ok(())
    }
}
