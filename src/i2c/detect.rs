// Licensed under the Apache-2.0 license

//! Auto-detection of undeclared devices.
//!
//! For each candidate address of a detecting driver the core checks the
//! address is legal and free, asks the bus whether anything answers, and only
//! then lets the driver look at the chip through a [`DetectClient`].

use std::sync::Arc;

use crate::i2c::adapter::Adapter;
use crate::i2c::address::check_7bit_addr_validity_strict;
use crate::i2c::client::{ClientOrigin, I2cBoardInfo};
use crate::i2c::common::{ClassFlags, ClientFlags, Functionality};
use crate::i2c::core::I2cCore;
use crate::i2c::driver::DriverEntry;
use crate::i2c::error::{I2cError, Result};
use crate::i2c::msg::I2cMsg;
use crate::i2c::smbus::SmbusDirection;
use crate::i2c::traits::I2cDetect;

/// What a detection callback sees: an address on an adapter, nothing more.
#[derive(Debug)]
pub struct DetectClient<'a> {
    adapter: &'a Arc<Adapter>,
    addr: u16,
}

impl<'a> DetectClient<'a> {
    #[must_use]
    pub fn new(adapter: &'a Arc<Adapter>, addr: u16) -> Self {
        Self { adapter, addr }
    }

    #[must_use]
    pub fn addr(&self) -> u16 {
        self.addr
    }

    #[must_use]
    pub fn adapter(&self) -> &'a Arc<Adapter> {
        self.adapter
    }

    #[must_use]
    pub fn check_functionality(&self, func: Functionality) -> bool {
        self.adapter.check_functionality(func)
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_byte_data(&self, command: u8) -> Result<u8> {
        self.adapter
            .smbus_read_byte_data(self.addr, ClientFlags::empty(), command)
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_word_data(&self, command: u8) -> Result<u16> {
        self.adapter
            .smbus_read_word_data(self.addr, ClientFlags::empty(), command)
    }

    /// # Errors
    ///
    /// See [`Adapter::transfer`].
    pub fn transfer(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        self.adapter.transfer(msgs)
    }
}

/// Best-effort presence check.
///
/// EEPROM-like ranges (0x30..=0x37, 0x50..=0x5f) get a byte read because a
/// quick write can corrupt some of them; everything else gets a quick write.
#[must_use]
pub fn default_probe(adapter: &Adapter, addr: u16) -> bool {
    let eeprom_like = (addr & !0x07) == 0x30 || (addr & !0x0f) == 0x50;
    let ret = if !eeprom_like && adapter.check_functionality(Functionality::SMBUS_QUICK) {
        adapter.smbus_quick(addr, SmbusDirection::Write)
    } else if adapter.check_functionality(Functionality::SMBUS_READ_BYTE) {
        adapter.smbus_read_byte(addr, ClientFlags::empty()).map(|_| ())
    } else {
        log::warn!(
            "{}: no suitable probing method supported for address 0x{addr:02X}",
            adapter.dev_name()
        );
        return false;
    };
    ret.is_ok()
}

impl I2cCore {
    /// Run `entry`'s detection over `adapter`.
    ///
    /// # Errors
    ///
    /// Propagates a genuine error from the driver's callback, which ends the
    /// scan of this adapter.
    pub(crate) fn detect(&self, adapter: &Arc<Adapter>, entry: &DriverEntry) -> Result<()> {
        let Some(detector) = entry.driver.detector() else {
            return Ok(());
        };
        if detector.address_list().is_empty() {
            return Ok(());
        }

        let class = adapter.class();
        if class == ClassFlags::DEPRECATED {
            log::debug!(
                "{}: adapter dropped class based instantiation, not auto-detecting {} devices",
                adapter.dev_name(),
                entry.driver.name()
            );
            return Ok(());
        }
        if !class.intersects(detector.class()) {
            return Ok(());
        }

        for &addr in detector.address_list() {
            log::debug!(
                "{}: found normal entry for adapter {}, addr 0x{addr:02x}",
                entry.driver.name(),
                adapter.nr()
            );
            let temp = DetectClient::new(adapter, addr);
            self.detect_address(&temp, detector, entry)?;
        }
        Ok(())
    }

    fn detect_address(
        &self,
        temp: &DetectClient<'_>,
        detector: &dyn I2cDetect,
        entry: &DriverEntry,
    ) -> Result<()> {
        let adapter = temp.adapter();
        let addr = temp.addr();

        if check_7bit_addr_validity_strict(addr).is_err() {
            log::warn!("{}: invalid probe address 0x{addr:02x}", adapter.dev_name());
            return Ok(());
        }
        if adapter.is_address_busy(addr) {
            return Ok(());
        }
        if !default_probe(adapter, addr) {
            return Ok(());
        }

        let mut info = I2cBoardInfo {
            addr,
            ..I2cBoardInfo::default()
        };
        match detector.detect(temp, &mut info) {
            Ok(()) => {}
            Err(I2cError::NoDevice) => return Ok(()),
            Err(err) => return Err(err),
        }

        if info.type_name.is_empty() {
            log::error!(
                "{}: {} detection function provided no name for 0x{addr:x}",
                adapter.dev_name(),
                entry.driver.name()
            );
            return Ok(());
        }

        if adapter.class().contains(ClassFlags::DEPRECATED) {
            log::warn!(
                "{}: this adapter will soon drop class based instantiation of devices, \
                 make sure client 0x{:02x} gets instantiated by other means",
                adapter.dev_name(),
                info.addr
            );
        }
        log::debug!(
            "{}: creating {} at 0x{:02x}",
            adapter.dev_name(),
            info.type_name,
            info.addr
        );
        match self.instantiate(adapter, &info, ClientOrigin::Detected) {
            Ok(client) => entry.push_detected(client),
            Err(err) => log::error!(
                "{}: failed creating {} at 0x{:02x} ({err})",
                adapter.dev_name(),
                info.type_name,
                info.addr
            ),
        }
        Ok(())
    }
}
