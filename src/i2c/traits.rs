// Licensed under the Apache-2.0 license

//! # Plug-in Traits
//!
//! The core never sees concrete controllers or device drivers. It talks to
//! them through the traits in this module:
//!
//! ```text
//! Algorithm (bus controller, one per adapter)
//!     ├── master_xfer / master_xfer_atomic   (batch of I2C messages)
//!     └── smbus_xfer / smbus_xfer_atomic     (native SMBus, optional)
//! I2cDriver (device driver, registered with the core)
//!     ├── matches / probe / remove / command
//!     └── detector() -> I2cDetect            (address-probing discovery, optional)
//! ```
//!
//! Optional operations are announced through [`Algorithm::capabilities`] and
//! [`I2cDriver::detector`]; the core only calls what is announced.

use core::any::Any;
use std::sync::Arc;

use crate::i2c::adapter::Adapter;
use crate::i2c::client::{Client, I2cBoardInfo};
use crate::i2c::common::{ClassFlags, Functionality};
use crate::i2c::detect::DetectClient;
use crate::i2c::error::{I2cError, Result};
use crate::i2c::msg::I2cMsg;
use crate::i2c::smbus::SmbusRequest;

bitflags::bitflags! {
    /// Transfer entry points an algorithm implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct XferCaps: u8 {
        const MASTER_XFER = 1 << 0;
        const MASTER_XFER_ATOMIC = 1 << 1;
        const SMBUS_XFER = 1 << 2;
        const SMBUS_XFER_ATOMIC = 1 << 3;
    }
}

/// Transfer engine of one adapter.
///
/// # Examples
///
/// ```rust,no_run
/// use i2c_core::i2c::{Adapter, Algorithm, Functionality, I2cMsg, Result};
///
/// struct Loopback;
///
/// impl Algorithm for Loopback {
///     fn functionality(&self, _adapter: &Adapter) -> Functionality {
///         Functionality::I2C | Functionality::SMBUS_EMUL
///     }
///
///     fn master_xfer(&self, _adapter: &Adapter, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
///         Ok(msgs.len())
///     }
/// }
/// ```
pub trait Algorithm: Send + Sync {
    /// Capability mask reported to drivers and used by the default probe
    fn functionality(&self, adapter: &Adapter) -> Functionality;

    /// Entry points implemented by this engine
    fn capabilities(&self) -> XferCaps {
        XferCaps::MASTER_XFER
    }

    /// Execute a batch of messages with one STOP at the end.
    ///
    /// # Returns
    ///
    /// The number of messages executed. The outcome covers the whole batch;
    /// a failure is not attributed to an individual message.
    ///
    /// # Errors
    ///
    /// [`I2cError::ArbitrationRetry`] makes the dispatcher retry the batch.
    /// Any other error ends the transfer.
    fn master_xfer(&self, adapter: &Adapter, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        let _ = (adapter, msgs);
        Err(I2cError::Unsupported("I2C level transfers not supported"))
    }

    /// Polled variant used in atomic context; must never sleep.
    ///
    /// # Errors
    ///
    /// `nb::Error::WouldBlock` while the hardware is still busy, otherwise
    /// the same errors as [`Algorithm::master_xfer`].
    fn master_xfer_atomic(
        &self,
        adapter: &Adapter,
        msgs: &mut [I2cMsg<'_>],
    ) -> nb::Result<usize, I2cError> {
        let _ = (adapter, msgs);
        Err(nb::Error::Other(I2cError::Unsupported(
            "atomic I2C transfers not supported",
        )))
    }

    /// Native SMBus transaction.
    ///
    /// # Errors
    ///
    /// Same classification as [`Algorithm::master_xfer`].
    fn smbus_xfer(&self, adapter: &Adapter, req: &mut SmbusRequest) -> Result<()> {
        let _ = (adapter, req);
        Err(I2cError::Unsupported("SMBus transfers not supported"))
    }

    /// Polled native SMBus transaction for atomic context.
    ///
    /// # Errors
    ///
    /// Same classification as [`Algorithm::master_xfer_atomic`].
    fn smbus_xfer_atomic(
        &self,
        adapter: &Adapter,
        req: &mut SmbusRequest,
    ) -> nb::Result<(), I2cError> {
        let _ = (adapter, req);
        Err(nb::Error::Other(I2cError::Unsupported(
            "atomic SMBus transfers not supported",
        )))
    }
}

/// One entry of a driver's id table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cDeviceId {
    pub name: &'static str,
    pub driver_data: usize,
}

impl I2cDeviceId {
    #[must_use]
    pub const fn new(name: &'static str, driver_data: usize) -> Self {
        Self { name, driver_data }
    }
}

/// Look up the id-table entry naming this client's type.
#[must_use]
pub fn match_id<'a>(table: &'a [I2cDeviceId], client: &Client) -> Option<&'a I2cDeviceId> {
    table.iter().find(|id| id.name == client.type_name())
}

/// Match a compatible table against a client.
///
/// An entry matches the firmware node's compatible string outright, or the
/// client's type name once the vendor prefix is stripped.
#[must_use]
pub fn match_compatible(table: &[&str], client: &Client) -> bool {
    let node_compat = client.fw_node().and_then(|node| node.compatible());
    table.iter().any(|compat| {
        if node_compat == Some(*compat) {
            return true;
        }
        let model = compat.split_once(',').map_or(*compat, |(_, model)| model);
        model == client.type_name()
    })
}

/// A device driver.
///
/// The core calls `probe` synchronously when a matching client is published
/// and `remove` when a bound client is unregistered.
pub trait I2cDriver: Send + Sync {
    /// Unique driver name
    fn name(&self) -> &str;

    fn id_table(&self) -> &[I2cDeviceId] {
        &[]
    }

    /// Firmware compatible strings, `"vendor,model"`
    fn compatible(&self) -> &[&str] {
        &[]
    }

    /// Whether this driver handles `client`.
    fn matches(&self, client: &Client) -> bool {
        match_compatible(self.compatible(), client) || match_id(self.id_table(), client).is_some()
    }

    /// Bind to a freshly published client.
    ///
    /// # Errors
    ///
    /// [`I2cError::Deferred`] leaves the client unbound until
    /// [`crate::i2c::I2cCore::probe_deferred`] runs; other errors are logged.
    fn probe(&self, client: &Arc<Client>) -> Result<()>;

    /// Unbind from a client that is going away.
    ///
    /// # Errors
    ///
    /// Errors are logged; removal proceeds regardless.
    fn remove(&self, client: &Arc<Client>) -> Result<()> {
        let _ = client;
        Ok(())
    }

    /// Auto-detection support
    fn detector(&self) -> Option<&dyn I2cDetect> {
        None
    }

    /// Out-of-band command broadcast through `clients_command`.
    fn command(&self, client: &Arc<Client>, cmd: u32, arg: &mut dyn Any) {
        let _ = (client, cmd, arg);
    }
}

/// Address-probing discovery for devices nobody declared.
pub trait I2cDetect: Send + Sync {
    /// Classes of adapter worth probing
    fn class(&self) -> ClassFlags;

    /// Candidate addresses, probed in order
    fn address_list(&self) -> &[u16];

    /// Identify the chip behind `client` and fill in `info.type_name`.
    ///
    /// # Errors
    ///
    /// [`I2cError::NoDevice`] when the chip is not one of ours; any other
    /// error aborts the scan of this adapter.
    fn detect(&self, client: &DetectClient<'_>, info: &mut I2cBoardInfo) -> Result<()>;
}
