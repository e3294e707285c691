// Licensed under the Apache-2.0 license

//! Client records and the descriptors they are built from.

use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::i2c::adapter::Adapter;
use crate::i2c::address::encode_addr;
use crate::i2c::common::{ClientFlags, TypeName};
use crate::i2c::error::{I2cError, Result};
use crate::i2c::firmware::FirmwareNode;
use crate::i2c::traits::I2cDriver;

/// Opaque board-specific payload handed through to the driver.
pub type PlatformData = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Mem,
    Io,
    Irq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqTrigger {
    EdgeRising,
    EdgeFalling,
    EdgeBoth,
    LevelHigh,
    LevelLow,
}

/// A platform resource attached to a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub start: u64,
    pub end: u64,
    pub trigger: Option<IrqTrigger>,
}

impl Resource {
    #[must_use]
    pub const fn irq(irq: u32, trigger: Option<IrqTrigger>) -> Self {
        Self {
            kind: ResourceKind::Irq,
            start: irq as u64,
            end: irq as u64,
            trigger,
        }
    }

    #[must_use]
    pub const fn mem(start: u64, end: u64) -> Self {
        Self {
            kind: ResourceKind::Mem,
            start,
            end,
            trigger: None,
        }
    }
}

/// How a client came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOrigin {
    /// Created by driver or platform code
    Explicit,
    /// Declared by a firmware node
    Firmware,
    /// Replayed from the board-info registry
    BoardInfo,
    /// Instantiated on user request
    User,
    /// Found by a driver's detection scan
    Detected,
    /// Placeholder reserving an extra address of a multi-address chip
    Dummy,
}

/// Template for creating a client.
#[derive(Clone, Default)]
pub struct I2cBoardInfo {
    pub type_name: TypeName,
    pub flags: ClientFlags,
    pub addr: u16,
    pub dev_name: Option<String>,
    pub platform_data: Option<PlatformData>,
    pub fw_node: Option<Arc<dyn FirmwareNode>>,
    /// Explicit interrupt line; zero means "derive from resources"
    pub irq: u32,
    pub resources: Vec<Resource>,
}

impl I2cBoardInfo {
    /// Descriptor for a device of type `type_name` at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::InvalidArgument`] if the type name does not fit.
    pub fn new(type_name: &str, addr: u16) -> Result<Self> {
        Ok(Self {
            type_name: type_name_from(type_name)?,
            addr,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn flags(mut self, flags: ClientFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn irq(mut self, irq: u32) -> Self {
        self.irq = irq;
        self
    }

    #[must_use]
    pub fn resource(mut self, res: Resource) -> Self {
        self.resources.push(res);
        self
    }

    #[must_use]
    pub fn dev_name(mut self, name: &str) -> Self {
        self.dev_name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn fw_node(mut self, node: Arc<dyn FirmwareNode>) -> Self {
        self.fw_node = Some(node);
        self
    }

    #[must_use]
    pub fn platform_data(mut self, data: PlatformData) -> Self {
        self.platform_data = Some(data);
        self
    }

    /// Resolve the interrupt line: explicit value, else first IRQ resource.
    #[must_use]
    pub fn resolve_irq(&self) -> (u32, Option<IrqTrigger>) {
        if self.irq != 0 {
            return (self.irq, None);
        }
        self.resources
            .iter()
            .find(|res| res.kind == ResourceKind::Irq)
            .map_or((0, None), |res| {
                (u32::try_from(res.start).unwrap_or(0), res.trigger)
            })
    }
}

impl fmt::Debug for I2cBoardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2cBoardInfo")
            .field("type_name", &self.type_name)
            .field("flags", &self.flags)
            .field("addr", &format_args!("0x{:02x}", self.addr))
            .field("dev_name", &self.dev_name)
            .field("fw_node", &self.fw_node.as_ref().map(|node| node.name().to_owned()))
            .field("irq", &self.irq)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

/// Copy `name` into a fixed-size type name.
///
/// # Errors
///
/// Returns [`I2cError::InvalidArgument`] if `name` exceeds the name size.
pub fn type_name_from(name: &str) -> Result<TypeName> {
    let mut out = TypeName::new();
    out.push_str(name)
        .map_err(|()| I2cError::InvalidArgument("device type name too long"))?;
    Ok(out)
}

/// A registered peripheral.
pub struct Client {
    addr: u16,
    flags: ClientFlags,
    type_name: TypeName,
    dev_name: String,
    adapter: Weak<Adapter>,
    adapter_nr: u32,
    irq: u32,
    irq_trigger: Option<IrqTrigger>,
    origin: ClientOrigin,
    fw_node: Option<Arc<dyn FirmwareNode>>,
    platform_data: Option<PlatformData>,
    driver: Mutex<Option<Arc<dyn I2cDriver>>>,
    registered: AtomicBool,
}

impl Client {
    pub(crate) fn new(adapter: &Arc<Adapter>, info: &I2cBoardInfo, origin: ClientOrigin) -> Self {
        let (irq, irq_trigger) = info.resolve_irq();
        let encoded = encode_addr(info.addr, info.flags);
        let dev_name = if let Some(name) = &info.dev_name {
            format!("i2c-{name}")
        } else if let Some(node) = &info.fw_node {
            format!("i2c-{}", node.name())
        } else {
            format!("{}-{encoded:04x}", adapter.nr())
        };
        Self {
            addr: info.addr,
            flags: info.flags,
            type_name: info.type_name.clone(),
            dev_name,
            adapter: Arc::downgrade(adapter),
            adapter_nr: adapter.nr(),
            irq,
            irq_trigger,
            origin,
            fw_node: info.fw_node.clone(),
            platform_data: info.platform_data.clone(),
            driver: Mutex::new(None),
            registered: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn addr(&self) -> u16 {
        self.addr
    }

    #[must_use]
    pub fn flags(&self) -> ClientFlags {
        self.flags
    }

    /// Address with mode bits folded in; the client's identity on its bus.
    #[must_use]
    pub fn encoded_addr(&self) -> u16 {
        encode_addr(self.addr, self.flags)
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    #[must_use]
    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    /// Owning adapter, while it is still alive.
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::NotFound`] once the adapter is unregistered.
    pub fn adapter(&self) -> Result<Arc<Adapter>> {
        self.adapter
            .upgrade()
            .filter(|adapter| adapter.is_registered())
            .ok_or(I2cError::NotFound)
    }

    #[must_use]
    pub fn adapter_nr(&self) -> u32 {
        self.adapter_nr
    }

    pub(crate) fn belongs_to(&self, adapter: &Adapter) -> bool {
        core::ptr::eq(self.adapter.as_ptr(), adapter)
    }

    #[must_use]
    pub fn irq(&self) -> u32 {
        self.irq
    }

    #[must_use]
    pub fn irq_trigger(&self) -> Option<IrqTrigger> {
        self.irq_trigger
    }

    #[must_use]
    pub fn origin(&self) -> ClientOrigin {
        self.origin
    }

    #[must_use]
    pub fn fw_node(&self) -> Option<&Arc<dyn FirmwareNode>> {
        self.fw_node.as_ref()
    }

    #[must_use]
    pub fn platform_data(&self) -> Option<&PlatformData> {
        self.platform_data.as_ref()
    }

    /// Driver currently bound to this client
    #[must_use]
    pub fn driver(&self) -> Option<Arc<dyn I2cDriver>> {
        self.driver.lock().clone()
    }

    pub(crate) fn set_driver(&self, driver: Option<Arc<dyn I2cDriver>>) {
        *self.driver.lock() = driver;
    }

    /// Reserve the driver slot; false if another driver holds it.
    pub(crate) fn claim_driver(&self, driver: &Arc<dyn I2cDriver>) -> bool {
        let mut slot = self.driver.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::clone(driver));
        true
    }

    pub(crate) fn take_driver(&self) -> Option<Arc<dyn I2cDriver>> {
        self.driver.lock().take()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Flip to unregistered; true for the caller that did it.
    pub(crate) fn mark_unregistered(&self) -> bool {
        self.registered.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_dummy(&self) -> bool {
        self.type_name.as_str() == "dummy"
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("dev_name", &self.dev_name)
            .field("type_name", &self.type_name)
            .field("addr", &format_args!("0x{:02x}", self.addr))
            .field("flags", &self.flags)
            .field("irq", &self.irq)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
