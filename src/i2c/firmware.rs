// Licensed under the Apache-2.0 license

//! Firmware-described devices.
//!
//! Platform code hands the core a tree of [`FirmwareNode`]s; the children of
//! an adapter's node become clients when the adapter registers.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::i2c::client::{type_name_from, I2cBoardInfo};
use crate::i2c::common::ClientFlags;
use crate::i2c::error::{I2cError, Result};

/// `reg` bit marking a ten-bit address.
pub const I2C_TEN_BIT_ADDRESS: u32 = 1 << 31;
/// `reg` bit marking one of our own addresses (slave mode).
pub const I2C_OWN_SLAVE_ADDRESS: u32 = 1 << 30;

/// Stable identity of a firmware node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FwNodeId(pub u64);

/// A node of the platform's firmware description.
pub trait FirmwareNode: Send + Sync {
    fn id(&self) -> FwNodeId;

    fn name(&self) -> &str;

    /// First compatible string, `"vendor,model"`
    fn compatible(&self) -> Option<&str>;

    fn reg(&self) -> Option<u32>;

    /// Address registered under `name` in the node's `reg-names`
    fn reg_by_name(&self, name: &str) -> Option<u32> {
        let _ = name;
        None
    }

    /// Whether a boolean property is present
    fn has_property(&self, prop: &str) -> bool;

    fn children(&self) -> Vec<Arc<dyn FirmwareNode>>;

    fn is_available(&self) -> bool {
        true
    }

    /// Set the populated marker, returning its previous value.
    fn test_and_set_populated(&self) -> bool;

    fn clear_populated(&self);

    fn is_populated(&self) -> bool;
}

/// Translate a device node into a client descriptor.
///
/// The type is the compatible string with its vendor prefix removed; the
/// address comes from `reg`, whose top bits select ten-bit and own-slave
/// addressing.
///
/// # Errors
///
/// Returns [`I2cError::NoDevice`] for a node without compatible string and
/// [`I2cError::InvalidArgument`] for a missing `reg` or oversized type.
pub fn board_info_from_node(node: &Arc<dyn FirmwareNode>) -> Result<I2cBoardInfo> {
    let compat = node.compatible().ok_or(I2cError::NoDevice)?;
    let model = compat.split_once(',').map_or(compat, |(_, model)| model);

    let reg = node.reg().ok_or_else(|| {
        log::error!("{}: invalid reg", node.name());
        I2cError::InvalidArgument("missing reg")
    })?;

    let mut flags = ClientFlags::empty();
    if reg & I2C_TEN_BIT_ADDRESS != 0 {
        flags |= ClientFlags::TEN;
    }
    if reg & I2C_OWN_SLAVE_ADDRESS != 0 {
        flags |= ClientFlags::SLAVE;
    }
    if node.has_property("host-notify") {
        flags |= ClientFlags::HOST_NOTIFY;
    }
    if node.has_property("wakeup-source") {
        flags |= ClientFlags::WAKE;
    }
    let raw = reg & !(I2C_TEN_BIT_ADDRESS | I2C_OWN_SLAVE_ADDRESS);
    let addr = u16::try_from(raw).map_err(|_| I2cError::InvalidAddress {
        addr: u16::MAX,
        ten_bit: flags.contains(ClientFlags::TEN),
    })?;

    Ok(I2cBoardInfo {
        type_name: type_name_from(model)?,
        flags,
        addr,
        fw_node: Some(Arc::clone(node)),
        ..I2cBoardInfo::default()
    })
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory firmware node, built by platform code or tests.
#[derive(Debug)]
pub struct StaticNode {
    id: FwNodeId,
    name: String,
    compatible: Option<String>,
    reg: Option<u32>,
    reg_names: Vec<(String, u32)>,
    properties: Vec<String>,
    children: Vec<Arc<StaticNode>>,
    available: bool,
    populated: AtomicBool,
}

impl StaticNode {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            id: FwNodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.to_owned(),
            compatible: None,
            reg: None,
            reg_names: Vec::new(),
            properties: Vec::new(),
            children: Vec::new(),
            available: true,
            populated: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn compatible(mut self, compat: &str) -> Self {
        self.compatible = Some(compat.to_owned());
        self
    }

    #[must_use]
    pub fn reg(mut self, reg: u32) -> Self {
        self.reg = Some(reg);
        self
    }

    #[must_use]
    pub fn reg_name(mut self, name: &str, reg: u32) -> Self {
        self.reg_names.push((name.to_owned(), reg));
        self
    }

    #[must_use]
    pub fn property(mut self, prop: &str) -> Self {
        self.properties.push(prop.to_owned());
        self
    }

    #[must_use]
    pub fn child(mut self, node: Arc<StaticNode>) -> Self {
        self.children.push(node);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.available = false;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<StaticNode> {
        Arc::new(self)
    }
}

impl FirmwareNode for StaticNode {
    fn id(&self) -> FwNodeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn compatible(&self) -> Option<&str> {
        self.compatible.as_deref()
    }

    fn reg(&self) -> Option<u32> {
        self.reg
    }

    fn reg_by_name(&self, name: &str) -> Option<u32> {
        self.reg_names
            .iter()
            .find(|(reg_name, _)| reg_name == name)
            .map(|&(_, reg)| reg)
    }

    fn has_property(&self, prop: &str) -> bool {
        self.properties.iter().any(|p| p == prop)
    }

    fn children(&self) -> Vec<Arc<dyn FirmwareNode>> {
        self.children
            .iter()
            .map(|child| Arc::clone(child) as Arc<dyn FirmwareNode>)
            .collect()
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn test_and_set_populated(&self) -> bool {
        self.populated.swap(true, Ordering::AcqRel)
    }

    fn clear_populated(&self) {
        self.populated.store(false, Ordering::Release);
    }

    fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }
}
