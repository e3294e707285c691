// Licensed under the Apache-2.0 license

//! I2C bus core.
//!
//! Keeps the registry of adapters (bus controllers), the clients (devices)
//! on them and the drivers bound to those clients. Transfers from clients are
//! serialized per physical bus, retried on lost arbitration, and checked
//! against controller quirks before reaching the transfer engine.
//!
//! Multiplexed segments are adapters with a parent; see [`mux`].

pub mod adapter;
pub mod address;
pub mod board_info;
pub mod client;
pub mod common;
pub mod core;
pub mod detect;
pub mod driver;
pub mod error;
pub mod firmware;
pub mod i2c_controller;
pub mod instantiate;
pub mod lock;
pub mod msg;
pub mod mux;
pub mod quirks;
pub mod smbus;
pub mod traits;
pub mod transfer;

pub use self::adapter::{Adapter, AdapterBuilder, Child, DEFAULT_TIMEOUT};
pub use self::address::{
    check_7bit_addr_validity_strict, check_addr_validity, decode_addr, encode_addr,
};
pub use self::board_info::BoardInfoRegistry;
pub use self::client::{
    Client, ClientOrigin, I2cBoardInfo, IrqTrigger, PlatformData, Resource, ResourceKind,
};
pub use self::common::{ClassFlags, ClientFlags, Functionality, I2cSpeed};
pub use self::core::I2cCore;
pub use self::detect::{default_probe, DetectClient};
pub use self::driver::DummyDriver;
pub use self::error::{I2cError, Result};
pub use self::firmware::{FirmwareNode, FwNodeId, StaticNode};
pub use self::i2c_controller::I2cController;
pub use self::instantiate::ProbeFn;
pub use self::lock::{BusGuard, LockOps, LockScope};
pub use self::msg::{I2cMsg, MsgFlags};
pub use self::mux::{MuxChannel, MuxSelect, ParentLockedOps};
pub use self::quirks::{AdapterQuirks, QuirkFlags};
pub use self::smbus::{
    DeviceIdentity, SmbusData, SmbusDirection, SmbusProtocol, SmbusRequest, I2C_SMBUS_BLOCK_MAX,
};
pub use self::traits::{Algorithm, I2cDetect, I2cDeviceId, I2cDriver, XferCaps};
