// Licensed under the Apache-2.0 license

//! Hierarchical I2C bus core.
//!
//! Adapter and client registration, mux-aware address tracking, bus locking and
//! transfer dispatch. Controller drivers plug in through [`i2c::Algorithm`],
//! device drivers through [`i2c::I2cDriver`].

// Panic-prone patterns are only tolerated in tests
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
pub mod i2c;

#[cfg(test)]
mod tests;
