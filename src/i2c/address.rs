// Licensed under the Apache-2.0 license

//! Address validation, encoding and the per-adapter instantiation lock.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::i2c::common::{ClientFlags, I2C_ADDR_OFFSET_SLAVE, I2C_ADDR_OFFSET_TEN_BIT};
use crate::i2c::error::{I2cError, Result};

/// Check that `addr` fits its addressing mode.
///
/// Ten-bit addresses must not exceed 0x3ff. Seven-bit addresses must be in
/// `0x01..=0x7f`; the general call address is never a device.
///
/// # Errors
///
/// Returns [`I2cError::InvalidAddress`] when the address is out of range.
pub fn check_addr_validity(addr: u16, flags: ClientFlags) -> Result<()> {
    let ten_bit = flags.contains(ClientFlags::TEN);
    let valid = if ten_bit {
        addr <= 0x3ff
    } else {
        (0x01..=0x7f).contains(&addr)
    };
    if valid {
        Ok(())
    } else {
        Err(I2cError::InvalidAddress { addr, ten_bit })
    }
}

/// Stricter seven-bit check used for probing.
///
/// Rejects the general call, CBUS, the reserved bus-format block and the
/// Hs-mode master codes (`0x00..=0x07`) as well as the 10-bit prefix and
/// reserved range (`0x78..=0x7f`).
///
/// # Errors
///
/// Returns [`I2cError::InvalidAddress`] for any reserved address.
pub fn check_7bit_addr_validity_strict(addr: u16) -> Result<()> {
    if (0x08..=0x77).contains(&addr) {
        Ok(())
    } else {
        Err(I2cError::InvalidAddress { addr, ten_bit: false })
    }
}

/// Combine a raw address with its mode bits.
///
/// Two clients collide only if their encoded addresses are equal.
#[must_use]
pub fn encode_addr(addr: u16, flags: ClientFlags) -> u16 {
    let mut encoded = addr;
    if flags.contains(ClientFlags::TEN) {
        encoded |= I2C_ADDR_OFFSET_TEN_BIT;
    }
    if flags.contains(ClientFlags::SLAVE) {
        encoded |= I2C_ADDR_OFFSET_SLAVE;
    }
    encoded
}

/// Split an encoded address back into raw address and flags.
#[must_use]
pub fn decode_addr(encoded: u16) -> (u16, ClientFlags) {
    let mut flags = ClientFlags::empty();
    let mut addr = encoded;
    if addr & I2C_ADDR_OFFSET_TEN_BIT == I2C_ADDR_OFFSET_TEN_BIT {
        flags |= ClientFlags::TEN;
        addr &= !I2C_ADDR_OFFSET_TEN_BIT;
    }
    if addr & I2C_ADDR_OFFSET_SLAVE == I2C_ADDR_OFFSET_SLAVE {
        flags |= ClientFlags::SLAVE;
        addr &= !I2C_ADDR_OFFSET_SLAVE;
    }
    (addr, flags)
}

/// Seven-bit addresses currently being instantiated on one adapter.
///
/// A fixed 128-bit set with atomic test-and-set. It closes the window between
/// the busy check and publication of a new client without holding any lock
/// across probe. Ten-bit addresses are not tracked.
#[derive(Debug, Default)]
pub struct AddressSpace {
    bits: [AtomicU64; 2],
}

impl AddressSpace {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    fn slot(&self, addr: u16) -> Option<(&AtomicU64, u64)> {
        if addr > 0x7f {
            return None;
        }
        let word = self.bits.get(usize::from(addr / 64))?;
        Some((word, 1u64 << (addr % 64)))
    }

    /// Claim `addr`. Returns false if another registration holds it.
    pub fn try_lock(&self, addr: u16) -> bool {
        match self.slot(addr) {
            Some((word, mask)) => word.fetch_or(mask, Ordering::AcqRel) & mask == 0,
            None => true,
        }
    }

    /// Release `addr` unconditionally.
    pub fn unlock(&self, addr: u16) {
        if let Some((word, mask)) = self.slot(addr) {
            word.fetch_and(!mask, Ordering::Release);
        }
    }

    #[must_use]
    pub fn is_locked(&self, addr: u16) -> bool {
        self.slot(addr)
            .is_some_and(|(word, mask)| word.load(Ordering::Acquire) & mask != 0)
    }
}
