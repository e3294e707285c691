// Licensed under the Apache-2.0 license

//! embedded-hal view of a registered adapter.
//!
//! Device drivers written against `embedded_hal::i2c::I2c` can run on any
//! adapter of the core: every call becomes one locked transfer.

use std::sync::Arc;

use embedded_hal::i2c::{Operation, SevenBitAddress, TenBitAddress};

use crate::i2c::adapter::Adapter;
use crate::i2c::error::I2cError;
use crate::i2c::msg::{I2cMsg, MsgFlags};

pub struct I2cController {
    adapter: Arc<Adapter>,
}

impl I2cController {
    #[must_use]
    pub fn new(adapter: Arc<Adapter>) -> Self {
        Self { adapter }
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    fn run(
        &self,
        addr: u16,
        flags: MsgFlags,
        operations: &mut [Operation<'_>],
    ) -> Result<(), I2cError> {
        if operations.is_empty() {
            return Ok(());
        }
        let mut msgs: Vec<I2cMsg<'_>> = operations
            .iter_mut()
            .map(|op| {
                let msg = match op {
                    Operation::Read(buf) => I2cMsg::read(addr, &mut **buf),
                    Operation::Write(buf) => I2cMsg::write(addr, *buf),
                };
                msg.with_flags(flags)
            })
            .collect();
        let expected = msgs.len();
        let done = self.adapter.transfer(&mut msgs)?;
        if done == expected {
            Ok(())
        } else {
            Err(I2cError::Bus(embedded_hal::i2c::ErrorKind::Other))
        }
    }
}

impl embedded_hal::i2c::ErrorType for I2cController {
    type Error = I2cError;
}

impl embedded_hal::i2c::I2c<SevenBitAddress> for I2cController {
    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run(u16::from(addr), MsgFlags::empty(), operations)
    }
}

impl embedded_hal::i2c::I2c<TenBitAddress> for I2cController {
    fn transaction(
        &mut self,
        addr: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run(addr, MsgFlags::TEN, operations)
    }
}
