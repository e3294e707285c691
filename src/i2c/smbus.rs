// Licensed under the Apache-2.0 license

//! SMBus transactions.
//!
//! Engines with native SMBus support get the request as is; everything else
//! is emulated with plain I2C messages on the same bus lock.

use std::time::Instant;

use embedded_hal::i2c::ErrorKind;

use crate::i2c::adapter::Adapter;
use crate::i2c::client::Client;
use crate::i2c::common::{ClientFlags, Functionality, I2C_ADDR_DEVICE_ID};
use crate::i2c::error::{I2cError, Result};
use crate::i2c::lock::LockScope;
use crate::i2c::msg::{I2cMsg, MsgFlags};
use crate::i2c::traits::XferCaps;

/// Largest SMBus block payload.
pub const I2C_SMBUS_BLOCK_MAX: usize = 32;

pub type SmbusBlock = heapless::Vec<u8, I2C_SMBUS_BLOCK_MAX>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbusDirection {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbusProtocol {
    Quick,
    Byte,
    ByteData,
    WordData,
    I2cBlockData,
}

/// Payload of an SMBus transaction. For block reads the block's length is
/// the number of bytes requested.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SmbusData {
    #[default]
    None,
    Byte(u8),
    Word(u16),
    Block(SmbusBlock),
}

/// One SMBus transaction as handed to an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbusRequest {
    pub addr: u16,
    pub flags: ClientFlags,
    pub direction: SmbusDirection,
    pub command: u8,
    pub protocol: SmbusProtocol,
    pub data: SmbusData,
}

impl SmbusRequest {
    #[must_use]
    pub fn new(addr: u16, direction: SmbusDirection, protocol: SmbusProtocol) -> Self {
        Self {
            addr,
            flags: ClientFlags::empty(),
            direction,
            command: 0,
            protocol,
            data: SmbusData::None,
        }
    }

    #[must_use]
    pub fn flags(mut self, flags: ClientFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn command(mut self, command: u8) -> Self {
        self.command = command;
        self
    }

    #[must_use]
    pub fn data(mut self, data: SmbusData) -> Self {
        self.data = data;
        self
    }
}

/// Manufacturer, part and revision read from the device-ID address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer_id: u16,
    pub part_id: u16,
    pub die_revision: u8,
}

impl DeviceIdentity {
    #[must_use]
    pub fn from_raw(raw: [u8; 3]) -> Self {
        let [b0, b1, b2] = raw;
        Self {
            manufacturer_id: (u16::from(b0) << 4) | (u16::from(b1) >> 4),
            part_id: (u16::from(b1 & 0x0f) << 5) | (u16::from(b2) >> 3),
            die_revision: b2 & 0x07,
        }
    }
}

fn write_data_byte(data: &SmbusData) -> Result<u8> {
    match *data {
        SmbusData::Byte(value) => Ok(value),
        _ => Err(I2cError::InvalidArgument("SMBus write needs a byte")),
    }
}

impl Adapter {
    /// Lock the segment and run one SMBus transaction.
    ///
    /// # Errors
    ///
    /// Same classification as [`Adapter::transfer`].
    pub fn smbus_xfer(&self, req: &mut SmbusRequest) -> Result<()> {
        let guard = self.lock_for_transfer(LockScope::Segment)?;
        let ret = self.smbus_xfer_unlocked(req);
        drop(guard);
        ret
    }

    pub(crate) fn smbus_xfer_unlocked(&self, req: &mut SmbusRequest) -> Result<()> {
        let caps = self.algorithm().capabilities();
        if !caps.contains(XferCaps::SMBUS_XFER) {
            return self.smbus_xfer_emulated(req);
        }
        // the sleeping SMBus entry point is off limits in atomic context
        if self.in_atomic()
            && !caps.contains(XferCaps::SMBUS_XFER_ATOMIC)
            && caps.contains(XferCaps::MASTER_XFER_ATOMIC)
        {
            return self.smbus_xfer_emulated(req);
        }
        if self.is_suspended() {
            if self.first_suspended_report() {
                log::warn!("{}: SMBus transfer while suspended", self.dev_name());
            }
            return Err(I2cError::Shutdown);
        }

        let atomic = self.in_atomic() && caps.contains(XferCaps::SMBUS_XFER_ATOMIC);
        let timeout = self.timeout_duration();
        let start = Instant::now();
        let mut ret = Err(I2cError::ArbitrationRetry);
        for _ in 0..=self.retries() {
            ret = if atomic {
                nb::block!(self.algorithm().smbus_xfer_atomic(self, req))
            } else {
                self.algorithm().smbus_xfer(self, req)
            };
            if ret != Err(I2cError::ArbitrationRetry) || start.elapsed() > timeout {
                break;
            }
        }

        match ret {
            Err(I2cError::Unsupported(_)) if caps.contains(XferCaps::MASTER_XFER) => {
                self.smbus_xfer_emulated(req)
            }
            other => other,
        }
    }

    fn smbus_xfer_emulated(&self, req: &mut SmbusRequest) -> Result<()> {
        let addr = req.addr;
        let flags = if req.flags.contains(ClientFlags::TEN) {
            MsgFlags::TEN
        } else {
            MsgFlags::empty()
        };
        let cmd = [req.command];

        match (req.protocol, req.direction) {
            (SmbusProtocol::Quick, SmbusDirection::Read) => {
                let mut empty = [0u8; 0];
                self.raw_transfer(&mut [I2cMsg::read(addr, &mut empty).with_flags(flags)])?;
            }
            (SmbusProtocol::Quick, SmbusDirection::Write) => {
                self.raw_transfer(&mut [I2cMsg::write(addr, &[]).with_flags(flags)])?;
            }
            (SmbusProtocol::Byte, SmbusDirection::Read) => {
                let mut buf = [0u8; 1];
                self.raw_transfer(&mut [I2cMsg::read(addr, &mut buf).with_flags(flags)])?;
                let [value] = buf;
                req.data = SmbusData::Byte(value);
            }
            (SmbusProtocol::Byte, SmbusDirection::Write) => {
                self.raw_transfer(&mut [I2cMsg::write(addr, &cmd).with_flags(flags)])?;
            }
            (SmbusProtocol::ByteData, SmbusDirection::Read) => {
                let mut buf = [0u8; 1];
                self.raw_transfer(&mut [
                    I2cMsg::write(addr, &cmd).with_flags(flags),
                    I2cMsg::read(addr, &mut buf).with_flags(flags),
                ])?;
                let [value] = buf;
                req.data = SmbusData::Byte(value);
            }
            (SmbusProtocol::ByteData, SmbusDirection::Write) => {
                let out = [req.command, write_data_byte(&req.data)?];
                self.raw_transfer(&mut [I2cMsg::write(addr, &out).with_flags(flags)])?;
            }
            (SmbusProtocol::WordData, SmbusDirection::Read) => {
                let mut buf = [0u8; 2];
                self.raw_transfer(&mut [
                    I2cMsg::write(addr, &cmd).with_flags(flags),
                    I2cMsg::read(addr, &mut buf).with_flags(flags),
                ])?;
                req.data = SmbusData::Word(u16::from_le_bytes(buf));
            }
            (SmbusProtocol::WordData, SmbusDirection::Write) => {
                let SmbusData::Word(word) = req.data else {
                    return Err(I2cError::InvalidArgument("SMBus word write needs a word"));
                };
                let [lo, hi] = word.to_le_bytes();
                let out = [req.command, lo, hi];
                self.raw_transfer(&mut [I2cMsg::write(addr, &out).with_flags(flags)])?;
            }
            (SmbusProtocol::I2cBlockData, SmbusDirection::Read) => {
                let SmbusData::Block(block) = &mut req.data else {
                    return Err(I2cError::InvalidArgument("block read needs a block buffer"));
                };
                if block.is_empty() {
                    return Err(I2cError::InvalidArgument("invalid block length"));
                }
                self.raw_transfer(&mut [
                    I2cMsg::write(addr, &cmd).with_flags(flags),
                    I2cMsg::read(addr, block.as_mut_slice()).with_flags(flags),
                ])?;
            }
            (SmbusProtocol::I2cBlockData, SmbusDirection::Write) => {
                let SmbusData::Block(block) = &req.data else {
                    return Err(I2cError::InvalidArgument("block write needs a block buffer"));
                };
                let mut out: heapless::Vec<u8, { I2C_SMBUS_BLOCK_MAX + 1 }> = heapless::Vec::new();
                out.push(req.command)
                    .map_err(|_| I2cError::InvalidArgument("invalid block length"))?;
                out.extend_from_slice(block)
                    .map_err(|()| I2cError::InvalidArgument("invalid block length"))?;
                self.raw_transfer(&mut [I2cMsg::write(addr, &out).with_flags(flags)])?;
            }
        }
        Ok(())
    }

    fn smbus_simple(
        &self,
        addr: u16,
        flags: ClientFlags,
        direction: SmbusDirection,
        command: u8,
        protocol: SmbusProtocol,
        data: SmbusData,
    ) -> Result<SmbusData> {
        let mut req = SmbusRequest::new(addr, direction, protocol)
            .flags(flags)
            .command(command)
            .data(data);
        self.smbus_xfer(&mut req)?;
        Ok(req.data)
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_quick(&self, addr: u16, direction: SmbusDirection) -> Result<()> {
        let mut req = SmbusRequest::new(addr, direction, SmbusProtocol::Quick);
        self.smbus_xfer(&mut req)
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_byte(&self, addr: u16, flags: ClientFlags) -> Result<u8> {
        let data = self.smbus_simple(
            addr,
            flags,
            SmbusDirection::Read,
            0,
            SmbusProtocol::Byte,
            SmbusData::None,
        )?;
        match data {
            SmbusData::Byte(value) => Ok(value),
            _ => Err(I2cError::Bus(ErrorKind::Other)),
        }
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_byte_data(&self, addr: u16, flags: ClientFlags, command: u8) -> Result<u8> {
        let data = self.smbus_simple(
            addr,
            flags,
            SmbusDirection::Read,
            command,
            SmbusProtocol::ByteData,
            SmbusData::None,
        )?;
        match data {
            SmbusData::Byte(value) => Ok(value),
            _ => Err(I2cError::Bus(ErrorKind::Other)),
        }
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_write_byte_data(
        &self,
        addr: u16,
        flags: ClientFlags,
        command: u8,
        value: u8,
    ) -> Result<()> {
        self.smbus_simple(
            addr,
            flags,
            SmbusDirection::Write,
            command,
            SmbusProtocol::ByteData,
            SmbusData::Byte(value),
        )
        .map(|_| ())
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_word_data(&self, addr: u16, flags: ClientFlags, command: u8) -> Result<u16> {
        let data = self.smbus_simple(
            addr,
            flags,
            SmbusDirection::Read,
            command,
            SmbusProtocol::WordData,
            SmbusData::None,
        )?;
        match data {
            SmbusData::Word(value) => Ok(value),
            _ => Err(I2cError::Bus(ErrorKind::Other)),
        }
    }

    /// Read `len` bytes starting at register `command`.
    ///
    /// # Errors
    ///
    /// [`I2cError::InvalidArgument`] for a zero length, otherwise see
    /// [`Adapter::smbus_xfer`]. Longer requests are cut to
    /// [`I2C_SMBUS_BLOCK_MAX`] bytes.
    pub fn smbus_read_i2c_block_data(
        &self,
        addr: u16,
        flags: ClientFlags,
        command: u8,
        len: usize,
    ) -> Result<SmbusBlock> {
        let mut block = SmbusBlock::new();
        block
            .resize_default(len.min(I2C_SMBUS_BLOCK_MAX))
            .map_err(|()| I2cError::InvalidArgument("invalid block length"))?;
        let data = self.smbus_simple(
            addr,
            flags,
            SmbusDirection::Read,
            command,
            SmbusProtocol::I2cBlockData,
            SmbusData::Block(block),
        )?;
        match data {
            SmbusData::Block(block) => Ok(block),
            _ => Err(I2cError::Bus(ErrorKind::Other)),
        }
    }
}

impl Client {
    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_byte(&self) -> Result<u8> {
        self.adapter()?.smbus_read_byte(self.addr(), self.flags())
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_byte_data(&self, command: u8) -> Result<u8> {
        self.adapter()?
            .smbus_read_byte_data(self.addr(), self.flags(), command)
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_write_byte_data(&self, command: u8, value: u8) -> Result<()> {
        self.adapter()?
            .smbus_write_byte_data(self.addr(), self.flags(), command, value)
    }

    /// # Errors
    ///
    /// See [`Adapter::smbus_xfer`].
    pub fn smbus_read_word_data(&self, command: u8) -> Result<u16> {
        self.adapter()?
            .smbus_read_word_data(self.addr(), self.flags(), command)
    }

    /// Query the manufacturer and part through the reserved device-ID address.
    ///
    /// # Errors
    ///
    /// [`I2cError::Unsupported`] if the adapter cannot do I2C block reads,
    /// otherwise the transfer error.
    pub fn get_device_id(&self) -> Result<DeviceIdentity> {
        let adapter = self.adapter()?;
        if !adapter.check_functionality(Functionality::SMBUS_READ_I2C_BLOCK) {
            return Err(I2cError::Unsupported("device ID needs I2C block reads"));
        }
        let command = u8::try_from(self.addr() << 1)
            .map_err(|_| I2cError::InvalidAddress { addr: self.addr(), ten_bit: true })?;
        let block = adapter.smbus_read_i2c_block_data(
            I2C_ADDR_DEVICE_ID,
            ClientFlags::empty(),
            command,
            3,
        )?;
        match block.as_slice() {
            &[b0, b1, b2] => Ok(DeviceIdentity::from_raw([b0, b1, b2])),
            _ => Err(I2cError::Bus(ErrorKind::Other)),
        }
    }
}
