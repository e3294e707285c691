// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C core.
//!
//! Flag sets, bus-speed definitions and the fixed sizes shared by the
//! registry, the dispatcher and the detector.

use fugit::HertzU32;

/// Maximum length of a device type name, terminator excluded.
pub const I2C_NAME_SIZE: usize = 20;

/// Fixed-capacity device type name.
pub type TypeName = heapless::String<I2C_NAME_SIZE>;

/// Offset OR'd into the encoded address of ten-bit clients.
pub const I2C_ADDR_OFFSET_TEN_BIT: u16 = 0xa000;
/// Offset OR'd into the encoded address of slave-mode clients.
pub const I2C_ADDR_OFFSET_SLAVE: u16 = 0x1000;

/// Reserved address answering device-ID queries.
pub const I2C_ADDR_DEVICE_ID: u16 = 0x7c;

/// Largest payload a single message can carry.
pub const I2C_MSG_MAX_LEN: usize = u16::MAX as usize;

bitflags::bitflags! {
    /// Per-client behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientFlags: u16 {
        /// SMBus packet error checking
        const PEC = 0x04;
        /// Ten-bit chip address
        const TEN = 0x10;
        /// The address is one of our own, served in slave mode
        const SLAVE = 0x20;
        /// Host notify interrupt requested
        const HOST_NOTIFY = 0x40;
        /// Device may wake the system
        const WAKE = 0x80;
    }
}

bitflags::bitflags! {
    /// Device classes an adapter accepts for auto-detection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u32 {
        const HWMON = 1 << 0;
        const DDC = 1 << 3;
        const SPD = 1 << 7;
        /// Adapter dropped class-based instantiation
        const DEPRECATED = 1 << 8;
    }
}

bitflags::bitflags! {
    /// Capabilities an algorithm reports through `functionality()`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Functionality: u32 {
        const I2C = 0x0000_0001;
        const TEN_BIT_ADDR = 0x0000_0002;
        const PROTOCOL_MANGLING = 0x0000_0004;
        const SMBUS_PEC = 0x0000_0008;
        const NOSTART = 0x0000_0010;
        const SLAVE = 0x0000_0020;
        const SMBUS_QUICK = 0x0001_0000;
        const SMBUS_READ_BYTE = 0x0002_0000;
        const SMBUS_WRITE_BYTE = 0x0004_0000;
        const SMBUS_READ_BYTE_DATA = 0x0008_0000;
        const SMBUS_WRITE_BYTE_DATA = 0x0010_0000;
        const SMBUS_READ_WORD_DATA = 0x0020_0000;
        const SMBUS_WRITE_WORD_DATA = 0x0040_0000;
        const SMBUS_READ_I2C_BLOCK = 0x0400_0000;
        const SMBUS_WRITE_I2C_BLOCK = 0x0800_0000;
        const SMBUS_HOST_NOTIFY = 0x1000_0000;

        /// What a plain I2C engine can emulate.
        const SMBUS_EMUL = Self::SMBUS_QUICK.bits()
            | Self::SMBUS_READ_BYTE.bits()
            | Self::SMBUS_WRITE_BYTE.bits()
            | Self::SMBUS_READ_BYTE_DATA.bits()
            | Self::SMBUS_WRITE_BYTE_DATA.bits()
            | Self::SMBUS_READ_WORD_DATA.bits()
            | Self::SMBUS_WRITE_WORD_DATA.bits()
            | Self::SMBUS_READ_I2C_BLOCK.bits()
            | Self::SMBUS_WRITE_I2C_BLOCK.bits();
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
    Turbo = 1_400_000,
    HighSpeed = 3_400_000,
    UltraFast = 5_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub fn hz(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }

    /// Map an exact bus frequency back to its mode, if it names one.
    #[must_use]
    pub fn from_hz(freq: HertzU32) -> Option<Self> {
        match freq.raw() {
            100_000 => Some(Self::Standard),
            400_000 => Some(Self::Fast),
            1_000_000 => Some(Self::FastPlus),
            1_400_000 => Some(Self::Turbo),
            3_400_000 => Some(Self::HighSpeed),
            5_000_000 => Some(Self::UltraFast),
            _ => None,
        }
    }

    #[must_use]
    pub fn mode_string(self) -> &'static str {
        match self {
            Self::Standard => "Standard Mode (100 kHz)",
            Self::Fast => "Fast Mode (400 kHz)",
            Self::FastPlus => "Fast Mode Plus (1.0 MHz)",
            Self::Turbo => "Turbo Mode (1.4 MHz)",
            Self::HighSpeed => "High Speed Mode (3.4 MHz)",
            Self::UltraFast => "Ultra Fast Mode (5.0 MHz)",
        }
    }
}

/// Human-readable name of a bus frequency.
#[must_use]
pub fn freq_mode_string(freq: HertzU32) -> &'static str {
    I2cSpeed::from_hz(freq).map_or("Unknown Mode", I2cSpeed::mode_string)
}
