//! Object marker bytes.
//!
//! Every object in the object table starts with a marker byte. The high
//! nibble selects the type, the low nibble is either an inline size or
//! `0xF`, meaning an integer object with the real length follows.
//!
//! - `0x00`/`0x08`/`0x09`: null, false, true
//! - `0x1n`: integer of `2^n` bytes
//! - `0x2n`: real of `2^n` bytes
//! - `0x33`: date, 8-byte real
//! - `0x4n`: data
//! - `0x5n`: single-byte string
//! - `0x6n`: UTF-16BE string
//! - `0x8n`: UID of `n + 1` bytes
//! - `0xAn`: array
//! - `0xCn`: set
//! - `0xDn`: dictionary

use crate::error::{Error, Result};

/// Low nibble value signalling an out-of-line length
pub const LENGTH_ESCAPE: u8 = 0x0F;

/// Object types, by marker high nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Marker {
    /// Null, false and true
    Simple = 0x00,
    /// Big-endian integer
    Int = 0x10,
    /// Big-endian IEEE-754 real
    Real = 0x20,
    /// Apple-epoch date
    Date = 0x30,
    /// Raw bytes
    Data = 0x40,
    /// Single-byte string
    AsciiString = 0x50,
    /// UTF-16BE string
    Utf16String = 0x60,
    /// Archive reference
    Uid = 0x80,
    /// Ordered collection
    Array = 0xA0,
    /// Unordered collection
    Set = 0xC0,
    /// Key/value collection
    Dict = 0xD0,
}

impl Marker {
    /// Marker byte for null
    pub const NULL: u8 = 0x00;
    /// Marker byte for false
    pub const FALSE: u8 = 0x08;
    /// Marker byte for true
    pub const TRUE: u8 = 0x09;
    /// Marker byte for an 8-byte date
    pub const DATE: u8 = 0x33;

    /// Combines the type nibble with a low nibble
    pub fn with_low(self, low: u8) -> u8 {
        self as u8 | (low & 0x0F)
    }
}

impl TryFrom<u8> for Marker {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value & 0xF0 {
            0x00 => Ok(Marker::Simple),
            0x10 => Ok(Marker::Int),
            0x20 => Ok(Marker::Real),
            0x30 => Ok(Marker::Date),
            0x40 => Ok(Marker::Data),
            0x50 => Ok(Marker::AsciiString),
            0x60 => Ok(Marker::Utf16String),
            0x80 => Ok(Marker::Uid),
            0xA0 => Ok(Marker::Array),
            0xC0 => Ok(Marker::Set),
            0xD0 => Ok(Marker::Dict),
            _ => Err(Error::UnknownMarker {
                marker: value,
                offset: 0,
            }),
        }
    }
}
