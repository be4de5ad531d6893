//! Binary plist parsing.
//!
//! Decoding starts from the trailer, walks the offset table to locate each
//! object, and decodes objects on demand starting from the root. Every
//! decoded object is memoized by index for the duration of one call, so an
//! object referenced from several collections is parsed once and every
//! reference shares the same [`Value`] allocation. An object
//! that (directly or indirectly) contains itself is rejected.

use super::marker::{Marker, LENGTH_ESCAPE};
use super::{Dictionary, Uid, Value, MAGIC, TRAILER_SIZE};
use crate::error::{Error, Result};
use crate::timestamp::Timestamp;
use bytes::Buf;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Default maximum nesting depth of collections
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Configuration for the decoder
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Maximum nesting depth of collections before decoding fails
    pub max_depth: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DecoderConfig {
    /// Creates a new decoder config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// The fixed 32-byte footer of a binary plist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Width in bytes of each offset table entry
    pub offset_int_size: u8,
    /// Width in bytes of each object reference
    pub object_ref_size: u8,
    /// Number of objects in the object table
    pub num_objects: u64,
    /// Index of the root object
    pub root_object: u64,
    /// Byte offset of the offset table
    pub offset_table_offset: u64,
}

impl Trailer {
    /// Reads and validates the trailer at the end of `data`.
    ///
    /// The magic header must already have been checked.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MAGIC.len() + TRAILER_SIZE {
            return Err(Error::TruncatedTrailer { len: data.len() });
        }

        let trailer_start = data.len() - TRAILER_SIZE;
        let mut buf = &data[trailer_start..];
        buf.advance(6);

        let trailer = Self {
            offset_int_size: buf.get_u8(),
            object_ref_size: buf.get_u8(),
            num_objects: buf.get_u64(),
            root_object: buf.get_u64(),
            offset_table_offset: buf.get_u64(),
        };

        trailer.validate(trailer_start)?;
        Ok(trailer)
    }

    fn validate(&self, trailer_start: usize) -> Result<()> {
        if !(1..=8).contains(&self.offset_int_size) {
            return Err(Error::invalid_trailer(
                trailer_start,
                format!("invalid offset int size: {}", self.offset_int_size),
            ));
        }
        if !(1..=8).contains(&self.object_ref_size) {
            return Err(Error::invalid_trailer(
                trailer_start,
                format!("invalid object ref size: {}", self.object_ref_size),
            ));
        }
        if self.num_objects == 0 {
            return Err(Error::invalid_trailer(trailer_start, "no objects"));
        }
        if self.root_object >= self.num_objects {
            return Err(Error::invalid_trailer(
                trailer_start,
                format!(
                    "root object {} out of range ({} objects)",
                    self.root_object, self.num_objects
                ),
            ));
        }

        let table_end = self
            .num_objects
            .checked_mul(u64::from(self.offset_int_size))
            .and_then(|len| len.checked_add(self.offset_table_offset));

        match table_end {
            Some(end)
                if self.offset_table_offset >= MAGIC.len() as u64
                    && end <= trailer_start as u64 => {}
            _ => {
                return Err(Error::invalid_trailer(
                    trailer_start,
                    format!(
                        "offset table at {} with {} entries is out of bounds",
                        self.offset_table_offset, self.num_objects
                    ),
                ))
            }
        }

        Ok(())
    }
}

/// Binary plist decoder
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    /// Creates a new decoder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new decoder with custom configuration
    pub fn with_config(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Decode a complete binary plist into its root value
    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        if !data.starts_with(MAGIC) {
            return Err(Error::InvalidMagic { offset: 0 });
        }

        let trailer = Trailer::parse(data)?;
        debug!(
            "Decoding bplist: {} objects, root {}, offset size {}, ref size {}",
            trailer.num_objects,
            trailer.root_object,
            trailer.offset_int_size,
            trailer.object_ref_size
        );

        let mut table = ObjectTable {
            data,
            trailer,
            objects_end: data.len() - TRAILER_SIZE,
            max_depth: self.config.max_depth,
            cache: HashMap::new(),
            in_progress: HashSet::new(),
        };

        let root_ref_offset = data.len() - 16;
        table.read_object(trailer.root_object, root_ref_offset, 0)
    }
}

/// Per-call decoding state
struct ObjectTable<'a> {
    data: &'a [u8],
    trailer: Trailer,
    /// First byte past the region objects may occupy
    objects_end: usize,
    max_depth: usize,
    cache: HashMap<u64, Value>,
    in_progress: HashSet<u64>,
}

impl<'a> ObjectTable<'a> {
    /// Returns `len` bytes of the object region starting at `offset`
    fn bytes_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        match offset.checked_add(len) {
            Some(end) if end <= self.objects_end => Ok(&self.data[offset..end]),
            _ => Err(Error::invalid_format(
                offset,
                format!("{} bytes requested past end of object data", len),
            )),
        }
    }

    /// Reads a big-endian unsigned integer of 1 to 8 bytes
    fn read_uint(&self, offset: usize, width: usize) -> Result<u64> {
        let mut bytes = self.bytes_at(offset, width)?;
        Ok(bytes.get_uint(width))
    }

    /// Resolves the object count of a marker, following the length escape.
    ///
    /// Returns the count and the offset where the object body starts.
    fn read_length(&self, marker: u8, offset: usize) -> Result<(usize, usize)> {
        let low = marker & 0x0F;
        if low != LENGTH_ESCAPE {
            return Ok((usize::from(low), offset + 1));
        }

        let int_marker = self.bytes_at(offset + 1, 1)?[0];
        if int_marker & 0xF0 != Marker::Int as u8 || int_marker & 0x0F > 3 {
            return Err(Error::invalid_format(
                offset + 1,
                format!("invalid length marker 0x{:02x}", int_marker),
            ));
        }

        let width = 1usize << (int_marker & 0x0F);
        let length = self.read_uint(offset + 2, width)?;
        let length = usize::try_from(length)
            .map_err(|_| Error::invalid_format(offset + 2, "length does not fit in memory"))?;

        Ok((length, offset + 2 + width))
    }

    /// Looks up the byte offset of an object through the offset table
    fn object_offset(&self, index: u64, ref_offset: usize) -> Result<usize> {
        if index >= self.trailer.num_objects {
            return Err(Error::ObjectIndexOutOfRange {
                index,
                count: self.trailer.num_objects,
                offset: ref_offset,
            });
        }

        let width = u64::from(self.trailer.offset_int_size);
        // In bounds: validated against the trailer in Trailer::parse
        let entry = (self.trailer.offset_table_offset + index * width) as usize;
        let mut bytes = &self.data[entry..entry + width as usize];
        let object_offset = bytes.get_uint(width as usize);

        match usize::try_from(object_offset) {
            Ok(offset) if offset >= MAGIC.len() && offset < self.objects_end => Ok(offset),
            _ => Err(Error::ObjectOffsetOutOfRange {
                index,
                object_offset,
            }),
        }
    }

    fn read_object(&mut self, index: u64, ref_offset: usize, depth: usize) -> Result<Value> {
        if let Some(value) = self.cache.get(&index) {
            trace!("Object {} served from cache", index);
            return Ok(value.clone());
        }

        let offset = self.object_offset(index, ref_offset)?;

        if depth > self.max_depth {
            return Err(Error::DepthLimitExceeded {
                depth: self.max_depth,
                offset,
            });
        }
        if !self.in_progress.insert(index) {
            return Err(Error::invalid_format(
                offset,
                format!("object {} contains itself", index),
            ));
        }

        let value = self.parse_object(offset, depth)?;

        self.in_progress.remove(&index);
        self.cache.insert(index, value.clone());
        Ok(value)
    }

    fn parse_object(&mut self, offset: usize, depth: usize) -> Result<Value> {
        let marker = self.bytes_at(offset, 1)?[0];
        let kind = Marker::try_from(marker).map_err(|_| Error::UnknownMarker { marker, offset })?;
        let low = marker & 0x0F;
        trace!("Parsing {:?} (0x{:02x}) at offset {}", kind, marker, offset);

        match kind {
            Marker::Simple => match marker {
                Marker::NULL => Ok(Value::Null),
                Marker::FALSE => Ok(Value::Bool(false)),
                Marker::TRUE => Ok(Value::Bool(true)),
                _ => Err(Error::UnknownMarker { marker, offset }),
            },
            Marker::Int => self.parse_int(low, offset).map(Value::Int),
            Marker::Real => {
                let body = offset + 1;
                match low {
                    2 => Ok(Value::Real(f64::from(self.bytes_at(body, 4)?.get_f32()))),
                    3 => Ok(Value::Real(self.bytes_at(body, 8)?.get_f64())),
                    _ => Err(Error::invalid_format(
                        offset,
                        format!("unsupported real width marker 0x{:02x}", marker),
                    )),
                }
            }
            Marker::Date => {
                if marker != Marker::DATE {
                    return Err(Error::UnknownMarker { marker, offset });
                }
                let seconds = self.bytes_at(offset + 1, 8)?.get_f64();
                Ok(Value::Date(Timestamp::from_apple(seconds)))
            }
            Marker::Data => {
                let (len, body) = self.read_length(marker, offset)?;
                Ok(Value::Data(self.bytes_at(body, len)?.to_vec()))
            }
            Marker::AsciiString => {
                let (len, body) = self.read_length(marker, offset)?;
                let bytes = self.bytes_at(body, len)?;
                Ok(Value::AsciiString(bytes.iter().map(|&b| char::from(b)).collect()))
            }
            Marker::Utf16String => {
                let (units, body) = self.read_length(marker, offset)?;
                let len = units
                    .checked_mul(2)
                    .ok_or_else(|| Error::invalid_format(offset, "string length overflow"))?;
                let bytes = self.bytes_at(body, len)?;
                let units = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
                let s = char::decode_utf16(units)
                    .collect::<std::result::Result<String, _>>()
                    .map_err(|e| Error::invalid_format(body, format!("invalid UTF-16: {}", e)))?;
                Ok(Value::UnicodeString(s))
            }
            Marker::Uid => {
                let width = usize::from(low) + 1;
                if width > 8 {
                    return Err(Error::invalid_format(
                        offset,
                        format!("UID of {} bytes is not supported", width),
                    ));
                }
                Ok(Value::Uid(Uid(self.read_uint(offset + 1, width)?)))
            }
            Marker::Array => self.parse_refs(marker, offset, depth).map(Value::array),
            Marker::Set => self.parse_refs(marker, offset, depth).map(Value::set),
            Marker::Dict => self.parse_dict(marker, offset, depth).map(Value::dict),
        }
    }

    fn parse_int(&self, low: u8, offset: usize) -> Result<i64> {
        let body = offset + 1;
        match low {
            // 1, 2 and 4 byte integers are unsigned
            0..=2 => {
                let width = 1usize << low;
                Ok(self.read_uint(body, width)? as i64)
            }
            3 => Ok(self.bytes_at(body, 8)?.get_i64()),
            4 => {
                let wide = self.bytes_at(body, 16)?.get_i128();
                i64::try_from(wide).map_err(|_| {
                    Error::invalid_format(offset, format!("integer {} exceeds 64 bits", wide))
                })
            }
            _ => Err(Error::invalid_format(
                offset,
                format!("unsupported integer width 2^{}", low),
            )),
        }
    }

    /// Reads `count` object references starting at `start`
    fn ref_area(&self, start: usize, count: usize) -> Result<Vec<(u64, usize)>> {
        let ref_size = usize::from(self.trailer.object_ref_size);
        let len = count
            .checked_mul(ref_size)
            .ok_or_else(|| Error::invalid_format(start, "collection length overflow"))?;
        let mut area = self.bytes_at(start, len)?;

        Ok((0..count)
            .map(|i| (area.get_uint(ref_size), start + i * ref_size))
            .collect())
    }

    fn parse_refs(&mut self, marker: u8, offset: usize, depth: usize) -> Result<Vec<Value>> {
        let (count, body) = self.read_length(marker, offset)?;
        let refs = self.ref_area(body, count)?;

        refs.into_iter()
            .map(|(index, ref_offset)| self.read_object(index, ref_offset, depth + 1))
            .collect()
    }

    fn parse_dict(&mut self, marker: u8, offset: usize, depth: usize) -> Result<Dictionary> {
        let (count, body) = self.read_length(marker, offset)?;
        let key_refs = self.ref_area(body, count)?;
        let values_start = body + count * usize::from(self.trailer.object_ref_size);
        let value_refs = self.ref_area(values_start, count)?;

        let mut dict = Dictionary::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);

        for ((key_index, key_offset), (value_index, value_offset)) in
            key_refs.into_iter().zip(value_refs)
        {
            let key = match self.read_object(key_index, key_offset, depth + 1)? {
                Value::AsciiString(s) | Value::UnicodeString(s) => s,
                other => {
                    return Err(Error::invalid_format(
                        key_offset,
                        format!("dictionary key is a {}, not a string", other.kind()),
                    ))
                }
            };
            let value = self.read_object(value_index, value_offset, depth + 1)?;

            if seen.insert(key.clone()) {
                dict.push_unchecked(key, value);
            } else {
                dict.insert(key, value);
            }
        }

        Ok(dict)
    }
}
