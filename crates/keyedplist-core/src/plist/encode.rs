//! Binary plist serialization.
//!
//! Encoding happens in two passes. The first flattens the value tree into
//! an object table in depth-first order (parents before children, the root
//! at index 0), merging equal scalars into a single slot. The second writes
//! the objects, then the offset table and trailer, choosing the narrowest
//! integer widths that can address every object and offset.

use super::marker::{Marker, LENGTH_ESCAPE};
use super::{Value, MAGIC, TRAILER_SIZE};
use bytes::BufMut;
use std::collections::HashMap;
use tracing::debug;

/// Binary plist encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder;

impl Encoder {
    /// Creates a new encoder
    pub fn new() -> Self {
        Self
    }

    /// Serialize `value` as the root of a new binary plist
    pub fn encode(&self, value: &Value) -> Vec<u8> {
        let mut table = ObjectTable::default();
        let root = table.flatten(value);
        table.write(root)
    }
}

/// Identity of a scalar for deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScalarKey<'v> {
    Null,
    Bool(bool),
    Int(i64),
    Real(u64),
    Date(u64),
    Data(&'v [u8]),
    String(&'v str),
    Uid(u64),
}

/// One entry of the flattened object table
#[derive(Debug)]
enum Slot<'v> {
    Scalar(&'v Value),
    Key(&'v str),
    Array(Vec<usize>),
    Set(Vec<usize>),
    Dict { keys: Vec<usize>, values: Vec<usize> },
}

#[derive(Debug, Default)]
struct ObjectTable<'v> {
    slots: Vec<Slot<'v>>,
    scalars: HashMap<ScalarKey<'v>, usize>,
}

impl<'v> ObjectTable<'v> {
    /// Assigns table indices to `value` and everything below it
    fn flatten(&mut self, value: &'v Value) -> usize {
        if let Some(key) = scalar_key(value) {
            return self.intern(key, Slot::Scalar(value));
        }

        let index = self.slots.len();
        self.slots.push(Slot::Array(Vec::new()));

        let slot = match value {
            Value::Array(items) => Slot::Array(items.iter().map(|v| self.flatten(v)).collect()),
            Value::Set(items) => Slot::Set(items.iter().map(|v| self.flatten(v)).collect()),
            Value::Dict(dict) => {
                let mut keys = Vec::with_capacity(dict.len());
                let mut values = Vec::with_capacity(dict.len());
                for (key, value) in dict.iter() {
                    keys.push(self.intern(ScalarKey::String(key), Slot::Key(key)));
                    values.push(self.flatten(value));
                }
                Slot::Dict { keys, values }
            }
            // Every other variant is a scalar
            _ => Slot::Scalar(value),
        };

        self.slots[index] = slot;
        index
    }

    fn intern(&mut self, key: ScalarKey<'v>, slot: Slot<'v>) -> usize {
        if let Some(&index) = self.scalars.get(&key) {
            return index;
        }
        let index = self.slots.len();
        self.slots.push(slot);
        self.scalars.insert(key, index);
        index
    }

    fn write(&self, root: usize) -> Vec<u8> {
        let ref_size = int_width(self.slots.len() as u64);
        let mut out = Vec::with_capacity(64 + self.slots.len() * 8);
        out.put_slice(MAGIC);

        let mut offsets = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            offsets.push(out.len() as u64);
            write_slot(&mut out, slot, ref_size);
        }

        let offset_table_offset = out.len() as u64;
        let offset_size = int_width(offsets.last().copied().unwrap_or(0));
        for &offset in &offsets {
            out.put_uint(offset, offset_size);
        }

        out.put_bytes(0, 6);
        out.put_u8(offset_size as u8);
        out.put_u8(ref_size as u8);
        out.put_u64(self.slots.len() as u64);
        out.put_u64(root as u64);
        out.put_u64(offset_table_offset);

        debug!(
            "Encoded bplist: {} objects, {} bytes (offset size {}, ref size {})",
            self.slots.len(),
            out.len(),
            offset_size,
            ref_size
        );
        debug_assert!(out.len() >= MAGIC.len() + TRAILER_SIZE);
        out
    }
}

fn scalar_key(value: &Value) -> Option<ScalarKey<'_>> {
    Some(match value {
        Value::Null => ScalarKey::Null,
        Value::Bool(b) => ScalarKey::Bool(*b),
        Value::Int(i) => ScalarKey::Int(*i),
        Value::Real(r) => ScalarKey::Real(r.to_bits()),
        Value::Date(ts) => ScalarKey::Date(ts.apple_seconds().to_bits()),
        Value::Data(data) => ScalarKey::Data(data),
        Value::AsciiString(s) | Value::UnicodeString(s) => ScalarKey::String(s),
        Value::Uid(uid) => ScalarKey::Uid(uid.0),
        Value::Array(_) | Value::Set(_) | Value::Dict(_) => return None,
    })
}

/// Narrowest of 1, 2, 4 or 8 bytes that holds `value` unsigned
fn int_width(value: u64) -> usize {
    if value <= 0xFF {
        1
    } else if value <= 0xFFFF {
        2
    } else if value <= 0xFFFF_FFFF {
        4
    } else {
        8
    }
}

/// Writes an integer object.
///
/// Non-negative values take the narrowest unsigned width; negative values
/// are always 8 bytes of two's complement.
fn write_int(out: &mut Vec<u8>, value: i64) {
    if value < 0 {
        out.put_u8(Marker::Int.with_low(3));
        out.put_i64(value);
        return;
    }

    let width = int_width(value as u64);
    out.put_u8(Marker::Int.with_low(width.trailing_zeros() as u8));
    out.put_uint(value as u64, width);
}

/// Writes a marker with an inline count, or the escape and an integer count
fn write_length(out: &mut Vec<u8>, marker: Marker, len: usize) {
    if len < usize::from(LENGTH_ESCAPE) {
        out.put_u8(marker.with_low(len as u8));
    } else {
        out.put_u8(marker.with_low(LENGTH_ESCAPE));
        write_int(out, len as i64);
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    if s.chars().all(|c| (c as u32) <= 0xFF) {
        write_length(out, Marker::AsciiString, s.chars().count());
        out.extend(s.chars().map(|c| c as u8));
    } else {
        let units: Vec<u16> = s.encode_utf16().collect();
        write_length(out, Marker::Utf16String, units.len());
        for unit in units {
            out.put_u16(unit);
        }
    }
}

fn write_refs(out: &mut Vec<u8>, refs: &[usize], ref_size: usize) {
    for &index in refs {
        out.put_uint(index as u64, ref_size);
    }
}

fn write_slot(out: &mut Vec<u8>, slot: &Slot<'_>, ref_size: usize) {
    match slot {
        Slot::Key(key) => write_string(out, key),
        Slot::Array(refs) => {
            write_length(out, Marker::Array, refs.len());
            write_refs(out, refs, ref_size);
        }
        Slot::Set(refs) => {
            write_length(out, Marker::Set, refs.len());
            write_refs(out, refs, ref_size);
        }
        Slot::Dict { keys, values } => {
            write_length(out, Marker::Dict, keys.len());
            write_refs(out, keys, ref_size);
            write_refs(out, values, ref_size);
        }
        Slot::Scalar(value) => match value {
            Value::Null => out.put_u8(Marker::NULL),
            Value::Bool(false) => out.put_u8(Marker::FALSE),
            Value::Bool(true) => out.put_u8(Marker::TRUE),
            Value::Int(i) => write_int(out, *i),
            Value::Real(r) => {
                out.put_u8(Marker::Real.with_low(3));
                out.put_f64(*r);
            }
            Value::Date(ts) => {
                out.put_u8(Marker::DATE);
                out.put_f64(ts.apple_seconds());
            }
            Value::Data(data) => {
                write_length(out, Marker::Data, data.len());
                out.put_slice(data);
            }
            Value::AsciiString(s) | Value::UnicodeString(s) => write_string(out, s),
            Value::Uid(uid) => {
                let width = int_width(uid.0);
                out.put_u8(Marker::Uid.with_low((width - 1) as u8));
                out.put_uint(uid.0, width);
            }
            // Collections never land in a scalar slot
            Value::Array(_) | Value::Set(_) | Value::Dict(_) => {}
        },
    }
}
