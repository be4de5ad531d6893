//! Binary property list (`bplist00`) values and codec.
//!
//! [`Value`] is the tree of primitive plist values. [`from_bytes`] and
//! [`to_bytes`] convert between that tree and the wire format.
//!
//! ## Wire Format Overview
//!
//! ```text
//! +----------+----------------+--------------+---------------+
//! | bplist00 | object table   | offset table | trailer (32B) |
//! +----------+----------------+--------------+---------------+
//! ```
//!
//! The trailer gives the byte widths of offsets and object references, the
//! object count, the root object index and where the offset table starts.
//! Collections hold object references, never inline values.

pub mod decode;
pub mod encode;
pub mod marker;

use crate::error::Result;
use crate::timestamp::Timestamp;
use std::fmt;
use std::rc::Rc;

pub use decode::{Decoder, DecoderConfig, Trailer};
pub use encode::Encoder;
pub use marker::Marker;

/// The 8-byte magic header
pub const MAGIC: &[u8; 8] = b"bplist00";

/// Size of the fixed trailer at the end of every binary plist
pub const TRAILER_SIZE: usize = 32;

/// Parse a binary plist with the default configuration
pub fn from_bytes(data: &[u8]) -> Result<Value> {
    Decoder::new().decode(data)
}

/// Serialize a value tree into a binary plist
pub fn to_bytes(value: &Value) -> Vec<u8> {
    Encoder::new().encode(value)
}

/// An archive reference: an index into an external object table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Uid(pub u64);

impl Uid {
    /// The reference to the `$null` sentinel
    pub const NULL: Uid = Uid(0);

    /// Returns the referenced index
    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns true for the `$null` reference
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UID({})", self.0)
    }
}

impl From<u64> for Uid {
    fn from(value: u64) -> Self {
        Uid(value)
    }
}

/// A primitive plist value.
///
/// Collections are reference counted. Cloning a value, or reading an object
/// that several collections in a file reference, shares the allocation.
#[derive(Debug, Clone)]
pub enum Value {
    /// The null object
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// Double precision real
    Real(f64),
    /// Point in time
    Date(Timestamp),
    /// Raw bytes
    Data(Vec<u8>),
    /// String stored with one byte per character
    AsciiString(String),
    /// String stored as UTF-16
    UnicodeString(String),
    /// Ordered sequence
    Array(Rc<Vec<Value>>),
    /// Ordered string-keyed mapping
    Dict(Rc<Dictionary>),
    /// Unordered collection
    Set(Rc<Vec<Value>>),
    /// Archive reference
    Uid(Uid),
}

impl Value {
    /// Creates a string value, picking the variant the encoder would use
    pub fn string(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.chars().all(|c| (c as u32) <= 0xFF) {
            Value::AsciiString(s)
        } else {
            Value::UnicodeString(s)
        }
    }

    /// Creates an array
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    /// Creates a set
    pub fn set(items: Vec<Value>) -> Self {
        Value::Set(Rc::new(items))
    }

    /// Creates a dictionary
    pub fn dict(dict: Dictionary) -> Self {
        Value::Dict(Rc::new(dict))
    }

    /// Returns true for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the content of either string variant
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::AsciiString(s) | Value::UnicodeString(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the real value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the reference value
    pub fn as_uid(&self) -> Option<Uid> {
        match self {
            Value::Uid(uid) => Some(*uid),
            _ => None,
        }
    }

    /// Returns the dictionary
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Value::Dict(dict) => Some(dict.as_ref()),
            _ => None,
        }
    }

    /// Returns the array elements
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Returns true if both are the same collection allocation
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Address of the shared allocation, for collection variants
    pub(crate) fn identity(&self) -> Option<usize> {
        let ptr = match self {
            Value::Array(items) | Value::Set(items) => Rc::as_ptr(items) as *const (),
            Value::Dict(dict) => Rc::as_ptr(dict) as *const (),
            _ => return None,
        };
        Some(ptr as usize)
    }

    /// Short name of the variant, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Real(_) => "real",
            Value::Date(_) => "date",
            Value::Data(_) => "data",
            Value::AsciiString(_) | Value::UnicodeString(_) => "string",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Uid(_) => "uid",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Set(a), Value::Set(b)) => {
                Rc::ptr_eq(a, b) || unordered_eq(a.as_slice(), b.as_slice())
            }
            (Value::Uid(a), Value::Uid(b)) => a == b,
            (a, b) => match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

/// Multiset comparison for collections whose order carries no meaning
pub(crate) fn unordered_eq<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut matched = vec![false; b.len()];
    a.iter().all(|item| {
        let hit = b
            .iter()
            .enumerate()
            .position(|(i, candidate)| !matched[i] && candidate == item);
        match hit {
            Some(i) => {
                matched[i] = true;
                true
            }
            None => false,
        }
    })
}

/// Ordered mapping from string keys to values.
///
/// Entries keep the order they were inserted (or read from the file).
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<(String, Value)>,
}

impl Dictionary {
    /// Creates an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty dictionary with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns true if the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces a key, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Appends an entry without checking for an existing key
    pub(crate) fn push_unchecked(&mut self, key: String, value: Value) {
        self.entries.push((key, value));
    }

    /// Iterates entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|v| v == value))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (key, value) in iter {
            dict.insert(key, value);
        }
        dict
    }
}

impl IntoIterator for Dictionary {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::string(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Data(value)
    }
}

impl From<Uid> for Value {
    fn from(value: Uid) -> Self {
        Value::Uid(value)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::Date(value)
    }
}

impl From<Dictionary> for Value {
    fn from(value: Dictionary) -> Self {
        Value::dict(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_variant_choice() {
        assert!(matches!(Value::string("yo"), Value::AsciiString(_)));
        assert!(matches!(Value::string("caf\u{e9}"), Value::AsciiString(_)));
        assert!(matches!(Value::string("\u{2603}"), Value::UnicodeString(_)));
    }

    #[test]
    fn test_string_variants_compare_by_content() {
        assert_eq!(
            Value::AsciiString("abc".into()),
            Value::UnicodeString("abc".into())
        );
        assert_ne!(Value::AsciiString("abc".into()), Value::Data(b"abc".to_vec()));
    }

    #[test]
    fn test_dictionary_insert_replaces_in_place() {
        let mut dict = Dictionary::new();
        dict.insert("a", 1);
        dict.insert("b", 2);
        assert_eq!(dict.insert("a", 3), Some(Value::Int(1)));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(dict.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_dictionary_eq_ignores_order() {
        let a: Dictionary = [("a", 1), ("b", 2)].into_iter().collect();
        let b: Dictionary = [("b", 2), ("a", 1)].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_eq_ignores_order() {
        let a = Value::set(vec![1.into(), 2.into(), 2.into()]);
        let b = Value::set(vec![2.into(), 1.into(), 2.into()]);
        let c = Value::set(vec![1.into(), 1.into(), 2.into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_clone_shares_collections() {
        let a = Value::array(vec![1.into(), "x".into()]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Value::array(vec![1.into(), "x".into()])));
        assert!(!Value::Int(1).ptr_eq(&Value::Int(1)));
    }

    #[test]
    fn test_uid() {
        assert!(Uid::NULL.is_null());
        assert_eq!(Uid(7).get(), 7);
        assert_eq!(Uid(7).to_string(), "UID(7)");
    }
}
