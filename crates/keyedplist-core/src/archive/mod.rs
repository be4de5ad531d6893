//! `NSKeyedArchiver` object graphs.
//!
//! An archive is a binary plist dictionary whose `$objects` array holds every
//! archived object once. Records reference each other (and their class
//! metadata) by [`Uid`], so shared objects and cycles survive the trip.
//!
//! Application types take part through the two-method delegate interface
//! ([`Archivable`] and [`Unarchivable`]) and a [`ClassRegistry`] that maps
//! them to Cocoa class names. The registry is passed into every call; nothing
//! here keeps global state.
//!
//! Cycles are supported on the way out only. [`Archive`] reserves an
//! object's UID before encoding its fields, so a record may reference itself.
//! [`Unarchive`] has no way to hand out an instance before its delegate has
//! built it, so it reports [`Error::CircularReference`] instead.

pub mod archiver;
pub mod builtins;
pub mod registry;
pub mod unarchiver;

use crate::error::{Error, Result};
use crate::plist::{unordered_eq, Uid, Value};
use crate::timestamp::Timestamp;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

pub use archiver::{Archive, ArchivingObject};
pub use builtins::MutableData;
pub use registry::{ClassDelegate, ClassRegistry, DecodeFn, EncodeFn};
pub use unarchiver::{ArchivedObject, Unarchive};

/// Value of the `$archiver` key
pub const NS_KEYED_ARCHIVER: &str = "NSKeyedArchiver";

/// Value of the `$version` key
pub const ARCHIVE_VERSION: i64 = 100_000;

/// Pack an object graph into an `NSKeyedArchiver` binary plist
pub fn archive(root: &Object, registry: &ClassRegistry) -> Result<Vec<u8>> {
    let mut archiver = Archive::new(registry);
    let top = archiver.archive(root)?;
    let bytes = archiver.into_bytes(top);
    debug!("Archived object graph into {} bytes", bytes.len());
    Ok(bytes)
}

/// Unpack an `NSKeyedArchiver` binary plist into an object graph
pub fn unarchive(data: &[u8], registry: &ClassRegistry) -> Result<Object> {
    Unarchive::new(data, registry).top_object()
}

/// Read and unpack an archive from disk
pub fn unarchive_file(path: impl AsRef<Path>, registry: &ClassRegistry) -> Result<Object> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
    unarchive(&data, registry)
}

/// An application type stored as an archived record.
///
/// Implemented for every `'static` type with `Debug` and `PartialEq`, which
/// is what lets [`Object`] downcast instances and compare them.
pub trait Instance: Any + Debug {
    /// Upcast for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Compares with another instance of possibly different type
    fn dyn_eq(&self, other: &dyn Instance) -> bool;

    /// Rust type name, for diagnostics
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Debug + PartialEq> Instance for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Instance) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Writes a type's fields into an archive record
pub trait Archivable {
    /// Encode each field with [`ArchivingObject::encode`]
    fn encode_archive(&self, archiver: &mut ArchivingObject<'_, '_>) -> Result<()>;
}

/// Rebuilds a type from an archive record
pub trait Unarchivable: Sized {
    /// Decode each field with [`ArchivedObject::decode`]
    fn decode_archive(archived: &mut ArchivedObject<'_, '_>) -> Result<Self>;
}

/// A node of an application object graph.
///
/// Compound variants are reference counted. Cloning one shares the
/// allocation, and the allocation is the identity the archiver uses to emit
/// a shared object once.
#[derive(Debug, Clone)]
pub enum Object {
    /// Absent value, archived as UID 0
    Null,
    /// Boolean, inlined into records
    Bool(bool),
    /// Integer, inlined into records
    Int(i64),
    /// Real, inlined into records
    Real(f64),
    /// String
    String(String),
    /// Raw bytes
    Data(Vec<u8>),
    /// Unresolved archive reference
    Uid(Uid),
    /// `NSDate`
    Date(Timestamp),
    /// `NSArray`
    Array(Rc<Vec<Object>>),
    /// `NSSet`, order carries no meaning
    Set(Rc<Vec<Object>>),
    /// `NSDictionary`, as ordered key/value pairs
    Dict(Rc<Vec<(Object, Object)>>),
    /// A registered application type
    Instance(Rc<dyn Instance>),
}

impl Object {
    /// Wraps an application value
    pub fn instance<T: Instance>(value: T) -> Self {
        Object::Instance(Rc::new(value))
    }

    /// Creates an array
    pub fn array(items: Vec<Object>) -> Self {
        Object::Array(Rc::new(items))
    }

    /// Creates a set
    pub fn set(items: Vec<Object>) -> Self {
        Object::Set(Rc::new(items))
    }

    /// Creates a dictionary
    pub fn dict(entries: Vec<(Object, Object)>) -> Self {
        Object::Dict(Rc::new(entries))
    }

    /// Returns the instance as `T` if that is its type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Object::Instance(instance) => instance.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns true for [`Object::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Returns the string content
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the real value, widening integers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Real(r) => Some(*r),
            Object::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the array elements
    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Looks up a dictionary value by string key
    pub fn get(&self, key: &str) -> Option<&Object> {
        match self {
            Object::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns true if both are the same allocation
    pub fn ptr_eq(&self, other: &Object) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Address of the shared allocation, for compound variants
    pub(crate) fn identity(&self) -> Option<usize> {
        let ptr = match self {
            Object::Array(items) | Object::Set(items) => Rc::as_ptr(items) as *const (),
            Object::Dict(entries) => Rc::as_ptr(entries) as *const (),
            Object::Instance(instance) => Rc::as_ptr(instance) as *const (),
            _ => return None,
        };
        Some(ptr as usize)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Null, Object::Null) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Real(a), Object::Real(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Data(a), Object::Data(b)) => a == b,
            (Object::Uid(a), Object::Uid(b)) => a == b,
            (Object::Date(a), Object::Date(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => Rc::ptr_eq(a, b) || a == b,
            (Object::Set(a), Object::Set(b)) => {
                Rc::ptr_eq(a, b) || unordered_eq(a.as_slice(), b.as_slice())
            }
            (Object::Dict(a), Object::Dict(b)) => {
                Rc::ptr_eq(a, b) || unordered_eq(a.as_slice(), b.as_slice())
            }
            (Object::Instance(a), Object::Instance(b)) => a.dyn_eq(&**b),
            _ => false,
        }
    }
}

/// Plist primitives that appear verbatim in `$objects` or in record fields.
///
/// A plist collection shared by several parents converts once and the
/// resulting objects share one allocation too.
impl From<&Value> for Object {
    fn from(value: &Value) -> Self {
        convert(value, &mut HashMap::new())
    }
}

fn convert(value: &Value, converted: &mut HashMap<usize, Object>) -> Object {
    let identity = value.identity();
    if let Some(object) = identity.and_then(|id| converted.get(&id)) {
        return object.clone();
    }

    let object = match value {
        Value::Null => Object::Null,
        Value::Bool(b) => Object::Bool(*b),
        Value::Int(i) => Object::Int(*i),
        Value::Real(r) => Object::Real(*r),
        Value::Date(ts) => Object::Date(*ts),
        Value::Data(data) => Object::Data(data.clone()),
        Value::AsciiString(s) | Value::UnicodeString(s) => Object::String(s.clone()),
        Value::Uid(uid) => Object::Uid(*uid),
        Value::Array(items) => Object::array(items.iter().map(|v| convert(v, converted)).collect()),
        Value::Set(items) => Object::set(items.iter().map(|v| convert(v, converted)).collect()),
        Value::Dict(dict) => Object::dict(
            dict.iter()
                .map(|(k, v)| (Object::String(k.to_string()), convert(v, converted)))
                .collect(),
        ),
    };

    if let Some(id) = identity {
        converted.insert(id, object.clone());
    }
    object
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Bool(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Int(value)
    }
}

impl From<i32> for Object {
    fn from(value: i32) -> Self {
        Object::Int(i64::from(value))
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::Real(value)
    }
}

impl From<&str> for Object {
    fn from(value: &str) -> Self {
        Object::String(value.to_string())
    }
}

impl From<String> for Object {
    fn from(value: String) -> Self {
        Object::String(value)
    }
}

impl From<Vec<u8>> for Object {
    fn from(value: Vec<u8>) -> Self {
        Object::Data(value)
    }
}

impl From<Timestamp> for Object {
    fn from(value: Timestamp) -> Self {
        Object::Date(value)
    }
}

impl From<Vec<Object>> for Object {
    fn from(value: Vec<Object>) -> Self {
        Object::array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn test_instance_downcast() {
        let obj = Object::instance(Point { x: 1, y: 2 });
        assert_eq!(obj.downcast_ref::<Point>(), Some(&Point { x: 1, y: 2 }));
        assert!(obj.downcast_ref::<String>().is_none());
        assert!(Object::Int(1).downcast_ref::<Point>().is_none());
    }

    #[test]
    fn test_instance_equality() {
        let a = Object::instance(Point { x: 1, y: 2 });
        let b = Object::instance(Point { x: 1, y: 2 });
        let c = Object::instance(Point { x: 2, y: 2 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Object::instance("not a point".to_string()));
    }

    #[test]
    fn test_identity_follows_allocation() {
        let a = Object::array(vec![1.into()]);
        let shared = a.clone();
        let copy = Object::array(vec![1.into()]);
        assert!(a.ptr_eq(&shared));
        assert!(!a.ptr_eq(&copy));
        assert_eq!(a, copy);
        assert!(!Object::Int(1).ptr_eq(&Object::Int(1)));
    }

    #[test]
    fn test_unordered_collections() {
        let a = Object::set(vec![1.into(), 2.into()]);
        let b = Object::set(vec![2.into(), 1.into()]);
        assert_eq!(a, b);

        let a = Object::dict(vec![("a".into(), 1.into()), ("b".into(), 2.into())]);
        let b = Object::dict(vec![("b".into(), 2.into()), ("a".into(), 1.into())]);
        assert_eq!(a, b);
        assert_eq!(a.get("b"), Some(&Object::Int(2)));
    }

    #[test]
    fn test_from_value() {
        let value = Value::array(vec![Value::string("x"), Value::Uid(Uid(3))]);
        assert_eq!(
            Object::from(&value),
            Object::array(vec!["x".into(), Object::Uid(Uid(3))])
        );
    }

    #[test]
    fn test_from_value_keeps_sharing() {
        let shared = Value::array(vec![1.into()]);
        let value = Value::array(vec![shared.clone(), shared]);
        let object = Object::from(&value);
        let items = object.as_array().unwrap();
        assert!(items[0].ptr_eq(&items[1]));
    }
}
