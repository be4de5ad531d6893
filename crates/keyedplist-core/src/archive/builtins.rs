//! Foundation delegates every registry starts with.
//!
//! Collections decode from any of their mutable or immutable class names.
//! They are archived by shape (see [`Archive`](super::Archive)), so their
//! delegates have no encode half.

use super::registry::{ClassDelegate, ClassRegistry, DecodeFn, EncodeFn};
use super::{Archivable, ArchivedObject, ArchivingObject, Object, Unarchivable};
use crate::error::{Error, Result};
use crate::timestamp::Timestamp;
use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) fn install(registry: &mut ClassRegistry) {
    let dict = ClassDelegate::from_fns(None, None, Some(decode_dict as DecodeFn));
    let array = ClassDelegate::from_fns(None, None, Some(decode_array as DecodeFn));
    let set = ClassDelegate::from_fns(None, None, Some(decode_set as DecodeFn));
    let date = ClassDelegate::from_fns(
        Some(TypeId::of::<Timestamp>()),
        Some(encode_date as EncodeFn),
        Some(decode_date as DecodeFn),
    );

    registry.update_class_map([
        ("NSDictionary", dict),
        ("NSMutableDictionary", dict),
        ("NSArray", array),
        ("NSMutableArray", array),
        ("NSSet", set),
        ("NSMutableSet", set),
        ("NSDate", date),
        ("NSMutableData", ClassDelegate::of::<MutableData>()),
    ]);
}

fn decode_all(archived: &mut ArchivedObject<'_, '_>, key: &str) -> Result<Vec<Object>> {
    archived
        .uids(key)?
        .into_iter()
        .map(|uid| archived.decode_index(uid))
        .collect()
}

fn decode_array(archived: &mut ArchivedObject<'_, '_>) -> Result<Object> {
    decode_all(archived, "NS.objects").map(Object::array)
}

fn decode_set(archived: &mut ArchivedObject<'_, '_>) -> Result<Object> {
    decode_all(archived, "NS.objects").map(Object::set)
}

fn decode_dict(archived: &mut ArchivedObject<'_, '_>) -> Result<Object> {
    let keys = archived.uids("NS.keys")?;
    let values = archived.uids("NS.objects")?;
    if keys.len() != values.len() {
        return Err(Error::malformed_record(
            "NS.objects",
            format!("{} keys but {} values", keys.len(), values.len()),
        ));
    }

    let mut entries: Vec<(Object, Object)> = Vec::with_capacity(keys.len());
    let mut index: HashMap<IndexKey, usize> = HashMap::with_capacity(keys.len());
    for (key, value) in keys.into_iter().zip(values) {
        let key = archived.decode_index(key)?;
        let value = archived.decode_index(value)?;

        let existing = match IndexKey::of(&key) {
            Some(hashed) => match index.entry(hashed) {
                Entry::Occupied(slot) => Some(*slot.get()),
                Entry::Vacant(slot) => {
                    slot.insert(entries.len());
                    None
                }
            },
            None => entries.iter().position(|(k, _)| *k == key),
        };

        match existing {
            Some(i) => entries[i].1 = value,
            None => entries.push((key, value)),
        }
    }
    Ok(Object::Dict(Rc::new(entries)))
}

/// Dictionary keys looked up by hash; other key kinds are compared linearly
#[derive(Debug, PartialEq, Eq, Hash)]
enum IndexKey {
    String(String),
    Int(i64),
}

impl IndexKey {
    fn of(key: &Object) -> Option<Self> {
        match key {
            Object::String(s) => Some(IndexKey::String(s.clone())),
            Object::Int(i) => Some(IndexKey::Int(*i)),
            _ => None,
        }
    }
}

fn encode_date(value: &dyn std::any::Any, archiver: &mut ArchivingObject<'_, '_>) -> Result<()> {
    match value.downcast_ref::<Timestamp>() {
        Some(ts) => ts.encode_archive(archiver),
        None => Err(Error::malformed_record("NS.time", "expected a timestamp")),
    }
}

fn decode_date(archived: &mut ArchivedObject<'_, '_>) -> Result<Object> {
    Timestamp::decode_archive(archived).map(Object::Date)
}

impl Archivable for Timestamp {
    fn encode_archive(&self, archiver: &mut ArchivingObject<'_, '_>) -> Result<()> {
        archiver.encode("NS.time", &Object::Real(self.apple_seconds()))
    }
}

impl Unarchivable for Timestamp {
    fn decode_archive(archived: &mut ArchivedObject<'_, '_>) -> Result<Self> {
        let offset = archived.decode("NS.time")?;
        offset
            .as_f64()
            .map(Timestamp::from_apple)
            .ok_or_else(|| Error::malformed_record("NS.time", "expected a number"))
    }
}

/// `NSMutableData`: a byte buffer that may be absent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MutableData {
    /// The bytes, `None` when archived as null
    pub data: Option<Vec<u8>>,
}

impl MutableData {
    /// Wraps a byte buffer
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }
}

impl Archivable for MutableData {
    fn encode_archive(&self, archiver: &mut ArchivingObject<'_, '_>) -> Result<()> {
        let data = match &self.data {
            Some(data) => Object::Data(data.clone()),
            None => Object::Null,
        };
        archiver.encode("NS.data", &data)
    }
}

impl Unarchivable for MutableData {
    fn decode_archive(archived: &mut ArchivedObject<'_, '_>) -> Result<Self> {
        match archived.decode("NS.data")? {
            Object::Data(data) => Ok(Self { data: Some(data) }),
            Object::Null => Ok(Self { data: None }),
            _ => Err(Error::malformed_record("NS.data", "expected data")),
        }
    }
}
