//! Object graph to archive dictionary.

use super::{ClassRegistry, Object, ARCHIVE_VERSION, NS_KEYED_ARCHIVER};
use crate::error::Result;
use crate::plist::{self, Dictionary, Uid, Value};
use crate::timestamp::Timestamp;
use std::any::Any;
use std::collections::HashMap;
use tracing::{debug, trace};

/// One archiving pass over an object graph.
///
/// `$objects` starts with the `$null` sentinel. Every compound object gets
/// its UID reserved before its fields are encoded, so anything that refers
/// back to it (itself included) gets the reserved UID instead of recursing.
#[derive(Debug)]
pub struct Archive<'r> {
    registry: &'r ClassRegistry,
    objects: Vec<Value>,
    /// Allocation address to UID, holding a clone so the address stays live
    ref_map: HashMap<usize, (Uid, Object)>,
    class_map: HashMap<String, Uid>,
}

impl<'r> Archive<'r> {
    /// Starts an empty archive
    pub fn new(registry: &'r ClassRegistry) -> Self {
        Self {
            registry,
            objects: vec![Value::string("$null")],
            ref_map: HashMap::new(),
            class_map: HashMap::new(),
        }
    }

    /// The object table built so far
    pub fn objects(&self) -> &[Value] {
        &self.objects
    }

    fn next_uid(&self) -> Uid {
        Uid(self.objects.len() as u64)
    }

    /// UID of the metadata record for a class name, appending it on first use
    pub fn uid_for_class(&mut self, name: &str) -> Uid {
        if let Some(&uid) = self.class_map.get(name) {
            return uid;
        }

        let uid = self.next_uid();
        trace!("Adding class metadata for {} at {}", name, uid);
        self.class_map.insert(name.to_string(), uid);

        let mut meta = Dictionary::with_capacity(2);
        meta.insert("$classes", Value::array(vec![Value::string(name)]));
        meta.insert("$classname", name);
        self.objects.push(Value::dict(meta));
        uid
    }

    /// Encodes a field value: booleans and numbers inline, anything else by UID
    pub fn encode(&mut self, value: &Object) -> Result<Value> {
        Ok(match value {
            Object::Bool(b) => Value::Bool(*b),
            Object::Int(i) => Value::Int(*i),
            Object::Real(r) => Value::Real(*r),
            other => Value::Uid(self.archive(other)?),
        })
    }

    /// Adds `value` to the object table and returns its UID
    pub fn archive(&mut self, value: &Object) -> Result<Uid> {
        if value.is_null() {
            return Ok(Uid::NULL);
        }

        let identity = value.identity();
        if let Some((uid, _)) = identity.and_then(|key| self.ref_map.get(&key)) {
            trace!("Reusing {} for shared object", uid);
            return Ok(*uid);
        }

        let uid = self.next_uid();
        if let Some(primitive) = primitive(value) {
            self.objects.push(primitive);
            return Ok(uid);
        }

        if let Some(key) = identity {
            self.ref_map.insert(key, (uid, value.clone()));
        }
        // Placeholder until the record is complete
        self.objects.push(Value::Null);

        let record = match value {
            Object::Array(items) => self.encode_collection("NSArray", items)?,
            Object::Set(items) => self.encode_collection("NSSet", items)?,
            Object::Dict(entries) => self.encode_dict(entries)?,
            Object::Date(ts) => self.encode_instance(ts, std::any::type_name::<Timestamp>())?,
            Object::Instance(instance) => {
                self.encode_instance(instance.as_any(), instance.type_name())?
            }
            // Stored verbatim above
            Object::Null
            | Object::Bool(_)
            | Object::Int(_)
            | Object::Real(_)
            | Object::String(_)
            | Object::Data(_)
            | Object::Uid(_) => Dictionary::new(),
        };

        self.objects[uid.0 as usize] = Value::dict(record);
        Ok(uid)
    }

    fn record_for(&mut self, class: &str) -> Dictionary {
        let mut record = Dictionary::new();
        record.insert("$class", self.uid_for_class(class));
        record
    }

    fn encode_collection(&mut self, class: &str, items: &[Object]) -> Result<Dictionary> {
        let mut record = self.record_for(class);
        let uids = items
            .iter()
            .map(|item| self.archive(item).map(Value::Uid))
            .collect::<Result<Vec<_>>>()?;
        record.insert("NS.objects", Value::array(uids));
        Ok(record)
    }

    fn encode_dict(&mut self, entries: &[(Object, Object)]) -> Result<Dictionary> {
        let mut record = self.record_for("NSDictionary");
        let mut keys = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            keys.push(Value::Uid(self.archive(key)?));
            values.push(Value::Uid(self.archive(value)?));
        }
        record.insert("NS.keys", Value::array(keys));
        record.insert("NS.objects", Value::array(values));
        Ok(record)
    }

    fn encode_instance(&mut self, value: &dyn Any, type_name: &str) -> Result<Dictionary> {
        let registry = self.registry;
        let name = registry
            .name_for_type(value.type_id())
            .ok_or_else(|| registry.missing(type_name))?;
        let encode = registry
            .get(name)
            .and_then(|delegate| delegate.encoder())
            .ok_or_else(|| registry.missing(type_name))?;

        let record = self.record_for(name);
        let mut archiving = ArchivingObject {
            record,
            archive: self,
        };
        encode(value, &mut archiving)?;
        Ok(archiving.record)
    }

    /// The complete archive dictionary with `top` as its root
    pub fn into_plist(self, top: Uid) -> Value {
        let mut root = Dictionary::with_capacity(1);
        root.insert("root", top);

        let mut plist = Dictionary::with_capacity(4);
        plist.insert("$archiver", NS_KEYED_ARCHIVER);
        plist.insert("$version", ARCHIVE_VERSION);
        plist.insert("$objects", Value::array(self.objects));
        plist.insert("$top", root);
        Value::dict(plist)
    }

    /// Serializes the archive with `top` as its root
    pub fn into_bytes(self, top: Uid) -> Vec<u8> {
        debug!("Writing archive with {} objects", self.objects.len());
        plist::to_bytes(&self.into_plist(top))
    }
}

/// Values stored in `$objects` as they are, without a record
fn primitive(value: &Object) -> Option<Value> {
    Some(match value {
        Object::Bool(b) => Value::Bool(*b),
        Object::Int(i) => Value::Int(*i),
        Object::Real(r) => Value::Real(*r),
        Object::String(s) => Value::string(s.as_str()),
        Object::Data(data) => Value::Data(data.clone()),
        Object::Uid(uid) => Value::Uid(*uid),
        _ => return None,
    })
}

/// Record under construction, handed to [`Archivable`](super::Archivable)
/// delegates
#[derive(Debug)]
pub struct ArchivingObject<'a, 'r> {
    record: Dictionary,
    archive: &'a mut Archive<'r>,
}

impl ArchivingObject<'_, '_> {
    /// Encodes `value` and stores it under `key`
    pub fn encode(&mut self, key: &str, value: &Object) -> Result<()> {
        let encoded = self.archive.encode(value)?;
        self.record.insert(key, encoded);
        Ok(())
    }

    /// Stores a plist value under `key` without going through the table
    pub fn encode_value(&mut self, key: &str, value: impl Into<Value>) {
        self.record.insert(key, value);
    }

    /// Adds `value` to the table and returns its UID
    pub fn archive(&mut self, value: &Object) -> Result<Uid> {
        self.archive.archive(value)
    }
}
