//! Archive dictionary to object graph.

use super::{ClassRegistry, Object, ARCHIVE_VERSION, NS_KEYED_ARCHIVER};
use crate::error::{Error, Result};
use crate::plist::{Decoder, DecoderConfig, Dictionary, Uid, Value};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Reads one archive.
///
/// Each call to [`Unarchive::top_object`] decodes from scratch with its own
/// cache; nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct Unarchive<'a> {
    input: &'a [u8],
    registry: &'a ClassRegistry,
    config: DecoderConfig,
}

impl<'a> Unarchive<'a> {
    /// Creates an unarchiver with the default configuration
    pub fn new(input: &'a [u8], registry: &'a ClassRegistry) -> Self {
        Self::with_config(input, registry, DecoderConfig::default())
    }

    /// Creates an unarchiver with a custom configuration.
    ///
    /// `max_depth` bounds both the plist decode and the record walk.
    pub fn with_config(input: &'a [u8], registry: &'a ClassRegistry, config: DecoderConfig) -> Self {
        Self {
            input,
            registry,
            config,
        }
    }

    /// Validates the archive header and decodes the root object
    pub fn top_object(&self) -> Result<Object> {
        let plist = Decoder::with_config(self.config.clone()).decode(self.input)?;
        let header = Header::parse(&plist)?;
        debug!(
            "Unarchiving {} objects, root {}",
            header.objects.len(),
            header.top
        );

        let mut resolver = Resolver {
            objects: header.objects,
            registry: self.registry,
            cache: HashMap::new(),
            depth: 0,
            max_depth: self.config.max_depth,
        };
        resolver.decode_object(header.top)
    }
}

/// The validated top-level keys
struct Header<'p> {
    top: Uid,
    objects: &'p [Value],
}

impl<'p> Header<'p> {
    fn parse(plist: &'p Value) -> Result<Self> {
        let dict = plist
            .as_dict()
            .ok_or(Error::UnsupportedArchiver { archiver: None })?;

        match dict.get("$archiver") {
            Some(v) if v.as_str() == Some(NS_KEYED_ARCHIVER) => {}
            other => {
                return Err(Error::UnsupportedArchiver {
                    archiver: other.map(render),
                })
            }
        }

        match dict.get("$version") {
            Some(v) if v.as_i64() == Some(ARCHIVE_VERSION) => {}
            other => {
                return Err(Error::UnsupportedArchiveVersion {
                    found: other.map_or_else(|| "nothing".to_string(), render),
                })
            }
        }

        let top = dict
            .get("$top")
            .and_then(Value::as_dict)
            .ok_or(Error::MissingTopObject)?;
        let top = top
            .get("root")
            .and_then(Value::as_uid)
            .ok_or_else(|| Error::MissingTopObjectUID {
                top: format!("{top:?}"),
            })?;

        let objects = dict
            .get("$objects")
            .and_then(Value::as_array)
            .ok_or(Error::MissingObjectsArray)?;

        Ok(Self { top, objects })
    }
}

fn render(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => format!("{value:?}"),
    }
}

/// Decode cache entry
#[derive(Debug)]
enum Slot {
    InProgress,
    Done(Object),
}

/// Per-call state of one unarchive
#[derive(Debug)]
struct Resolver<'p> {
    objects: &'p [Value],
    registry: &'p ClassRegistry,
    cache: HashMap<u64, Slot>,
    depth: usize,
    max_depth: usize,
}

impl<'p> Resolver<'p> {
    fn entry(&self, uid: Uid) -> Result<&'p Value> {
        let objects = self.objects;
        usize::try_from(uid.0)
            .ok()
            .and_then(|index| objects.get(index))
            .ok_or(Error::InvalidObjectReference {
                index: uid.0,
                count: objects.len(),
            })
    }

    fn decode_object(&mut self, uid: Uid) -> Result<Object> {
        if uid.is_null() {
            return Ok(Object::Null);
        }

        match self.cache.get(&uid.0) {
            Some(Slot::InProgress) => return Err(Error::CircularReference { index: uid.0 }),
            Some(Slot::Done(object)) => {
                trace!("Cache hit for {}", uid);
                return Ok(object.clone());
            }
            None => {}
        }

        let raw = self.entry(uid)?;
        if self.depth >= self.max_depth {
            return Err(Error::DepthLimitExceeded {
                depth: self.max_depth,
                offset: 0,
            });
        }

        self.cache.insert(uid.0, Slot::InProgress);
        self.depth += 1;
        let decoded = self.decode_entry(uid, raw);
        self.depth -= 1;

        let object = decoded?;
        self.cache.insert(uid.0, Slot::Done(object.clone()));
        Ok(object)
    }

    fn decode_entry(&mut self, uid: Uid, raw: &'p Value) -> Result<Object> {
        let record = match raw {
            Value::Dict(record) => record.as_ref(),
            primitive => return Ok(Object::from(primitive)),
        };

        let class_uid = record
            .get("$class")
            .and_then(Value::as_uid)
            .ok_or(Error::MissingClassUID { index: uid.0 })?;
        let name = self.class_name(class_uid)?;

        let registry = self.registry;
        let decode = registry
            .get(name)
            .and_then(|delegate| delegate.decoder())
            .ok_or_else(|| registry.missing(name))?;

        trace!("Decoding {} as {}", uid, name);
        let mut archived = ArchivedObject {
            record,
            resolver: self,
        };
        decode(&mut archived)
    }

    fn class_name(&self, class_uid: Uid) -> Result<&'p str> {
        let meta = self
            .entry(class_uid)?
            .as_dict()
            .ok_or(Error::MissingClassMetaData { index: class_uid.0 })?;
        meta.get("$classname")
            .and_then(Value::as_str)
            .ok_or(Error::MissingClassName { index: class_uid.0 })
    }
}

/// Read view of one record, handed to [`Unarchivable`](super::Unarchivable)
/// delegates
#[derive(Debug)]
pub struct ArchivedObject<'a, 'p> {
    record: &'p Dictionary,
    resolver: &'a mut Resolver<'p>,
}

impl<'p> ArchivedObject<'_, 'p> {
    /// Decodes the field `key`.
    ///
    /// UIDs are resolved to the objects they reference, other values are
    /// returned as they are. A missing field decodes to [`Object::Null`].
    pub fn decode(&mut self, key: &str) -> Result<Object> {
        match self.record.get(key) {
            None => Ok(Object::Null),
            Some(Value::Uid(uid)) => self.resolver.decode_object(*uid),
            Some(value) => Ok(Object::from(value)),
        }
    }

    /// Resolves a UID taken from this record
    pub fn decode_index(&mut self, uid: Uid) -> Result<Object> {
        self.resolver.decode_object(uid)
    }

    /// Reads the field `key` as an array of UIDs
    pub fn uids(&self, key: &str) -> Result<Vec<Uid>> {
        let items = self
            .record
            .get(key)
            .ok_or_else(|| Error::malformed_record(key, "missing"))?
            .as_array()
            .ok_or_else(|| Error::malformed_record(key, "expected an array"))?;

        items
            .iter()
            .map(|item| {
                item.as_uid()
                    .ok_or_else(|| Error::malformed_record(key, format!("expected UID, got {}", item.kind())))
            })
            .collect()
    }

    /// The stored field value, without resolving UIDs
    pub fn raw(&self, key: &str) -> Option<&'p Value> {
        self.record.get(key)
    }

    /// Returns true if the record has the field `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.record.contains_key(key)
    }

    /// Field names of the record, `$class` included
    pub fn keys(&self) -> impl Iterator<Item = &'p str> {
        self.record.keys()
    }
}
