//! Mapping between Cocoa class names and Rust delegates.

use super::builtins;
use super::{Archivable, ArchivedObject, ArchivingObject, Instance, Object, Unarchivable};
use crate::error::{Error, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use tracing::trace;

/// Writes the fields of a type-erased instance into a record
pub type EncodeFn = fn(&dyn Any, &mut ArchivingObject<'_, '_>) -> Result<()>;

/// Rebuilds an object from a record
pub type DecodeFn = fn(&mut ArchivedObject<'_, '_>) -> Result<Object>;

/// The encode/decode pair registered under one class name.
///
/// Either half may be missing: the built-in collection delegates only
/// decode, because collections are archived by shape rather than by type.
#[derive(Debug, Clone, Copy)]
pub struct ClassDelegate {
    type_id: Option<TypeId>,
    encode: Option<EncodeFn>,
    decode: Option<DecodeFn>,
}

impl ClassDelegate {
    /// Delegate for a type implementing both halves of the interface
    pub fn of<T>() -> Self
    where
        T: Archivable + Unarchivable + Instance + 'static,
    {
        Self {
            type_id: Some(TypeId::of::<T>()),
            encode: Some(encode_instance::<T> as EncodeFn),
            decode: Some(decode_instance::<T> as DecodeFn),
        }
    }

    /// Delegate that archives `T` but cannot read it back
    pub fn encode_only<T: Archivable + 'static>() -> Self {
        Self {
            type_id: Some(TypeId::of::<T>()),
            encode: Some(encode_instance::<T> as EncodeFn),
            decode: None,
        }
    }

    /// Delegate that reads records into `T` but cannot archive it
    pub fn decode_only<T: Unarchivable + Instance>() -> Self {
        Self {
            type_id: None,
            encode: None,
            decode: Some(decode_instance::<T> as DecodeFn),
        }
    }

    /// Delegate built from plain functions.
    ///
    /// `type_id` names the Rust type `encode` accepts, if any.
    pub fn from_fns(type_id: Option<TypeId>, encode: Option<EncodeFn>, decode: Option<DecodeFn>) -> Self {
        Self {
            type_id,
            encode,
            decode,
        }
    }

    /// The Rust type this delegate archives
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// The encode half
    pub fn encoder(&self) -> Option<EncodeFn> {
        self.encode
    }

    /// The decode half
    pub fn decoder(&self) -> Option<DecodeFn> {
        self.decode
    }
}

fn encode_instance<T: Archivable + 'static>(
    value: &dyn Any,
    archiver: &mut ArchivingObject<'_, '_>,
) -> Result<()> {
    match value.downcast_ref::<T>() {
        Some(value) => value.encode_archive(archiver),
        None => Err(Error::malformed_record(
            "$class",
            format!("delegate expected {}", std::any::type_name::<T>()),
        )),
    }
}

fn decode_instance<T: Unarchivable + Instance>(archived: &mut ArchivedObject<'_, '_>) -> Result<Object> {
    T::decode_archive(archived).map(Object::instance)
}

/// Class name to delegate table, plus the reverse Rust type to name table.
///
/// [`ClassRegistry::new`] installs the Foundation built-ins. Registering a
/// name again replaces the previous delegate, and registering a type under
/// a second name makes that name the one it is archived as. A type whose
/// name is taken over by another delegate has no name left to archive as.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassDelegate>,
    type_names: HashMap<TypeId, String>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// Creates a registry with the built-in delegates
    pub fn new() -> Self {
        let mut registry = Self::empty();
        builtins::install(&mut registry);
        registry
    }

    /// Creates a registry without any delegates
    pub fn empty() -> Self {
        Self {
            classes: HashMap::new(),
            type_names: HashMap::new(),
        }
    }

    /// Registers `T` under a class name
    pub fn register<T>(&mut self, name: impl Into<String>) -> &mut Self
    where
        T: Archivable + Unarchivable + Instance + 'static,
    {
        self.insert(name.into(), ClassDelegate::of::<T>());
        self
    }

    /// Merges name/delegate pairs into the registry, last write wins
    pub fn update_class_map<I, S>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, ClassDelegate)>,
        S: Into<String>,
    {
        for (name, delegate) in entries {
            self.insert(name.into(), delegate);
        }
        self
    }

    fn insert(&mut self, name: String, delegate: ClassDelegate) {
        trace!("Registering class {}", name);
        // Types the name was bound to before no longer archive under it
        self.type_names
            .retain(|type_id, bound| *bound != name || Some(*type_id) == delegate.type_id);
        if let Some(type_id) = delegate.type_id {
            self.type_names.insert(type_id, name.clone());
        }
        self.classes.insert(name, delegate);
    }

    /// Removes a class name, returning its delegate
    pub fn remove(&mut self, name: &str) -> Option<ClassDelegate> {
        let removed = self.classes.remove(name)?;
        self.type_names.retain(|_, n| n != name);
        Some(removed)
    }

    /// Looks up the delegate for a class name
    pub fn get(&self, name: &str) -> Option<&ClassDelegate> {
        self.classes.get(name)
    }

    /// Returns true if the class name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Class name a Rust type is archived as
    pub fn name_for_type(&self, type_id: TypeId) -> Option<&str> {
        self.type_names.get(&type_id).map(String::as_str)
    }

    /// Registered class names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered class names
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Error for a name or type without a usable delegate
    pub(crate) fn missing(&self, name: impl Into<String>) -> Error {
        Error::MissingClassMapping {
            name: name.into(),
            known: self.names(),
        }
    }
}
