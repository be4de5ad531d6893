//! # keyedplist-core
//!
//! A library for reading and writing Apple binary property lists and the
//! `NSKeyedArchiver` object graphs stored in them.
//!
//! This crate provides:
//! - A `bplist00` decoder and encoder over a plain [`Value`] tree
//! - An archiver that flattens an [`Object`] graph into `$objects` records,
//!   sharing repeated objects and closing cycles through UIDs
//! - An unarchiver that rebuilds the graph through registered delegates
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`plist`]: Binary plist values and wire format codec
//! - [`archive`]: Keyed archiving on top of the plist layer
//! - [`timestamp`]: Apple-epoch dates
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use keyedplist_core::{archive, unarchive, ClassRegistry, Object};
//!
//! let registry = ClassRegistry::new();
//! let graph = Object::dict(vec![(
//!     "outer".into(),
//!     Object::dict(vec![("inner".into(), "value".into())]),
//! )]);
//!
//! let bytes = archive(&graph, &registry)?;
//! assert_eq!(unarchive(&bytes, &registry)?, graph);
//! # Ok::<(), keyedplist_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! Application types implement [`Archivable`] and [`Unarchivable`] and are
//! registered on a [`ClassRegistry`] under their Cocoa class name:
//!
//! ```
//! use keyedplist_core::{
//!     ArchivedObject, Archivable, ArchivingObject, ClassRegistry, Object, Result, Unarchivable,
//! };
//!
//! #[derive(Debug, PartialEq)]
//! struct Bookmark {
//!     title: String,
//! }
//!
//! impl Archivable for Bookmark {
//!     fn encode_archive(&self, archiver: &mut ArchivingObject<'_, '_>) -> Result<()> {
//!         archiver.encode("title", &Object::from(self.title.as_str()))
//!     }
//! }
//!
//! impl Unarchivable for Bookmark {
//!     fn decode_archive(archived: &mut ArchivedObject<'_, '_>) -> Result<Self> {
//!         let title = archived.decode("title")?;
//!         Ok(Bookmark {
//!             title: title.as_str().unwrap_or_default().to_string(),
//!         })
//!     }
//! }
//!
//! let mut registry = ClassRegistry::new();
//! registry.register::<Bookmark>("Bookmark");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod archive;
pub mod error;
pub mod plist;
pub mod timestamp;

// Re-export primary types for convenience
pub use archive::{
    archive, unarchive, unarchive_file, Archivable, Archive, ArchivedObject, ArchivingObject,
    ClassDelegate, ClassRegistry, Instance, MutableData, Object, Unarchivable, Unarchive,
};
pub use error::{Error, Result};
pub use plist::{Decoder, DecoderConfig, Dictionary, Encoder, Uid, Value};
pub use timestamp::Timestamp;

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
