//! Error types for the keyedplist-core library.
//!
//! Errors fall into two families. Format errors come from the binary plist
//! codec and always carry the byte offset where the problem was detected.
//! Archive errors come from the keyed archiving layer and describe a plist
//! that decoded fine but does not have the shape of an `NSKeyedArchiver`
//! archive. Both are fatal to the call that raised them.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for keyedplist operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all keyedplist operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Input does not start with `bplist00`
    #[error("invalid bplist header at offset {offset}")]
    InvalidMagic {
        /// Byte offset where the error occurred
        offset: usize,
    },

    /// Input is too short to hold the header and the 32-byte trailer
    #[error("bplist is too short to be valid: {len} bytes")]
    TruncatedTrailer {
        /// Length of the input buffer
        len: usize,
    },

    /// Trailer fields are inconsistent with the buffer
    #[error("invalid bplist trailer at offset {offset}: {details}")]
    InvalidTrailer {
        /// Byte offset of the trailer
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// An object reference points past the end of the offset table
    #[error("object index {index} out of range ({count} objects) at offset {offset}")]
    ObjectIndexOutOfRange {
        /// The offending object index
        index: u64,
        /// Number of objects declared by the trailer
        count: u64,
        /// Byte offset of the reference
        offset: usize,
    },

    /// An offset table entry points outside the object region
    #[error("object {index} has out of bounds offset {object_offset}")]
    ObjectOffsetOutOfRange {
        /// Index of the object whose offset is invalid
        index: u64,
        /// The invalid offset
        object_offset: u64,
    },

    /// Marker byte does not name a known object type
    #[error("unknown object marker 0x{marker:02x} at offset {offset}")]
    UnknownMarker {
        /// The marker byte
        marker: u8,
        /// Byte offset of the marker
        offset: usize,
    },

    /// Malformed object body
    #[error("invalid bplist data at offset {offset}: {details}")]
    InvalidFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Nesting exceeded the configured maximum depth
    #[error("maximum nesting depth {depth} exceeded at offset {offset}")]
    DepthLimitExceeded {
        /// The configured limit
        depth: usize,
        /// Byte offset of the object that crossed the limit
        offset: usize,
    },

    /// `$archiver` is not `NSKeyedArchiver`
    #[error("unsupported archiver: {archiver:?}")]
    UnsupportedArchiver {
        /// The archiver name found, if any
        archiver: Option<String>,
    },

    /// `$version` is not 100000
    #[error("unsupported archive version: expected 100000, got {found}")]
    UnsupportedArchiveVersion {
        /// Rendering of the version value found
        found: String,
    },

    /// `$top` is missing or not a dictionary
    #[error("archive has no top object")]
    MissingTopObject,

    /// `$top` has no `root` UID
    #[error("top object did not have a root UID: {top}")]
    MissingTopObjectUID {
        /// Rendering of the `$top` dictionary
        top: String,
    },

    /// `$objects` is missing or not an array
    #[error("archive has no $objects array")]
    MissingObjectsArray,

    /// `$class` points at something other than a class metadata dictionary
    #[error("$class {index} had no metadata")]
    MissingClassMetaData {
        /// Object table index of the metadata entry
        index: u64,
    },

    /// Class metadata has no string `$classname`
    #[error("$class {index} had no $classname")]
    MissingClassName {
        /// Object table index of the metadata entry
        index: u64,
    },

    /// Record has no `$class` UID
    #[error("object {index} has no $class")]
    MissingClassUID {
        /// Object table index of the record
        index: u64,
    },

    /// Decoding reached an object that is still being decoded
    #[error("archive has a cycle with object {index}")]
    CircularReference {
        /// Object table index where the cycle closed
        index: u64,
    },

    /// No delegate is registered for a class name or Rust type
    #[error("no mapping for {name} in {known:?}")]
    MissingClassMapping {
        /// Class name (decode) or Rust type name (encode)
        name: String,
        /// Class names known to the registry
        known: Vec<String>,
    },

    /// A UID points past the end of `$objects`
    #[error("object reference {index} out of range ({count} objects)")]
    InvalidObjectReference {
        /// The offending UID
        index: u64,
        /// Length of `$objects`
        count: usize,
    },

    /// A record field has the wrong shape for its delegate
    #[error("malformed record field '{key}': {details}")]
    MalformedRecord {
        /// The field key
        key: String,
        /// Detailed description of the issue
        details: String,
    },
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new trailer error
    pub fn invalid_trailer(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidTrailer {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new format error
    pub fn invalid_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new malformed record error
    pub fn malformed_record(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::MalformedRecord {
            key: key.into(),
            details: details.into(),
        }
    }

    /// Returns true if this error was raised by the binary plist codec
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic { .. }
                | Self::TruncatedTrailer { .. }
                | Self::InvalidTrailer { .. }
                | Self::ObjectIndexOutOfRange { .. }
                | Self::ObjectOffsetOutOfRange { .. }
                | Self::UnknownMarker { .. }
                | Self::InvalidFormat { .. }
                | Self::DepthLimitExceeded { .. }
        )
    }

    /// Returns the byte offset carried by a format error
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::InvalidMagic { offset }
            | Self::InvalidTrailer { offset, .. }
            | Self::ObjectIndexOutOfRange { offset, .. }
            | Self::UnknownMarker { offset, .. }
            | Self::InvalidFormat { offset, .. }
            | Self::DepthLimitExceeded { offset, .. } => Some(*offset),
            Self::TruncatedTrailer { len } => Some(*len),
            Self::ObjectOffsetOutOfRange { object_offset, .. } => {
                usize::try_from(*object_offset).ok()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownMarker {
            marker: 0x70,
            offset: 12,
        };
        assert!(err.to_string().contains("0x70"));
        assert!(err.to_string().contains("12"));

        let err = Error::MissingClassMapping {
            name: "crap.Foo".to_string(),
            known: vec!["NSArray".to_string()],
        };
        assert!(err.to_string().contains("crap.Foo"));
        assert!(err.to_string().contains("NSArray"));
    }

    #[test]
    fn test_is_format_error() {
        assert!(Error::invalid_format(3, "test").is_format_error());
        assert!(Error::InvalidMagic { offset: 0 }.is_format_error());
        assert!(!Error::MissingObjectsArray.is_format_error());
        assert!(!Error::CircularReference { index: 1 }.is_format_error());
    }

    #[test]
    fn test_offset() {
        assert_eq!(Error::invalid_format(42, "test").offset(), Some(42));
        assert_eq!(Error::MissingTopObject.offset(), None);
    }
}
