//! Error types for cabinet extraction.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or extracting a cabinet.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying read, write, or seek on the cabinet source failed.
    #[error("I/O error during {op}: {source}")]
    Io {
        /// The operation that failed (e.g. `"read"`, `"seek"`).
        op: &'static str,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The source ended before the requested number of bytes could be read.
    #[error("short read: needed {wanted} bytes but only {available} available")]
    ShortRead {
        /// Number of bytes requested.
        wanted: u64,
        /// Number of bytes that were left in the source.
        available: u64,
    },

    /// The cabinet header or one of its tables is invalid.
    #[error("malformed cabinet: {0}")]
    MalformedHeader(String),

    /// The cabinet is part of a multi-volume set.
    #[error("multi-volume cabinets are not supported")]
    UnsupportedMultiVolume,

    /// A folder uses an unknown compression scheme or window size.
    #[error("unsupported compression type 0x{0:04x}")]
    UnsupportedCompression(u16),

    /// A data block failed checksum verification.
    #[error("checksum mismatch in folder {folder}, data block {block}")]
    BadBlockChecksum {
        /// Index of the folder containing the block.
        folder: usize,
        /// Index of the block within its folder.
        block: usize,
    },

    /// A decompressor rejected a data block.
    #[error("failed to decode folder {folder}, data block {block}: {detail}")]
    DecodeError {
        /// Index of the folder containing the block.
        folder: usize,
        /// Index of the block within its folder.
        block: usize,
        /// What went wrong.
        detail: String,
    },

    /// A stored file name cannot be used as an output path.
    #[error("rejected path {path:?}: {reason}")]
    PathRejected {
        /// The offending name, with separators normalized to `/`.
        path: String,
        /// Why the name was rejected.
        reason: PathReason,
    },

    /// Writing an extracted file failed.
    #[error("failed to write {}: {source}", path.display())]
    SinkError {
        /// The output path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Extraction was cancelled by the caller.
    #[error("extraction cancelled")]
    Cancelled,
}

/// Why a stored file name was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathReason {
    /// The name contains a `..` component.
    Traversal,
    /// The name is absolute or carries a drive prefix.
    Absolute,
    /// The name has no usable components.
    Empty,
    /// A component contains a character that cannot appear in a file name.
    InvalidCharacter,
    /// The name is flagged as UTF-8 but is not valid UTF-8.
    InvalidEncoding,
}

impl fmt::Display for PathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PathReason::Traversal => "path traverses outside the output directory",
            PathReason::Absolute => "path is absolute",
            PathReason::Empty => "path is empty",
            PathReason::InvalidCharacter => "path contains an invalid character",
            PathReason::InvalidEncoding => "path is not valid UTF-8",
        };
        f.write_str(text)
    }
}

impl Error {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Error {
        Error::Io { op, source }
    }

    /// Returns true if this error only affects one folder or file, so that
    /// extraction may go on with the rest of the cabinet when the caller
    /// asked to continue on error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCompression(_)
                | Error::BadBlockChecksum { .. }
                | Error::DecodeError { .. }
                | Error::PathRejected { .. }
                | Error::SinkError { .. }
        )
    }

    /// Returns true if this error means the cabinet itself could not be
    /// read, as opposed to a failure while extracting one of its files.
    pub fn is_archive_error(&self) -> bool {
        matches!(
            self,
            Error::Io { .. }
                | Error::ShortRead { .. }
                | Error::MalformedHeader(_)
                | Error::UnsupportedMultiVolume
        )
    }
}

/// Result type for cabinet operations.
pub type Result<T> = std::result::Result<T, Error>;
