//! A library for extracting single-volume [Windows
//! cabinet](https://en.wikipedia.org/wiki/Cabinet_(file_format)) (CAB) files
//! to a directory.
//!
//! All three CAB compression schemes (MSZIP, Quantum and LZX) are supported,
//! as well as uncompressed folders.  Cabinets that span several volumes are
//! rejected.
//!
//! ```no_run
//! let report = cabextract::extract("setup.cab", "out", Default::default())?;
//! println!("{} files, {} bytes", report.files_written, report.bytes_written);
//! # Ok::<(), cabextract::Error>(())
//! ```
//!
//! File names stored without the UTF-8 attribute are decoded as
//! Windows-1252.  Data blocks whose stored checksum is zero are not
//! verified.

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod cabinet;
mod checksum;
mod consts;
mod ctype;
mod datetime;
mod error;
mod extract;
mod file;
mod folder;
mod mszip;
mod quantum;
mod reader;
mod router;
mod sink;
mod string;

pub use crate::cabinet::Cabinet;
pub use crate::ctype::CompressionType;
pub use crate::error::{Error, PathReason, Result};
pub use crate::extract::{extract, Extractor, FolderError, Options, Report};
pub use crate::file::{FileEntries, FileEntry};
pub use crate::folder::{FolderEntries, FolderEntry};
pub use crate::sink::{
    sanitize_path, DirectoryFile, DirectorySink, FileSink, SinkFactory,
};
