//! Output targets for extracted files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use log::{debug, warn};

use crate::datetime::system_time_from_bits;
use crate::error::{Error, PathReason, Result};

/// Creates one [`FileSink`] per extracted file.
pub trait SinkFactory {
    /// The sink type produced by this factory.
    type Sink: FileSink;

    /// Opens a sink for the file at `path` (relative, already sanitized),
    /// which will receive exactly `total_bytes` bytes.
    fn create(&mut self, path: &Path, total_bytes: u64) -> Result<Self::Sink>;
}

/// Receives the bytes of one extracted file.
pub trait FileSink {
    /// Appends bytes to the file.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Finishes the file, stamping it with the packed DOS date and time
    /// stored in the cabinet.
    fn close(self, date: u16, time: u16) -> Result<()>;

    /// Abandons the file, discarding whatever was written so far.
    fn abort(self);
}

/// Writes extracted files beneath a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    root: PathBuf,
    overwrite: bool,
    preserve_timestamps: bool,
}

/// A file being written by a [`DirectorySink`].
#[derive(Debug)]
pub struct DirectoryFile {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    total: u64,
    preserve_timestamp: bool,
}

impl DirectorySink {
    /// Creates a sink rooted at `root`.  Existing files are replaced only if
    /// `overwrite` is set.
    pub fn new<P: Into<PathBuf>>(
        root: P,
        overwrite: bool,
        preserve_timestamps: bool,
    ) -> DirectorySink {
        DirectorySink { root: root.into(), overwrite, preserve_timestamps }
    }

    /// Returns the output directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SinkFactory for DirectorySink {
    type Sink = DirectoryFile;

    fn create(&mut self, path: &Path, total_bytes: u64) -> Result<DirectoryFile> {
        if !path.components().all(|c| matches!(c, Component::Normal(_))) {
            let path = path.to_string_lossy().replace('\\', "/");
            let reason = if path.starts_with('/') {
                PathReason::Absolute
            } else {
                PathReason::Traversal
            };
            return Err(Error::PathRejected { path, reason });
        }
        let full_path = self.root.join(path);
        let sink_error = |source: io::Error| Error::SinkError {
            path: full_path.clone(),
            source,
        };
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(sink_error)?;
        }
        let mut options = OpenOptions::new();
        options.write(true);
        if self.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(&full_path).map_err(sink_error)?;
        debug!("writing {} ({} bytes)", full_path.display(), total_bytes);
        Ok(DirectoryFile {
            path: full_path,
            writer: BufWriter::new(file),
            written: 0,
            total: total_bytes,
            preserve_timestamp: self.preserve_timestamps,
        })
    }
}

impl DirectoryFile {
    fn error(&self, source: io::Error) -> Error {
        Error::SinkError { path: self.path.clone(), source }
    }
}

impl FileSink for DirectoryFile {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.written + bytes.len() as u64 > self.total {
            return Err(self.error(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("more than {} bytes written", self.total),
            )));
        }
        self.writer.write_all(bytes).map_err(|err| self.error(err))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn close(mut self, date: u16, time: u16) -> Result<()> {
        if self.written != self.total {
            let error = self.error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} of {} bytes written", self.written, self.total),
            ));
            self.abort();
            return Err(error);
        }
        if let Err(err) = self.writer.flush() {
            let error = self.error(err);
            self.abort();
            return Err(error);
        }
        if self.preserve_timestamp {
            set_mtime(&self.path, date, time);
        }
        Ok(())
    }

    fn abort(self) {
        let DirectoryFile { path, writer, .. } = self;
        drop(writer);
        if let Err(err) = fs::remove_file(&path) {
            warn!("could not remove partial file {}: {}", path.display(), err);
        }
    }
}

/// Applies a stored DOS timestamp to a finished file.  Failing to do so
/// only loses the timestamp: the file is kept and a warning logged.
fn set_mtime(path: &Path, date: u16, time: u16) {
    let Some(mtime) = system_time_from_bits(date, time) else {
        warn!(
            "{}: invalid stored date/time {:#06x} {:#06x}",
            path.display(),
            date,
            time
        );
        return;
    };
    if let Err(err) = filetime::set_file_mtime(path, FileTime::from_system_time(mtime)) {
        warn!("{}: could not set modification time: {}", path.display(), err);
    }
}

/// Turns a name stored in a cabinet into a relative path that stays inside
/// the output directory.
///
/// Leading backslashes are stripped.  Both `/` and `\` separate components
/// and `.` components are dropped.  Names that are empty, absolute, carry a
/// drive prefix, contain `..`, or contain NUL or `:` are rejected.
pub fn sanitize_path(name: &str) -> Result<PathBuf> {
    let display = name.replace('\\', "/");
    let reject = |reason| Err(Error::PathRejected { path: display.clone(), reason });
    let trimmed = name.trim_start_matches('\\');
    if trimmed.starts_with('/') {
        return reject(PathReason::Absolute);
    }
    let mut path = PathBuf::new();
    for (index, component) in trimmed.split(['/', '\\']).enumerate() {
        match component {
            "" | "." => continue,
            ".." => return reject(PathReason::Traversal),
            _ => {}
        }
        if index == 0 && has_drive_prefix(component) {
            return reject(PathReason::Absolute);
        }
        if component.contains(['\0', ':']) {
            return reject(PathReason::InvalidCharacter);
        }
        path.push(component);
    }
    if path.as_os_str().is_empty() {
        return reject(PathReason::Empty);
    }
    Ok(path)
}

fn has_drive_prefix(component: &str) -> bool {
    let bytes = component.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
