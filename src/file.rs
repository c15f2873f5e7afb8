use std::io::{Read, Seek};
use std::slice;

use time::PrimitiveDateTime;

use crate::consts;
use crate::datetime::datetime_from_bits;
use crate::error::Result;
use crate::reader::ByteReader;
use crate::string::read_null_terminated_string;

/// An iterator over file entries.
#[derive(Clone)]
pub struct FileEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FileEntry>,
}

/// Metadata about one file stored in a cabinet.
#[derive(Debug, Clone)]
pub struct FileEntry {
    name: String,
    name_is_valid: bool,
    date: u16,
    time: u16,
    uncompressed_size: u32,
    attributes: u16,
    pub(crate) folder_index: u16,
    pub(crate) uncompressed_offset: u32,
}

impl<'a> Iterator for FileEntries<'a> {
    type Item = &'a FileEntry;

    fn next(&mut self) -> Option<&'a FileEntry> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FileEntries<'a> {}

impl FileEntry {
    /// Returns the name of file, exactly as stored (including any directory
    /// components, which are usually separated by backslashes).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns false if the name is flagged as UTF-8 but its stored bytes
    /// are not valid UTF-8.  [`name`](FileEntry::name) then shows the bad
    /// bytes as U+FFFD, and the file is never extracted.
    pub fn is_name_valid(&self) -> bool {
        self.name_is_valid
    }

    /// Returns the datetime for this file.  According to the CAB format
    /// documentation, this "is typically considered the 'last modified' time
    /// in local time, but the actual definition is application-defined."
    ///
    /// Note that this will return [`None`] if the datetime in the cabinet file
    /// was not a valid date/time.
    pub fn datetime(&self) -> Option<PrimitiveDateTime> {
        datetime_from_bits(self.date, self.time)
    }

    /// Returns the raw packed DOS `(date, time)` fields.
    pub fn dos_datetime(&self) -> (u16, u16) {
        (self.date, self.time)
    }

    /// Returns the total size of the file when decompressed, in bytes.
    pub fn uncompressed_size(&self) -> u32 {
        self.uncompressed_size
    }

    /// Returns the offset of the file's first byte within its folder's
    /// uncompressed data.
    pub fn uncompressed_offset(&self) -> u32 {
        self.uncompressed_offset
    }

    /// Returns the index of the folder holding this file's data.
    pub fn folder_index(&self) -> u16 {
        self.folder_index
    }

    /// Returns true if this file has the "read-only" attribute set.
    pub fn is_read_only(&self) -> bool {
        (self.attributes & consts::ATTR_READ_ONLY) != 0
    }

    /// Returns true if this file has the "hidden" attribute set.
    pub fn is_hidden(&self) -> bool {
        (self.attributes & consts::ATTR_HIDDEN) != 0
    }

    /// Returns true if this file has the "system file" attribute set.
    pub fn is_system(&self) -> bool {
        (self.attributes & consts::ATTR_SYSTEM) != 0
    }

    /// Returns true if this file has the "archive" (modified since last
    /// backup) attribute set.
    pub fn is_archive(&self) -> bool {
        (self.attributes & consts::ATTR_ARCH) != 0
    }

    /// Returns true if this file has the "execute after extraction" attribute
    /// set.
    pub fn is_exec(&self) -> bool {
        (self.attributes & consts::ATTR_EXEC) != 0
    }

    /// Returns true if this file has the "name is UTF" attribute set.
    pub fn is_name_utf(&self) -> bool {
        (self.attributes & consts::ATTR_NAME_IS_UTF) != 0
    }

    /// Returns the folder-relative byte range `[start, end)` of this file.
    pub(crate) fn folder_range(&self) -> (u64, u64) {
        let start = self.uncompressed_offset as u64;
        (start, start + self.uncompressed_size as u64)
    }
}

pub(crate) fn parse_file_entry<R: Read + Seek>(
    reader: &mut ByteReader<R>,
) -> Result<FileEntry> {
    let uncompressed_size = reader.read_u32()?;
    let uncompressed_offset = reader.read_u32()?;
    let folder_index = reader.read_u16()?;
    let date = reader.read_u16()?;
    let time = reader.read_u16()?;
    let attributes = reader.read_u16()?;
    let is_utf8 = (attributes & consts::ATTR_NAME_IS_UTF) != 0;
    let (name, name_is_valid) = read_null_terminated_string(reader, is_utf8)?;
    Ok(FileEntry {
        name,
        name_is_valid,
        date,
        time,
        uncompressed_size,
        attributes,
        folder_index,
        uncompressed_offset,
    })
}
