use std::io::{Read, Seek};

use log::debug;

use crate::consts;
use crate::error::{Error, Result};
use crate::file::{parse_file_entry, FileEntries, FileEntry};
use crate::folder::{parse_folder_entry, DataBlocks, FolderEntries, FolderEntry};
use crate::reader::{truncated, ByteReader};
use crate::string::read_null_terminated_string;

/// A structure for reading a cabinet file.
pub struct Cabinet<R> {
    reader: ByteReader<R>,
    cabinet_set_id: u16,
    cabinet_set_index: u16,
    data_reserve_size: u8,
    reserve_data: Vec<u8>,
    folders: Vec<FolderEntry>,
    files: Vec<FileEntry>,
}

impl<R: Read + Seek> Cabinet<R> {
    /// Opens an existing cabinet file, parsing and validating its header and
    /// its folder and file tables.  No file data is read.
    pub fn new(reader: R) -> Result<Cabinet<R>> {
        let mut reader = ByteReader::new(reader)?;
        let signature = truncated("header", reader.read_u32())?;
        if signature != consts::FILE_SIGNATURE {
            malformed!("not a cabinet file (invalid file signature)");
        }
        let header = truncated("header", reader.read_bytes(32))?;
        let header = &mut header.as_slice();
        let _reserved1 = take_u32(header);
        let total_size = take_u32(header);
        let _reserved2 = take_u32(header);
        let first_file_offset = take_u32(header);
        let _reserved3 = take_u32(header);
        let minor_version = take_u8(header);
        let major_version = take_u8(header);
        let num_folders = take_u16(header) as usize;
        let num_files = take_u16(header) as usize;
        let flags = take_u16(header);
        let cabinet_set_id = take_u16(header);
        let cabinet_set_index = take_u16(header);

        if major_version != consts::VERSION_MAJOR
            || minor_version != consts::VERSION_MINOR
        {
            malformed!(
                "version {}.{} cabinet files are not supported",
                major_version,
                minor_version
            );
        }
        if total_size > consts::MAX_TOTAL_CAB_SIZE {
            malformed!(
                "cabinet total size field is too large \
                 ({} bytes; max is {} bytes)",
                total_size,
                consts::MAX_TOTAL_CAB_SIZE
            );
        }
        if (total_size as u64) < consts::HEADER_SIZE {
            malformed!("cabinet total size {} is below the header size", total_size);
        }
        let has_reserve = (flags & consts::FLAG_RESERVE_PRESENT) != 0;
        if reader.len() < total_size as u64 {
            malformed!(
                "cabinet is truncated ({} of {} bytes present)",
                reader.len(),
                total_size
            );
        }
        if reader.len() > total_size as u64 && !has_reserve {
            malformed!(
                "cabinet size field says {} bytes but the file has {}",
                total_size,
                reader.len()
            );
        }

        let mut header_reserve_size = 0u16;
        let mut folder_reserve_size = 0u8;
        let mut data_reserve_size = 0u8;
        if has_reserve {
            header_reserve_size = truncated("header", reader.read_u16())?;
            folder_reserve_size = truncated("header", reader.read_u8())?;
            data_reserve_size = truncated("header", reader.read_u8())?;
        }
        let reserve_data = truncated(
            "header reserve",
            reader.read_bytes(header_reserve_size as usize),
        )?;
        for flag in [consts::FLAG_PREV_CABINET, consts::FLAG_NEXT_CABINET] {
            if (flags & flag) != 0 {
                let (cabinet, _) =
                    truncated("header", read_null_terminated_string(&mut reader, false))?;
                let (disk, _) =
                    truncated("header", read_null_terminated_string(&mut reader, false))?;
                debug!("cabinet continues {:?} on {:?}", cabinet, disk);
                return Err(Error::UnsupportedMultiVolume);
            }
        }

        if num_folders == 0 && num_files > 0 {
            malformed!("{} files listed but the cabinet has no folders", num_files);
        }
        let mut folders = Vec::<FolderEntry>::with_capacity(num_folders);
        for index in 0..num_folders {
            let entry = truncated(
                "folder table",
                parse_folder_entry(&mut reader, folder_reserve_size as usize),
            )?;
            let offset = entry.first_data_block_offset();
            if offset >= total_size {
                malformed!(
                    "folder {} data offset {} lies outside the cabinet",
                    index,
                    offset
                );
            }
            if let Some(previous) = folders.last() {
                if offset <= previous.first_data_block_offset() {
                    malformed!(
                        "folder {} data offset {} does not follow folder {}",
                        index,
                        offset,
                        index - 1
                    );
                }
            }
            folders.push(entry);
        }

        truncated("file table", reader.seek(first_file_offset as u64))?;
        let mut files = Vec::<FileEntry>::with_capacity(num_files);
        for _ in 0..num_files {
            let entry = truncated("file table", parse_file_entry(&mut reader))?;
            match entry.folder_index {
                consts::IFOLD_CONTINUED_FROM_PREV
                | consts::IFOLD_CONTINUED_TO_NEXT
                | consts::IFOLD_CONTINUED_PREV_AND_NEXT => {
                    return Err(Error::UnsupportedMultiVolume);
                }
                index if index as usize >= folders.len() => {
                    malformed!(
                        "file {:?} names folder {} of {}",
                        entry.name(),
                        index,
                        folders.len()
                    );
                }
                index => folders[index as usize].files.push(entry.clone()),
            }
            files.push(entry);
        }
        if reader.tell() > total_size as u64 {
            malformed!(
                "file table ends at {}, past the end of the cabinet",
                reader.tell()
            );
        }
        for (index, folder) in folders.iter().enumerate() {
            check_file_ranges(index, folder)?;
        }

        debug!(
            "cabinet: {} bytes, {} folders, {} files, set {:#06x}/{}, \
             reserve {}/{}/{}",
            total_size,
            folders.len(),
            files.len(),
            cabinet_set_id,
            cabinet_set_index,
            header_reserve_size,
            folder_reserve_size,
            data_reserve_size
        );
        Ok(Cabinet {
            reader,
            cabinet_set_id,
            cabinet_set_index,
            data_reserve_size,
            reserve_data,
            folders,
            files,
        })
    }

    /// Returns the cabinet set ID for this cabinet (an arbitrary number used
    /// to group together a set of cabinets).
    pub fn cabinet_set_id(&self) -> u16 {
        self.cabinet_set_id
    }

    /// Returns this cabinet's (zero-based) index within its cabinet set.
    pub fn cabinet_set_index(&self) -> u16 {
        self.cabinet_set_index
    }

    /// Returns the application-defined reserve data stored in the cabinet
    /// header.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }

    /// Returns an iterator over the folder entries in this cabinet.
    pub fn folder_entries(&self) -> FolderEntries<'_> {
        FolderEntries { iter: self.folders.iter() }
    }

    /// Returns an iterator over all file entries in this cabinet, in table
    /// order.
    pub fn file_entries(&self) -> FileEntries<'_> {
        FileEntries { iter: self.files.iter() }
    }

    /// Returns the entry for the file with the given name, if any.
    pub fn get_file_entry(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|&file| file.name() == name)
    }

    pub(crate) fn folder(&self, index: usize) -> &FolderEntry {
        &self.folders[index]
    }

    /// Starts reading the data blocks of the given folder.
    pub(crate) fn data_blocks(
        &mut self,
        index: usize,
    ) -> Result<DataBlocks<'_, R>> {
        DataBlocks::new(
            &mut self.reader,
            &self.folders[index],
            self.data_reserve_size,
        )
    }
}

/// Rejects overlapping non-empty files within a folder.
fn check_file_ranges(index: usize, folder: &FolderEntry) -> Result<()> {
    let mut ranges = folder
        .files
        .iter()
        .filter(|file| file.uncompressed_size() > 0)
        .map(|file| (file.folder_range(), file.name()))
        .collect::<Vec<_>>();
    ranges.sort_by_key(|&(range, _)| range);
    for pair in ranges.windows(2) {
        let ((_, end), first) = pair[0];
        let ((start, _), second) = pair[1];
        if start < end {
            malformed!(
                "files {:?} and {:?} overlap in folder {}",
                first,
                second,
                index
            );
        }
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8]) -> u8 {
    let value = buf[0];
    *buf = &buf[1..];
    value
}

fn take_u16(buf: &mut &[u8]) -> u16 {
    let value = u16::from_le_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    value
}

fn take_u32(buf: &mut &[u8]) -> u32 {
    let value = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    value
}
