use std::io::{Read, Seek};
use std::slice;

use crate::checksum::block_checksum;
use crate::ctype::CompressionType;
use crate::error::Result;
use crate::file::{FileEntries, FileEntry};
use crate::reader::{truncated, ByteReader};

/// An iterator over the folder entries in a cabinet.
#[derive(Clone)]
pub struct FolderEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FolderEntry>,
}

/// Metadata about one folder in a cabinet.
#[derive(Debug, Clone)]
pub struct FolderEntry {
    first_data_block_offset: u32,
    num_data_blocks: u16,
    compression_bits: u16,
    reserve_data: Vec<u8>,
    pub(crate) files: Vec<FileEntry>,
}

/// One CFDATA record, read but not yet verified or decoded.
#[derive(Debug)]
pub(crate) struct DataBlock {
    checksum: u32,
    uncompressed_size: u16,
    pub(crate) data: Vec<u8>,
}

/// Reads a folder's data blocks in order, starting at its first block.
pub(crate) struct DataBlocks<'a, R> {
    reader: &'a mut ByteReader<R>,
    reserve_size: u8,
    index: usize,
    count: usize,
}

impl<'a> Iterator for FolderEntries<'a> {
    type Item = &'a FolderEntry;

    fn next(&mut self) -> Option<&'a FolderEntry> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FolderEntries<'a> {}

impl FolderEntry {
    /// Returns the scheme used to compress this folder's data, or an
    /// [`Error::UnsupportedCompression`](crate::Error::UnsupportedCompression)
    /// if the folder names a scheme or window size this crate cannot decode.
    pub fn compression_type(&self) -> Result<CompressionType> {
        CompressionType::from_bitfield(self.compression_bits)
    }

    /// Returns the raw `typeCompress` field.
    pub fn compression_bits(&self) -> u16 {
        self.compression_bits
    }

    /// Returns the number of data blocks used to store this folder's data.
    pub fn num_data_blocks(&self) -> u16 {
        self.num_data_blocks
    }

    /// Returns the absolute offset of this folder's first data block.
    pub fn first_data_block_offset(&self) -> u32 {
        self.first_data_block_offset
    }

    /// Returns the application-defined reserve data for this folder.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }

    /// Returns an iterator over the file entries in this folder, in table
    /// order.
    pub fn file_entries(&self) -> FileEntries<'_> {
        FileEntries { iter: self.files.iter() }
    }

    /// Returns the number of uncompressed bytes the folder's files require.
    pub(crate) fn required_size(&self) -> u64 {
        self.files.iter().map(|file| file.folder_range().1).max().unwrap_or(0)
    }
}

impl DataBlock {
    pub(crate) fn uncompressed_size(&self) -> usize {
        self.uncompressed_size as usize
    }

    /// Returns false if the stored checksum is non-zero and disagrees with
    /// the payload.
    pub(crate) fn checksum_ok(&self) -> bool {
        if self.checksum == 0 {
            return true;
        }
        let computed = block_checksum(
            &self.data,
            self.data.len() as u16,
            self.uncompressed_size,
        );
        computed == self.checksum
    }
}

impl<'a, R: Read + Seek> DataBlocks<'a, R> {
    pub(crate) fn new(
        reader: &'a mut ByteReader<R>,
        folder: &FolderEntry,
        reserve_size: u8,
    ) -> Result<DataBlocks<'a, R>> {
        truncated(
            "data block",
            reader.seek(folder.first_data_block_offset as u64),
        )?;
        Ok(DataBlocks {
            reader,
            reserve_size,
            index: 0,
            count: folder.num_data_blocks as usize,
        })
    }

    fn read_block(&mut self) -> Result<DataBlock> {
        let reader = &mut *self.reader;
        let checksum = reader.read_u32()?;
        let compressed_size = reader.read_u16()?;
        let uncompressed_size = reader.read_u16()?;
        reader.skip(self.reserve_size as u64)?;
        let data = reader.read_bytes(compressed_size as usize)?;
        Ok(DataBlock { checksum, uncompressed_size, data })
    }
}

impl<'a, R: Read + Seek> Iterator for DataBlocks<'a, R> {
    type Item = Result<DataBlock>;

    fn next(&mut self) -> Option<Result<DataBlock>> {
        if self.index >= self.count {
            return None;
        }
        let result = truncated("data block", self.read_block());
        if result.is_err() {
            self.count = self.index;
        } else {
            self.index += 1;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

pub(crate) fn parse_folder_entry<R: Read + Seek>(
    reader: &mut ByteReader<R>,
    reserve_size: usize,
) -> Result<FolderEntry> {
    let first_data_block_offset = reader.read_u32()?;
    let num_data_blocks = reader.read_u16()?;
    let compression_bits = reader.read_u16()?;
    let reserve_data = reader.read_bytes(reserve_size)?;
    Ok(FolderEntry {
        first_data_block_offset,
        num_data_blocks,
        compression_bits,
        reserve_data,
        files: Vec::new(),
    })
}
