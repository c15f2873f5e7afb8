//! Builds cabinet files for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use time::PrimitiveDateTime;

mod lzx;

pub const FLAG_PREV_CABINET: u16 = 0x0001;
pub const FLAG_NEXT_CABINET: u16 = 0x0002;
const FLAG_RESERVE_PRESENT: u16 = 0x0004;

const ATTR_ARCH: u16 = 0x20;
const ATTR_NAME_IS_UTF: u16 = 0x80;

const BLOCK_SIZE: usize = 0x8000;
const MSZIP_SIGNATURE: u16 = 0x4b43;

/// How a folder's data blocks are encoded.
#[derive(Clone, Copy, Debug)]
pub enum Method {
    None,
    MsZip,
    /// LZX with the given window bits, written as uncompressed LZX blocks.
    Lzx(u8),
    /// LZX with the given window bits, compressed into verbatim blocks.
    LzxVerbatim(u8),
    /// LZX with the given window bits, compressed into aligned-offset blocks.
    LzxAligned(u8),
}

impl Method {
    fn bits(self) -> u16 {
        match self {
            Method::None => 0x0000,
            Method::MsZip => 0x0001,
            Method::Lzx(window) | Method::LzxVerbatim(window) | Method::LzxAligned(window) => {
                0x0003 | ((window as u16) << 8)
            }
        }
    }
}

pub struct TestFile {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub date: u16,
    pub time: u16,
    pub attributes: u16,
}

impl TestFile {
    /// A file stamped 2018-01-06 15:19:42, flagged UTF-8 if the name is not
    /// plain ASCII.
    pub fn new<D: Into<Vec<u8>>>(name: &str, data: D) -> TestFile {
        let mut attributes = ATTR_ARCH;
        if !name.is_ascii() {
            attributes |= ATTR_NAME_IS_UTF;
        }
        TestFile {
            name: name.as_bytes().to_vec(),
            data: data.into(),
            date: 0x4c26,
            time: 0x7a75,
            attributes,
        }
    }

    /// A file whose stored name bytes are used as given, without the UTF-8
    /// attribute.
    pub fn raw<D: Into<Vec<u8>>>(name: &[u8], data: D) -> TestFile {
        TestFile {
            name: name.to_vec(),
            data: data.into(),
            date: 0x4c26,
            time: 0x7a75,
            attributes: ATTR_ARCH,
        }
    }

    pub fn with_datetime(mut self, datetime: PrimitiveDateTime) -> TestFile {
        let (date, time) = dos_datetime(datetime);
        self.date = date;
        self.time = time;
        self
    }
}

struct TestFolder {
    method: Method,
    files: Vec<TestFile>,
}

struct Reserve {
    header: Vec<u8>,
    folder: u8,
    data: u8,
}

/// Where one CFDATA record landed in the built cabinet.
#[derive(Clone, Debug)]
pub struct BlockSpan {
    pub folder: usize,
    pub checksum: Range<usize>,
    pub payload: Range<usize>,
    pub uncompressed_size: usize,
}

pub struct Built {
    pub bytes: Vec<u8>,
    pub blocks: Vec<BlockSpan>,
}

impl Built {
    pub fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join("test.cab");
        fs::write(&path, &self.bytes).unwrap();
        path
    }
}

pub struct CabWriter {
    folders: Vec<TestFolder>,
    flags: u16,
    set_id: u16,
    reserve: Option<Reserve>,
    checksums: bool,
}

impl CabWriter {
    pub fn new() -> CabWriter {
        CabWriter {
            folders: Vec::new(),
            flags: 0,
            set_id: 0x1234,
            reserve: None,
            checksums: true,
        }
    }

    pub fn folder(&mut self, method: Method) -> &mut CabWriter {
        self.folders.push(TestFolder { method, files: Vec::new() });
        self
    }

    /// Adds a file to the most recently added folder.
    pub fn file(&mut self, file: TestFile) -> &mut CabWriter {
        self.folders.last_mut().expect("no folder").files.push(file);
        self
    }

    pub fn flags(&mut self, flags: u16) -> &mut CabWriter {
        self.flags = flags;
        self
    }

    pub fn reserve(&mut self, header: &[u8], folder: u8, data: u8) -> &mut CabWriter {
        self.reserve = Some(Reserve { header: header.to_vec(), folder, data });
        self
    }

    /// Stores zero checksums, which readers do not verify.
    pub fn without_checksums(&mut self) -> &mut CabWriter {
        self.checksums = false;
        self
    }

    pub fn build(&self) -> Built {
        let (folder_reserve, data_reserve) = match self.reserve {
            Some(ref reserve) => (reserve.folder as usize, reserve.data as usize),
            None => (0, 0),
        };
        let mut flags = self.flags;
        let mut header_len = 36;
        if let Some(ref reserve) = self.reserve {
            flags |= FLAG_RESERVE_PRESENT;
            header_len += 4 + reserve.header.len();
        }
        let mut volume_names = Vec::new();
        if flags & FLAG_PREV_CABINET != 0 {
            volume_names.extend_from_slice(b"prev.cab\0Disk 1\0");
        }
        if flags & FLAG_NEXT_CABINET != 0 {
            volume_names.extend_from_slice(b"next.cab\0Disk 3\0");
        }
        header_len += volume_names.len();
        let coff_files = header_len + self.folders.len() * (8 + folder_reserve);
        let num_files: usize = self.folders.iter().map(|f| f.files.len()).sum();
        let files_len: usize = self
            .folders
            .iter()
            .flat_map(|folder| folder.files.iter())
            .map(|file| 16 + file.name.len() + 1)
            .sum();

        let encoded = self
            .folders
            .iter()
            .map(|folder| {
                let stream: Vec<u8> = folder
                    .files
                    .iter()
                    .flat_map(|file| file.data.iter().copied())
                    .collect();
                encode_folder(folder.method, &stream)
            })
            .collect::<Vec<_>>();
        let mut data_offsets = Vec::new();
        let mut offset = coff_files + files_len;
        for frames in encoded.iter() {
            data_offsets.push(offset);
            offset += frames
                .iter()
                .map(|(data, _)| 8 + data_reserve + data.len())
                .sum::<usize>();
        }
        let total = offset;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"MSCF");
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(total as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(coff_files as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u8(3).unwrap();
        out.write_u8(1).unwrap();
        out.write_u16::<LittleEndian>(self.folders.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(num_files as u16).unwrap();
        out.write_u16::<LittleEndian>(flags).unwrap();
        out.write_u16::<LittleEndian>(self.set_id).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        if let Some(ref reserve) = self.reserve {
            out.write_u16::<LittleEndian>(reserve.header.len() as u16).unwrap();
            out.write_u8(reserve.folder).unwrap();
            out.write_u8(reserve.data).unwrap();
            out.extend_from_slice(&reserve.header);
        }
        out.extend_from_slice(&volume_names);

        for (index, folder) in self.folders.iter().enumerate() {
            out.write_u32::<LittleEndian>(data_offsets[index] as u32).unwrap();
            out.write_u16::<LittleEndian>(encoded[index].len() as u16).unwrap();
            out.write_u16::<LittleEndian>(folder.method.bits()).unwrap();
            out.extend(std::iter::repeat(0xf0).take(folder_reserve));
        }
        assert_eq!(out.len(), coff_files);

        for (index, folder) in self.folders.iter().enumerate() {
            let mut offset = 0u32;
            for file in folder.files.iter() {
                out.write_u32::<LittleEndian>(file.data.len() as u32).unwrap();
                out.write_u32::<LittleEndian>(offset).unwrap();
                out.write_u16::<LittleEndian>(index as u16).unwrap();
                out.write_u16::<LittleEndian>(file.date).unwrap();
                out.write_u16::<LittleEndian>(file.time).unwrap();
                out.write_u16::<LittleEndian>(file.attributes).unwrap();
                out.extend_from_slice(&file.name);
                out.push(0);
                offset += file.data.len() as u32;
            }
        }

        let mut blocks = Vec::new();
        for (index, frames) in encoded.iter().enumerate() {
            assert_eq!(out.len(), data_offsets[index]);
            for (data, uncompressed_size) in frames.iter() {
                let checksum = if self.checksums {
                    block_checksum(data, data.len() as u16, *uncompressed_size as u16)
                } else {
                    0
                };
                let start = out.len();
                out.write_u32::<LittleEndian>(checksum).unwrap();
                out.write_u16::<LittleEndian>(data.len() as u16).unwrap();
                out.write_u16::<LittleEndian>(*uncompressed_size as u16).unwrap();
                out.extend(std::iter::repeat(0x0f).take(data_reserve));
                let payload_start = out.len();
                out.extend_from_slice(data);
                blocks.push(BlockSpan {
                    folder: index,
                    checksum: start..start + 4,
                    payload: payload_start..out.len(),
                    uncompressed_size: *uncompressed_size,
                });
            }
        }
        assert_eq!(out.len(), total);
        Built { bytes: out, blocks }
    }
}

/// Splits a folder's stream into 32 KiB blocks and encodes each one,
/// returning `(payload, uncompressed size)` pairs.
fn encode_folder(method: Method, stream: &[u8]) -> Vec<(Vec<u8>, usize)> {
    match method {
        Method::None => {
            stream.chunks(BLOCK_SIZE).map(|chunk| (chunk.to_vec(), chunk.len())).collect()
        }
        Method::MsZip => {
            let mut compressor = flate2::Compress::new(Compression::best(), false);
            let count = (stream.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
            stream
                .chunks(BLOCK_SIZE)
                .enumerate()
                .map(|(index, chunk)| {
                    let is_last = index + 1 == count;
                    let mut out = Vec::<u8>::with_capacity(0xffff);
                    out.write_u16::<LittleEndian>(MSZIP_SIGNATURE).unwrap();
                    let flush = if is_last {
                        flate2::FlushCompress::Finish
                    } else {
                        flate2::FlushCompress::Sync
                    };
                    compressor.compress_vec(chunk, &mut out, flush).unwrap();
                    if !is_last {
                        out.write_u16::<LittleEndian>(0x0003).unwrap();
                    }
                    (out, chunk.len())
                })
                .collect()
        }
        Method::Lzx(_) => lzx_stored_frames(stream),
        Method::LzxVerbatim(window) => lzx::compressed_frames(stream, window, false),
        Method::LzxAligned(window) => lzx::compressed_frames(stream, window, true),
    }
}

/// Encodes the whole stream as a single uncompressed LZX block, cut into
/// 32 KiB frames.
fn lzx_stored_frames(stream: &[u8]) -> Vec<(Vec<u8>, usize)> {
    let mut frames = Vec::new();
    for (index, chunk) in stream.chunks(BLOCK_SIZE).enumerate() {
        let mut frame = Vec::new();
        if index == 0 {
            // No E8 header bit, then block type 3 and a 24-bit length,
            // padded to a 16-bit boundary.
            let header = (3u32 << 28) | ((stream.len() as u32) << 4);
            frame.write_u16::<LittleEndian>((header >> 16) as u16).unwrap();
            frame.write_u16::<LittleEndian>(header as u16).unwrap();
            for _ in 0..3 {
                frame.write_u32::<LittleEndian>(1).unwrap();
            }
        }
        frame.extend_from_slice(chunk);
        frames.push((frame, chunk.len()));
    }
    if stream.len() % 2 == 1 {
        if let Some((frame, _)) = frames.last_mut() {
            frame.push(0);
        }
    }
    frames
}

pub fn block_checksum(payload: &[u8], compressed_size: u16, uncompressed_size: u16) -> u32 {
    let mut words = payload.chunks_exact(4);
    let mut checksum = 0u32;
    for word in &mut words {
        checksum ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    let tail = words
        .remainder()
        .iter()
        .fold(0u32, |acc, &byte| (acc << 8) | byte as u32);
    checksum ^ tail ^ (compressed_size as u32 | (uncompressed_size as u32) << 16)
}

pub fn dos_datetime(datetime: PrimitiveDateTime) -> (u16, u16) {
    let date = ((datetime.year() - 1980) as u16) << 9
        | (u8::from(datetime.month()) as u16) << 5
        | datetime.day() as u16;
    let time = (datetime.hour() as u16) << 11
        | (datetime.minute() as u16) << 5
        | (datetime.second() / 2) as u16;
    (date, time)
}

/// Every regular file beneath `dir`, keyed by its path relative to `dir`.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                out.push((relative, fs::read(&path).unwrap()));
            }
        }
    }
    let mut files = Vec::new();
    if dir.exists() {
        walk(dir, dir, &mut files);
    }
    files.sort();
    files
}
