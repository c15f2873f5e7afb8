use std::io;

use lzxd::{Lzxd, WindowSize};

use crate::error::{Error, Result};
use crate::mszip::MsZipDecompressor;
use crate::quantum::QuantumDecompressor;

const CTYPE_NONE: u16 = 0;
const CTYPE_MSZIP: u16 = 1;
const CTYPE_QUANTUM: u16 = 2;
const CTYPE_LZX: u16 = 3;

const QUANTUM_LEVEL_MIN: u16 = 1;
const QUANTUM_LEVEL_MAX: u16 = 7;
const QUANTUM_MEMORY_MIN: u16 = 10;
const QUANTUM_MEMORY_MAX: u16 = 21;

/// A scheme for compressing data within the cabinet.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression.
    None,
    /// MSZIP compression.  MSZIP is described further in
    /// [MS-MCI](https://msdn.microsoft.com/en-us/library/cc483131.aspx).
    MsZip,
    /// Quantum compression with the given level and window bits.
    Quantum(u16, u16),
    /// LZX compression with a window of `1 << bits` bytes.  The LZX
    /// compression scheme is described further in
    /// [MS-PATCH](https://msdn.microsoft.com/en-us/library/cc483133.aspx).
    Lzx(u16),
}

impl CompressionType {
    pub(crate) fn from_bitfield(bits: u16) -> Result<CompressionType> {
        let ctype = bits & 0x000f;
        if ctype == CTYPE_NONE {
            Ok(CompressionType::None)
        } else if ctype == CTYPE_MSZIP {
            Ok(CompressionType::MsZip)
        } else if ctype == CTYPE_QUANTUM {
            let level = (bits & 0x00f0) >> 4;
            let memory = (bits & 0x1f00) >> 8;
            if !(QUANTUM_LEVEL_MIN..=QUANTUM_LEVEL_MAX).contains(&level)
                || !(QUANTUM_MEMORY_MIN..=QUANTUM_MEMORY_MAX).contains(&memory)
            {
                return Err(Error::UnsupportedCompression(bits));
            }
            Ok(CompressionType::Quantum(level, memory))
        } else if ctype == CTYPE_LZX {
            let window = (bits & 0x1f00) >> 8;
            if lzx_window_size(window).is_none() {
                return Err(Error::UnsupportedCompression(bits));
            }
            Ok(CompressionType::Lzx(window))
        } else {
            Err(Error::UnsupportedCompression(bits))
        }
    }

    /// Creates the decoder state for a new folder.
    pub(crate) fn into_decompressor(self) -> Result<Decompressor> {
        match self {
            CompressionType::None => Ok(Decompressor::Uncompressed),
            CompressionType::MsZip => {
                Ok(Decompressor::MsZip(Box::new(MsZipDecompressor::new())))
            }
            CompressionType::Quantum(level, memory) => {
                if !(QUANTUM_MEMORY_MIN..=QUANTUM_MEMORY_MAX).contains(&memory) {
                    return Err(Error::UnsupportedCompression(
                        CTYPE_QUANTUM | (level << 4) | (memory << 8),
                    ));
                }
                Ok(Decompressor::Quantum(Box::new(QuantumDecompressor::new(
                    memory as u8,
                ))))
            }
            CompressionType::Lzx(window) => match lzx_window_size(window) {
                Some(size) => Ok(Decompressor::Lzx(Box::new(Lzxd::new(size)))),
                None => {
                    Err(Error::UnsupportedCompression(CTYPE_LZX | (window << 8)))
                }
            },
        }
    }
}

/// Cabinets allow LZX windows from 32 KiB up to 2 MiB.
fn lzx_window_size(window: u16) -> Option<WindowSize> {
    match window {
        15 => Some(WindowSize::KB32),
        16 => Some(WindowSize::KB64),
        17 => Some(WindowSize::KB128),
        18 => Some(WindowSize::KB256),
        19 => Some(WindowSize::KB512),
        20 => Some(WindowSize::MB1),
        21 => Some(WindowSize::MB2),
        _ => None,
    }
}

/// Decoder state for one folder, fed that folder's data blocks in order.
pub enum Decompressor {
    Uncompressed,
    MsZip(Box<MsZipDecompressor>),
    Quantum(Box<QuantumDecompressor>),
    Lzx(Box<Lzxd>),
}

impl Decompressor {
    /// Decodes one data block, which must expand to exactly
    /// `uncompressed_size` bytes.
    pub(crate) fn decompress(
        &mut self,
        data: Vec<u8>,
        uncompressed_size: usize,
    ) -> io::Result<Vec<u8>> {
        match self {
            Decompressor::Uncompressed => {
                if data.len() != uncompressed_size {
                    invalid_data!(
                        "stored block holds {} bytes but claims {}",
                        data.len(),
                        uncompressed_size
                    );
                }
                Ok(data)
            }
            Decompressor::MsZip(decompressor) => {
                decompressor.decompress_block(&data, uncompressed_size)
            }
            Decompressor::Quantum(decompressor) => {
                decompressor.decompress_block(&data, uncompressed_size)
            }
            Decompressor::Lzx(decoder) => {
                let out = decoder
                    .decompress_next(&data, uncompressed_size)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                Ok(out.to_vec())
            }
        }
    }
}
