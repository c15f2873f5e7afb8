use std::io;

use byteorder::{LittleEndian, WriteBytesExt};

const MSZIP_SIGNATURE: u16 = 0x4B43; // "CK" stored little-endian
const MSZIP_SIGNATURE_LEN: usize = 2;
const DEFLATE_MAX_DICT_LEN: usize = 0x8000;

/// Decoder for MSZIP folders: each block is a "CK" signature followed by raw
/// DEFLATE data that may refer back to the previous 32 KiB of output.
pub struct MsZipDecompressor {
    decompressor: flate2::Decompress,
    dictionary: Vec<u8>,
}

impl MsZipDecompressor {
    pub fn new() -> MsZipDecompressor {
        MsZipDecompressor {
            decompressor: flate2::Decompress::new(false),
            dictionary: Vec::with_capacity(DEFLATE_MAX_DICT_LEN),
        }
    }

    pub fn decompress_block(
        &mut self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> io::Result<Vec<u8>> {
        if data.len() < MSZIP_SIGNATURE_LEN
            || ((data[0] as u16) | ((data[1] as u16) << 8)) != MSZIP_SIGNATURE
        {
            invalid_data!("invalid MSZIP block signature");
        }
        let data = &data[MSZIP_SIGNATURE_LEN..];
        self.decompressor.reset(false);
        if !self.dictionary.is_empty() {
            self.seed_dictionary()?;
        }
        // One spare byte of room shows up blocks that hold too much data.
        let mut out = Vec::<u8>::with_capacity(uncompressed_size + 1);
        let flush = flate2::FlushDecompress::Finish;
        let before = self.decompressor.total_in();
        match self.decompressor.decompress_vec(data, &mut out, flush) {
            Ok(flate2::Status::StreamEnd) => {}
            Ok(status) => {
                let consumed = self.decompressor.total_in() - before;
                if consumed < data.len() as u64 {
                    invalid_data!(
                        "MSZIP inflate stopped ({:?}) after {} of {} bytes",
                        status,
                        consumed,
                        data.len()
                    );
                }
            }
            Err(error) => invalid_data!("MSZIP inflate failed: {}", error),
        }
        if out.len() != uncompressed_size {
            invalid_data!(
                "MSZIP block decoded to {} bytes, expected {}",
                out.len(),
                uncompressed_size
            );
        }
        self.remember(&out);
        Ok(out)
    }

    /// Primes the inflater's window by running the dictionary through it as
    /// a stored (uncompressed) DEFLATE block.
    fn seed_dictionary(&mut self) -> io::Result<()> {
        debug_assert!(self.dictionary.len() <= DEFLATE_MAX_DICT_LEN);
        let length = self.dictionary.len() as u16;
        let mut chunk = Vec::with_capacity(self.dictionary.len() + 5);
        chunk.push(0);
        chunk.write_u16::<LittleEndian>(length)?;
        chunk.write_u16::<LittleEndian>(!length)?;
        chunk.extend_from_slice(&self.dictionary);
        let mut out = Vec::with_capacity(self.dictionary.len());
        let flush = flate2::FlushDecompress::Sync;
        match self.decompressor.decompress_vec(&chunk, &mut out, flush) {
            Ok(flate2::Status::Ok) if out.len() == self.dictionary.len() => {
                Ok(())
            }
            Ok(status) => {
                invalid_data!("MSZIP dictionary seeding stopped: {:?}", status)
            }
            Err(error) => {
                invalid_data!("MSZIP dictionary seeding failed: {}", error)
            }
        }
    }

    fn remember(&mut self, out: &[u8]) {
        if out.len() >= DEFLATE_MAX_DICT_LEN {
            let start = out.len() - DEFLATE_MAX_DICT_LEN;
            self.dictionary.clear();
            self.dictionary.extend_from_slice(&out[start..]);
        } else {
            let total = self.dictionary.len() + out.len();
            if total > DEFLATE_MAX_DICT_LEN {
                self.dictionary.drain(..(total - DEFLATE_MAX_DICT_LEN));
            }
            self.dictionary.extend_from_slice(out);
        }
    }
}
