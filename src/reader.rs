//! Buffered little-endian reader over a seekable cabinet source.

use std::io::{BufReader, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// A buffered, seekable reader that knows the total length of its source,
/// so that every read can be checked against the bytes actually left.
///
/// No read ever returns fewer bytes than requested: running out of input is
/// always reported as [`Error::ShortRead`].
pub struct ByteReader<R> {
    inner: BufReader<R>,
    position: u64,
    len: u64,
}

impl<R: Read + Seek> ByteReader<R> {
    /// Wraps `source`, measuring its length and rewinding it to the start.
    pub fn new(mut source: R) -> Result<ByteReader<R>> {
        let len = source
            .seek(SeekFrom::End(0))
            .map_err(|err| Error::io("seek", err))?;
        source.seek(SeekFrom::Start(0)).map_err(|err| Error::io("seek", err))?;
        Ok(ByteReader { inner: BufReader::new(source), position: 0, len })
    }

    /// Returns the total length of the source in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns the current absolute position.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Returns the number of bytes between the current position and the end
    /// of the source.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    /// Moves to an absolute position.  Seeking past the end is an error.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.len {
            return Err(Error::ShortRead {
                wanted: position - self.position,
                available: self.remaining(),
            });
        }
        let delta = position as i64 - self.position as i64;
        self.inner
            .seek_relative(delta)
            .map_err(|err| Error::io("seek", err))?;
        self.position = position;
        Ok(())
    }

    /// Skips `count` bytes.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        self.ensure(count)?;
        self.seek(self.position + count)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let value = self.inner.read_u8().map_err(|err| Error::io("read", err))?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let value = self
            .inner
            .read_u16::<LittleEndian>()
            .map_err(|err| Error::io("read", err))?;
        self.position += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let value = self
            .inner
            .read_u32::<LittleEndian>()
            .map_err(|err| Error::io("read", err))?;
        self.position += 4;
        Ok(value)
    }

    /// Reads exactly `count` bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.ensure(count as u64)?;
        let mut buffer = vec![0u8; count];
        self.inner
            .read_exact(&mut buffer)
            .map_err(|err| Error::io("read", err))?;
        self.position += count as u64;
        Ok(buffer)
    }

    /// Reads bytes up to a NUL terminator, which is consumed but not
    /// returned.  At most `max_len` bytes may precede the terminator.
    pub fn read_cstr(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_u8()?;
            if byte == 0 {
                return Ok(bytes);
            }
            if bytes.len() == max_len {
                malformed!(
                    "string at offset {} is longer than {} bytes",
                    self.position - bytes.len() as u64 - 1,
                    max_len
                );
            }
            bytes.push(byte);
        }
    }

    fn ensure(&self, count: u64) -> Result<()> {
        let available = self.remaining();
        if count > available {
            return Err(Error::ShortRead { wanted: count, available });
        }
        Ok(())
    }
}

impl<R> std::fmt::Debug for ByteReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteReader")
            .field("position", &self.position)
            .field("len", &self.len)
            .finish()
    }
}

/// Turns a short read into a header rejection naming what was being read.
pub(crate) fn truncated<T>(what: &str, result: Result<T>) -> Result<T> {
    match result {
        Err(Error::ShortRead { .. }) => {
            Err(Error::MalformedHeader(format!("truncated {}", what)))
        }
        other => other,
    }
}
