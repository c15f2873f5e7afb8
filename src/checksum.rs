/// Running CAB checksum: an XOR of the input taken as little-endian 32-bit
/// words, with 1-3 trailing bytes folded into the low end of a final word
/// in reverse order.
pub struct Checksum {
    value: u32,
    remainder: u32,
    remainder_shift: u32,
}

impl Checksum {
    pub fn new() -> Checksum {
        Checksum { value: 0, remainder: 0, remainder_shift: 0 }
    }

    pub fn value(&self) -> u32 {
        match self.remainder_shift {
            0 => self.value,
            8 => self.value ^ self.remainder,
            16 => {
                self.value
                    ^ (self.remainder >> 8)
                    ^ ((self.remainder & 0xff) << 8)
            }
            _ => {
                self.value
                    ^ (self.remainder >> 16)
                    ^ (self.remainder & 0xff00)
                    ^ ((self.remainder & 0xff) << 16)
            }
        }
    }

    pub fn update(&mut self, buf: &[u8]) {
        let mut buf = buf;
        // Finish a partial word, then run through whole words.
        while self.remainder_shift != 0 && !buf.is_empty() {
            self.push_byte(buf[0]);
            buf = &buf[1..];
        }
        let mut words = buf.chunks_exact(4);
        for word in &mut words {
            self.value ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }
        for &byte in words.remainder() {
            self.push_byte(byte);
        }
    }

    fn push_byte(&mut self, byte: u8) {
        self.remainder |= (byte as u32) << self.remainder_shift;
        if self.remainder_shift == 24 {
            self.value ^= self.remainder;
            self.remainder = 0;
            self.remainder_shift = 0;
        } else {
            self.remainder_shift += 8;
        }
    }
}

/// Computes the value stored in a CFDATA `csum` field for a block.
pub fn block_checksum(payload: &[u8], compressed_size: u16, uncompressed_size: u16) -> u32 {
    let mut checksum = Checksum::new();
    checksum.update(payload);
    checksum.value() ^ (compressed_size as u32 | (uncompressed_size as u32) << 16)
}
