//! Quantum decompression.
//!
//! Quantum is an LZ77 scheme whose literals, match lengths and position
//! slots are coded with a 16-bit arithmetic coder over adaptive frequency
//! models.  In a cabinet, each data block holds one independently flushed
//! arithmetic-coded frame; the models and the sliding window carry over from
//! block to block within a folder.

use std::io;

const POSITION_BASE: [u32; 42] = [
    0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512,
    768, 1024, 1536, 2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576, 32768,
    49152, 65536, 98304, 131072, 196608, 262144, 393216, 524288, 786432,
    1048576, 1572864,
];

const EXTRA_BITS: [u8; 42] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10,
    11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18, 19, 19,
];

const LENGTH_BASE: [u16; 27] = [
    0, 1, 2, 3, 4, 5, 6, 8, 10, 12, 14, 18, 22, 26, 30, 38, 46, 54, 62, 78,
    94, 110, 126, 158, 190, 222, 254,
];

const LENGTH_EXTRA: [u8; 27] = [
    0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5,
    5, 0,
];

const RESCALE_THRESHOLD: u16 = 3800;
const FREQUENCY_STEP: u16 = 8;

#[derive(Clone, Debug)]
struct ModelSym {
    sym: u16,
    cumfreq: u16,
}

/// An adaptive frequency model.  `syms` holds cumulative frequencies in
/// decreasing order, followed by a sentinel entry with frequency zero.
#[derive(Clone, Debug)]
struct Model {
    shift_left: i32,
    entries: usize,
    syms: Vec<ModelSym>,
}

impl Model {
    fn new(start: u16, len: usize) -> Model {
        let syms = (0..=len)
            .map(|i| ModelSym { sym: start + i as u16, cumfreq: (len - i) as u16 })
            .collect();
        Model { shift_left: 4, entries: len, syms }
    }

    /// Bumps the frequency of the symbol at `index - 1`.
    fn increment(&mut self, index: usize) {
        for entry in &mut self.syms[..index] {
            entry.cumfreq += FREQUENCY_STEP;
        }
        if self.syms[0].cumfreq > RESCALE_THRESHOLD {
            self.rescale();
        }
    }

    fn rescale(&mut self) {
        self.shift_left -= 1;
        if self.shift_left > 0 {
            for i in (0..self.entries).rev() {
                self.syms[i].cumfreq >>= 1;
                if self.syms[i].cumfreq <= self.syms[i + 1].cumfreq {
                    self.syms[i].cumfreq = self.syms[i + 1].cumfreq + 1;
                }
            }
        } else {
            self.shift_left = 50;
            for i in 0..self.entries {
                self.syms[i].cumfreq -= self.syms[i + 1].cumfreq;
                self.syms[i].cumfreq += 1;
                self.syms[i].cumfreq >>= 1;
            }
            // Selection sort, most frequent first.
            for i in 0..self.entries.saturating_sub(1) {
                for j in (i + 1)..self.entries {
                    if self.syms[i].cumfreq < self.syms[j].cumfreq {
                        self.syms.swap(i, j);
                    }
                }
            }
            for i in (0..self.entries).rev() {
                self.syms[i].cumfreq += self.syms[i + 1].cumfreq;
            }
        }
    }
}

#[derive(Clone, Debug)]
struct Models {
    literals: [Model; 4],
    offset_len3: Model,
    offset_len4: Model,
    offset_long: Model,
    length: Model,
    selector: Model,
}

impl Models {
    fn new(window_bits: u8) -> Models {
        let slots = window_bits as usize * 2;
        Models {
            literals: [
                Model::new(0, 64),
                Model::new(64, 64),
                Model::new(128, 64),
                Model::new(192, 64),
            ],
            offset_len3: Model::new(0, slots.min(24)),
            offset_len4: Model::new(0, slots.min(36)),
            offset_long: Model::new(0, slots),
            length: Model::new(0, 27),
            selector: Model::new(0, 7),
        }
    }
}

/// Reads 16-bit big-endian words, most significant bit first.  Input past
/// the end reads as zero bits, which the arithmetic coder relies on after
/// the final flush.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_buffer: u32,
    bits_left: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> BitReader<'a> {
        BitReader { data, pos: 0, bit_buffer: 0, bits_left: 0 }
    }

    fn next_byte(&mut self) -> u32 {
        match self.data.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                byte as u32
            }
            None => 0,
        }
    }

    fn fill(&mut self) {
        let word = (self.next_byte() << 8) | self.next_byte();
        self.bit_buffer |= word << (16 - self.bits_left);
        self.bits_left += 16;
    }

    fn read_bits(&mut self, count: u32) -> u32 {
        debug_assert!(count <= 16);
        if count == 0 {
            return 0;
        }
        while self.bits_left < count {
            self.fill();
        }
        let value = self.bit_buffer >> (32 - count);
        self.bit_buffer <<= count;
        self.bits_left -= count;
        value
    }

    fn read_many_bits(&mut self, count: u32) -> u32 {
        if count <= 16 {
            return self.read_bits(count);
        }
        let high = self.read_bits(count - 16);
        (high << 16) | self.read_bits(16)
    }
}

/// State of the arithmetic decoder for one frame.
struct Coder {
    high: u16,
    low: u16,
    code: u16,
}

impl Coder {
    fn start(bits: &mut BitReader) -> Coder {
        Coder { high: 0xffff, low: 0, code: bits.read_bits(16) as u16 }
    }

    fn decode(&mut self, model: &mut Model, bits: &mut BitReader) -> u16 {
        let range = self.high.wrapping_sub(self.low) as u32 + 1;
        let total = model.syms[0].cumfreq as u32;
        let offset = self.code.wrapping_sub(self.low) as u32 + 1;
        let symf = ((offset * total - 1) / range) & 0xffff;

        let mut i = 1;
        while i < model.entries && model.syms[i].cumfreq as u32 > symf {
            i += 1;
        }
        let sym = model.syms[i - 1].sym;

        let low = self.low as u32;
        let upper = model.syms[i - 1].cumfreq as u32 * range / total;
        let lower = model.syms[i].cumfreq as u32 * range / total;
        self.high = (low + upper).wrapping_sub(1) as u16;
        self.low = (low + lower) as u16;
        model.increment(i);

        loop {
            if (self.low & 0x8000) != (self.high & 0x8000) {
                if (self.low & 0x4000) != 0 && (self.high & 0x4000) == 0 {
                    // Underflow: the interval straddles the midpoint.
                    self.code ^= 0x4000;
                    self.low &= 0x3fff;
                    self.high |= 0x4000;
                } else {
                    break;
                }
            }
            self.low <<= 1;
            self.high = (self.high << 1) | 1;
            self.code = (self.code << 1) | bits.read_bits(1) as u16;
        }
        sym
    }
}

/// Decoder state for one Quantum folder.
pub struct QuantumDecompressor {
    window: Vec<u8>,
    window_posn: usize,
    total_out: u64,
    models: Models,
}

impl QuantumDecompressor {
    /// Creates a decoder with a window of `1 << window_bits` bytes.
    pub fn new(window_bits: u8) -> QuantumDecompressor {
        QuantumDecompressor {
            window: vec![0u8; 1 << window_bits],
            window_posn: 0,
            total_out: 0,
            models: Models::new(window_bits),
        }
    }

    pub fn decompress_block(
        &mut self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> io::Result<Vec<u8>> {
        let mut bits = BitReader::new(data);
        let mut coder = Coder::start(&mut bits);
        let mut out = Vec::with_capacity(uncompressed_size);
        let mask = self.window.len() - 1;
        while out.len() < uncompressed_size {
            let models = &mut self.models;
            let selector = coder.decode(&mut models.selector, &mut bits);
            let (length, offset) = match selector {
                0..=3 => {
                    let model = &mut models.literals[selector as usize];
                    let byte = coder.decode(model, &mut bits) as u8;
                    self.window[self.window_posn] = byte;
                    self.window_posn = (self.window_posn + 1) & mask;
                    out.push(byte);
                    continue;
                }
                4 => {
                    let slot = coder.decode(&mut models.offset_len3, &mut bits);
                    (3, position(slot, &mut bits))
                }
                5 => {
                    let slot = coder.decode(&mut models.offset_len4, &mut bits);
                    (4, position(slot, &mut bits))
                }
                _ => {
                    let slot =
                        coder.decode(&mut models.length, &mut bits) as usize;
                    let extra = bits.read_bits(LENGTH_EXTRA[slot] as u32);
                    let length = LENGTH_BASE[slot] as usize + extra as usize + 5;
                    let slot = coder.decode(&mut models.offset_long, &mut bits);
                    (length, position(slot, &mut bits))
                }
            };
            if length > uncompressed_size - out.len() {
                invalid_data!(
                    "Quantum match of {} bytes runs past end of block",
                    length
                );
            }
            let produced = self.total_out + out.len() as u64;
            if offset > self.window.len() || offset as u64 > produced {
                invalid_data!(
                    "Quantum match offset {} is outside the window",
                    offset
                );
            }
            let mut src = (self.window_posn + self.window.len() - offset) & mask;
            for _ in 0..length {
                let byte = self.window[src];
                self.window[self.window_posn] = byte;
                out.push(byte);
                src = (src + 1) & mask;
                self.window_posn = (self.window_posn + 1) & mask;
            }
        }
        self.total_out += out.len() as u64;
        Ok(out)
    }
}

fn position(slot: u16, bits: &mut BitReader) -> usize {
    let slot = slot as usize;
    let extra = bits.read_many_bits(EXTRA_BITS[slot] as u32);
    (POSITION_BASE[slot] + extra + 1) as usize
}
