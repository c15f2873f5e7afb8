//! A small LZX encoder producing verbatim and aligned-offset blocks, so that
//! compressed LZX folders can be fed to the extractor.

use std::collections::HashMap;

const FRAME_SIZE: usize = 0x8000;
const NUM_CHARS: usize = 256;
const NUM_SECONDARY_LENGTHS: usize = 249;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 257;
const MAX_POSITION_SLOTS: usize = 50;

const BLOCKTYPE_VERBATIM: u32 = 1;
const BLOCKTYPE_ALIGNED: u32 = 2;

/// Output bytes covered by one LZX block; blocks run across frames.
const BLOCK_LEN: usize = 48 * 1024;

const EXTRA_BITS: [u8; MAX_POSITION_SLOTS] = build_extra_bits();
const POSITION_BASE: [u32; MAX_POSITION_SLOTS] = build_position_base();

const fn build_extra_bits() -> [u8; MAX_POSITION_SLOTS] {
    let mut bits = [0u8; MAX_POSITION_SLOTS];
    let mut i = 0;
    let mut j = 0;
    while i < MAX_POSITION_SLOTS {
        bits[i] = j;
        bits[i + 1] = j;
        if i != 0 && j < 17 {
            j += 1;
        }
        i += 2;
    }
    bits
}

const fn build_position_base() -> [u32; MAX_POSITION_SLOTS] {
    let mut base = [0u32; MAX_POSITION_SLOTS];
    let mut i = 0;
    let mut j = 0u32;
    while i < MAX_POSITION_SLOTS {
        base[i] = j;
        j += 1 << EXTRA_BITS[i];
        i += 1;
    }
    base
}

fn position_slots(window_bits: u8) -> usize {
    match window_bits {
        15 => 30,
        16 => 32,
        17 => 34,
        18 => 36,
        19 => 38,
        20 => 42,
        21 => 50,
        _ => panic!("no LZX window of {} bits in a cabinet", window_bits),
    }
}

/// Twelve 4-bit and eight 5-bit codes: a complete code for 20 symbols.
const PRETREE_LENGTHS: [u8; 20] =
    [4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 5, 5, 5, 5, 5, 5, 5, 5];

const ALIGNED_LENGTHS: [u8; 8] = [2, 2, 3, 3, 3, 4, 5, 5];

/// Writes 16-bit little-endian words, most significant bit first.
struct BitWriter {
    bytes: Vec<u8>,
    word: u16,
    count: u32,
}

impl BitWriter {
    fn new() -> BitWriter {
        BitWriter { bytes: Vec::new(), word: 0, count: 0 }
    }

    fn write(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.word = (self.word << 1) | ((value >> i) & 1) as u16;
            self.count += 1;
            if self.count == 16 {
                self.bytes.extend_from_slice(&self.word.to_le_bytes());
                self.word = 0;
                self.count = 0;
            }
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            self.write(0, 16 - self.count);
        }
    }
}

fn canonical_codes(lengths: &[u8]) -> Vec<(u32, u32)> {
    let mut bl_count = [0u32; 17];
    for &length in lengths {
        if length > 0 {
            bl_count[length as usize] += 1;
        }
    }
    let mut next = [0u32; 17];
    let mut code = 0;
    for bits in 1..=16 {
        code = (code + bl_count[bits - 1]) << 1;
        next[bits] = code;
    }
    lengths
        .iter()
        .map(|&length| {
            if length == 0 {
                (0, 0)
            } else {
                let code = next[length as usize];
                next[length as usize] += 1;
                (code, length as u32)
            }
        })
        .collect()
}

/// Writes a pretree and the deltas taking `current` to `target`.
fn write_lengths(w: &mut BitWriter, current: &mut [u8], target: &[u8]) {
    for &length in &PRETREE_LENGTHS {
        w.write(length as u32, 4);
    }
    let codes = canonical_codes(&PRETREE_LENGTHS);
    let symbol = |w: &mut BitWriter, sym: usize| {
        w.write(codes[sym].0, codes[sym].1);
    };
    let mut x = 0;
    while x < target.len() {
        let same = target[x..].iter().take_while(|&&l| l == target[x]).count();
        if target[x] == 0 && same >= 20 {
            let run = same.min(51);
            symbol(w, 18);
            w.write((run - 20) as u32, 5);
            current[x..x + run].iter_mut().for_each(|l| *l = 0);
            x += run;
        } else if target[x] == 0 && same >= 4 {
            let run = same.min(19);
            symbol(w, 17);
            w.write((run - 4) as u32, 4);
            current[x..x + run].iter_mut().for_each(|l| *l = 0);
            x += run;
        } else if same >= 4 {
            let run = same.min(5);
            let delta = (current[x] + 17 - target[x]) % 17;
            symbol(w, 19);
            w.write((run - 4) as u32, 1);
            symbol(w, delta as usize);
            current[x..x + run].iter_mut().for_each(|l| *l = target[x]);
            x += run;
        } else {
            let delta = (current[x] + 17 - target[x]) % 17;
            symbol(w, delta as usize);
            current[x] = target[x];
            x += 1;
        }
    }
}

/// A complete code over `size` symbols using two adjacent lengths, with the
/// shorter codes starting at symbol `rotate`.
fn two_length_code(size: usize, rotate: usize) -> Vec<u8> {
    let mut short_len = 1;
    while (1 << (short_len + 1)) < size {
        short_len += 1;
    }
    // a codes of short_len and size - a of short_len + 1 fill the code space.
    let a = (1 << (short_len + 1)) - size;
    let mut lengths = vec![short_len as u8 + 1; size];
    for k in 0..a {
        lengths[(rotate + k) % size] = short_len as u8;
    }
    lengths
}

#[derive(Clone, Copy, Debug)]
enum Token {
    Literal(u8),
    Match { length: usize, offset: usize },
}

impl Token {
    fn len(&self) -> usize {
        match *self {
            Token::Literal(_) => 1,
            Token::Match { length, .. } => length,
        }
    }
}

/// Greedy three-byte-hash matching; no token crosses a frame boundary.
fn tokenize(stream: &[u8], window_bits: u8) -> Vec<Token> {
    let max_offset = (1usize << window_bits) - 3;
    let key = |i: usize| [stream[i], stream[i + 1], stream[i + 2]];
    let mut last = HashMap::<[u8; 3], usize>::new();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < stream.len() {
        let frame_end = ((i / FRAME_SIZE + 1) * FRAME_SIZE).min(stream.len());
        let limit = (frame_end - i).min(MAX_MATCH);
        let mut token = Token::Literal(stream[i]);
        if i + MIN_MATCH <= stream.len() {
            if let Some(&j) = last.get(&key(i)) {
                let offset = i - j;
                let length =
                    (0..limit).take_while(|&k| stream[j + k] == stream[i + k]).count();
                if offset <= max_offset && length >= MIN_MATCH {
                    token = Token::Match { length, offset };
                }
            }
        }
        for k in i..i + token.len() {
            if k + MIN_MATCH <= stream.len() {
                last.insert(key(k), k);
            }
        }
        i += token.len();
        tokens.push(token);
    }
    tokens
}

struct Encoder {
    num_slots: usize,
    main_lengths: Vec<u8>,
    length_lengths: Vec<u8>,
    r: [usize; 3],
    writer: BitWriter,
    frame_out: usize,
    frames: Vec<(Vec<u8>, usize)>,
}

impl Encoder {
    fn new(window_bits: u8) -> Encoder {
        let num_slots = position_slots(window_bits);
        let mut writer = BitWriter::new();
        // No E8 call translation.
        writer.write(0, 1);
        Encoder {
            num_slots,
            main_lengths: vec![0; NUM_CHARS + num_slots * 8],
            length_lengths: vec![0; NUM_SECONDARY_LENGTHS],
            r: [1, 1, 1],
            writer,
            frame_out: 0,
            frames: Vec::new(),
        }
    }

    fn block(&mut self, tokens: &[Token], aligned: bool, rotate: usize) {
        let length: usize = tokens.iter().map(Token::len).sum();
        let block_type = if aligned { BLOCKTYPE_ALIGNED } else { BLOCKTYPE_VERBATIM };
        self.writer.write(block_type, 3);
        self.writer.write((length >> 8) as u32, 16);
        self.writer.write((length & 0xff) as u32, 8);
        if aligned {
            for &len in &ALIGNED_LENGTHS {
                self.writer.write(len as u32, 3);
            }
        }
        let main_target = two_length_code(self.main_lengths.len(), rotate);
        write_lengths(
            &mut self.writer,
            &mut self.main_lengths[..NUM_CHARS],
            &main_target[..NUM_CHARS],
        );
        write_lengths(
            &mut self.writer,
            &mut self.main_lengths[NUM_CHARS..],
            &main_target[NUM_CHARS..],
        );
        let length_target = two_length_code(NUM_SECONDARY_LENGTHS, rotate);
        write_lengths(&mut self.writer, &mut self.length_lengths, &length_target);

        let main_codes = canonical_codes(&self.main_lengths);
        let length_codes = canonical_codes(&self.length_lengths);
        let aligned_codes = canonical_codes(&ALIGNED_LENGTHS);
        for token in tokens {
            match *token {
                Token::Literal(byte) => {
                    let (code, len) = main_codes[byte as usize];
                    self.writer.write(code, len);
                }
                Token::Match { length, offset } => {
                    let slot = if offset == self.r[0] {
                        0
                    } else if offset == self.r[1] {
                        self.r.swap(0, 1);
                        1
                    } else if offset == self.r[2] {
                        self.r.swap(0, 2);
                        2
                    } else {
                        let value = offset as u32 + 2;
                        let slot = (3..self.num_slots)
                            .rev()
                            .find(|&s| POSITION_BASE[s] <= value)
                            .unwrap();
                        self.r = [offset, self.r[0], self.r[1]];
                        slot
                    };
                    let footer = length - 2;
                    let header = footer.min(7);
                    let (code, len) = main_codes[NUM_CHARS + slot * 8 + header];
                    self.writer.write(code, len);
                    if header == 7 {
                        let (code, len) = length_codes[footer - 7];
                        self.writer.write(code, len);
                    }
                    if slot >= 3 {
                        let extra = EXTRA_BITS[slot] as u32;
                        let value = (offset as u32 + 2) - POSITION_BASE[slot];
                        if aligned && extra >= 3 {
                            self.writer.write(value >> 3, extra - 3);
                            let (code, len) = aligned_codes[(value & 7) as usize];
                            self.writer.write(code, len);
                        } else {
                            self.writer.write(value, extra);
                        }
                    }
                }
            }
            self.advance(token.len());
        }
    }

    fn advance(&mut self, produced: usize) {
        self.frame_out += produced;
        assert!(self.frame_out <= FRAME_SIZE, "token straddles a frame");
        if self.frame_out == FRAME_SIZE {
            self.end_frame();
        }
    }

    fn end_frame(&mut self) {
        self.writer.flush();
        let bytes = std::mem::take(&mut self.writer.bytes);
        self.frames.push((bytes, self.frame_out));
        self.frame_out = 0;
    }

    fn finish(mut self) -> Vec<(Vec<u8>, usize)> {
        if self.frame_out > 0 {
            self.end_frame();
        }
        self.frames
    }
}

/// Compresses a folder's stream into LZX frames of 32 KiB of output each,
/// returning `(payload, uncompressed size)` pairs.  Each block gets
/// different tree lengths, so later blocks are coded as deltas.
pub fn compressed_frames(stream: &[u8], window_bits: u8, aligned: bool) -> Vec<(Vec<u8>, usize)> {
    if stream.is_empty() {
        return Vec::new();
    }
    let tokens = tokenize(stream, window_bits);
    let mut encoder = Encoder::new(window_bits);
    let mut start = 0;
    let mut covered = 0;
    let mut rotate = 0;
    for end in 1..=tokens.len() {
        covered += tokens[end - 1].len();
        if covered >= BLOCK_LEN || end == tokens.len() {
            encoder.block(&tokens[start..end], aligned, rotate);
            start = end;
            covered = 0;
            rotate += 37;
        }
    }
    encoder.finish()
}
