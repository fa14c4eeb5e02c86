//! # isgps
//!
//! RTCM2 word-level sync: the IS-GPS-200 30-bit word stream.
//!
//! RTCM 10402 corrections ride a GPS-like bitstream: 30-bit words (24 data
//! bits + 6 parity bits), data bits complemented when the previous word's
//! D30 is set, packed onto the wire as "6-of-8" transport bytes whose top
//! two bits are `01` and whose low six bits carry the data bit-reversed.
//!
//! [`Isgps`] hunts bit-by-bit for a word with the 0x66 preamble and valid
//! parity, then collects word-aligned frames. The frame length comes from
//! the 5-bit field in the second header word. Extracted frames are emitted
//! as big-endian 32-bit words with the top two bits clear; the lexer hands
//! them on as `Protocol::Rtcm2` payloads.

// ── Parity (ICD-GPS-200 Table 20-XIV) ─────────────────────────────────────────

const PARITY_25: u32 = 0xBB1F_3480;
const PARITY_26: u32 = 0x5D8F_9A40;
const PARITY_27: u32 = 0x2EC7_CD00;
const PARITY_28: u32 = 0x1763_E680;
const PARITY_29: u32 = 0x2BB1_F340;
const PARITY_30: u32 = 0x0B7A_89C0;

const W_DATA_MASK: u32 = 0x3FFF_FFC0;
const P_30_MASK: u32 = 0x4000_0000;

const PREAMBLE: u32 = 0x66;
/// Longest legal frame: 2 header words + 31 data words.
const MAX_FRAME_WORDS: usize = 33;

fn parity6(word: u32) -> u32 {
    let bit = |mask: u32| (word & mask).count_ones() & 1;
    (bit(PARITY_25) << 5)
        | (bit(PARITY_26) << 4)
        | (bit(PARITY_27) << 3)
        | (bit(PARITY_28) << 2)
        | (bit(PARITY_29) << 1)
        | bit(PARITY_30)
}

fn parity_ok(word: u32) -> bool {
    parity6(word) == (word & 0x3F)
}

/// The 24 data bits of a word, un-complemented per the previous D30.
fn data24(word: u32) -> u32 {
    let w = if word & P_30_MASK != 0 { word ^ W_DATA_MASK } else { word };
    (w & W_DATA_MASK) >> 6
}

fn has_preamble(word: u32) -> bool {
    data24(word) >> 16 == PREAMBLE
}

// ── Byte decode state ─────────────────────────────────────────────────────────

/// Per-device ISGPS sub-state: lock flag, sliding word, bit offset, word
/// buffer and expected frame length.
#[derive(Debug, Default)]
pub struct Isgps {
    locked: bool,
    /// Sliding window; low 32 bits are the candidate word plus the two
    /// bits of the previous word it needs for parity.
    window: u64,
    /// Bits consumed into the current word since lock.
    bit_offset: u32,
    words: Vec<u32>,
    /// Total words expected for the in-progress frame; 0 until the second
    /// header word arrives.
    frame_words: usize,
}

impl Isgps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// A byte is a plausible ISGPS transport byte iff its top bits are 01.
    pub fn is_transport_byte(c: u8) -> bool {
        c & 0xC0 == 0x40
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one transport byte. Returns a complete frame (packed 30-bit
    /// words, big-endian) when one closes on this byte.
    ///
    /// Non-transport bytes drop lock and clear the hunt window.
    pub fn put_byte(&mut self, c: u8) -> Option<Vec<u8>> {
        if !Self::is_transport_byte(c) {
            self.reset();
            return None;
        }
        // Six data bits, bit-reversed on the wire.
        let six = (c & 0x3F).reverse_bits() >> 2;
        let mut out = None;
        for i in (0..6).rev() {
            if let Some(frame) = self.put_bit((six >> i) & 1) {
                out = Some(frame);
            }
        }
        out
    }

    fn put_bit(&mut self, bit: u8) -> Option<Vec<u8>> {
        self.window = (self.window << 1) | u64::from(bit);
        let candidate = (self.window & 0xFFFF_FFFF) as u32;

        if !self.locked {
            if has_preamble(candidate) && parity_ok(candidate) {
                self.locked = true;
                self.bit_offset = 0;
                self.words.clear();
                self.words.push(candidate);
                self.frame_words = 0;
            }
            return None;
        }

        self.bit_offset += 1;
        if self.bit_offset < 30 {
            return None;
        }
        self.bit_offset = 0;

        if !parity_ok(candidate) {
            // Parity break mid-frame: drop lock, resume hunting.
            self.locked = false;
            self.words.clear();
            return None;
        }
        if self.words.is_empty() && !has_preamble(candidate) {
            // Between frames every word must re-open with the preamble.
            self.locked = false;
            return None;
        }
        self.words.push(candidate);

        if self.words.len() == 2 {
            let len = (data24(candidate) >> 3) & 0x1F;
            self.frame_words = 2 + len as usize;
            if self.frame_words > MAX_FRAME_WORDS {
                self.locked = false;
                self.words.clear();
                return None;
            }
        }

        if self.frame_words > 0 && self.words.len() >= self.frame_words {
            let mut frame = Vec::with_capacity(self.words.len() * 4);
            for w in &self.words {
                frame.extend_from_slice(&(w & 0x3FFF_FFFF).to_be_bytes());
            }
            self.words.clear();
            self.frame_words = 0;
            return Some(frame);
        }
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Build one parity-valid word from 24 data bits and the previous
    /// word's trailing two bits.
    fn encode_word(data: u32, prev: u32) -> u32 {
        let mut w = (prev & 3) << 30;
        let d = if prev & 1 != 0 { !data & 0xFF_FFFF } else { data };
        w |= d << 6;
        w | parity6(w)
    }

    /// Pack 30-bit words into 6-of-8 transport bytes.
    fn to_transport(words: &[u32]) -> Vec<u8> {
        let mut bits = Vec::new();
        for w in words {
            for i in (0..30).rev() {
                bits.push(((w >> i) & 1) as u8);
            }
        }
        bits.chunks(6)
            .map(|chunk| {
                let mut six = 0u8;
                for (i, b) in chunk.iter().enumerate() {
                    six |= b << (5 - i);
                }
                0x40 | (six.reverse_bits() >> 2)
            })
            .collect()
    }

    fn sample_frame(data_words: u32) -> Vec<u32> {
        let mut words = Vec::new();
        let mut prev = 0u32;
        // word 1: preamble + type 1 + station 42
        let w1 = encode_word((PREAMBLE << 16) | (1 << 10) | 42, prev);
        words.push(w1);
        prev = w1;
        // word 2: z-count 100, seq 0, length, health 0
        let w2 = encode_word((100 << 11) | (data_words << 3), prev);
        words.push(w2);
        prev = w2;
        for i in 0..data_words {
            let w = encode_word(0x00_1234 + i, prev);
            words.push(w);
            prev = w;
        }
        words
    }

    #[test]
    fn parity_detects_single_bit_flips() {
        let w = encode_word(0xABCDEF, 0);
        assert!(parity_ok(w));
        for i in 0..30 {
            assert!(!parity_ok(w ^ (1 << i)), "flip at bit {i} not caught");
        }
    }

    #[test]
    fn locks_and_extracts_a_frame() {
        let words = sample_frame(3);
        let stream = to_transport(&words);
        let mut isgps = Isgps::new();
        let mut frames = Vec::new();
        for b in stream {
            if let Some(f) = isgps.put_byte(b) {
                frames.push(f);
            }
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 5 * 4);
        assert!(isgps.locked());
        // preamble survives into the packed output
        assert_eq!(data24(u32::from_be_bytes([frames[0][0], frames[0][1], frames[0][2], frames[0][3]])) >> 16, PREAMBLE);
    }

    #[test]
    fn non_transport_byte_drops_lock() {
        let words = sample_frame(1);
        let stream = to_transport(&words);
        let mut isgps = Isgps::new();
        for b in &stream[..4] {
            assert!(isgps.put_byte(*b).is_none());
        }
        isgps.put_byte(0xD3);
        assert!(!isgps.locked());
    }
}
