//! # checksum
//!
//! Integrity arithmetic for every framing the lexer recognizes.
//!
//! Each function takes the exact byte range its protocol defines the check
//! over; the lexer decides which bytes those are. Nothing here touches
//! lexer state, so all of it is testable against reference vectors.

use crc::{Crc, CRC_16_IBM_3740, CRC_32_ISO_HDLC, CRC_8_SMBUS};

// ── NMEA ──────────────────────────────────────────────────────────────────────

/// XOR of all bytes strictly between `$`/`!` and `*`.
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

/// Talkers whose vendors ship sentences without the `*HH` field.
pub const NMEA_CHECKSUM_EXEMPT: &[&str] = &["$STI,", "$POLYN,", "$PSRF1", "$WIXDR,"];

// ── UBX / ALLYSTAR ────────────────────────────────────────────────────────────

/// Two-byte Fletcher-8 over class + id + length + payload.
/// Shared by u-blox and ALLYSTAR framings.
pub fn fletcher8(data: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;
    for b in data {
        ck_a = ck_a.wrapping_add(*b);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

// ── RTCM3 ─────────────────────────────────────────────────────────────────────

/// CRC-24Q (Qualcomm), polynomial 0x1864CFB, zero init, no reflection.
/// Computed over leader + length + payload; the 3 trailing bytes carry it.
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for b in data {
        crc ^= u32::from(*b) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= 0x0186_4CFB;
            }
        }
    }
    crc & 0x00FF_FFFF
}

// ── SPARTN ────────────────────────────────────────────────────────────────────

const SPARTN_CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
const SPARTN_CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const SPARTN_CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// SPARTN frame CRC, width selected by the 2-bit crc-type header field
/// (0 = 8-bit, 1 = 16-bit, 2 = 24-bit Radix-64, 3 = 32-bit).
pub fn spartn_crc(crc_type: u8, data: &[u8]) -> u32 {
    match crc_type {
        0 => u32::from(SPARTN_CRC8.checksum(data)),
        1 => u32::from(SPARTN_CRC16.checksum(data)),
        2 => crc24q(data),
        _ => SPARTN_CRC32.checksum(data),
    }
}

/// Byte length of the SPARTN frame CRC for a crc-type field value.
pub fn spartn_crc_len(crc_type: u8) -> usize {
    crc_type as usize + 1
}

// ── DLE-stuffed family (Garmin binary / EverMore) ─────────────────────────────

/// Mod-256 additive checksum; Garmin sends the two's complement, EverMore
/// the plain sum, both over the unstuffed id/length/payload bytes.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

// ── SiRF ──────────────────────────────────────────────────────────────────────

/// 15-bit additive checksum over the payload, transmitted big-endian.
pub fn sirf_sum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
        & 0x7FFF
}

// ── Skytraq / ONCORE / Navcom ─────────────────────────────────────────────────

/// Single-byte XOR (Skytraq payload, ONCORE id+payload, Navcom body).
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

// ── Zodiac ────────────────────────────────────────────────────────────────────

/// Zodiac word checksum: negated mod-65536 sum of 16-bit LE words.
/// The header checksum covers the 4 leading words, the data checksum the
/// payload words; in both cases `sum(words) + checksum == 0`.
pub fn zodiac_sum(words: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for pair in words.chunks_exact(2) {
        sum = sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]]));
    }
    sum.wrapping_neg()
}

// ── iTalk ─────────────────────────────────────────────────────────────────────

/// iTalk per-word rolling checksum: each 16-bit LE word is XORed in after
/// a one-bit left rotation of the accumulator.
pub fn italk_sum(words: &[u8]) -> u16 {
    let mut csum: u16 = 0;
    for pair in words.chunks_exact(2) {
        csum = csum.rotate_left(1) ^ u16::from_le_bytes([pair[0], pair[1]]);
    }
    csum
}

// ── CASIC ─────────────────────────────────────────────────────────────────────

/// CASIC 32-bit checksum: seed from id/class/length, then add the payload
/// as little-endian 32-bit words (the 4-byte-aligned length guarantees
/// whole words).
pub fn casic_sum(class: u8, id: u8, len: u16, payload: &[u8]) -> u32 {
    let mut ck: u32 = (u32::from(id) << 24) | (u32::from(class) << 16) | u32::from(len);
    for quad in payload.chunks_exact(4) {
        ck = ck.wrapping_add(u32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]));
    }
    ck
}

// ── GeoStar ───────────────────────────────────────────────────────────────────

/// XOR of all 32-bit LE words; a well-formed GeoStar frame XORs to zero
/// once its trailing checksum word is included.
pub fn geostar_xor32(data: &[u8]) -> u32 {
    let mut x: u32 = 0;
    for quad in data.chunks_exact(4) {
        x ^= u32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
    }
    x
}

// ── GREIS ─────────────────────────────────────────────────────────────────────

/// Javad GREIS 8-bit rolling CRC: rotate-left-2 then XOR each byte, with a
/// final rotation of the accumulator.
pub fn greis_crc(data: &[u8]) -> u8 {
    fn rot(c: u8) -> u8 {
        (c << 2) | (c >> 6)
    }
    rot(data.iter().fold(0u8, |acc, b| rot(acc) ^ b))
}

// ── SuperStar-II ──────────────────────────────────────────────────────────────

/// Two-byte additive checksum over SOH + id + ~id + length + payload,
/// transmitted little-endian.
pub fn superstar_sum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
