//! # msm
//!
//! Multiple Signal Message decoding (types 1071–1127, MSM levels 1–7).
//!
//! MSM packs observables as three bit-level blocks after the header: a
//! satellite mask (64 bits), a signal mask (32 bits) and a cell mask whose
//! width is `n_sat × n_sig`. Field widths in the satellite and signal data
//! blocks vary with the MSM level; the level also decides which fields are
//! present at all. Masks wider than the 56-bit accessor ceiling are read
//! stacked.

use gnss_frame::bits::BitReader;
use serde::Serialize;

use crate::{Rtcm3Body, Rtcm3Error};

/// Fine pseudorange resolution, milliseconds (MSM1–5).
const FINE_PR_RES: f64 = 1.0 / (1 << 24) as f64;
/// Extended fine pseudorange resolution, milliseconds (MSM6/7).
const FINE_PR_EXT_RES: f64 = 1.0 / (1 << 29) as f64;
/// Fine phaserange resolution, milliseconds (MSM2–5).
const FINE_PHASE_RES: f64 = 1.0 / (1 << 29) as f64;
/// Extended fine phaserange resolution, milliseconds (MSM6/7).
const FINE_PHASE_EXT_RES: f64 = 1.0 / (1u64 << 31) as f64;
/// Fine phase-rate (Doppler) resolution, m/s (MSM5/7).
const FINE_RATE_RES: f64 = 0.0001;
/// CNR resolution, dBHz (6-bit field, MSM4/5).
const CNR_MSM_RES: f64 = 1.0;
/// Extended CNR resolution, dBHz (10-bit field, MSM6/7).
const CNR_EXT_RES: f64 = 1.0 / 16.0;

/// Shortest payload that can hold an MSM header through the signal mask.
const MSM_HEADER_MIN: usize = 21;

// ── Types ─────────────────────────────────────────────────────────────────────

/// Constellation an MSM type number addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Gnss {
    Gps,
    Glonass,
    Galileo,
    Sbas,
    Qzss,
    Beidou,
}

impl Gnss {
    fn from_msg_type(msg_type: u16) -> Option<(Self, u8)> {
        let level = (msg_type % 10) as u8;
        if !(1..=7).contains(&level) {
            return None;
        }
        let gnss = match msg_type / 10 {
            107 => Gnss::Gps,
            108 => Gnss::Glonass,
            109 => Gnss::Galileo,
            110 => Gnss::Sbas,
            111 => Gnss::Qzss,
            112 => Gnss::Beidou,
            _ => return None,
        };
        Some((gnss, level))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsmHeader {
    pub station_id: u16,
    /// GNSS epoch time, milliseconds (GLONASS packs day-of-week and time
    /// into the same 30 bits; kept raw here).
    pub tow_ms: u32,
    pub sync: bool,
    pub iods: u8,
    pub clock_steering: u8,
    pub external_clock: u8,
    pub smoothing: bool,
    pub interval: u8,
    pub sat_mask: u64,
    pub sig_mask: u32,
    pub cell_mask: u64,
    pub n_sat: u8,
    pub n_sig: u8,
    pub n_cell: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsmSat {
    /// Satellite number within the constellation, 1-based from the mask.
    pub id: u8,
    /// Integer milliseconds of rough range (MSM4–7).
    pub rough_range_ms: Option<u8>,
    /// Rough range modulo 1 ms, in 1/1024 ms units (all levels).
    pub rough_range_mod1ms: u16,
    /// Extended satellite info (MSM5/7).
    pub ext_info: Option<u8>,
    /// Rough phase-range rate, m/s (MSM5/7).
    pub rough_rate: Option<i16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsmCell {
    /// Satellite id the cell belongs to.
    pub sat: u8,
    /// Signal id from the signal mask, 1-based.
    pub sig: u8,
    /// Fine pseudorange, milliseconds; None on sentinel or for levels
    /// without the field.
    pub fine_pseudorange: Option<f64>,
    /// Fine phaserange, milliseconds.
    pub fine_phase: Option<f64>,
    pub lock_time: Option<u16>,
    pub half_cycle_ambiguity: Option<bool>,
    /// Carrier-to-noise, dBHz.
    pub cnr: Option<f64>,
    /// Fine Doppler, m/s.
    pub fine_doppler: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsmBlock {
    pub gnss: Gnss,
    /// MSM level, 1–7.
    pub level: u8,
    pub header: MsmHeader,
    pub sats: Vec<MsmSat>,
    pub cells: Vec<MsmCell>,
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// Signed take that maps the most-negative sentinel to None.
fn take_fine(rd: &mut BitReader, width: u32, scale: f64) -> Option<f64> {
    let raw = rd.take_i64(width);
    if raw == -(1i64 << (width - 1)) {
        None
    } else {
        Some(raw as f64 * scale)
    }
}

pub(crate) fn decode_msm(msg_type: u16, payload: &[u8], rd: &mut BitReader) -> Result<Rtcm3Body, Rtcm3Error> {
    let (gnss, level) = match Gnss::from_msg_type(msg_type) {
        Some(pair) => pair,
        None => {
            return Ok(Rtcm3Body::Unknown {
                name: None,
                payload: payload.to_vec(),
            })
        }
    };
    if payload.len() < MSM_HEADER_MIN {
        return Err(Rtcm3Error::Runt(payload.len(), msg_type));
    }

    let station_id = rd.take_u16(12);
    let tow_ms = rd.take_u32(30);
    let sync = rd.take_bool();
    let iods = rd.take_u8(3);
    rd.skip(7);
    let clock_steering = rd.take_u8(2);
    let external_clock = rd.take_u8(2);
    let smoothing = rd.take_bool();
    let interval = rd.take_u8(3);

    let sat_mask = rd.take_mask(64);
    let sig_mask = rd.take_u32(32);

    let n_sat = sat_mask.count_ones() as u8;
    let n_sig = sig_mask.count_ones() as u8;
    let n_cell = u16::from(n_sat) * u16::from(n_sig);
    if n_sat == 0 {
        return Err(Rtcm3Error::Runt(payload.len(), msg_type));
    }
    if n_cell > 64 {
        return Err(Rtcm3Error::CellOverflow(n_cell));
    }
    let cell_mask = if n_cell > 0 { rd.take_mask(n_cell as u32) } else { 0 };

    let header = MsmHeader {
        station_id,
        tow_ms,
        sync,
        iods,
        clock_steering,
        external_clock,
        smoothing,
        interval,
        sat_mask,
        sig_mask,
        cell_mask,
        n_sat,
        n_sig,
        n_cell: n_cell as u8,
    };

    // satellite ids, MSB of the mask first
    let sat_ids: Vec<u8> = (0..64u8).filter(|i| sat_mask >> (63 - i) & 1 == 1).map(|i| i + 1).collect();
    let sig_ids: Vec<u8> = (0..32u8).filter(|i| sig_mask >> (31 - i) & 1 == 1).map(|i| i + 1).collect();

    let has_pr = matches!(level, 1 | 3 | 4 | 5 | 6 | 7);
    let has_phase = level >= 2;
    let has_cnr = level >= 4;
    let has_doppler = level == 5 || level == 7;
    let extended = level >= 6;

    // a CRC-valid frame can still lie about its masks; bound the block
    // reads against what the payload actually holds
    let mut sat_bits = 10usize;
    if level >= 4 {
        sat_bits += 8;
    }
    if level == 5 || level == 7 {
        sat_bits += 4 + 14;
    }
    let mut cell_bits = 0usize;
    if has_pr {
        cell_bits += if extended { 20 } else { 15 };
    }
    if has_phase {
        cell_bits += if extended { 24 + 10 } else { 22 + 4 } + 1;
    }
    if has_cnr {
        cell_bits += if extended { 10 } else { 6 };
    }
    if has_doppler {
        cell_bits += 15;
    }
    let present_cells = (0..n_cell as usize)
        .filter(|b| cell_mask >> (n_cell as usize - 1 - b) & 1 == 1)
        .count();
    if !rd.has(sat_bits * sat_ids.len() + cell_bits * present_cells) {
        return Err(Rtcm3Error::Runt(payload.len(), msg_type));
    }

    // ── Satellite data block, field-grouped ───────────────────────────────
    let mut sats: Vec<MsmSat> = sat_ids
        .iter()
        .map(|&id| MsmSat {
            id,
            rough_range_ms: None,
            rough_range_mod1ms: 0,
            ext_info: None,
            rough_rate: None,
        })
        .collect();

    if level >= 4 {
        for sat in sats.iter_mut() {
            sat.rough_range_ms = Some(rd.take_u8(8));
        }
    }
    if level == 5 || level == 7 {
        for sat in sats.iter_mut() {
            sat.ext_info = Some(rd.take_u8(4));
        }
    }
    for sat in sats.iter_mut() {
        sat.rough_range_mod1ms = rd.take_u16(10);
    }
    if level == 5 || level == 7 {
        for sat in sats.iter_mut() {
            sat.rough_rate = Some(rd.take_i64(14) as i16);
        }
    }

    // ── Signal data block, field-grouped over the cell list ───────────────
    let mut cells: Vec<MsmCell> = Vec::with_capacity(n_cell as usize);
    for (si, &sat) in sat_ids.iter().enumerate() {
        for (gi, &sig) in sig_ids.iter().enumerate() {
            let bit = si * sig_ids.len() + gi;
            if cell_mask >> (n_cell as usize - 1 - bit) & 1 == 1 {
                cells.push(MsmCell {
                    sat,
                    sig,
                    fine_pseudorange: None,
                    fine_phase: None,
                    lock_time: None,
                    half_cycle_ambiguity: None,
                    cnr: None,
                    fine_doppler: None,
                });
            }
        }
    }

    if has_pr {
        let (width, scale) = if extended { (20, FINE_PR_EXT_RES) } else { (15, FINE_PR_RES) };
        for cell in cells.iter_mut() {
            cell.fine_pseudorange = take_fine(rd, width, scale);
        }
    }
    if has_phase {
        let (width, scale) = if extended { (24, FINE_PHASE_EXT_RES) } else { (22, FINE_PHASE_RES) };
        for cell in cells.iter_mut() {
            cell.fine_phase = take_fine(rd, width, scale);
        }
        let lock_width = if extended { 10 } else { 4 };
        for cell in cells.iter_mut() {
            cell.lock_time = Some(rd.take_u16(lock_width));
        }
        for cell in cells.iter_mut() {
            cell.half_cycle_ambiguity = Some(rd.take_bool());
        }
    }
    if has_cnr {
        let (width, scale) = if extended { (10, CNR_EXT_RES) } else { (6, CNR_MSM_RES) };
        for cell in cells.iter_mut() {
            cell.cnr = Some(rd.take_u64(width) as f64 * scale);
        }
    }
    if has_doppler {
        for cell in cells.iter_mut() {
            cell.fine_doppler = take_fine(rd, 15, FINE_RATE_RES);
        }
    }

    Ok(Rtcm3Body::Msm(MsmBlock {
        gnss,
        level,
        header,
        sats,
        cells,
    }))
}
