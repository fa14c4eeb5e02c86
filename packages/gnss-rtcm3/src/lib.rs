//! # gnss-rtcm3
//!
//! RTCM 10403 (RTCM3) message decoder.
//!
//! Input is a validated frame as the `gnss-frame` lexer emits it: preamble
//! byte, 10-bit length, payload, CRC-24Q. The decoder unpacks the payload
//! into one typed message per call; message families it does not decode are
//! preserved raw in [`Rtcm3Body::Unknown`] rather than failing, so the
//! relay path can still forward them.
//!
//! All multi-bit fields are big-endian and bit-aligned; extraction goes
//! through [`gnss_frame::bits::BitReader`]. Scaling constants are applied
//! here, at the field site.

pub mod msm;

use gnss_frame::bits::BitReader;
use serde::Serialize;
use thiserror::Error;

pub use msm::{Gnss, MsmBlock, MsmCell, MsmHeader, MsmSat};

// ── Scaling constants ─────────────────────────────────────────────────────────

/// DF011: GPS L1 pseudorange, meters.
pub const PSEUDORANGE_RES: f64 = 0.02;
/// DF012/DF042: phaserange − pseudorange, meters.
pub const RANGEDIFF_RES: f64 = 0.0005;
/// DF015/DF045/DF050: carrier-to-noise, dBHz.
pub const CNR_RES: f64 = 0.25;
/// DF025/DF026/DF027: ECEF coordinate, meters.
pub const ECEF_RES: f64 = 0.0001;
/// DF041: GLONASS L1 pseudorange, meters.
pub const GLO_PSEUDORANGE_RES: f64 = 0.02;
/// DF062: antenna setup angle, degrees.
pub const ANTENNA_DEGREE_RES: f64 = 25e-6;
/// DF065: epoch time, seconds.
pub const EPOCH_RES: f64 = 0.1;
/// DF069/DF070, DF192–DF195: phase correction.
pub const PHASE_CORRECTION_RES: f64 = 0.5;
/// DF156/DF157/DF158: Helmert translation, meters.
pub const TRANSLATION_RES: f64 = 0.001;
/// DF152–DF155: validity region extent.
pub const VALIDITY_RES: f64 = 2.0;
/// DF162: Helmert scale, ppm.
pub const SCALE_PPM_RES: f64 = 1e-5;
/// DF159–DF161: Helmert rotation, arc-seconds.
pub const ROTATION_ARCSEC_RES: f64 = 2e-5;
/// DF171/DF172: projection origin, degrees.
pub const PROJ_ORIGIN_RES: f64 = 11e-9;
/// DF198: grid height residual, meters.
pub const HEIGHT_RES: f64 = 0.01;
/// DF199/DF200: grid residual, arc-seconds.
pub const RESIDUAL_ARCSEC_RES: f64 = 3e-5;

/// DF011 sentinel: pseudorange not measurable.
pub const GPS_INVALID_PSEUDORANGE: u64 = 0x80000;
/// DF047 sentinel: GLONASS range increment invalid.
pub const GLO_INVALID_RANGEINCR: i64 = 0x2000;
/// DF040: subtract from the raw channel for the signed frequency slot.
pub const GLO_CHANNEL_BASE: i64 = 7;

/// Grid points in a type-1023 residuals message.
pub const RTCM3_GRID_SIZE: usize = 16;

const RTCM3_STRING_MAX: usize = 31;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum Rtcm3Error {
    /// Frame too short to carry the fixed envelope.
    #[error("frame shorter than the RTCM3 envelope")]
    Truncated,
    /// Payload under the 2-byte minimum, or under a type's header minimum.
    /// Runts are dropped without producing a message, so nothing is emitted
    /// downstream.
    #[error("runt {0}-byte payload for message type {1}")]
    Runt(usize, u16),
    /// An MSM whose masks disagree with its size limits.
    #[error("MSM cell overflow: {0} cells")]
    CellOverflow(u16),
}

// ── Message types ─────────────────────────────────────────────────────────────

/// One decoded RTCM3 message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rtcm3Message {
    pub msg_type: u16,
    /// Payload byte count from the frame envelope.
    pub length: u16,
    /// Reference-station id when the type carries one, else 0.
    pub station_id: u16,
    pub body: Rtcm3Body,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Rtcm3Body {
    /// 1001–1004: extended L1/L2 GPS RTK observables.
    GpsRtk(RtkBlock),
    /// 1009–1012: extended L1/L2 GLONASS RTK observables.
    GloRtk(RtkBlock),
    /// 1005/1006: stationary antenna reference point.
    StationArp(StationArp),
    /// 1007/1008/1033: antenna and receiver descriptors.
    AntennaInfo(AntennaInfo),
    /// 1013: system parameters and announcement schedule.
    SystemParams(SystemParams),
    /// 1015/1016/1017: network RTK corrections. Header decoded, per-sat
    /// bodies preserved raw.
    NetworkRtk(NetworkRtk),
    /// 1021: Helmert / Molodensky transformation parameters.
    Helmert(Helmert),
    /// 1023: residuals grid.
    ResidualsGrid(ResidualsGrid),
    /// 1025: projection parameters.
    Projection(Projection),
    /// 1029: UTF-8 text.
    Text(TextMessage),
    /// 1230: GLONASS code-phase biases.
    GloBias(GloBias),
    /// 1071–1127: multiple signal messages.
    Msm(MsmBlock),
    /// Anything else: raw payload plus a human-readable name when known.
    Unknown {
        name: Option<&'static str>,
        payload: Vec<u8>,
    },
}

/// Shared header of the 1001–1012 observable messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtkHeader {
    pub station_id: u16,
    /// Time of week, seconds (GPS: 30-bit ms field; GLONASS: 27-bit ms).
    pub tow: f64,
    pub sync: bool,
    pub smoothing: bool,
    pub interval: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtkBlock {
    pub header: RtkHeader,
    pub sats: Vec<RtkSat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtkSat {
    pub ident: u8,
    /// GLONASS frequency slot (raw channel minus 7); absent for GPS.
    pub channel: Option<i8>,
    pub l1: RtkBand,
    pub l2: Option<RtkBand>,
}

/// One band of an RTK observable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtkBand {
    pub indicator: u8,
    /// Meters; NaN when the on-wire sentinel said "not measurable".
    pub pseudorange: f64,
    /// Phaserange − pseudorange, meters.
    pub range_diff: f64,
    pub locktime: u8,
    pub ambiguity: Option<u8>,
    /// dBHz.
    pub cnr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationArp {
    pub station_id: u16,
    /// GPS / GLONASS / Galileo indicator bits, MSB first.
    pub system_mask: u8,
    pub is_physical_reference: bool,
    pub ecef_x: f64,
    pub ecef_y: f64,
    pub ecef_z: f64,
    pub single_receiver: bool,
    /// Antenna height above the ARP; only in type 1006.
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AntennaInfo {
    pub station_id: u16,
    pub descriptor: String,
    pub setup_id: u8,
    pub serial: Option<String>,
    /// Receiver type / firmware / receiver serial: type 1033 only. The
    /// tail past the firmware string is not fully specified upstream;
    /// anything unparsed stays out rather than being guessed at.
    pub receiver: Option<String>,
    pub firmware: Option<String>,
    pub receiver_serial: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemParams {
    pub station_id: u16,
    pub mjd: u16,
    pub seconds_of_day: u32,
    pub leap_seconds: u8,
    pub announcements: Vec<Announcement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    pub msg_id: u16,
    pub sync: bool,
    /// Transmission interval, seconds.
    pub interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkRtk {
    pub network_id: u8,
    pub subnetwork_id: u8,
    /// GPS epoch time, seconds.
    pub tow: f64,
    pub multiple_message: bool,
    pub master_station: u16,
    pub aux_station: u16,
    pub sat_count: u8,
    /// Undecoded per-satellite bodies.
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Helmert {
    pub source_name: String,
    pub target_name: String,
    pub sys_id: u8,
    pub utilized: u16,
    pub plate_number: u8,
    pub computation: u8,
    pub height_indicator: u8,
    /// Validity region origin and extent, degrees-scaled units.
    pub lat_origin: f64,
    pub lon_origin: f64,
    pub lat_extension: f64,
    pub lon_extension: f64,
    /// Translations, meters.
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// Rotations, arc-seconds.
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    /// Scale correction, ppm.
    pub scale_ppm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridPoint {
    /// Latitude residual, arc-seconds.
    pub dlat: f64,
    /// Longitude residual, arc-seconds.
    pub dlon: f64,
    /// Height residual, meters.
    pub dheight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualsGrid {
    pub sys_id: u8,
    pub shift_indicator: u8,
    pub lat_origin: f64,
    pub lon_origin: f64,
    pub lat_extension: f64,
    pub lon_extension: f64,
    pub mean_dlat: f64,
    pub mean_dlon: f64,
    pub mean_dheight: f64,
    pub points: Vec<GridPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub sys_id: u8,
    pub projection_type: u8,
    /// Natural origin, degrees.
    pub lat_origin: f64,
    pub lon_origin: f64,
    /// Scale at natural origin, offset from 1.0 in ppm-like units.
    pub scale: f64,
    /// False easting / northing, meters.
    pub false_easting: f64,
    pub false_northing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMessage {
    pub station_id: u16,
    pub mjd: u16,
    pub seconds_of_day: u32,
    /// Count of UTF-8 code units as transmitted.
    pub unicode_units: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GloBias {
    pub station_id: u16,
    pub bias_indicator: bool,
    /// 4-bit presence mask selecting which of the four biases follow.
    pub mask: u8,
    /// Meters; order L1 C/A, L1 P, L2 C/A, L2 P.
    pub l1_ca: Option<f64>,
    pub l1_p: Option<f64>,
    pub l2_ca: Option<f64>,
    pub l2_p: Option<f64>,
}

// ── Static name table ─────────────────────────────────────────────────────────

/// Human-readable names for types stored raw.
pub fn type_name(msg_type: u16) -> Option<&'static str> {
    Some(match msg_type {
        1014 => "Network auxiliary station data",
        1019 => "GPS ephemeris",
        1020 => "GLONASS ephemeris",
        1042 => "BeiDou ephemeris",
        1044 => "QZSS ephemeris",
        1045 => "Galileo F/NAV ephemeris",
        1046 => "Galileo I/NAV ephemeris",
        1057 => "SSR GPS orbit correction",
        1058 => "SSR GPS clock correction",
        1059 => "SSR GPS code bias",
        1060 => "SSR GPS combined correction",
        1063 => "SSR GLONASS orbit correction",
        1064 => "SSR GLONASS clock correction",
        1065 => "SSR GLONASS code bias",
        1066 => "SSR GLONASS combined correction",
        4062 => "SwiftNav proprietary",
        4072 => "u-blox proprietary",
        4076 => "IGS SSR",
        _ => return None,
    })
}

// ── Decode entry ──────────────────────────────────────────────────────────────

/// Decode one RTCM3 frame (preamble + length + payload + CRC) into a typed
/// message. The lexer has already validated the CRC.
pub fn decode(frame: &[u8]) -> Result<Rtcm3Message, Rtcm3Error> {
    if frame.len() < 6 {
        return Err(Rtcm3Error::Truncated);
    }
    let length = (((frame[1] as usize) & 0x03) << 8) | frame[2] as usize;
    if frame.len() < length + 6 {
        return Err(Rtcm3Error::Truncated);
    }
    let payload = &frame[3..3 + length];
    decode_payload(payload)
}

/// Fixed-header minimum payload bytes per decoded type; shorter payloads
/// are runts even when their CRC passed.
fn min_payload(msg_type: u16) -> usize {
    match msg_type {
        1001..=1004 => 8,
        1005 => 19,
        1006 => 21,
        1007 | 1008 | 1033 => 5,
        1009..=1012 => 8,
        1013 => 9,
        1015 | 1016 | 1017 => 9,
        1021 => 3,
        1023 => 14,
        1025 => 23,
        1029 => 8,
        1230 => 3,
        _ => 2,
    }
}

/// Decode a bare RTCM3 payload (no envelope, no CRC).
pub fn decode_payload(payload: &[u8]) -> Result<Rtcm3Message, Rtcm3Error> {
    if payload.len() < 2 {
        // too short to even carry a type number: drop, no type
        return Err(Rtcm3Error::Runt(payload.len(), 0));
    }
    let mut rd = BitReader::new(payload);
    let msg_type = rd.take_u16(12);
    if payload.len() < min_payload(msg_type) {
        return Err(Rtcm3Error::Runt(payload.len(), msg_type));
    }

    let body = match msg_type {
        1001..=1004 => decode_gps_rtk(msg_type, &mut rd)?,
        1005 | 1006 => decode_station_arp(msg_type, &mut rd),
        1007 | 1008 | 1033 => decode_antenna_info(msg_type, &mut rd),
        1009..=1012 => decode_glo_rtk(msg_type, &mut rd)?,
        1013 => decode_system_params(&mut rd),
        1015 | 1016 | 1017 => decode_network_rtk(msg_type, payload, &mut rd)?,
        1021 => decode_helmert(payload, &mut rd)?,
        1023 => decode_residuals_grid(&mut rd),
        1025 => decode_projection(&mut rd),
        1029 => decode_text(&mut rd),
        1230 => decode_glo_bias(&mut rd),
        1071..=1077 | 1081..=1087 | 1091..=1097 | 1101..=1107 | 1111..=1117 | 1121..=1127 => {
            msm::decode_msm(msg_type, payload, &mut rd)?
        }
        _ => Rtcm3Body::Unknown {
            name: type_name(msg_type),
            payload: payload.to_vec(),
        },
    };

    let station_id = match &body {
        Rtcm3Body::GpsRtk(b) | Rtcm3Body::GloRtk(b) => b.header.station_id,
        Rtcm3Body::StationArp(b) => b.station_id,
        Rtcm3Body::AntennaInfo(b) => b.station_id,
        Rtcm3Body::SystemParams(b) => b.station_id,
        Rtcm3Body::NetworkRtk(b) => b.master_station,
        Rtcm3Body::Text(b) => b.station_id,
        Rtcm3Body::GloBias(b) => b.station_id,
        Rtcm3Body::Msm(b) => b.header.station_id,
        _ => 0,
    };

    Ok(Rtcm3Message {
        msg_type,
        length: payload.len() as u16,
        station_id,
        body,
    })
}

// ── Observables: 1001–1004 / 1009–1012 ────────────────────────────────────────

fn decode_gps_rtk(msg_type: u16, rd: &mut BitReader) -> Result<Rtcm3Body, Rtcm3Error> {
    let station_id = rd.take_u16(12);
    let tow = rd.take_u32(30) as f64 / 1000.0;
    let sync = rd.take_bool();
    let n_sats = rd.take_u8(5);
    let smoothing = rd.take_bool();
    let interval = rd.take_u8(3);
    let header = RtkHeader {
        station_id,
        tow,
        sync,
        smoothing,
        interval,
    };

    let extended = msg_type == 1002 || msg_type == 1004;
    let dual = msg_type == 1003 || msg_type == 1004;
    let mut sats = Vec::with_capacity(n_sats as usize);
    for _ in 0..n_sats {
        let per_sat = 6 + 1 + 24 + 20 + 7
            + if extended { 16 } else { 0 }
            + if dual { 2 + 14 + 20 + 7 } else { 0 }
            + if dual && extended { 16 } else { 0 };
        if !rd.has(per_sat) {
            return Err(Rtcm3Error::Runt(rd.remaining() / 8, msg_type));
        }
        let ident = rd.take_u8(6);
        let l1_code = rd.take_u8(1);
        let raw_pr = rd.take_u64(24);
        let l1_pseudorange = if raw_pr == GPS_INVALID_PSEUDORANGE {
            f64::NAN
        } else {
            raw_pr as f64 * PSEUDORANGE_RES
        };
        let l1_rangediff = rd.take_i64(20) as f64 * RANGEDIFF_RES;
        let l1_lock = rd.take_u8(7);
        let (l1_amb, l1_cnr) = if extended {
            (Some(rd.take_u8(8)), Some(rd.take_u8(8) as f64 * CNR_RES))
        } else {
            (None, None)
        };
        let l1 = RtkBand {
            indicator: l1_code,
            pseudorange: l1_pseudorange,
            range_diff: l1_rangediff,
            locktime: l1_lock,
            ambiguity: l1_amb,
            cnr: l1_cnr,
        };
        let l2 = if dual {
            let l2_code = rd.take_u8(2);
            let l2_pr_diff = rd.take_i64(14);
            let l2_pseudorange = if l1_pseudorange.is_nan() {
                f64::NAN
            } else {
                l1_pseudorange + l2_pr_diff as f64 * PSEUDORANGE_RES
            };
            let l2_rangediff = rd.take_i64(20) as f64 * RANGEDIFF_RES;
            let l2_lock = rd.take_u8(7);
            let l2_cnr = if extended {
                // the 1004 L2 block carries CNR but no ambiguity of its own
                let _l2_amb = rd.take_u8(8);
                Some(rd.take_u8(8) as f64 * CNR_RES)
            } else {
                None
            };
            Some(RtkBand {
                indicator: l2_code,
                pseudorange: l2_pseudorange,
                range_diff: l2_rangediff,
                locktime: l2_lock,
                ambiguity: None,
                cnr: l2_cnr,
            })
        } else {
            None
        };
        sats.push(RtkSat {
            ident,
            channel: None,
            l1,
            l2,
        });
    }
    Ok(Rtcm3Body::GpsRtk(RtkBlock { header, sats }))
}

fn decode_glo_rtk(msg_type: u16, rd: &mut BitReader) -> Result<Rtcm3Body, Rtcm3Error> {
    let station_id = rd.take_u16(12);
    let tow = rd.take_u32(27) as f64 / 1000.0;
    let sync = rd.take_bool();
    let n_sats = rd.take_u8(5);
    let smoothing = rd.take_bool();
    let interval = rd.take_u8(3);
    let header = RtkHeader {
        station_id,
        tow,
        sync,
        smoothing,
        interval,
    };

    let extended = msg_type == 1010 || msg_type == 1012;
    let dual = msg_type == 1011 || msg_type == 1012;
    let mut sats = Vec::with_capacity(n_sats as usize);
    for _ in 0..n_sats {
        let per_sat = 6 + 1 + 5 + 25 + 20 + 7
            + if extended { 15 } else { 0 }
            + if dual { 2 + 14 + 20 + 7 } else { 0 }
            + if dual && extended { 16 } else { 0 };
        if !rd.has(per_sat) {
            return Err(Rtcm3Error::Runt(rd.remaining() / 8, msg_type));
        }
        let ident = rd.take_u8(6);
        let code = rd.take_u8(1);
        let channel = (rd.take_u8(5) as i64 - GLO_CHANNEL_BASE) as i8;
        let raw_pr = rd.take_u64(25);
        let pseudorange = raw_pr as f64 * GLO_PSEUDORANGE_RES;
        let range_diff = rd.take_i64(20) as f64 * RANGEDIFF_RES;
        let lock = rd.take_u8(7);
        let (amb, cnr) = if extended {
            (Some(rd.take_u8(7)), Some(rd.take_u8(8) as f64 * CNR_RES))
        } else {
            (None, None)
        };
        let l1 = RtkBand {
            indicator: code,
            pseudorange,
            range_diff,
            locktime: lock,
            ambiguity: amb,
            cnr,
        };
        let l2 = if dual {
            let l2_code = rd.take_u8(2);
            let incr = rd.take_i64(14);
            let l2_pseudorange = if incr == GLO_INVALID_RANGEINCR {
                f64::NAN
            } else {
                pseudorange + incr as f64 * GLO_PSEUDORANGE_RES
            };
            let l2_rangediff = rd.take_i64(20) as f64 * RANGEDIFF_RES;
            let l2_lock = rd.take_u8(7);
            let l2_cnr = if extended {
                let _l2_amb = rd.take_u8(8);
                Some(rd.take_u8(8) as f64 * CNR_RES)
            } else {
                None
            };
            Some(RtkBand {
                indicator: l2_code,
                pseudorange: l2_pseudorange,
                range_diff: l2_rangediff,
                locktime: l2_lock,
                ambiguity: None,
                cnr: l2_cnr,
            })
        } else {
            None
        };
        sats.push(RtkSat {
            ident,
            channel: Some(channel),
            l1,
            l2,
        });
    }
    Ok(Rtcm3Body::GloRtk(RtkBlock { header, sats }))
}

// ── Station / antenna: 1005 / 1006 / 1007 / 1008 / 1033 ───────────────────────

fn decode_station_arp(msg_type: u16, rd: &mut BitReader) -> Rtcm3Body {
    let station_id = rd.take_u16(12);
    rd.skip(6); // ITRF realization year
    let system_mask = rd.take_u8(3);
    let is_physical_reference = rd.take_bool();
    let ecef_x = rd.take_i64(38) as f64 * ECEF_RES;
    let single_receiver = rd.take_bool();
    rd.skip(1);
    let ecef_y = rd.take_i64(38) as f64 * ECEF_RES;
    rd.skip(2); // quarter-cycle indicator
    let ecef_z = rd.take_i64(38) as f64 * ECEF_RES;
    let height = if msg_type == 1006 {
        Some(rd.take_u64(16) as f64 * ECEF_RES)
    } else {
        None
    };
    Rtcm3Body::StationArp(StationArp {
        station_id,
        system_mask,
        is_physical_reference,
        ecef_x,
        ecef_y,
        ecef_z,
        single_receiver,
        height,
    })
}

fn counted_string(rd: &mut BitReader, len_bits: u32) -> String {
    let n = (rd.take_u64(len_bits) as usize)
        .min(RTCM3_STRING_MAX)
        .min(rd.remaining() / 8);
    let bytes = rd.take_bytes(n);
    String::from_utf8_lossy(&bytes).into_owned()
}

fn decode_antenna_info(msg_type: u16, rd: &mut BitReader) -> Rtcm3Body {
    let station_id = rd.take_u16(12);
    let descriptor = counted_string(rd, 8);
    let setup_id = rd.take_u8(8);
    let serial = if msg_type == 1008 || msg_type == 1033 {
        Some(counted_string(rd, 8))
    } else {
        None
    };
    let (receiver, firmware, receiver_serial) = if msg_type == 1033 {
        let receiver = counted_string(rd, 8);
        let firmware = counted_string(rd, 8);
        // the receiver serial trails the firmware string when present
        let receiver_serial = if rd.has(8) { Some(counted_string(rd, 8)) } else { None };
        (Some(receiver), Some(firmware), receiver_serial)
    } else {
        (None, None, None)
    };
    Rtcm3Body::AntennaInfo(AntennaInfo {
        station_id,
        descriptor,
        setup_id,
        serial,
        receiver,
        firmware,
        receiver_serial,
    })
}

// ── System parameters: 1013 ───────────────────────────────────────────────────

fn decode_system_params(rd: &mut BitReader) -> Rtcm3Body {
    let station_id = rd.take_u16(12);
    let mjd = rd.take_u16(16);
    let seconds_of_day = rd.take_u32(17);
    let count = rd.take_u8(5);
    let leap_seconds = rd.take_u8(8);
    let mut announcements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if !rd.has(29) {
            break;
        }
        announcements.push(Announcement {
            msg_id: rd.take_u16(12),
            sync: rd.take_bool(),
            interval: rd.take_u16(16) as f64 * EPOCH_RES,
        });
    }
    Rtcm3Body::SystemParams(SystemParams {
        station_id,
        mjd,
        seconds_of_day,
        leap_seconds,
        announcements,
    })
}

// ── Network RTK: 1015 / 1016 / 1017 ───────────────────────────────────────────

fn decode_network_rtk(msg_type: u16, payload: &[u8], rd: &mut BitReader) -> Result<Rtcm3Body, Rtcm3Error> {
    // 9-byte minimum covers the shared header
    if payload.len() < 9 {
        return Err(Rtcm3Error::Runt(payload.len(), msg_type));
    }
    let network_id = rd.take_u8(8);
    let subnetwork_id = rd.take_u8(4);
    let tow = rd.take_u32(23) as f64 * EPOCH_RES;
    let multiple_message = rd.take_bool();
    let master_station = rd.take_u16(12);
    let aux_station = rd.take_u16(12);
    let sat_count = rd.take_u8(4);
    // per-satellite bodies are stored raw, not decoded
    let consumed = (rd.position() + 7) / 8;
    let raw = payload[consumed.min(payload.len())..].to_vec();
    Ok(Rtcm3Body::NetworkRtk(NetworkRtk {
        network_id,
        subnetwork_id,
        tow,
        multiple_message,
        master_station,
        aux_station,
        sat_count,
        raw,
    }))
}

// ── Coordinate transformations: 1021 / 1023 / 1025 ────────────────────────────

fn decode_helmert(payload: &[u8], rd: &mut BitReader) -> Result<Rtcm3Body, Rtcm3Error> {
    let source_name = counted_string(rd, 5);
    let target_name = counted_string(rd, 5);
    // everything after the names is a fixed 286-bit block
    if !rd.has(286) {
        return Err(Rtcm3Error::Runt(payload.len(), 1021));
    }
    let sys_id = rd.take_u8(8);
    let utilized = rd.take_u16(10);
    let plate_number = rd.take_u8(5);
    let computation = rd.take_u8(4);
    let height_indicator = rd.take_u8(2);
    let lat_origin = rd.take_i64(19) as f64 * VALIDITY_RES;
    let lon_origin = rd.take_i64(20) as f64 * VALIDITY_RES;
    let lat_extension = rd.take_u64(14) as f64 * VALIDITY_RES;
    let lon_extension = rd.take_u64(14) as f64 * VALIDITY_RES;
    let dx = rd.take_i64(23) as f64 * TRANSLATION_RES;
    let dy = rd.take_i64(23) as f64 * TRANSLATION_RES;
    let dz = rd.take_i64(23) as f64 * TRANSLATION_RES;
    let rx = rd.take_i64(32) as f64 * ROTATION_ARCSEC_RES;
    let ry = rd.take_i64(32) as f64 * ROTATION_ARCSEC_RES;
    let rz = rd.take_i64(32) as f64 * ROTATION_ARCSEC_RES;
    let scale_ppm = rd.take_i64(25) as f64 * SCALE_PPM_RES;
    Ok(Rtcm3Body::Helmert(Helmert {
        source_name,
        target_name,
        sys_id,
        utilized,
        plate_number,
        computation,
        height_indicator,
        lat_origin,
        lon_origin,
        lat_extension,
        lon_extension,
        dx,
        dy,
        dz,
        rx,
        ry,
        rz,
        scale_ppm,
    }))
}

fn decode_residuals_grid(rd: &mut BitReader) -> Rtcm3Body {
    let sys_id = rd.take_u8(8);
    let shift_indicator = rd.take_u8(2);
    let lat_origin = rd.take_i64(21) as f64 * VALIDITY_RES;
    let lon_origin = rd.take_i64(22) as f64 * VALIDITY_RES;
    let lat_extension = rd.take_u64(12) as f64 * VALIDITY_RES;
    let lon_extension = rd.take_u64(12) as f64 * VALIDITY_RES;
    let mean_dlat = rd.take_i64(8) as f64 * RESIDUAL_ARCSEC_RES;
    let mean_dlon = rd.take_i64(8) as f64 * RESIDUAL_ARCSEC_RES;
    let mean_dheight = rd.take_i64(15) as f64 * HEIGHT_RES;
    let mut points = Vec::with_capacity(RTCM3_GRID_SIZE);
    for _ in 0..RTCM3_GRID_SIZE {
        if !rd.has(9 + 9 + 9) {
            break;
        }
        points.push(GridPoint {
            dlat: rd.take_i64(9) as f64 * RESIDUAL_ARCSEC_RES,
            dlon: rd.take_i64(9) as f64 * RESIDUAL_ARCSEC_RES,
            dheight: rd.take_i64(9) as f64 * HEIGHT_RES,
        });
    }
    Rtcm3Body::ResidualsGrid(ResidualsGrid {
        sys_id,
        shift_indicator,
        lat_origin,
        lon_origin,
        lat_extension,
        lon_extension,
        mean_dlat,
        mean_dlon,
        mean_dheight,
        points,
    })
}

fn decode_projection(rd: &mut BitReader) -> Rtcm3Body {
    let sys_id = rd.take_u8(8);
    let projection_type = rd.take_u8(6);
    let lat_origin = rd.take_i64(34) as f64 * PROJ_ORIGIN_RES;
    let lon_origin = rd.take_i64(35) as f64 * PROJ_ORIGIN_RES;
    let scale = rd.take_u64(30) as f64 * SCALE_PPM_RES;
    let false_easting = rd.take_u64(36) as f64 * TRANSLATION_RES;
    let false_northing = rd.take_i64(35) as f64 * TRANSLATION_RES;
    Rtcm3Body::Projection(Projection {
        sys_id,
        projection_type,
        lat_origin,
        lon_origin,
        scale,
        false_easting,
        false_northing,
    })
}

// ── Text: 1029 ────────────────────────────────────────────────────────────────

fn decode_text(rd: &mut BitReader) -> Rtcm3Body {
    let station_id = rd.take_u16(12);
    let mjd = rd.take_u16(16);
    let seconds_of_day = rd.take_u32(17);
    let unicode_units = rd.take_u8(7);
    let nbytes = rd.take_u64(8) as usize;
    let avail = rd.remaining() / 8;
    let bytes = rd.take_bytes(nbytes.min(avail));
    Rtcm3Body::Text(TextMessage {
        station_id,
        mjd,
        seconds_of_day,
        unicode_units,
        text: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

// ── GLONASS biases: 1230 ──────────────────────────────────────────────────────

fn decode_glo_bias(rd: &mut BitReader) -> Rtcm3Body {
    let station_id = rd.take_u16(12);
    let bias_indicator = rd.take_bool();
    rd.skip(3);
    let mask = rd.take_u8(4);
    let mut take_bias = |present: bool| -> Option<f64> {
        if present && rd.has(16) {
            Some(rd.take_i64(16) as f64 * PSEUDORANGE_RES)
        } else {
            None
        }
    };
    let l1_ca = take_bias(mask & 0x8 != 0);
    let l1_p = take_bias(mask & 0x4 != 0);
    let l2_ca = take_bias(mask & 0x2 != 0);
    let l2_p = take_bias(mask & 0x1 != 0);
    Rtcm3Body::GloBias(GloBias {
        station_id,
        bias_indicator,
        mask,
        l1_ca,
        l1_p,
        l2_ca,
        l2_p,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gnss_frame::bits::put_ubits;

    /// Bit-level payload builder mirroring the reader.
    struct Enc {
        buf: Vec<u8>,
        pos: usize,
    }

    impl Enc {
        fn new() -> Self {
            Self { buf: Vec::new(), pos: 0 }
        }

        fn put(&mut self, width: u32, value: u64) {
            let need = (self.pos + width as usize + 7) / 8;
            if self.buf.len() < need {
                self.buf.resize(need, 0);
            }
            put_ubits(&mut self.buf, self.pos, width, value);
            self.pos += width as usize;
        }

        fn put_i(&mut self, width: u32, value: i64) {
            self.put(width, (value as u64) & (!0u64 >> (64 - width)));
        }

        fn put_str(&mut self, len_bits: u32, s: &str) {
            self.put(len_bits, s.len() as u64);
            for b in s.bytes() {
                self.put(8, u64::from(b));
            }
        }

        fn finish(self) -> Vec<u8> {
            self.buf
        }
    }

    #[test]
    fn runt_payload_is_dropped() {
        assert_eq!(decode_payload(&[0x3E]), Err(Rtcm3Error::Runt(1, 0)));
        assert_eq!(decode_payload(&[]), Err(Rtcm3Error::Runt(0, 0)));
    }

    #[test]
    fn unknown_type_keeps_raw_payload() {
        let mut e = Enc::new();
        e.put(12, 1019);
        e.put(32, 0xDEADBEEF);
        let payload = e.finish();
        let msg = decode_payload(&payload).unwrap();
        assert_eq!(msg.msg_type, 1019);
        match msg.body {
            Rtcm3Body::Unknown { name, payload: raw } => {
                assert_eq!(name, Some("GPS ephemeris"));
                assert_eq!(raw, payload);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn station_arp_1005_reference_vector() {
        // station 2003, ECEF (1114104.5999, -4850729.7108, 3975521.4643)
        let mut e = Enc::new();
        e.put(12, 1005);
        e.put(12, 2003);
        e.put(6, 0); // ITRF year
        e.put(3, 0b101); // GPS + Galileo
        e.put(1, 0);
        e.put_i(38, 11141045999);
        e.put(1, 1);
        e.put(1, 0);
        e.put_i(38, -48507297108);
        e.put(2, 0);
        e.put_i(38, 39755214643);
        let msg = decode_payload(&e.finish()).unwrap();
        assert_eq!(msg.msg_type, 1005);
        assert_eq!(msg.station_id, 2003);
        match msg.body {
            Rtcm3Body::StationArp(arp) => {
                assert!((arp.ecef_x - 1114104.5999).abs() < 1e-4);
                assert!((arp.ecef_y + 4850729.7108).abs() < 1e-4);
                assert!((arp.ecef_z - 3975521.4643).abs() < 1e-4);
                assert!(arp.single_receiver);
                assert_eq!(arp.system_mask, 0b101);
                assert!(arp.height.is_none());
            }
            other => panic!("expected StationArp, got {other:?}"),
        }
    }

    #[test]
    fn station_arp_1006_carries_height() {
        let mut e = Enc::new();
        e.put(12, 1006);
        e.put(12, 7);
        e.put(6, 0);
        e.put(3, 0b100);
        e.put(1, 0);
        e.put_i(38, 0);
        e.put(1, 0);
        e.put(1, 0);
        e.put_i(38, 0);
        e.put(2, 0);
        e.put_i(38, 0);
        e.put(16, 15432); // 1.5432 m
        let msg = decode_payload(&e.finish()).unwrap();
        match msg.body {
            Rtcm3Body::StationArp(arp) => {
                let h = arp.height.unwrap();
                assert!((h - 1.5432).abs() < 1e-4);
            }
            other => panic!("expected StationArp, got {other:?}"),
        }
    }

    fn encode_1004(station: u16, tow_ms: u32, sats: &[(u8, u64, i64)]) -> Vec<u8> {
        let mut e = Enc::new();
        e.put(12, 1004);
        e.put(12, u64::from(station) as u64);
        e.put(30, u64::from(tow_ms));
        e.put(1, 1); // sync
        e.put(5, sats.len() as u64);
        e.put(1, 0); // smoothing
        e.put(3, 0);
        for &(ident, pr, prdiff) in sats {
            e.put(6, u64::from(ident));
            e.put(1, 0);
            e.put(24, pr);
            e.put_i(20, prdiff);
            e.put(7, 35); // locktime
            e.put(8, 100); // ambiguity
            e.put(8, 180); // CNR 45 dBHz
            e.put(2, 0); // L2 code
            e.put_i(14, 250);
            e.put_i(20, -120);
            e.put(7, 35);
            e.put(8, 0);
            e.put(8, 160);
        }
        e.finish()
    }

    #[test]
    fn gps_rtk_1004_decodes_both_bands() {
        let payload = encode_1004(42, 345_600_000, &[(3, 1_000_000, 500), (17, 1_200_000, -400)]);
        let msg = decode_payload(&payload).unwrap();
        assert_eq!(msg.msg_type, 1004);
        let block = match msg.body {
            Rtcm3Body::GpsRtk(b) => b,
            other => panic!("expected GpsRtk, got {other:?}"),
        };
        assert_eq!(block.header.station_id, 42);
        assert!((block.header.tow - 345_600.0).abs() < 1e-9);
        assert!(block.header.sync);
        assert_eq!(block.sats.len(), 2);
        let sat = &block.sats[0];
        assert_eq!(sat.ident, 3);
        assert!((sat.l1.pseudorange - 20_000.0).abs() < 1e-9);
        assert!((sat.l1.range_diff - 0.25).abs() < 1e-9);
        assert_eq!(sat.l1.ambiguity, Some(100));
        assert!((sat.l1.cnr.unwrap() - 45.0).abs() < 1e-9);
        let l2 = sat.l2.as_ref().unwrap();
        assert!((l2.pseudorange - (20_000.0 + 5.0)).abs() < 1e-9);
        assert!((l2.cnr.unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn gps_invalid_pseudorange_becomes_nan() {
        let payload = encode_1004(1, 0, &[(5, u64::from(GPS_INVALID_PSEUDORANGE as u32), 0)]);
        let msg = decode_payload(&payload).unwrap();
        let block = match msg.body {
            Rtcm3Body::GpsRtk(b) => b,
            other => panic!("expected GpsRtk, got {other:?}"),
        };
        assert!(block.sats[0].l1.pseudorange.is_nan());
        assert!(block.sats[0].l2.as_ref().unwrap().pseudorange.is_nan());
    }

    #[test]
    fn truncated_observables_are_runt() {
        let mut payload = encode_1004(1, 0, &[(5, 1000, 0)]);
        payload.truncate(10);
        assert!(matches!(decode_payload(&payload), Err(Rtcm3Error::Runt(_, 1004))));
    }

    #[test]
    fn glonass_channel_offsets_by_base() {
        let mut e = Enc::new();
        e.put(12, 1012);
        e.put(12, 9);
        e.put(27, 60_000);
        e.put(1, 0);
        e.put(5, 1);
        e.put(1, 0);
        e.put(3, 0);
        e.put(6, 4); // ident
        e.put(1, 0);
        e.put(5, 2); // channel raw 2 → slot -5
        e.put(25, 500_000);
        e.put_i(20, 0);
        e.put(7, 10);
        e.put(7, 3); // ambiguity
        e.put(8, 120); // CNR
        e.put(2, 0);
        e.put_i(14, 0);
        e.put_i(20, 0);
        e.put(7, 10);
        e.put(8, 0);
        e.put(8, 120);
        let msg = decode_payload(&e.finish()).unwrap();
        let block = match msg.body {
            Rtcm3Body::GloRtk(b) => b,
            other => panic!("expected GloRtk, got {other:?}"),
        };
        assert_eq!(block.sats[0].channel, Some(-5));
        assert!((block.sats[0].l1.pseudorange - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn antenna_descriptor_1008() {
        let mut e = Enc::new();
        e.put(12, 1008);
        e.put(12, 1234);
        e.put_str(8, "TRM55971.00");
        e.put(8, 2); // setup id
        e.put_str(8, "SN-0042");
        let msg = decode_payload(&e.finish()).unwrap();
        match msg.body {
            Rtcm3Body::AntennaInfo(a) => {
                assert_eq!(a.station_id, 1234);
                assert_eq!(a.descriptor, "TRM55971.00");
                assert_eq!(a.setup_id, 2);
                assert_eq!(a.serial.as_deref(), Some("SN-0042"));
                assert!(a.receiver.is_none());
            }
            other => panic!("expected AntennaInfo, got {other:?}"),
        }
    }

    #[test]
    fn receiver_descriptor_1033() {
        let mut e = Enc::new();
        e.put(12, 1033);
        e.put(12, 55);
        e.put_str(8, "ANT");
        e.put(8, 0);
        e.put_str(8, "S1");
        e.put_str(8, "NETR9");
        e.put_str(8, "5.45");
        e.put_str(8, "R-77");
        let msg = decode_payload(&e.finish()).unwrap();
        match msg.body {
            Rtcm3Body::AntennaInfo(a) => {
                assert_eq!(a.receiver.as_deref(), Some("NETR9"));
                assert_eq!(a.firmware.as_deref(), Some("5.45"));
                assert_eq!(a.receiver_serial.as_deref(), Some("R-77"));
            }
            other => panic!("expected AntennaInfo, got {other:?}"),
        }
    }

    #[test]
    fn system_params_1013() {
        let mut e = Enc::new();
        e.put(12, 1013);
        e.put(12, 900);
        e.put(16, 60_123); // MJD
        e.put(17, 43_200);
        e.put(5, 2);
        e.put(8, 18); // leap seconds
        e.put(12, 1004);
        e.put(1, 1);
        e.put(16, 10); // 1.0 s
        e.put(12, 1006);
        e.put(1, 0);
        e.put(16, 300); // 30 s
        let msg = decode_payload(&e.finish()).unwrap();
        match msg.body {
            Rtcm3Body::SystemParams(p) => {
                assert_eq!(p.leap_seconds, 18);
                assert_eq!(p.announcements.len(), 2);
                assert_eq!(p.announcements[0].msg_id, 1004);
                assert!((p.announcements[1].interval - 30.0).abs() < 1e-9);
            }
            other => panic!("expected SystemParams, got {other:?}"),
        }
    }

    #[test]
    fn network_rtk_header_only() {
        let mut e = Enc::new();
        e.put(12, 1015);
        e.put(8, 3);
        e.put(4, 1);
        e.put(23, 12_345);
        e.put(1, 0);
        e.put(12, 100);
        e.put(12, 101);
        e.put(4, 6);
        // raw per-sat bodies
        e.put(32, 0xCAFEBABE);
        let msg = decode_payload(&e.finish()).unwrap();
        match msg.body {
            Rtcm3Body::NetworkRtk(n) => {
                assert_eq!(n.network_id, 3);
                assert_eq!(n.master_station, 100);
                assert_eq!(n.aux_station, 101);
                assert_eq!(n.sat_count, 6);
                assert!(!n.raw.is_empty());
            }
            other => panic!("expected NetworkRtk, got {other:?}"),
        }
    }

    #[test]
    fn network_rtk_runt_header() {
        let mut e = Enc::new();
        e.put(12, 1016);
        e.put(20, 0);
        assert!(matches!(decode_payload(&e.finish()), Err(Rtcm3Error::Runt(_, 1016))));
    }

    #[test]
    fn text_1029_utf8() {
        let text = "station moving — maintenance";
        let mut e = Enc::new();
        e.put(12, 1029);
        e.put(12, 8);
        e.put(16, 60_000);
        e.put(17, 0);
        e.put(7, text.chars().count() as u64);
        e.put(8, text.len() as u64);
        for b in text.bytes() {
            e.put(8, u64::from(b));
        }
        let msg = decode_payload(&e.finish()).unwrap();
        match msg.body {
            Rtcm3Body::Text(t) => assert_eq!(t.text, text),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn glonass_bias_1230_mask_selects_fields() {
        let mut e = Enc::new();
        e.put(12, 1230);
        e.put(12, 77);
        e.put(1, 1);
        e.put(3, 0);
        e.put(4, 0b1010); // L1 C/A and L2 C/A present
        e.put_i(16, 50); // 1.0 m
        e.put_i(16, -25); // -0.5 m
        let msg = decode_payload(&e.finish()).unwrap();
        match msg.body {
            Rtcm3Body::GloBias(b) => {
                assert!((b.l1_ca.unwrap() - 1.0).abs() < 1e-9);
                assert!(b.l1_p.is_none());
                assert!((b.l2_ca.unwrap() + 0.5).abs() < 1e-9);
                assert!(b.l2_p.is_none());
            }
            other => panic!("expected GloBias, got {other:?}"),
        }
    }

    // ── MSM ───────────────────────────────────────────────────────────────

    fn encode_msm7_header(e: &mut Enc, sat_mask: u64, sig_mask: u32, cell_mask: u64, n_cell: u32) {
        e.put(12, 1077);
        e.put(12, 2003);
        e.put(30, 100_000);
        e.put(1, 0); // sync
        e.put(3, 0); // IODS
        e.put(7, 0); // reserved
        e.put(2, 0);
        e.put(2, 0);
        e.put(1, 0);
        e.put(3, 0);
        e.put(32, sat_mask >> 32);
        e.put(32, sat_mask & 0xFFFF_FFFF);
        e.put(32, u64::from(sig_mask));
        if n_cell > 0 {
            e.put(n_cell, cell_mask);
        }
    }

    #[test]
    fn msm7_masks_and_counts() {
        // S4: sat_mask 0x0F00 → 4 sats, one signal, 4-cell mask
        let mut e = Enc::new();
        encode_msm7_header(&mut e, 0x0000_0000_0000_0F00, 0x0080_0000, 0b1111, 4);
        for _ in 0..4 {
            e.put(8, 75); // rough range ms
        }
        for _ in 0..4 {
            e.put(4, 0);
        }
        for _ in 0..4 {
            e.put(10, 512);
        }
        for _ in 0..4 {
            e.put_i(14, -100);
        }
        // signal block: 4 cells
        for _ in 0..4 {
            e.put_i(20, 1000);
        }
        for _ in 0..4 {
            e.put_i(24, 2000);
        }
        for _ in 0..4 {
            e.put(10, 33);
        }
        for _ in 0..4 {
            e.put(1, 1);
        }
        for _ in 0..4 {
            e.put(10, 720); // 45 dBHz at 1/16 resolution
        }
        for _ in 0..4 {
            e.put_i(15, 55);
        }
        let msg = decode_payload(&e.finish()).unwrap();
        assert_eq!(msg.msg_type, 1077);
        let block = match msg.body {
            Rtcm3Body::Msm(b) => b,
            other => panic!("expected Msm, got {other:?}"),
        };
        assert_eq!(block.gnss, Gnss::Gps);
        assert_eq!(block.level, 7);
        assert_eq!(block.header.n_sat, 4);
        assert_eq!(block.header.n_sig, 1);
        assert_eq!(block.header.n_cell, 4);
        assert_eq!(block.header.cell_mask, 0b1111);
        // ids from the MSB end of the mask
        let ids: Vec<u8> = block.sats.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![53, 54, 55, 56]);
        assert_eq!(block.cells.len(), 4);
        assert_eq!(block.sats[0].rough_range_ms, Some(75));
        assert_eq!(block.sats[0].rough_rate, Some(-100));
        let cell = &block.cells[0];
        assert_eq!(cell.sig, 9);
        assert!((cell.cnr.unwrap() - 45.0).abs() < 1e-9);
        assert!(cell.half_cycle_ambiguity.unwrap());
        assert!((cell.fine_doppler.unwrap() - 0.0055).abs() < 1e-9);
    }

    #[test]
    fn msm_counts_match_popcounts() {
        // sparse cell mask: only 3 of 6 cells present
        let sat_mask: u64 = 0x8000_0000_0000_0001 | 1 << 62; // sats 1, 2, 64
        let sig_mask: u32 = 0x8000_0001; // signals 1, 32
        let cell_mask: u64 = 0b101_001;
        let mut e = Enc::new();
        e.put(12, 1074);
        e.put(12, 1);
        e.put(30, 0);
        e.put(1, 0);
        e.put(3, 0);
        e.put(7, 0);
        e.put(2, 0);
        e.put(2, 0);
        e.put(1, 0);
        e.put(3, 0);
        e.put(32, sat_mask >> 32);
        e.put(32, sat_mask & 0xFFFF_FFFF);
        e.put(32, u64::from(sig_mask));
        e.put(6, cell_mask);
        // MSM4 satellite block: rough ms + mod-1ms
        for _ in 0..3 {
            e.put(8, 70);
        }
        for _ in 0..3 {
            e.put(10, 0);
        }
        // 3 present cells: pr(15) phase(22) lock(4) half(1) cnr(6)
        for _ in 0..3 {
            e.put_i(15, 0);
        }
        for _ in 0..3 {
            e.put_i(22, 0);
        }
        for _ in 0..3 {
            e.put(4, 0);
        }
        for _ in 0..3 {
            e.put(1, 0);
        }
        for _ in 0..3 {
            e.put(6, 40);
        }
        let msg = decode_payload(&e.finish()).unwrap();
        let block = match msg.body {
            Rtcm3Body::Msm(b) => b,
            other => panic!("expected Msm, got {other:?}"),
        };
        assert_eq!(block.header.n_sat, sat_mask.count_ones() as u8);
        assert_eq!(block.header.n_sig, sig_mask.count_ones() as u8);
        assert_eq!(
            u16::from(block.header.n_cell),
            u16::from(block.header.n_sat) * u16::from(block.header.n_sig)
        );
        assert_eq!(block.cells.len(), 3);
        // mask 0b101001 walks (sat,sig) row-major from the MSB
        assert_eq!((block.cells[0].sat, block.cells[0].sig), (1, 1));
        assert_eq!((block.cells[1].sat, block.cells[1].sig), (2, 1));
        assert_eq!((block.cells[2].sat, block.cells[2].sig), (64, 32));
    }

    #[test]
    fn msm_runt_header_is_dropped() {
        let mut e = Enc::new();
        e.put(12, 1077);
        e.put(12, 1);
        e.put(30, 0);
        assert!(matches!(decode_payload(&e.finish()), Err(Rtcm3Error::Runt(_, 1077))));
    }

    #[test]
    fn msm_empty_sat_mask_is_rejected() {
        let mut e = Enc::new();
        encode_msm7_header(&mut e, 0, 0x0080_0000, 0, 0);
        // pad to clear the header minimum
        e.put(32, 0);
        assert!(matches!(decode_payload(&e.finish()), Err(Rtcm3Error::Runt(_, 1077))));
    }

    #[test]
    fn msm_cell_overflow_is_rejected() {
        // 16 sats x 5 signals = 80 cells > 64
        let sat_mask = 0xFFFF_0000_0000_0000u64;
        let sig_mask = 0xF800_0000u32;
        let mut e = Enc::new();
        encode_msm7_header(&mut e, sat_mask, sig_mask, 0, 0);
        e.put(32, 0);
        assert_eq!(decode_payload(&e.finish()), Err(Rtcm3Error::CellOverflow(80)));
    }

    #[test]
    fn fine_field_sentinel_maps_to_none() {
        let mut e = Enc::new();
        encode_msm7_header(&mut e, 1 << 63, 1 << 31, 1, 1);
        e.put(8, 0);
        e.put(4, 0);
        e.put(10, 0);
        e.put_i(14, 0);
        e.put_i(20, -(1 << 19)); // pseudorange sentinel
        e.put_i(24, 100);
        e.put(10, 0);
        e.put(1, 0);
        e.put(10, 0);
        e.put_i(15, -(1 << 14)); // doppler sentinel
        let msg = decode_payload(&e.finish()).unwrap();
        let block = match msg.body {
            Rtcm3Body::Msm(b) => b,
            other => panic!("expected Msm, got {other:?}"),
        };
        assert!(block.cells[0].fine_pseudorange.is_none());
        assert!(block.cells[0].fine_phase.is_some());
        assert!(block.cells[0].fine_doppler.is_none());
    }
}
