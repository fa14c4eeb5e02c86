//! # gnss-frame
//!
//! Multi-protocol GNSS packet recognition.
//!
//! These types are used by:
//! - `gnssd`: per-device sessions run one [`Lexer`] each and dispatch the
//!   frames it accepts to the matching protocol driver
//! - `gnss-rtcm3`: decodes the payload of frames tagged [`Protocol::Rtcm3`]
//!
//! The lexer is a byte-at-a-time state machine that pulls exactly one
//! validated frame at a time out of an arbitrarily interleaved stream of
//! garbage and well-formed frames in any of the supported framings. A frame
//! that gathers fully but fails its integrity check is surfaced as
//! [`Protocol::Bad`] so the caller can count it (autobaud hunting keys off
//! consecutive bad frames); pure garbage between frames is dropped silently.

pub mod bits;
pub mod checksum;
pub mod isgps;
pub mod lexer;

pub use lexer::Lexer;

use serde::Serialize;

// ── Protocol tag ──────────────────────────────────────────────────────────────

/// Classification of an accepted frame.
///
/// One tag per framing the lexer distinguishes. `Nmea2000` never comes out
/// of the byte lexer (CAN frames arrive pre-delimited from the interface);
/// it exists so device sessions share one tag space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Comment,
    Nmea,
    Ais,
    GarminTxt,
    Sirf,
    Zodiac,
    Tsip,
    Evermore,
    Italk,
    GarminBin,
    Navcom,
    Ubx,
    Superstar2,
    Oncore,
    Geostar,
    Nmea2000,
    Greis,
    Skytraq,
    Allystar,
    Casic,
    Rtcm2,
    Rtcm3,
    Json,
    Spartn,
    /// Fully gathered frame that failed checksum/CRC. Consumed silently by
    /// the dispatcher; counted by the session for baud hunting.
    Bad,
}

impl Protocol {
    /// Line-oriented ASCII framings; everything else is binary for the
    /// purposes of raw-mode pass-through and hex dumping.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            Protocol::Comment | Protocol::Nmea | Protocol::Ais | Protocol::GarminTxt | Protocol::Json
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Comment => "COMMENT",
            Protocol::Nmea => "NMEA0183",
            Protocol::Ais => "AIVDM",
            Protocol::GarminTxt => "GARMINTXT",
            Protocol::Sirf => "SiRF",
            Protocol::Zodiac => "Zodiac",
            Protocol::Tsip => "TSIP",
            Protocol::Evermore => "EverMore",
            Protocol::Italk => "iTalk",
            Protocol::GarminBin => "Garmin",
            Protocol::Navcom => "Navcom",
            Protocol::Ubx => "u-blox",
            Protocol::Superstar2 => "SuperStarII",
            Protocol::Oncore => "Oncore",
            Protocol::Geostar => "GeoStar",
            Protocol::Nmea2000 => "NMEA2000",
            Protocol::Greis => "GREIS",
            Protocol::Skytraq => "Skytraq",
            Protocol::Allystar => "ALLYSTAR",
            Protocol::Casic => "CASIC",
            Protocol::Rtcm2 => "RTCM104v2",
            Protocol::Rtcm3 => "RTCM104v3",
            Protocol::Json => "JSON",
            Protocol::Spartn => "SPARTN",
            Protocol::Bad => "BAD",
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One validated frame as accepted by the lexer.
///
/// `payload` holds the exact on-wire bytes of the frame, except for the
/// DLE-stuffed framings (TSIP, EverMore, Garmin binary) where `DLE DLE`
/// pairs are already un-doubled so protocol parsers see clean payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub protocol: Protocol,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(protocol: Protocol, payload: Vec<u8>) -> Self {
        Self { protocol, payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Largest frame any supported framing can produce, and the sizing basis
/// for the lexer's input accumulator.
pub const MAX_PACKET_LENGTH: usize = 9216;
