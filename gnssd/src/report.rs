//! # report
//!
//! The normalized per-cycle report: fix data, satellite views, and the
//! mask that records which fields the current packet actually set.
//!
//! Numeric fields default to NaN rather than zero so the merge step can
//! distinguish "driver reported 0.0" from "driver said nothing"; the JSON
//! encoder drops NaN-valued fields on output.

use bitflags::bitflags;
use chrono::{DateTime, Utc};

bitflags! {
    /// Which report fields the most recent parse touched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReportMask: u32 {
        const ONLINE    = 1 << 0;
        const TIME      = 1 << 1;
        const TIMEERR   = 1 << 2;
        const LATLON    = 1 << 3;
        const ALTITUDE  = 1 << 4;
        const SPEED     = 1 << 5;
        const TRACK     = 1 << 6;
        const CLIMB     = 1 << 7;
        const STATUS    = 1 << 8;
        const MODE      = 1 << 9;
        const DOP       = 1 << 10;
        const HERR      = 1 << 11;
        const VERR      = 1 << 12;
        const PERR      = 1 << 13;
        const SATELLITE = 1 << 14;
        const USED      = 1 << 15;
        /// End of reporting cycle: fan the merged report out.
        const REPORT    = 1 << 16;
        /// Start of reporting cycle: clear accumulated fix data.
        const CLEAR     = 1 << 17;
        const RTCM2     = 1 << 18;
        const RTCM3     = 1 << 19;
        const AIS       = 1 << 20;
        /// Driver identification changed.
        const DRIVER    = 1 << 21;
        const PACKET    = 1 << 22;
        const NTPTIME   = 1 << 23;
        const PPSTIME   = 1 << 24;
        const ECEF      = 1 << 25;
        const VECEF     = 1 << 26;
    }
}

// ── Fix ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum FixMode {
    #[default]
    NotSeen,
    NoFix,
    Fix2d,
    Fix3d,
}

impl FixMode {
    /// Wire value used by TPV and GSA.
    pub fn as_int(self) -> u8 {
        match self {
            FixMode::NotSeen => 0,
            FixMode::NoFix => 1,
            FixMode::Fix2d => 2,
            FixMode::Fix3d => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum FixStatus {
    #[default]
    Unknown,
    Gps,
    Dgps,
    Rtk,
    RtkFloat,
    DeadReckoning,
    GnssDr,
    Time,
    Simulated,
    Ppp,
}

impl FixStatus {
    pub fn is_dgps(self) -> bool {
        matches!(self, FixStatus::Dgps | FixStatus::Rtk | FixStatus::RtkFloat | FixStatus::Ppp)
    }
}

/// Dilution-of-precision set. NaN means not computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dops {
    pub xdop: f64,
    pub ydop: f64,
    pub hdop: f64,
    pub vdop: f64,
    pub pdop: f64,
    pub tdop: f64,
    pub gdop: f64,
}

impl Default for Dops {
    fn default() -> Self {
        Self {
            xdop: f64::NAN,
            ydop: f64::NAN,
            hdop: f64::NAN,
            vdop: f64::NAN,
            pdop: f64::NAN,
            tdop: f64::NAN,
            gdop: f64::NAN,
        }
    }
}

/// A time sample latched for the clock sink: GNSS time against the system
/// clock at the moment the fix arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDelta {
    pub gps_time: DateTime<Utc>,
    pub system_time: DateTime<Utc>,
}

/// One position/velocity/time solution, merged across a reporting cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub time: Option<DateTime<Utc>>,
    /// Expected time error, seconds.
    pub ept: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Height above ellipsoid, meters.
    pub alt_hae: f64,
    /// Height above mean sea level, meters.
    pub alt_msl: f64,
    /// Geoid separation (MSL = HAE − separation), meters.
    pub geoid_sep: f64,
    pub epx: f64,
    pub epy: f64,
    pub epv: f64,
    pub eph: f64,
    /// Spherical position error, meters.
    pub sep: f64,
    /// True track, degrees [0,360).
    pub track: f64,
    pub magnetic_track: f64,
    pub magnetic_var: f64,
    /// Ground speed, m/s.
    pub speed: f64,
    /// Vertical speed, m/s.
    pub climb: f64,
    /// Track error, degrees.
    pub epd: f64,
    /// Speed error, m/s.
    pub eps: f64,
    /// Climb error, m/s.
    pub epc: f64,
    pub ecef_x: f64,
    pub ecef_y: f64,
    pub ecef_z: f64,
    pub ecef_vx: f64,
    pub ecef_vy: f64,
    pub ecef_vz: f64,
    pub vel_n: f64,
    pub vel_e: f64,
    pub vel_d: f64,
    pub mode: FixMode,
    pub status: FixStatus,
}

impl Default for GpsFix {
    fn default() -> Self {
        Self {
            time: None,
            ept: f64::NAN,
            latitude: f64::NAN,
            longitude: f64::NAN,
            alt_hae: f64::NAN,
            alt_msl: f64::NAN,
            geoid_sep: f64::NAN,
            epx: f64::NAN,
            epy: f64::NAN,
            epv: f64::NAN,
            eph: f64::NAN,
            sep: f64::NAN,
            track: f64::NAN,
            magnetic_track: f64::NAN,
            magnetic_var: f64::NAN,
            speed: f64::NAN,
            climb: f64::NAN,
            epd: f64::NAN,
            eps: f64::NAN,
            epc: f64::NAN,
            ecef_x: f64::NAN,
            ecef_y: f64::NAN,
            ecef_z: f64::NAN,
            ecef_vx: f64::NAN,
            ecef_vy: f64::NAN,
            ecef_vz: f64::NAN,
            vel_n: f64::NAN,
            vel_e: f64::NAN,
            vel_d: f64::NAN,
            mode: FixMode::NotSeen,
            status: FixStatus::Unknown,
        }
    }
}

impl GpsFix {
    pub fn has_position(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

// ── Satellites ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteView {
    pub prn: i16,
    /// Azimuth, degrees true.
    pub azimuth: f64,
    /// Elevation, degrees.
    pub elevation: f64,
    /// Signal strength, dBHz.
    pub snr: f64,
    pub used: bool,
}

/// Sky view accumulated across GSV/GSA sentences or one binary packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkyView {
    pub satellites: Vec<SatelliteView>,
    pub dops: Dops,
}

impl SkyView {
    pub fn used_count(&self) -> usize {
        self.satellites.iter().filter(|s| s.used).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fix_is_all_unset() {
        let fix = GpsFix::default();
        assert!(fix.latitude.is_nan());
        assert!(fix.speed.is_nan());
        assert!(!fix.has_position());
        assert_eq!(fix.mode, FixMode::NotSeen);
    }

    #[test]
    fn report_mask_composes() {
        let m = ReportMask::LATLON | ReportMask::TIME | ReportMask::MODE;
        assert!(m.contains(ReportMask::TIME));
        assert!(!m.contains(ReportMask::REPORT));
    }
}
