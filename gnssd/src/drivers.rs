//! # drivers
//!
//! The ordered driver table and the per-protocol parse dispatch.
//!
//! A driver entry describes what a protocol's device can do (mode switch,
//! correction input, stickiness) and which frame tag it owns. The session
//! engine scans this table when an accepted frame's tag differs from the
//! current driver's.
//!
//! Parse routines for binary receiver protocols other than RTCM3 live
//! outside this daemon; their entries here classify frames and keep the
//! device online, which is all the multiplexing core needs from them.

use gnss_frame::{Frame, Protocol};
use tracing::{debug, trace};

use crate::nmea::NmeaParser;
use crate::report::{FixMode, FixStatus, GpsFix, ReportMask, SatelliteView, SkyView};

// ── Driver descriptors ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Driver {
    pub name: &'static str,
    /// The frame tag this driver owns.
    pub packet_type: Protocol,
    /// Sticky drivers are remembered and reinstated after a transient
    /// frame from a non-sticky one.
    pub sticky: bool,
    /// Driver can switch the receiver between NMEA and binary mode; an
    /// NMEA frame under such a driver does not force a driver switch.
    pub mode_switcher: bool,
    /// Device accepts differential corrections written into it.
    pub rtcm_writer: bool,
    /// Nominal reporting cycle, seconds.
    pub min_cycle: f64,
}

/// Ordered driver list; the scan on a frame-type mismatch walks this.
pub const DRIVERS: &[Driver] = &[
    Driver { name: "NMEA0183", packet_type: Protocol::Nmea, sticky: false, mode_switcher: false, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "AIVDM", packet_type: Protocol::Ais, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "Garmin Textual", packet_type: Protocol::GarminTxt, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "u-blox", packet_type: Protocol::Ubx, sticky: true, mode_switcher: true, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "SiRF", packet_type: Protocol::Sirf, sticky: true, mode_switcher: true, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "Skytraq", packet_type: Protocol::Skytraq, sticky: false, mode_switcher: false, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "TSIP", packet_type: Protocol::Tsip, sticky: true, mode_switcher: true, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "Garmin Binary", packet_type: Protocol::GarminBin, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "EverMore", packet_type: Protocol::Evermore, sticky: false, mode_switcher: true, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "iTalk", packet_type: Protocol::Italk, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "Zodiac", packet_type: Protocol::Zodiac, sticky: false, mode_switcher: false, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "Navcom NCT", packet_type: Protocol::Navcom, sticky: true, mode_switcher: false, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "SuperStarII", packet_type: Protocol::Superstar2, sticky: false, mode_switcher: false, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "Oncore", packet_type: Protocol::Oncore, sticky: false, mode_switcher: false, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "GeoStar", packet_type: Protocol::Geostar, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "GREIS", packet_type: Protocol::Greis, sticky: true, mode_switcher: false, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "ALLYSTAR", packet_type: Protocol::Allystar, sticky: false, mode_switcher: true, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "CASIC", packet_type: Protocol::Casic, sticky: false, mode_switcher: true, rtcm_writer: true, min_cycle: 1.0 },
    Driver { name: "NMEA2000", packet_type: Protocol::Nmea2000, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "SPARTN", packet_type: Protocol::Spartn, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "RTCM104v2", packet_type: Protocol::Rtcm2, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "RTCM104v3", packet_type: Protocol::Rtcm3, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
    Driver { name: "gpsd JSON", packet_type: Protocol::Json, sticky: false, mode_switcher: false, rtcm_writer: false, min_cycle: 1.0 },
];

/// Find the driver owning a frame tag.
pub fn driver_for(packet_type: Protocol) -> Option<&'static Driver> {
    DRIVERS.iter().find(|d| d.packet_type == packet_type)
}

// ── Parse dispatch ────────────────────────────────────────────────────────────

/// Per-session parse state for the drivers that keep any.
#[derive(Debug, Default)]
pub struct DriverRuntime {
    nmea: NmeaParser,
    /// Most recent decoded RTCM3 message, for subscribers asking for
    /// decoded corrections.
    pub last_rtcm3: Option<gnss_rtcm3::Rtcm3Message>,
}

impl DriverRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch one accepted frame to its protocol parser. Returns the
    /// report mask of fields the frame set.
    pub fn parse_frame(&mut self, frame: &Frame, fix: &mut GpsFix, sky: &mut SkyView) -> ReportMask {
        match frame.protocol {
            Protocol::Nmea => self.nmea.parse(&frame.payload, fix, sky) | ReportMask::PACKET,
            Protocol::Ais => ReportMask::ONLINE | ReportMask::AIS | ReportMask::PACKET,
            Protocol::Rtcm2 => ReportMask::ONLINE | ReportMask::RTCM2 | ReportMask::PACKET,
            Protocol::Rtcm3 => {
                match gnss_rtcm3::decode(&frame.payload) {
                    Ok(msg) => {
                        trace!(msg_type = msg.msg_type, station = msg.station_id, "rtcm3");
                        self.last_rtcm3 = Some(msg);
                    }
                    Err(err) => {
                        // runts are dropped without emission
                        debug!(%err, "undecodable RTCM3 payload");
                        return ReportMask::ONLINE;
                    }
                }
                ReportMask::ONLINE | ReportMask::RTCM3 | ReportMask::PACKET
            }
            Protocol::Json => self.parse_gpsd_json(&frame.payload, fix, sky) | ReportMask::PACKET,
            Protocol::Comment | Protocol::Bad => ReportMask::empty(),
            // binary receiver protocols are parsed out-of-tree; the frame
            // still proves the device is alive and identifies the driver
            _ => ReportMask::ONLINE | ReportMask::PACKET,
        }
    }

    /// Minimal consumption of an upstream daemon's JSON dialect: TPV and
    /// SKY carry everything the cascade needs.
    fn parse_gpsd_json(&mut self, payload: &[u8], fix: &mut GpsFix, sky: &mut SkyView) -> ReportMask {
        let v: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(err) => {
                debug!(%err, "malformed JSON from upstream daemon");
                return ReportMask::empty();
            }
        };
        let mut mask = ReportMask::ONLINE;
        match v.get("class").and_then(|c| c.as_str()) {
            Some("TPV") => {
                if let Some(mode) = v.get("mode").and_then(|m| m.as_u64()) {
                    fix.mode = match mode {
                        2 => FixMode::Fix2d,
                        3 => FixMode::Fix3d,
                        _ => FixMode::NoFix,
                    };
                    mask |= ReportMask::MODE;
                }
                if let (Some(lat), Some(lon)) = (
                    v.get("lat").and_then(|x| x.as_f64()),
                    v.get("lon").and_then(|x| x.as_f64()),
                ) {
                    fix.latitude = lat;
                    fix.longitude = lon;
                    fix.status = FixStatus::Gps;
                    mask |= ReportMask::LATLON | ReportMask::STATUS;
                }
                if let Some(alt) = v.get("altHAE").and_then(|x| x.as_f64()) {
                    fix.alt_hae = alt;
                    mask |= ReportMask::ALTITUDE;
                }
                if let Some(speed) = v.get("speed").and_then(|x| x.as_f64()) {
                    fix.speed = speed;
                    mask |= ReportMask::SPEED;
                }
                if let Some(track) = v.get("track").and_then(|x| x.as_f64()) {
                    fix.track = track;
                    mask |= ReportMask::TRACK;
                }
                if let Some(climb) = v.get("climb").and_then(|x| x.as_f64()) {
                    fix.climb = climb;
                    mask |= ReportMask::CLIMB;
                }
                if let Some(time) = v.get("time").and_then(|x| x.as_str()) {
                    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(time) {
                        fix.time = Some(t.with_timezone(&chrono::Utc));
                        mask |= ReportMask::TIME;
                    }
                }
                mask |= ReportMask::REPORT;
            }
            Some("SKY") => {
                if let Some(sats) = v.get("satellites").and_then(|s| s.as_array()) {
                    sky.satellites = sats
                        .iter()
                        .filter_map(|s| {
                            Some(SatelliteView {
                                prn: s.get("PRN")?.as_i64()? as i16,
                                elevation: s.get("el").and_then(|x| x.as_f64()).unwrap_or(f64::NAN),
                                azimuth: s.get("az").and_then(|x| x.as_f64()).unwrap_or(f64::NAN),
                                snr: s.get("ss").and_then(|x| x.as_f64()).unwrap_or(f64::NAN),
                                used: s.get("used").and_then(|x| x.as_bool()).unwrap_or(false),
                            })
                        })
                        .collect();
                    mask |= ReportMask::SATELLITE;
                }
                for (key, slot) in [("hdop", 0), ("vdop", 1), ("pdop", 2)] {
                    if let Some(d) = v.get(key).and_then(|x| x.as_f64()) {
                        match slot {
                            0 => sky.dops.hdop = d,
                            1 => sky.dops.vdop = d,
                            _ => sky.dops.pdop = d,
                        }
                        mask |= ReportMask::DOP;
                    }
                }
            }
            Some("VERSION") | Some("DEVICES") | Some("WATCH") => {}
            other => trace!(class = ?other, "ignored upstream JSON class"),
        }
        mask
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_lexer_protocol_has_at_most_one_driver() {
        for d in DRIVERS {
            let owners = DRIVERS.iter().filter(|o| o.packet_type == d.packet_type).count();
            assert_eq!(owners, 1, "{:?} claimed by {} drivers", d.packet_type, owners);
        }
    }

    #[test]
    fn lookup_by_packet_type() {
        assert_eq!(driver_for(Protocol::Ubx).unwrap().name, "u-blox");
        assert!(driver_for(Protocol::Ubx).unwrap().mode_switcher);
        assert!(driver_for(Protocol::Bad).is_none());
    }

    #[test]
    fn correction_sources_do_not_accept_corrections() {
        for tag in [Protocol::Rtcm2, Protocol::Rtcm3, Protocol::Spartn, Protocol::Json] {
            assert!(!driver_for(tag).unwrap().rtcm_writer, "{tag:?}");
        }
        assert!(driver_for(Protocol::Nmea).unwrap().rtcm_writer);
    }

    #[test]
    fn upstream_tpv_fills_fix() {
        let mut rt = DriverRuntime::new();
        let mut fix = GpsFix::default();
        let mut sky = SkyView::default();
        let frame = Frame::new(
            Protocol::Json,
            br#"{"class":"TPV","mode":3,"lat":57.7,"lon":11.9,"altHAE":55.0,"speed":2.5,"track":180.0,"time":"2025-06-01T12:00:00.000Z"}"#.to_vec(),
        );
        let mask = rt.parse_frame(&frame, &mut fix, &mut sky);
        assert!(mask.contains(ReportMask::LATLON | ReportMask::TIME | ReportMask::REPORT));
        assert_eq!(fix.mode, FixMode::Fix3d);
        assert!((fix.latitude - 57.7).abs() < 1e-9);
        assert!((fix.speed - 2.5).abs() < 1e-9);
    }

    #[test]
    fn upstream_sky_fills_satellites() {
        let mut rt = DriverRuntime::new();
        let mut fix = GpsFix::default();
        let mut sky = SkyView::default();
        let frame = Frame::new(
            Protocol::Json,
            br#"{"class":"SKY","hdop":1.2,"satellites":[{"PRN":4,"el":45,"az":120,"ss":38,"used":true},{"PRN":9,"el":12,"az":300,"ss":22,"used":false}]}"#.to_vec(),
        );
        let mask = rt.parse_frame(&frame, &mut fix, &mut sky);
        assert!(mask.contains(ReportMask::SATELLITE));
        assert_eq!(sky.satellites.len(), 2);
        assert_eq!(sky.used_count(), 1);
        assert!((sky.dops.hdop - 1.2).abs() < 1e-9);
    }

    #[test]
    fn rtcm3_frames_are_decoded_and_flagged() {
        use gnss_frame::checksum::crc24q;
        let mut payload = vec![0u8; 19];
        gnss_frame::bits::put_ubits(&mut payload, 0, 12, 1005);
        gnss_frame::bits::put_ubits(&mut payload, 12, 12, 501);
        let mut f = vec![0xD3, 0, payload.len() as u8];
        f.extend_from_slice(&payload);
        let crc = crc24q(&f);
        f.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);

        let mut rt = DriverRuntime::new();
        let mut fix = GpsFix::default();
        let mut sky = SkyView::default();
        let mask = rt.parse_frame(&Frame::new(Protocol::Rtcm3, f), &mut fix, &mut sky);
        assert!(mask.contains(ReportMask::RTCM3));
        let msg = rt.last_rtcm3.as_ref().unwrap();
        assert_eq!(msg.msg_type, 1005);
        assert_eq!(msg.station_id, 501);
    }

    #[test]
    fn bad_frames_parse_to_nothing() {
        let mut rt = DriverRuntime::new();
        let mut fix = GpsFix::default();
        let mut sky = SkyView::default();
        let mask = rt.parse_frame(&Frame::new(Protocol::Bad, vec![1, 2, 3]), &mut fix, &mut sky);
        assert!(mask.is_empty());
    }
}
