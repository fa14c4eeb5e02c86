//! # nmea
//!
//! NMEA-0183 sentence parsing into the normalized report.
//!
//! The lexer has already validated framing and checksum; this parser only
//! extracts fields. Sentences it does not know are ignored with a trace
//! line. GSV satellite lists accumulate across a sequence and land in the
//! sky view when the last sentence of the group arrives.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::trace;

use crate::report::{FixMode, FixStatus, GpsFix, ReportMask, SatelliteView, SkyView};

const KNOTS_TO_MPS: f64 = 0.514_444;
const KMH_TO_MPS: f64 = 1.0 / 3.6;

#[derive(Debug, Default)]
pub struct NmeaParser {
    /// Date memory from RMC/ZDA, so time-only sentences can produce a full
    /// timestamp.
    date: Option<NaiveDate>,
    /// GSV sentences accumulate here until the group completes.
    gsv_pending: Vec<SatelliteView>,
    gsv_total: u16,
    /// PRNs marked used by the last GSA.
    used_prns: Vec<i16>,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one validated sentence, updating `fix` and `sky` in place.
    pub fn parse(&mut self, line: &[u8], fix: &mut GpsFix, sky: &mut SkyView) -> ReportMask {
        let text = match std::str::from_utf8(line) {
            Ok(t) => t.trim_end(),
            Err(_) => return ReportMask::empty(),
        };
        let body = text.split('*').next().unwrap_or(text);
        let fields: Vec<&str> = body.split(',').collect();
        if fields.is_empty() || fields[0].len() < 3 {
            return ReportMask::empty();
        }
        // talker prefix is 2 chars after $ for standard sentences
        let tag = &fields[0][fields[0].len().saturating_sub(3)..];
        match tag {
            "GGA" => self.parse_gga(&fields, fix),
            "RMC" => self.parse_rmc(&fields, fix),
            "GSA" => self.parse_gsa(&fields, fix, sky),
            "GSV" => self.parse_gsv(&fields, sky),
            "GLL" => self.parse_gll(&fields, fix),
            "VTG" => self.parse_vtg(&fields, fix),
            "ZDA" => self.parse_zda(&fields, fix),
            _ => {
                trace!(sentence = %fields[0], "unhandled NMEA sentence");
                ReportMask::empty()
            }
        }
    }

    fn parse_gga(&mut self, f: &[&str], fix: &mut GpsFix) -> ReportMask {
        let mut mask = ReportMask::ONLINE;
        if let Some(t) = self.merge_time(field(f, 1)) {
            fix.time = Some(t);
            fix.ept = 0.005;
            mask |= ReportMask::TIME;
        }
        if let Some((lat, lon)) = latlon(field(f, 2), field(f, 3), field(f, 4), field(f, 5)) {
            fix.latitude = lat;
            fix.longitude = lon;
            mask |= ReportMask::LATLON;
        }
        match field(f, 6).and_then(|q| q.parse::<u8>().ok()) {
            Some(0) | None => {
                fix.mode = FixMode::NoFix;
                fix.status = FixStatus::Unknown;
            }
            Some(q) => {
                fix.status = match q {
                    2 => FixStatus::Dgps,
                    4 => FixStatus::Rtk,
                    5 => FixStatus::RtkFloat,
                    6 => FixStatus::DeadReckoning,
                    7 => FixStatus::Simulated,
                    _ => FixStatus::Gps,
                };
                if fix.mode == FixMode::NotSeen || fix.mode == FixMode::NoFix {
                    fix.mode = FixMode::Fix2d;
                }
            }
        }
        mask |= ReportMask::STATUS | ReportMask::MODE;
        if let Some(alt) = num(field(f, 9)) {
            fix.alt_msl = alt;
            mask |= ReportMask::ALTITUDE;
        }
        if let Some(sep) = num(field(f, 11)) {
            fix.geoid_sep = sep;
        }
        mask | ReportMask::REPORT
    }

    fn parse_rmc(&mut self, f: &[&str], fix: &mut GpsFix) -> ReportMask {
        let mut mask = ReportMask::ONLINE;
        if let Some(d) = field(f, 9).and_then(|d| NaiveDate::parse_from_str(d, "%d%m%y").ok()) {
            self.date = Some(d);
        }
        if let Some(t) = self.merge_time(field(f, 1)) {
            fix.time = Some(t);
            fix.ept = 0.005;
            mask |= ReportMask::TIME;
        }
        let valid = field(f, 2) == Some("A");
        if valid {
            if let Some((lat, lon)) = latlon(field(f, 3), field(f, 4), field(f, 5), field(f, 6)) {
                fix.latitude = lat;
                fix.longitude = lon;
                mask |= ReportMask::LATLON;
            }
            if let Some(sp) = num(field(f, 7)) {
                fix.speed = sp * KNOTS_TO_MPS;
                mask |= ReportMask::SPEED;
            }
            if let Some(tr) = num(field(f, 8)) {
                fix.track = tr;
                mask |= ReportMask::TRACK;
            }
            if let (Some(mv), Some(hemi)) = (num(field(f, 10)), field(f, 11)) {
                fix.magnetic_var = if hemi == "W" { -mv } else { mv };
            }
            if fix.mode == FixMode::NotSeen || fix.mode == FixMode::NoFix {
                fix.mode = FixMode::Fix2d;
            }
            if fix.status == FixStatus::Unknown {
                fix.status = FixStatus::Gps;
            }
        } else {
            fix.mode = FixMode::NoFix;
        }
        mask | ReportMask::MODE | ReportMask::STATUS | ReportMask::REPORT
    }

    fn parse_gsa(&mut self, f: &[&str], fix: &mut GpsFix, sky: &mut SkyView) -> ReportMask {
        let mut mask = ReportMask::ONLINE;
        match field(f, 2).and_then(|m| m.parse::<u8>().ok()) {
            Some(2) => {
                fix.mode = FixMode::Fix2d;
                mask |= ReportMask::MODE;
            }
            Some(3) => {
                fix.mode = FixMode::Fix3d;
                mask |= ReportMask::MODE;
            }
            Some(_) => {
                fix.mode = FixMode::NoFix;
                mask |= ReportMask::MODE;
            }
            None => {}
        }
        self.used_prns.clear();
        for i in 3..15 {
            if let Some(prn) = field(f, i).and_then(|p| p.parse::<i16>().ok()) {
                self.used_prns.push(prn);
            }
        }
        for sat in sky.satellites.iter_mut() {
            sat.used = self.used_prns.contains(&sat.prn);
        }
        if let Some(p) = num(field(f, 15)) {
            sky.dops.pdop = p;
        }
        if let Some(h) = num(field(f, 16)) {
            sky.dops.hdop = h;
        }
        if let Some(v) = num(field(f, 17)) {
            sky.dops.vdop = v;
        }
        mask | ReportMask::DOP | ReportMask::USED
    }

    fn parse_gsv(&mut self, f: &[&str], sky: &mut SkyView) -> ReportMask {
        let total = field(f, 1).and_then(|v| v.parse::<u16>().ok()).unwrap_or(0);
        let index = field(f, 2).and_then(|v| v.parse::<u16>().ok()).unwrap_or(0);
        if index <= 1 {
            self.gsv_pending.clear();
            self.gsv_total = total;
        }
        let mut i = 4;
        while i < f.len() {
            if let Some(prn) = field(f, i).and_then(|p| p.parse::<i16>().ok()) {
                self.gsv_pending.push(SatelliteView {
                    prn,
                    elevation: num(field(f, i + 1)).unwrap_or(f64::NAN),
                    azimuth: num(field(f, i + 2)).unwrap_or(f64::NAN),
                    snr: num(field(f, i + 3)).unwrap_or(f64::NAN),
                    used: self.used_prns.contains(&prn),
                });
            }
            i += 4;
        }
        if index >= total && total > 0 {
            sky.satellites = std::mem::take(&mut self.gsv_pending);
            for sat in sky.satellites.iter_mut() {
                sat.used = self.used_prns.contains(&sat.prn);
            }
            ReportMask::ONLINE | ReportMask::SATELLITE
        } else {
            ReportMask::ONLINE
        }
    }

    fn parse_gll(&mut self, f: &[&str], fix: &mut GpsFix) -> ReportMask {
        let mut mask = ReportMask::ONLINE;
        if field(f, 6) != Some("A") {
            return mask;
        }
        if let Some((lat, lon)) = latlon(field(f, 1), field(f, 2), field(f, 3), field(f, 4)) {
            fix.latitude = lat;
            fix.longitude = lon;
            mask |= ReportMask::LATLON;
        }
        if let Some(t) = self.merge_time(field(f, 5)) {
            fix.time = Some(t);
            mask |= ReportMask::TIME;
        }
        if fix.mode == FixMode::NotSeen || fix.mode == FixMode::NoFix {
            fix.mode = FixMode::Fix2d;
            mask |= ReportMask::MODE;
        }
        mask
    }

    fn parse_vtg(&mut self, f: &[&str], fix: &mut GpsFix) -> ReportMask {
        let mut mask = ReportMask::ONLINE;
        if let Some(tr) = num(field(f, 1)) {
            fix.track = tr;
            mask |= ReportMask::TRACK;
        }
        if let Some(mt) = num(field(f, 3)) {
            fix.magnetic_track = mt;
        }
        if let Some(kn) = num(field(f, 5)) {
            fix.speed = kn * KNOTS_TO_MPS;
            mask |= ReportMask::SPEED;
        } else if let Some(kmh) = num(field(f, 7)) {
            fix.speed = kmh * KMH_TO_MPS;
            mask |= ReportMask::SPEED;
        }
        mask
    }

    fn parse_zda(&mut self, f: &[&str], fix: &mut GpsFix) -> ReportMask {
        let (day, month, year) = (
            field(f, 2).and_then(|v| v.parse::<u32>().ok()),
            field(f, 3).and_then(|v| v.parse::<u32>().ok()),
            field(f, 4).and_then(|v| v.parse::<i32>().ok()),
        );
        if let (Some(d), Some(m), Some(y)) = (day, month, year) {
            self.date = NaiveDate::from_ymd_opt(y, m, d);
        }
        if let Some(t) = self.merge_time(field(f, 1)) {
            fix.time = Some(t);
            return ReportMask::ONLINE | ReportMask::TIME;
        }
        ReportMask::ONLINE
    }

    /// hhmmss.ss plus the remembered date.
    fn merge_time(&self, hms: Option<&str>) -> Option<DateTime<Utc>> {
        let hms = hms?;
        if hms.len() < 6 {
            return None;
        }
        let time = NaiveTime::parse_from_str(hms, "%H%M%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(hms, "%H%M%S"))
            .ok()?;
        let date = self.date?;
        Some(Utc.from_utc_datetime(&date.and_time(time)))
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn field<'a>(f: &[&'a str], i: usize) -> Option<&'a str> {
    f.get(i).copied().filter(|s| !s.is_empty())
}

fn num(v: Option<&str>) -> Option<f64> {
    v.and_then(|s| s.parse::<f64>().ok())
}

/// ddmm.mmmm / dddmm.mmmm with hemisphere letters.
fn latlon(lat: Option<&str>, ns: Option<&str>, lon: Option<&str>, ew: Option<&str>) -> Option<(f64, f64)> {
    let lat = coord(lat?, 2)?;
    let lon = coord(lon?, 3)?;
    let lat = if ns? == "S" { -lat } else { lat };
    let lon = if ew? == "W" { -lon } else { lon };
    Some((lat, lon))
}

fn coord(s: &str, deg_digits: usize) -> Option<f64> {
    if s.len() < deg_digits + 2 {
        return None;
    }
    let degrees: f64 = s[..deg_digits].parse().ok()?;
    let minutes: f64 = s[deg_digits..].parse().ok()?;
    Some(degrees + minutes / 60.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
