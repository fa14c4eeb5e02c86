//! # json_out
//!
//! Northbound encodings: the JSON report objects and the pseudo-NMEA
//! synthesis for `nmea`-mode watchers. Every emitted line ends `\r\n`.
//!
//! NaN-valued fields are omitted from JSON rather than serialized; a
//! subscriber only sees attributes the cycle actually produced.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use gnss_frame::checksum::nmea_checksum;

use crate::report::{FixMode, GpsFix, SkyView};

pub const PROTO_MAJOR: u32 = 3;
pub const PROTO_MINOR: u32 = 14;

fn line(value: Value) -> Vec<u8> {
    let mut out = value.to_string().into_bytes();
    out.extend_from_slice(b"\r\n");
    out
}

fn put_finite(map: &mut Map<String, Value>, key: &str, v: f64, digits: i32) {
    if v.is_finite() {
        let scale = 10f64.powi(digits);
        map.insert(key.to_string(), json!((v * scale).round() / scale));
    }
}

// ── Control objects ───────────────────────────────────────────────────────────

pub fn version() -> Vec<u8> {
    line(json!({
        "class": "VERSION",
        "release": env!("CARGO_PKG_VERSION"),
        "rev": env!("CARGO_PKG_VERSION"),
        "proto_major": PROTO_MAJOR,
        "proto_minor": PROTO_MINOR,
    }))
}

pub fn error(message: &str) -> Vec<u8> {
    line(json!({ "class": "ERROR", "message": message }))
}

pub fn watch_echo(policy: &crate::subscriber::WatchPolicy) -> Vec<u8> {
    line(json!({
        "class": "WATCH",
        "enable": policy.enable,
        "json": policy.json,
        "nmea": policy.nmea,
        "raw": policy.raw,
        "scaled": policy.scaled,
        "split24": policy.split24,
    }))
}

pub fn device(path: &str, driver: Option<&str>, activated: Option<DateTime<Utc>>) -> Vec<u8> {
    let mut map = Map::new();
    map.insert("class".into(), json!("DEVICE"));
    map.insert("path".into(), json!(path));
    if let Some(d) = driver {
        map.insert("driver".into(), json!(d));
    }
    if let Some(t) = activated {
        map.insert("activated".into(), json!(iso8601(t)));
    }
    line(Value::Object(map))
}

pub fn devices(entries: &[(String, Option<&'static str>)]) -> Vec<u8> {
    let devs: Vec<Value> = entries
        .iter()
        .map(|(path, driver)| {
            let mut m = Map::new();
            m.insert("path".into(), json!(path));
            if let Some(d) = driver {
                m.insert("driver".into(), json!(d));
            }
            Value::Object(m)
        })
        .collect();
    line(json!({ "class": "DEVICES", "devices": devs }))
}

fn iso8601(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ── TPV / SKY ─────────────────────────────────────────────────────────────────

pub fn tpv(device_path: &str, fix: &GpsFix) -> Vec<u8> {
    let mut map = Map::new();
    map.insert("class".into(), json!("TPV"));
    map.insert("device".into(), json!(device_path));
    map.insert("mode".into(), json!(fix.mode.as_int()));
    if let Some(t) = fix.time {
        map.insert("time".into(), json!(iso8601(t)));
    }
    put_finite(&mut map, "ept", fix.ept, 3);
    put_finite(&mut map, "lat", fix.latitude, 9);
    put_finite(&mut map, "lon", fix.longitude, 9);
    put_finite(&mut map, "altHAE", fix.alt_hae, 3);
    put_finite(&mut map, "altMSL", fix.alt_msl, 3);
    put_finite(&mut map, "geoidSep", fix.geoid_sep, 3);
    put_finite(&mut map, "epx", fix.epx, 3);
    put_finite(&mut map, "epy", fix.epy, 3);
    put_finite(&mut map, "epv", fix.epv, 3);
    put_finite(&mut map, "eph", fix.eph, 3);
    put_finite(&mut map, "sep", fix.sep, 3);
    put_finite(&mut map, "track", fix.track, 4);
    put_finite(&mut map, "magtrack", fix.magnetic_track, 4);
    put_finite(&mut map, "magvar", fix.magnetic_var, 1);
    put_finite(&mut map, "speed", fix.speed, 3);
    put_finite(&mut map, "climb", fix.climb, 3);
    put_finite(&mut map, "epd", fix.epd, 4);
    put_finite(&mut map, "eps", fix.eps, 3);
    put_finite(&mut map, "epc", fix.epc, 3);
    put_finite(&mut map, "ecefx", fix.ecef_x, 2);
    put_finite(&mut map, "ecefy", fix.ecef_y, 2);
    put_finite(&mut map, "ecefz", fix.ecef_z, 2);
    line(Value::Object(map))
}

pub fn sky(device_path: &str, view: &SkyView) -> Vec<u8> {
    let mut map = Map::new();
    map.insert("class".into(), json!("SKY"));
    map.insert("device".into(), json!(device_path));
    let d = &view.dops;
    put_finite(&mut map, "xdop", d.xdop, 2);
    put_finite(&mut map, "ydop", d.ydop, 2);
    put_finite(&mut map, "hdop", d.hdop, 2);
    put_finite(&mut map, "vdop", d.vdop, 2);
    put_finite(&mut map, "pdop", d.pdop, 2);
    put_finite(&mut map, "tdop", d.tdop, 2);
    put_finite(&mut map, "gdop", d.gdop, 2);
    map.insert("nSat".into(), json!(view.satellites.len()));
    map.insert("uSat".into(), json!(view.used_count()));
    let sats: Vec<Value> = view
        .satellites
        .iter()
        .map(|s| {
            let mut m = Map::new();
            m.insert("PRN".into(), json!(s.prn));
            put_finite(&mut m, "el", s.elevation, 1);
            put_finite(&mut m, "az", s.azimuth, 1);
            put_finite(&mut m, "ss", s.snr, 1);
            m.insert("used".into(), json!(s.used));
            Value::Object(m)
        })
        .collect();
    map.insert("satellites".into(), Value::Array(sats));
    line(Value::Object(map))
}

// ── Raw mode ──────────────────────────────────────────────────────────────────

/// Hex dump of a binary frame for raw-level 1 watchers.
pub fn hexdump(payload: &[u8]) -> Vec<u8> {
    let mut out = hex::encode(payload).into_bytes();
    out.extend_from_slice(b"\r\n");
    out
}

// ── Pseudo-NMEA ───────────────────────────────────────────────────────────────

fn wrap_sentence(body: String) -> Vec<u8> {
    let cs = nmea_checksum(body.as_bytes());
    format!("${body}*{cs:02X}\r\n").into_bytes()
}

fn nmea_degrees(v: f64, lat: bool) -> (String, char) {
    let hemi = if lat {
        if v < 0.0 { 'S' } else { 'N' }
    } else if v < 0.0 {
        'W'
    } else {
        'E'
    };
    let v = v.abs();
    let degrees = v.trunc();
    let minutes = (v - degrees) * 60.0;
    let width = if lat { 2 } else { 3 };
    (format!("{:0width$}{:09.6}", degrees as u32, minutes, width = width), hemi)
}

/// GPRMC from a merged fix.
pub fn synth_rmc(fix: &GpsFix) -> Option<Vec<u8>> {
    let t = fix.time?;
    if !fix.has_position() {
        return None;
    }
    let (lat, ns) = nmea_degrees(fix.latitude, true);
    let (lon, ew) = nmea_degrees(fix.longitude, false);
    let speed_kn = if fix.speed.is_finite() { fix.speed / 0.514_444 } else { 0.0 };
    let track = if fix.track.is_finite() { fix.track } else { 0.0 };
    let status = if fix.mode == FixMode::NoFix || fix.mode == FixMode::NotSeen { 'V' } else { 'A' };
    let body = format!(
        "GPRMC,{},{},{},{},{},{},{:.2},{:.2},{},,",
        t.format("%H%M%S%.2f"),
        status,
        lat,
        ns,
        lon,
        ew,
        speed_kn,
        track,
        t.format("%d%m%y"),
    );
    Some(wrap_sentence(body))
}

/// GPGGA from a merged fix.
pub fn synth_gga(fix: &GpsFix, used: usize) -> Option<Vec<u8>> {
    let t = fix.time?;
    if !fix.has_position() {
        return None;
    }
    let (lat, ns) = nmea_degrees(fix.latitude, true);
    let (lon, ew) = nmea_degrees(fix.longitude, false);
    let quality = match fix.mode {
        FixMode::NotSeen | FixMode::NoFix => 0,
        _ => {
            if fix.status.is_dgps() {
                2
            } else {
                1
            }
        }
    };
    let alt = if fix.alt_msl.is_finite() { format!("{:.3}", fix.alt_msl) } else { String::new() };
    let sep = if fix.geoid_sep.is_finite() { format!("{:.3}", fix.geoid_sep) } else { String::new() };
    let body = format!(
        "GPGGA,{},{},{},{},{},{},{:02},,{},M,{},M,,",
        t.format("%H%M%S%.2f"),
        lat,
        ns,
        lon,
        ew,
        quality,
        used,
        alt,
        sep,
    );
    Some(wrap_sentence(body))
}

/// GPGSA from the merged fix and sky view.
pub fn synth_gsa(fix: &GpsFix, view: &SkyView) -> Vec<u8> {
    let mut prns: Vec<String> = view
        .satellites
        .iter()
        .filter(|s| s.used)
        .take(12)
        .map(|s| s.prn.to_string())
        .collect();
    prns.resize(12, String::new());
    let dops = &view.dops;
    let fmt = |v: f64| if v.is_finite() { format!("{v:.1}") } else { String::new() };
    let body = format!(
        "GPGSA,A,{},{},{},{},{}",
        fix.mode.as_int(),
        prns.join(","),
        fmt(dops.pdop),
        fmt(dops.hdop),
        fmt(dops.vdop),
    );
    wrap_sentence(body)
}

/// GPGSV group from the sky view; up to 4 satellites per sentence.
pub fn synth_gsv(view: &SkyView) -> Vec<Vec<u8>> {
    let sats = &view.satellites;
    if sats.is_empty() {
        return Vec::new();
    }
    let total = (sats.len() + 3) / 4;
    sats.chunks(4)
        .enumerate()
        .map(|(i, chunk)| {
            let mut body = format!("GPGSV,{},{},{:02}", total, i + 1, sats.len());
            for s in chunk {
                let f = |v: f64| if v.is_finite() { format!("{:.0}", v) } else { String::new() };
                body.push_str(&format!(",{:02},{},{},{}", s.prn, f(s.elevation), f(s.azimuth), f(s.snr)));
            }
            wrap_sentence(body)
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
