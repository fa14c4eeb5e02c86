//! # fixups
//!
//! Derived-field computation after each parse: coordinate conversion,
//! sanity clamps, geoid and magnetic-variation fill-in, speed/track/climb
//! back-derivation, and the UERE-based error model.
//!
//! Nothing here overwrites a value the driver supplied; every fill-in
//! checks for NaN first.

use chrono::{DateTime, Utc};

use crate::report::{Dops, GpsFix};

/// WGS84 semi-major axis, meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Velocity components and speeds beyond this are receiver garbage.
const SANITY_MAX: f64 = 9999.9;

/// User-equivalent range error ladder, meters: (no-DGPS, DGPS).
const H_UERE: (f64, f64) = (15.0, 3.75);
const V_UERE: (f64, f64) = (23.0, 5.75);
const P_UERE: (f64, f64) = (19.0, 4.75);

/// Minimum time delta for rate derivation, seconds.
const MIN_RATE_DELTA: f64 = 0.01;

// ── ECEF → WGS84 ──────────────────────────────────────────────────────────────

/// Convert ECEF to geodetic lat/lon/height (Bowring's closed form) and
/// rotate ECEF velocity into NED.
pub fn ecef_to_wgs84(fix: &mut GpsFix) {
    let (x, y, z) = (fix.ecef_x, fix.ecef_y, fix.ecef_z);
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return;
    }
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let b = WGS84_A * (1.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);
    let p = (x * x + y * y).sqrt();
    let theta = (z * WGS84_A).atan2(p * b);
    let lat = (z + ep2 * b * theta.sin().powi(3)).atan2(p - e2 * WGS84_A * theta.cos().powi(3));
    let lon = y.atan2(x);
    let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    let alt = p / lat.cos() - n;

    if fix.latitude.is_nan() {
        fix.latitude = lat.to_degrees();
    }
    if fix.longitude.is_nan() {
        fix.longitude = lon.to_degrees();
    }
    if fix.alt_hae.is_nan() {
        fix.alt_hae = alt;
    }

    let (vx, vy, vz) = (fix.ecef_vx, fix.ecef_vy, fix.ecef_vz);
    if vx.is_finite() && vy.is_finite() && vz.is_finite() {
        let (sl, cl) = (lat.sin(), lat.cos());
        let (so, co) = (lon.sin(), lon.cos());
        let vn = -sl * co * vx - sl * so * vy + cl * vz;
        let ve = -so * vx + co * vy;
        let vd = -(cl * co * vx + cl * so * vy + sl * vz);
        if fix.vel_n.is_nan() {
            fix.vel_n = vn;
        }
        if fix.vel_e.is_nan() {
            fix.vel_e = ve;
        }
        if fix.vel_d.is_nan() {
            fix.vel_d = vd;
        }
    }
}

// ── Geoid and magnetic variation tables ───────────────────────────────────────

/// Coarse geoid separation grid, meters, 30° steps: rows latitude +90→−90,
/// columns longitude −180→+180. Bilinear interpolation between nodes.
#[rustfmt::skip]
const GEOID_GRID: [[i16; 13]; 7] = [
    [ 14,  14,  14,  14,  14,  14,  14,  14,  14,  14,  14,  14,  14],
    [  2,   2,   1,  -8,  -9,   5,  15,   7,  -2,   4,   8,   2,   2],
    [-12,  -8,  20,  35,  25, -12, -40, -20,  -2,  12,   2, -16, -12],
    [ 18,  -6, -25, -35, -60, -95, -60,  -5,  55,  35,  15,  22,  18],
    [ -8, -12, -20, -30, -35, -48, -30,  10,  60,  40,   0, -15,  -8],
    [-16, -25, -35, -40, -30, -20, -10,  -5,  10,   5, -15, -25, -16],
    [-30, -30, -30, -30, -30, -30, -30, -30, -30, -30, -30, -30, -30],
];

/// Coarse magnetic declination grid, degrees east, same layout.
#[rustfmt::skip]
const MAGVAR_GRID: [[i16; 13]; 7] = [
    [ 20,  40,  60,  90, 120,  60,   0, -60, -120, -90, -50, -10,  20],
    [ 10,   8,   4,  -2,  -8, -12,  -6,   0,   6,  14,  16,  12,  10],
    [  6,   4,   1,  -3,  -6,  -4,  -1,   2,   8,  12,  13,   9,   6],
    [  2,   1,  -1,  -3,  -2,   0,   1,   3,   6,  10,  12,   6,   2],
    [ -4,  -6,  -8,  -6,  -2,   0,   2,   5,  10,  14,  16,   2,  -4],
    [-12, -16, -20, -14,  -6,   0,   6,  12,  22,  30,  25,  -2, -12],
    [-30, -50, -70, -40, -10,  10,  30,  60,  90,  60,  20, -20, -30],
];

fn grid_lookup(grid: &[[i16; 13]; 7], lat: f64, lon: f64) -> f64 {
    let lat = lat.clamp(-90.0, 90.0);
    let lon = lon.clamp(-180.0, 180.0);
    // fractional row/column in grid coordinates
    let fr = (90.0 - lat) / 30.0;
    let fc = (lon + 180.0) / 30.0;
    let r0 = (fr.floor() as usize).min(5);
    let c0 = (fc.floor() as usize).min(11);
    let dr = fr - r0 as f64;
    let dc = fc - c0 as f64;
    let g = |r: usize, c: usize| f64::from(grid[r][c]);
    g(r0, c0) * (1.0 - dr) * (1.0 - dc)
        + g(r0 + 1, c0) * dr * (1.0 - dc)
        + g(r0, c0 + 1) * (1.0 - dr) * dc
        + g(r0 + 1, c0 + 1) * dr * dc
}

/// Geoid separation (geoid above ellipsoid), meters.
pub fn geoid_separation(lat: f64, lon: f64) -> f64 {
    grid_lookup(&GEOID_GRID, lat, lon)
}

/// Magnetic declination, degrees east of true north.
pub fn magnetic_variation(lat: f64, lon: f64) -> f64 {
    grid_lookup(&MAGVAR_GRID, lat, lon)
}

// ── Distance and bearing ──────────────────────────────────────────────────────

/// Great-circle distance, meters (haversine on the mean sphere).
pub fn earth_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6_371_000.8;
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * R * a.sqrt().asin()
}

/// Initial bearing from point 1 to point 2, degrees [0,360).
pub fn earth_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dl = (lon2 - lon1).to_radians();
    let y = dl.sin() * p2.cos();
    let x = p1.cos() * p2.sin() - p1.sin() * p2.cos() * dl.cos();
    normalize_track(y.atan2(x).to_degrees())
}

fn normalize_track(t: f64) -> f64 {
    let mut t = t % 360.0;
    if t < 0.0 {
        t += 360.0;
    }
    t
}

// ── The merge pass ────────────────────────────────────────────────────────────

fn clamp_insane(v: &mut f64) {
    if v.is_finite() && v.abs() > SANITY_MAX {
        *v = f64::NAN;
    }
}

/// Fill derived fields after a parse. `prev` is the previous cycle's fix
/// (for rate derivation), `dops` the current sky-view DOPs.
pub fn merge_derived(fix: &mut GpsFix, prev: &GpsFix, dops: &Dops) {
    // ECEF → geodetic and NED velocity; only fills missing fields
    ecef_to_wgs84(fix);

    clamp_insane(&mut fix.speed);
    clamp_insane(&mut fix.climb);
    clamp_insane(&mut fix.vel_n);
    clamp_insane(&mut fix.vel_e);
    clamp_insane(&mut fix.vel_d);

    if fix.has_position() {
        if fix.geoid_sep.is_nan() {
            fix.geoid_sep = geoid_separation(fix.latitude, fix.longitude);
        }
        if fix.magnetic_var.is_nan() || fix.magnetic_var.abs() < 0.01 {
            fix.magnetic_var = magnetic_variation(fix.latitude, fix.longitude);
        }
    }

    // altMSL ↔ altHAE through the separation
    if fix.geoid_sep.is_finite() {
        if fix.alt_msl.is_nan() && fix.alt_hae.is_finite() {
            fix.alt_msl = fix.alt_hae - fix.geoid_sep;
        } else if fix.alt_hae.is_nan() && fix.alt_msl.is_finite() {
            fix.alt_hae = fix.alt_msl + fix.geoid_sep;
        }
    }

    // true track ↔ magnetic track through the variation
    if fix.magnetic_var.is_finite() {
        if fix.track.is_finite() && fix.magnetic_track.is_nan() {
            fix.magnetic_track = normalize_track(fix.track - fix.magnetic_var);
        } else if fix.magnetic_track.is_finite() && fix.track.is_nan() {
            fix.track = normalize_track(fix.magnetic_track + fix.magnetic_var);
        }
    }
    if fix.track.is_finite() {
        fix.track = normalize_track(fix.track);
    }
    if fix.magnetic_track.is_finite() {
        fix.magnetic_track = normalize_track(fix.magnetic_track);
    }

    // NED velocity → speed/track/climb
    if fix.vel_n.is_finite() && fix.vel_e.is_finite() {
        if fix.speed.is_nan() {
            fix.speed = (fix.vel_n * fix.vel_n + fix.vel_e * fix.vel_e).sqrt();
        }
        if fix.track.is_nan() {
            fix.track = normalize_track(fix.vel_e.atan2(fix.vel_n).to_degrees());
        }
    }
    if fix.vel_d.is_finite() && fix.climb.is_nan() {
        fix.climb = -fix.vel_d;
    }

    // rates back-derived from the previous cycle's position
    let dt = time_delta(prev.time, fix.time);
    if let Some(dt) = dt {
        if dt > MIN_RATE_DELTA && fix.has_position() && prev.has_position() {
            if fix.speed.is_nan() {
                fix.speed = earth_distance(prev.latitude, prev.longitude, fix.latitude, fix.longitude) / dt;
            }
            if fix.track.is_nan() && fix.speed.is_finite() && fix.speed > 0.1 {
                fix.track = earth_bearing(prev.latitude, prev.longitude, fix.latitude, fix.longitude);
            }
            if fix.climb.is_nan() && fix.alt_hae.is_finite() && prev.alt_hae.is_finite() {
                fix.climb = (fix.alt_hae - prev.alt_hae) / dt;
            }
        }
    }

    error_model(fix, prev, dops, dt);
}

fn time_delta(before: Option<DateTime<Utc>>, after: Option<DateTime<Utc>>) -> Option<f64> {
    match (before, after) {
        (Some(b), Some(a)) => Some((a - b).num_milliseconds() as f64 / 1000.0),
        _ => None,
    }
}

/// UERE-based error estimates for fields the driver left empty.
fn error_model(fix: &mut GpsFix, prev: &GpsFix, dops: &Dops, dt: Option<f64>) {
    let dgps = fix.status.is_dgps();
    let pick = |uere: (f64, f64)| if dgps { uere.1 } else { uere.0 };

    if fix.epx.is_nan() && dops.xdop.is_finite() {
        fix.epx = dops.xdop * pick(H_UERE);
    }
    if fix.epy.is_nan() && dops.ydop.is_finite() {
        fix.epy = dops.ydop * pick(H_UERE);
    }
    if fix.epv.is_nan() && dops.vdop.is_finite() {
        fix.epv = dops.vdop * pick(V_UERE);
    }
    if fix.eph.is_nan() && dops.hdop.is_finite() {
        fix.eph = dops.hdop * pick(P_UERE);
    }
    if fix.sep.is_nan() && dops.pdop.is_finite() {
        fix.sep = dops.pdop * pick(P_UERE);
    }

    // speed/track/climb errors from the current and previous error
    // ellipses over the cycle interval
    if let Some(dt) = dt {
        if dt > MIN_RATE_DELTA {
            if fix.eps.is_nan() && fix.epx.is_finite() && fix.epy.is_finite() && prev.epx.is_finite() && prev.epy.is_finite() {
                let e_now = (fix.epx * fix.epx + fix.epy * fix.epy).sqrt();
                let e_prev = (prev.epx * prev.epx + prev.epy * prev.epy).sqrt();
                fix.eps = (e_now + e_prev) / dt;
            }
            if fix.epc.is_nan() && fix.epv.is_finite() && prev.epv.is_finite() {
                fix.epc = (fix.epv + prev.epv) / dt;
            }
            if fix.epd.is_nan() && fix.eps.is_finite() && fix.speed.is_finite() && fix.speed > 1.0 {
                fix.epd = (fix.eps / fix.speed).atan().to_degrees();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FixMode, FixStatus};
    use chrono::TimeZone;

    #[test]
    fn ecef_round_trips_to_geodetic() {
        // ECEF for roughly 34.07°N, 70.74°W, ~500 m
        let mut fix = GpsFix {
            ecef_x: 1_743_358.0,
            ecef_y: -4_993_290.0,
            ecef_z: 3_553_421.0,
            ..GpsFix::default()
        };
        ecef_to_wgs84(&mut fix);
        assert!(fix.latitude.is_finite() && fix.longitude.is_finite());
        assert!((fix.latitude - 34.07).abs() < 0.2);
        assert!((fix.longitude + 70.74).abs() < 0.2);
    }

    #[test]
    fn ecef_does_not_overwrite_driver_latlon() {
        let mut fix = GpsFix {
            latitude: 10.0,
            longitude: 20.0,
            ecef_x: 1_743_358.0,
            ecef_y: -4_993_290.0,
            ecef_z: 3_553_421.0,
            ..GpsFix::default()
        };
        ecef_to_wgs84(&mut fix);
        assert_eq!(fix.latitude, 10.0);
        assert_eq!(fix.longitude, 20.0);
    }

    #[test]
    fn insane_speeds_become_nan() {
        let mut fix = GpsFix {
            speed: 123_456.0,
            climb: -20_000.0,
            ..GpsFix::default()
        };
        merge_derived(&mut fix, &GpsFix::default(), &Dops::default());
        assert!(fix.speed.is_nan());
        assert!(fix.climb.is_nan());
    }

    #[test]
    fn msl_derives_from_hae_and_separation() {
        let mut fix = GpsFix {
            latitude: 34.0,
            longitude: -70.0,
            alt_hae: 100.0,
            ..GpsFix::default()
        };
        merge_derived(&mut fix, &GpsFix::default(), &Dops::default());
        assert!(fix.geoid_sep.is_finite());
        assert!((fix.alt_msl - (100.0 - fix.geoid_sep)).abs() < 1e-9);
    }

    #[test]
    fn track_normalized_and_magnetic_derived() {
        let mut fix = GpsFix {
            latitude: 45.0,
            longitude: 10.0,
            track: 725.0,
            ..GpsFix::default()
        };
        merge_derived(&mut fix, &GpsFix::default(), &Dops::default());
        assert!(fix.track >= 0.0 && fix.track < 360.0);
        assert!(fix.magnetic_track.is_finite());
    }

    #[test]
    fn speed_back_derived_from_positions() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(10);
        let prev = GpsFix {
            time: Some(t0),
            latitude: 45.0,
            longitude: 10.0,
            ..GpsFix::default()
        };
        // ~0.001° north is about 111 m
        let mut fix = GpsFix {
            time: Some(t1),
            latitude: 45.001,
            longitude: 10.0,
            mode: FixMode::Fix2d,
            ..GpsFix::default()
        };
        merge_derived(&mut fix, &prev, &Dops::default());
        assert!((fix.speed - 11.1).abs() < 0.5, "speed {}", fix.speed);
        assert!(fix.track < 5.0 || fix.track > 355.0, "track {}", fix.track);
    }

    #[test]
    fn uere_error_fillin_follows_dgps_status() {
        let dops = Dops {
            xdop: 1.0,
            ydop: 1.0,
            hdop: 1.5,
            vdop: 2.0,
            pdop: 2.5,
            tdop: 1.0,
            gdop: 2.7,
        };
        let mut plain = GpsFix {
            status: FixStatus::Gps,
            ..GpsFix::default()
        };
        merge_derived(&mut plain, &GpsFix::default(), &dops);
        assert!((plain.epx - 15.0).abs() < 1e-9);
        assert!((plain.epv - 46.0).abs() < 1e-9);
        assert!((plain.eph - 1.5 * 19.0).abs() < 1e-9);

        let mut dgps = GpsFix {
            status: FixStatus::Dgps,
            ..GpsFix::default()
        };
        merge_derived(&mut dgps, &GpsFix::default(), &dops);
        assert!((dgps.epx - 3.75).abs() < 1e-9);
        assert!((dgps.sep - 2.5 * 4.75).abs() < 1e-9);
    }

    #[test]
    fn driver_supplied_errors_kept() {
        let dops = Dops {
            xdop: 1.0,
            ..Dops::default()
        };
        let mut fix = GpsFix {
            epx: 0.5,
            ..GpsFix::default()
        };
        merge_derived(&mut fix, &GpsFix::default(), &dops);
        assert_eq!(fix.epx, 0.5);
    }

    #[test]
    fn geoid_grid_interpolates_smoothly() {
        let a = geoid_separation(10.0, 75.0);
        let b = geoid_separation(10.1, 75.0);
        assert!((a - b).abs() < 1.0);
        assert!(a > -120.0 && a < 90.0);
    }
}
