//! # dop
//!
//! Dilution-of-precision from satellite geometry.
//!
//! Builds the 4×N line-of-sight matrix from the satellites used in the
//! solution, forms AᵀA, inverts it, and reads the DOPs off the diagonal.
//! Fewer than four usable satellites, or a singular geometry, leaves every
//! DOP as NaN. Driver-supplied DOPs are never overwritten; the caller only
//! asks for this fill-in when a field is missing.

use crate::report::{Dops, SatelliteView};

/// Gauss-Jordan inverse of a 4×4 with partial pivoting. None when the
/// matrix is singular (pivot below 1e-12).
fn invert4(m: [[f64; 4]; 4]) -> Option<[[f64; 4]; 4]> {
    let mut a = m;
    let mut inv = [[0.0f64; 4]; 4];
    for (i, row) in inv.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    for col in 0..4 {
        let mut pivot = col;
        for row in col + 1..4 {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);
        let d = a[col][col];
        for k in 0..4 {
            a[col][k] /= d;
            inv[col][k] /= d;
        }
        for row in 0..4 {
            if row != col {
                let f = a[row][col];
                for k in 0..4 {
                    a[row][k] -= f * a[col][k];
                    inv[row][k] -= f * inv[col][k];
                }
            }
        }
    }
    Some(inv)
}

/// Compute DOPs from the used satellites' azimuth/elevation geometry.
pub fn fill_dops(satellites: &[SatelliteView]) -> Dops {
    let used: Vec<&SatelliteView> = satellites
        .iter()
        .filter(|s| s.used && s.azimuth.is_finite() && s.elevation.is_finite())
        .collect();
    if used.len() < 4 {
        return Dops::default();
    }

    let mut ata = [[0.0f64; 4]; 4];
    for sat in &used {
        let az = sat.azimuth.to_radians();
        let el = sat.elevation.to_radians();
        let row = [el.cos() * az.sin(), el.cos() * az.cos(), el.sin(), 1.0];
        for i in 0..4 {
            for j in 0..4 {
                ata[i][j] += row[i] * row[j];
            }
        }
    }

    let inv = match invert4(ata) {
        Some(inv) => inv,
        None => return Dops::default(),
    };

    let (xx, yy, zz, tt) = (inv[0][0], inv[1][1], inv[2][2], inv[3][3]);
    if xx < 0.0 || yy < 0.0 || zz < 0.0 || tt < 0.0 {
        return Dops::default();
    }
    Dops {
        xdop: xx.sqrt(),
        ydop: yy.sqrt(),
        hdop: (xx + yy).sqrt(),
        vdop: zz.sqrt(),
        pdop: (xx + yy + zz).sqrt(),
        tdop: tt.sqrt(),
        gdop: (xx + yy + zz + tt).sqrt(),
    }
}
