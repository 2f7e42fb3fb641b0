//! Tonal curves and the final color operators.
//!
//! Everything from the white/black point remap to the 16-bit output:
//! per-channel LUTs, the shadows/highlights film-like curve, vibrance
//! and saturation, and the monochrome conversion.

use rayon::prelude::*;

use crate::matrix::Matrix;

/// 65536-entry lookup table over the 16-bit working range.
#[derive(Clone)]
pub struct Lut {
    table: Vec<u16>,
}

impl Lut {
    /// The identity table.
    pub fn unity() -> Self {
        Lut {
            table: (0..=u16::MAX).collect(),
        }
    }

    /// Build a table by evaluating `f` at every input value.
    pub fn fill(f: impl Fn(u16) -> u16) -> Self {
        Lut {
            table: (0..=u16::MAX).map(f).collect(),
        }
    }

    #[inline]
    pub fn apply(&self, v: u16) -> u16 {
        self.table[v as usize]
    }
}

/// Linear remap taking `blackpoint` to 0 and `whitepoint` to 65535,
/// clamped. Both are fractions of the working range.
pub fn whitepoint_blackpoint(input: &Matrix<f32>, whitepoint: f32, blackpoint: f32) -> Matrix<f32> {
    let black = blackpoint * 65535.0;
    let range = ((whitepoint - blackpoint) * 65535.0).max(1.0);
    let gain = 65535.0 / range;

    let mut out = Matrix::with_size(input.nr(), input.nc());
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        for (o, &v) in row.iter_mut().zip(input.row(r)) {
            *o = ((v - black) * gain).clamp(0.0, 65535.0);
        }
    });
    out
}

/// Apply the per-channel color LUTs, producing the first 16-bit
/// artifact.
pub fn color_curves(input: &Matrix<f32>, lut_r: &Lut, lut_g: &Lut, lut_b: &Lut) -> Matrix<u16> {
    let mut out = Matrix::with_size(input.nr(), input.nc());
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = input.row(r);
        for (c, o) in row.iter_mut().enumerate() {
            let v = src[c].clamp(0.0, 65535.0).round() as u16;
            *o = match c % 3 {
                0 => lut_r.apply(v),
                1 => lut_g.apply(v),
                _ => lut_b.apply(v),
            };
        }
    });
    out
}

/// Shadows/highlights curve through (0,0), (sx,sy), (hx,hy), (1,1).
///
/// Monotone piecewise-cubic hermite; collinear control points give an
/// exact identity, so neutral settings pass samples through unchanged.
pub fn shadows_highlights(x: f32, sx: f32, sy: f32, hx: f32, hy: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);
    let sx = sx.clamp(0.001, 0.998);
    let hx = hx.clamp(sx + 0.001, 0.999);
    let sy = sy.clamp(0.0, 1.0);
    let hy = hy.clamp(0.0, 1.0);

    let xs = [0.0, sx, hx, 1.0];
    let ys = [0.0, sy, hy, 1.0];

    // Secant slopes and averaged knot slopes.
    let s = [
        (ys[1] - ys[0]) / (xs[1] - xs[0]),
        (ys[2] - ys[1]) / (xs[2] - xs[1]),
        (ys[3] - ys[2]) / (xs[3] - xs[2]),
    ];
    let m = [
        s[0],
        0.5 * (s[0] + s[1]),
        0.5 * (s[1] + s[2]),
        s[2],
    ];

    let seg = if x < xs[1] {
        0
    } else if x < xs[2] {
        1
    } else {
        2
    };
    let dx = xs[seg + 1] - xs[seg];
    let t = (x - xs[seg]) / dx;
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    let y = h00 * ys[seg] + h10 * dx * m[seg] + h01 * ys[seg + 1] + h11 * dx * m[seg + 1];
    y.clamp(0.0, 1.0)
}

/// Toe and shoulder extents of the fixed output curve.
const TONECURVE_TOE: f32 = 0.2;
const TONECURVE_SHOULDER: f32 = 0.8;

/// Fixed film-like output curve composed after the shadows/highlights
/// control points.
///
/// Three regions: a gamma toe that lifts deep shadows, a linear midtone
/// segment, and a soft-clip shoulder whose slope falls to zero at white.
/// Continuous in value at both region boundaries; pins 0 to 0 and 1
/// to 1.
pub fn default_tonecurve(x: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);

    if x < TONECURVE_TOE {
        let gamma = 1.0 / 1.45;
        TONECURVE_TOE * (x / TONECURVE_TOE).powf(gamma)
    } else if x > TONECURVE_SHOULDER {
        let gamma = 2.4;
        let range = 1.0 - TONECURVE_SHOULDER;
        let t = (x - TONECURVE_SHOULDER) / range;
        TONECURVE_SHOULDER + range * (1.0 - (1.0 - t).powf(gamma))
    } else {
        x
    }
}

/// Apply one LUT to every channel.
pub fn film_like_curve(input: &Matrix<u16>, lut: &Lut) -> Matrix<u16> {
    let mut out = Matrix::with_size(input.nr(), input.nc());
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        for (o, &v) in row.iter_mut().zip(input.row(r)) {
            *o = lut.apply(v);
        }
    });
    out
}

/// Vibrance and saturation.
///
/// Saturation scales chroma uniformly; vibrance weights the boost toward
/// pixels that are not already saturated. Zero for both is the identity.
pub fn vibrance_saturation(input: &Matrix<u16>, vibrance: f32, saturation: f32) -> Matrix<u16> {
    let mut out = Matrix::with_size(input.nr(), input.nc());
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = input.row(r);
        for (px, spx) in row.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
            let rv = spx[0] as f32;
            let gv = spx[1] as f32;
            let bv = spx[2] as f32;
            let max = rv.max(gv).max(bv);
            let min = rv.min(gv).min(bv);
            let sat = if max > 0.0 { (max - min) / max } else { 0.0 };
            let amount = saturation + vibrance * (1.0 - sat);
            let luma = 0.2126 * rv + 0.7152 * gv + 0.0722 * bv;
            for (o, v) in px.iter_mut().zip([rv, gv, bv]) {
                *o = (luma + (v - luma) * (1.0 + amount)).clamp(0.0, 65535.0) as u16;
            }
        }
    });
    out
}

/// Grayscale conversion with user-weighted channel mixing.
pub fn monochrome_convert(input: &Matrix<u16>, rmult: f32, gmult: f32, bmult: f32) -> Matrix<u16> {
    let mut out = Matrix::with_size(input.nr(), input.nc());
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = input.row(r);
        for (px, spx) in row.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
            let gray = (spx[0] as f32 * rmult + spx[1] as f32 * gmult + spx[2] as f32 * bmult)
                .clamp(0.0, 65535.0) as u16;
            px[0] = gray;
            px[1] = gray;
            px[2] = gray;
        }
    });
    out
}
