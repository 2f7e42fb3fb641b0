//! Demosaic dispatch.
//!
//! Reconstructs interleaved RGB from the black-subtracted sensor matrix.
//! Four paths, selected by the sidecar: monochrome replication, X-Trans
//! multi-pass interpolation, Bayer directional interpolation (optionally
//! preceded by chromatic-aberration auto-correction), and the sRAW
//! shortcut for sensors that already deliver three colors per site.
//! Output is on the 0..65535 working scale; the camera white-balance
//! multipliers are applied to the mosaic before interpolation so edge
//! gradients are judged on balanced data.

use rayon::prelude::*;

use crate::decoders::Sidecar;
use crate::matrix::Matrix;
use crate::params::DemosaicParams;

/// Demosaic the sensor image according to the sidecar's CFA layout.
pub fn demosaic_image(
    raw: &Matrix<f32>,
    sidecar: &Sidecar,
    params: &DemosaicParams,
) -> Matrix<f32> {
    let scale = 65535.0 / sidecar.max_value.max(1.0);

    if sidecar.is_sraw {
        return scale_three_color(raw, sidecar, scale);
    }
    if sidecar.is_monochrome {
        return replicate_monochrome(raw, scale);
    }
    if sidecar.max_xtrans > 0 {
        let premultiplied = premultiply_xtrans(raw, sidecar);
        return xtrans_demosaic(&premultiplied, &sidecar.xtrans, scale);
    }

    let mut premultiplied = premultiply_bayer(raw, sidecar);
    if params.ca_enabled > 0 {
        auto_ca_correct(&mut premultiplied, sidecar.cfa);
    }
    bayer_demosaic(&premultiplied, sidecar.cfa, scale)
}

/// sRAW and full-color files skip interpolation; they only need scaling
/// and, unless the format bakes them in already, the camera multipliers.
fn scale_three_color(raw: &Matrix<f32>, sidecar: &Sidecar, scale: f32) -> Matrix<f32> {
    let mut out = Matrix::with_size(raw.nr(), raw.nc());
    let cam_mul = sidecar.cam_mul;
    let apply_muls = !sidecar.is_nikon_sraw;
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = raw.row(r);
        for (c, v) in row.iter_mut().enumerate() {
            let mul = if apply_muls { cam_mul[c % 3] } else { 1.0 };
            *v = (src[c] * scale * mul).max(0.0);
        }
    });
    out
}

fn replicate_monochrome(raw: &Matrix<f32>, scale: f32) -> Matrix<f32> {
    let mut out = Matrix::with_size(raw.nr(), raw.nc() * 3);
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = raw.row(r);
        for (c, &v) in src.iter().enumerate() {
            let s = (v * scale).max(0.0);
            row[c * 3] = s;
            row[c * 3 + 1] = s;
            row[c * 3 + 2] = s;
        }
    });
    out
}

fn premultiply_bayer(raw: &Matrix<f32>, sidecar: &Sidecar) -> Matrix<f32> {
    let mut out = Matrix::with_size(raw.nr(), raw.nc());
    let cfa = sidecar.cfa;
    let cam_mul = sidecar.cam_mul;
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = raw.row(r);
        for (c, v) in row.iter_mut().enumerate() {
            let color = cfa[r & 1][c & 1] as usize;
            *v = src[c] * cam_mul[color.min(2)];
        }
    });
    out
}

fn premultiply_xtrans(raw: &Matrix<f32>, sidecar: &Sidecar) -> Matrix<f32> {
    let mut out = Matrix::with_size(raw.nr(), raw.nc());
    let xtrans = sidecar.xtrans;
    let cam_mul = sidecar.cam_mul;
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = raw.row(r);
        for (c, v) in row.iter_mut().enumerate() {
            let color = xtrans[r % 6][c % 6] as usize;
            *v = src[c] * cam_mul[color.min(2)];
        }
    });
    out
}

#[inline]
fn at(m: &Matrix<f32>, r: isize, c: isize) -> f32 {
    let r = r.clamp(0, m.nr() as isize - 1) as usize;
    let c = c.clamp(0, m.nc() as isize - 1) as usize;
    m[(r, c)]
}

/// Bayer interpolation: directional gradient-weighted green, then red and
/// blue from color differences over the 8-neighborhood.
fn bayer_demosaic(m: &Matrix<f32>, cfa: [[u32; 2]; 2], scale: f32) -> Matrix<f32> {
    let h = m.nr();
    let w = m.nc();

    let mut green = Matrix::with_size(h, w);
    green.par_rows_mut().enumerate().for_each(|(r, row)| {
        let ri = r as isize;
        for (c, g) in row.iter_mut().enumerate() {
            let ci = c as isize;
            if cfa[r & 1][c & 1] == 1 {
                *g = m[(r, c)];
                continue;
            }
            let gl = at(m, ri, ci - 1);
            let gr = at(m, ri, ci + 1);
            let gu = at(m, ri - 1, ci);
            let gd = at(m, ri + 1, ci);
            if r >= 2 && r + 2 < h && c >= 2 && c + 2 < w {
                let v = m[(r, c)];
                let cl = m[(r, c - 2)];
                let cr = m[(r, c + 2)];
                let cu = m[(r - 2, c)];
                let cd = m[(r + 2, c)];
                let grad_h = (gl - gr).abs() + (2.0 * v - cl - cr).abs();
                let grad_v = (gu - gd).abs() + (2.0 * v - cu - cd).abs();
                let est_h = 0.5 * (gl + gr) + 0.25 * (2.0 * v - cl - cr);
                let est_v = 0.5 * (gu + gd) + 0.25 * (2.0 * v - cu - cd);
                *g = if grad_h < grad_v {
                    est_h
                } else if grad_v < grad_h {
                    est_v
                } else {
                    0.5 * (est_h + est_v)
                };
            } else {
                *g = 0.25 * (gl + gr + gu + gd);
            }
        }
    });

    let mut out = Matrix::with_size(h, w * 3);
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let ri = r as isize;
        for c in 0..w {
            let ci = c as isize;
            let g = green[(r, c)];
            for &target in &[0u32, 2u32] {
                let value = if cfa[r & 1][c & 1] == target {
                    m[(r, c)]
                } else {
                    // Average the color difference against green over the
                    // neighbors that carry the target color.
                    let mut sum = 0.0;
                    let mut count = 0.0;
                    for dr in -1..=1isize {
                        for dc in -1..=1isize {
                            if dr == 0 && dc == 0 {
                                continue;
                            }
                            let nr = (r as isize + dr).rem_euclid(2) as usize;
                            let nc = (c as isize + dc).rem_euclid(2) as usize;
                            if cfa[nr & 1][nc & 1] != target {
                                continue;
                            }
                            sum += at(m, ri + dr, ci + dc) - at(&green, ri + dr, ci + dc);
                            count += 1.0;
                        }
                    }
                    if count > 0.0 {
                        g + sum / count
                    } else {
                        g
                    }
                };
                row[c * 3 + target as usize] = (value * scale).max(0.0);
            }
            row[c * 3 + 1] = (g * scale).max(0.0);
        }
    });
    out
}

/// X-Trans interpolation in three passes: weighted green, color
/// differences over a radius-2 window, then a median refinement of the
/// chroma differences.
fn xtrans_demosaic(m: &Matrix<f32>, xtrans: &[[u32; 6]; 6], scale: f32) -> Matrix<f32> {
    let h = m.nr();
    let w = m.nc();

    let mut green = Matrix::with_size(h, w);
    green.par_rows_mut().enumerate().for_each(|(r, row)| {
        let ri = r as isize;
        for (c, g) in row.iter_mut().enumerate() {
            let ci = c as isize;
            if xtrans[r % 6][c % 6] == 1 {
                *g = m[(r, c)];
                continue;
            }
            let mut sum = 0.0;
            let mut weight = 0.0;
            for dr in -1..=1isize {
                for dc in -1..=1isize {
                    if dr == 0 && dc == 0 {
                        continue;
                    }
                    let sr = (ri + dr).rem_euclid(6) as usize;
                    let sc = (ci + dc).rem_euclid(6) as usize;
                    if xtrans[sr][sc] != 1 {
                        continue;
                    }
                    let wgt = if dr == 0 || dc == 0 { 1.0 } else { 0.7071 };
                    sum += wgt * at(m, ri + dr, ci + dc);
                    weight += wgt;
                }
            }
            *g = if weight > 0.0 { sum / weight } else { m[(r, c)] };
        }
    });

    // Pass 2: red/blue from color differences over a radius-2 window.
    let mut chroma = Matrix::with_size(h, w * 2);
    chroma.par_rows_mut().enumerate().for_each(|(r, row)| {
        let ri = r as isize;
        for c in 0..w {
            let ci = c as isize;
            for (slot, target) in [0u32, 2u32].into_iter().enumerate() {
                let diff = if xtrans[r % 6][c % 6] == target {
                    m[(r, c)] - green[(r, c)]
                } else {
                    let mut sum = 0.0;
                    let mut count = 0.0;
                    for dr in -2..=2isize {
                        for dc in -2..=2isize {
                            let sr = (ri + dr).rem_euclid(6) as usize;
                            let sc = (ci + dc).rem_euclid(6) as usize;
                            if xtrans[sr][sc] != target {
                                continue;
                            }
                            sum += at(m, ri + dr, ci + dc) - at(&green, ri + dr, ci + dc);
                            count += 1.0;
                        }
                    }
                    if count > 0.0 {
                        sum / count
                    } else {
                        0.0
                    }
                };
                row[c * 2 + slot] = diff;
            }
        }
    });

    // Pass 3: median refinement of the chroma planes, then interleave.
    let mut out = Matrix::with_size(h, w * 3);
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let ri = r as isize;
        for c in 0..w {
            let ci = c as isize;
            let g = green[(r, c)];
            for (slot, target) in [0usize, 2usize].into_iter().enumerate() {
                let mut window = [0.0f32; 9];
                let mut n = 0;
                for dr in -1..=1isize {
                    for dc in -1..=1isize {
                        window[n] = at(&chroma, ri + dr, (ci + dc) * 2 + slot as isize);
                        n += 1;
                    }
                }
                window.sort_unstable_by(f32::total_cmp);
                row[c * 3 + target] = ((g + window[4]) * scale).max(0.0);
            }
            row[c * 3 + 1] = (g * scale).max(0.0);
        }
    });
    out
}

/// Chromatic-aberration auto-correction on the premultiplied mosaic.
///
/// Fits one fractional shift per run for each of the red and blue planes
/// by block-matching against an interpolated green reference, then
/// resamples the plane by that shift. The fit is re-estimated on every
/// invocation.
fn auto_ca_correct(m: &mut Matrix<f32>, cfa: [[u32; 2]; 2]) {
    for target in [0u32, 2u32] {
        correct_plane(m, cfa, target);
    }
}

fn correct_plane(m: &mut Matrix<f32>, cfa: [[u32; 2]; 2], target: u32) {
    let h = m.nr();
    let w = m.nc();

    // Locate the plane origin within the 2x2 pattern.
    let mut origin = (0usize, 0usize);
    for (r, row) in cfa.iter().enumerate() {
        for (c, &color) in row.iter().enumerate() {
            if color == target {
                origin = (r, c);
            }
        }
    }
    let ph = (h.saturating_sub(origin.0) + 1) / 2;
    let pw = (w.saturating_sub(origin.1) + 1) / 2;
    if ph < 8 || pw < 8 {
        return;
    }

    let mut plane = Matrix::with_size(ph, pw);
    let mut reference = Matrix::with_size(ph, pw);
    for i in 0..ph {
        for j in 0..pw {
            let (r, c) = (origin.0 + 2 * i, origin.1 + 2 * j);
            plane[(i, j)] = m[(r, c)];
            // Orthogonal neighbors of a red or blue site are greens.
            reference[(i, j)] = 0.25
                * (at(m, r as isize - 1, c as isize)
                    + at(m, r as isize + 1, c as isize)
                    + at(m, r as isize, c as isize - 1)
                    + at(m, r as isize, c as isize + 1));
        }
    }

    // SSD over integer site shifts, then parabolic subpixel refinement.
    let mut ssd = [[0.0f64; 3]; 3];
    for (dy, row) in ssd.iter_mut().enumerate() {
        for (dx, cell) in row.iter_mut().enumerate() {
            let (sy, sx) = (dy as isize - 1, dx as isize - 1);
            let mut total = 0.0f64;
            for i in (2..ph - 2).step_by(4) {
                for j in (2..pw - 2).step_by(4) {
                    let d = plane[((i as isize + sy) as usize, (j as isize + sx) as usize)]
                        - reference[(i, j)];
                    total += (d * d) as f64;
                }
            }
            *cell = total;
        }
    }
    let mut best = (1usize, 1usize);
    for dy in 0..3 {
        for dx in 0..3 {
            if ssd[dy][dx] < ssd[best.0][best.1] {
                best = (dy, dx);
            }
        }
    }
    let refine = |lo: f64, mid: f64, hi: f64| -> f32 {
        let denom = lo - 2.0 * mid + hi;
        if denom.abs() < f64::EPSILON {
            0.0
        } else {
            (0.5 * (lo - hi) / denom).clamp(-0.5, 0.5) as f32
        }
    };
    let fy = if best.0 == 1 {
        refine(ssd[0][best.1], ssd[1][best.1], ssd[2][best.1])
    } else {
        0.0
    };
    let fx = if best.1 == 1 {
        refine(ssd[best.0][0], ssd[best.0][1], ssd[best.0][2])
    } else {
        0.0
    };
    let shift_y = (best.0 as f32 - 1.0) + fy;
    let shift_x = (best.1 as f32 - 1.0) + fx;
    if shift_y == 0.0 && shift_x == 0.0 {
        return;
    }

    // Resample the plane by the fitted shift and write it back.
    for i in 0..ph {
        for j in 0..pw {
            let sy = i as f32 + shift_y;
            let sx = j as f32 + shift_x;
            let y0 = (sy.floor().max(0.0) as usize).min(ph - 1);
            let y1 = (sy.ceil().max(0.0) as usize).min(ph - 1);
            let x0 = (sx.floor().max(0.0) as usize).min(pw - 1);
            let x1 = (sx.ceil().max(0.0) as usize).min(pw - 1);
            let wy = sy - sy.floor();
            let wx = sx - sx.floor();
            let value = plane[(y0, x0)] * (1.0 - wy) * (1.0 - wx)
                + plane[(y1, x0)] * wy * (1.0 - wx)
                + plane[(y0, x1)] * (1.0 - wy) * wx
                + plane[(y1, x1)] * wy * wx;
            m[(origin.0 + 2 * i, origin.1 + 2 * j)] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::Sidecar;

    fn bayer_sidecar(width: usize, height: usize, max_value: f32) -> Sidecar {
        let mut s = Sidecar::neutral(width, height);
        s.max_value = max_value;
        s
    }

    #[test]
    fn test_flat_bayer_field_stays_flat() {
        let mut raw = Matrix::with_size(8, 8);
        for r in 0..8 {
            for c in 0..8 {
                raw[(r, c)] = 512.0;
            }
        }
        let sidecar = bayer_sidecar(8, 8, 1023.0);
        let out = demosaic_image(&raw, &sidecar, &DemosaicParams::default());

        assert_eq!(out.nr(), 8);
        assert_eq!(out.nc(), 24);
        let expected = 512.0 * 65535.0 / 1023.0;
        for &v in out.as_slice() {
            assert!((v - expected).abs() < 1.0, "got {v}, expected {expected}");
        }
    }

    #[test]
    fn test_bayer_scaling_reaches_full_range() {
        // Saturated green sensel must land on 65535 exactly; nothing may
        // interpolate below zero.
        let mut raw = Matrix::with_size(8, 8);
        for r in 0..8 {
            for c in 0..8 {
                raw[(r, c)] = ((r * 8 + c) as f32) * 8.0;
            }
        }
        raw[(3, 4)] = 1023.0; // green site in the {{0,1},{1,2}} pattern
        let sidecar = bayer_sidecar(8, 8, 1023.0);
        let out = demosaic_image(&raw, &sidecar, &DemosaicParams::default());

        assert!((out[(3, 4 * 3 + 1)] - 65535.0).abs() < 0.5);
        assert!(out.as_slice().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_monochrome_replicates_channels() {
        let mut raw = Matrix::with_size(2, 2);
        raw[(0, 1)] = 1023.0;
        let mut sidecar = bayer_sidecar(2, 2, 1023.0);
        sidecar.is_monochrome = true;
        let out = demosaic_image(&raw, &sidecar, &DemosaicParams::default());

        assert_eq!(out.nc(), 6);
        for ch in 0..3 {
            assert!((out[(0, 3 + ch)] - 65535.0).abs() < 0.5);
            assert_eq!(out[(0, ch)], 0.0);
        }
    }

    #[test]
    fn test_sraw_applies_camera_muls_except_nikon() {
        let mut raw = Matrix::with_size(1, 6);
        for c in 0..6 {
            raw[(0, c)] = 100.0;
        }
        let mut sidecar = bayer_sidecar(2, 1, 1000.0);
        sidecar.is_sraw = true;
        sidecar.cam_mul = [2.0, 1.0, 1.5];

        let out = demosaic_image(&raw, &sidecar, &DemosaicParams::default());
        let scale = 65535.0 / 1000.0;
        assert!((out[(0, 0)] - 100.0 * scale * 2.0).abs() < 0.01);
        assert!((out[(0, 1)] - 100.0 * scale).abs() < 0.01);

        sidecar.is_nikon_sraw = true;
        let out = demosaic_image(&raw, &sidecar, &DemosaicParams::default());
        assert!((out[(0, 0)] - 100.0 * scale).abs() < 0.01);
    }

    #[test]
    fn test_xtrans_flat_field() {
        // Standard X-Trans layout.
        let xtrans = [
            [1, 1, 0, 1, 1, 2],
            [1, 1, 2, 1, 1, 0],
            [2, 0, 1, 0, 2, 1],
            [1, 1, 2, 1, 1, 0],
            [1, 1, 0, 1, 1, 2],
            [0, 2, 1, 2, 0, 1],
        ];
        let mut raw = Matrix::with_size(12, 12);
        for r in 0..12 {
            for c in 0..12 {
                raw[(r, c)] = 300.0;
            }
        }
        let mut sidecar = bayer_sidecar(12, 12, 600.0);
        sidecar.xtrans = xtrans;
        sidecar.max_xtrans = 2;

        let out = demosaic_image(&raw, &sidecar, &DemosaicParams::default());
        let expected = 300.0 * 65535.0 / 600.0;
        for &v in out.as_slice() {
            assert!((v - expected).abs() < 1.0);
        }
    }
}
