//! Highlight handling after demosaic.
//!
//! Mode 0 clips every channel to the working ceiling. Modes >= 2 run an
//! inpainting reconstruction that rebuilds clipped channels from the
//! unclipped ones, using the per-channel observed maxima and the
//! per-channel raw clip levels (the working ceiling times the camera
//! multiplier applied before demosaic). Mode 1 is a passthrough handled
//! by the executor.

use rayon::prelude::*;

use crate::matrix::Matrix;

/// Clip each channel to 65535.
pub fn clip_highlights(scaled: &Matrix<f32>) -> Matrix<f32> {
    let mut out = Matrix::with_size(scaled.nr(), scaled.nc());
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        for (o, &v) in row.iter_mut().zip(scaled.row(r)) {
            *o = v.min(65535.0);
        }
    });
    out
}

/// Reconstruct clipped highlights.
///
/// A channel counts as clipped once it reaches 95% of its raw clip
/// level. Clipped channels are rebuilt proportionally from the surviving
/// ones; pixels with all three channels clipped go to their clip levels.
pub fn recover_highlights(scaled: &Matrix<f32>, cam_mul: [f32; 3]) -> Matrix<f32> {
    let height = scaled.nr();
    let width = scaled.nc() / 3;

    // Per-channel observed maxima.
    let mut chmax = [0.0f32; 3];
    for r in 0..height {
        for (c, &v) in scaled.row(r).iter().enumerate() {
            let ch = c % 3;
            if v > chmax[ch] {
                chmax[ch] = v;
            }
        }
    }
    let clmax = [
        65535.0 * cam_mul[0],
        65535.0 * cam_mul[1],
        65535.0 * cam_mul[2],
    ];
    let mut thresh = [0.0f32; 3];
    for ch in 0..3 {
        thresh[ch] = 0.95 * clmax[ch].min(chmax[ch].max(1.0));
    }

    let mut out = Matrix::with_size(height, width * 3);
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = scaled.row(r);
        for col in 0..width {
            let px = &src[col * 3..col * 3 + 3];
            let clipped = [
                px[0] >= thresh[0],
                px[1] >= thresh[1],
                px[2] >= thresh[2],
            ];
            let n_clipped = clipped.iter().filter(|&&c| c).count();

            let dst = &mut row[col * 3..col * 3 + 3];
            if n_clipped == 0 {
                dst.copy_from_slice(px);
            } else if n_clipped == 3 {
                dst[0] = clmax[0];
                dst[1] = clmax[1];
                dst[2] = clmax[2];
            } else {
                let mut ratio = 0.0;
                let mut count = 0.0;
                for ch in 0..3 {
                    if !clipped[ch] {
                        ratio += px[ch] / thresh[ch];
                        count += 1.0;
                    }
                }
                ratio /= count;
                for ch in 0..3 {
                    dst[ch] = if clipped[ch] {
                        px[ch].max(ratio * thresh[ch])
                    } else {
                        px[ch]
                    };
                }
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_bounds_output() {
        let mut image = Matrix::with_size(2, 6);
        image[(0, 0)] = 100_000.0;
        image[(1, 5)] = 42.0;
        let out = clip_highlights(&image);
        assert_eq!(out[(0, 0)], 65535.0);
        assert_eq!(out[(1, 5)], 42.0);
        assert!(out.as_slice().iter().all(|&v| (0.0..=65535.0).contains(&v)));
    }

    #[test]
    fn test_recovery_leaves_unclipped_pixels_alone() {
        let mut image = Matrix::with_size(1, 6);
        for c in 0..6 {
            image[(0, c)] = 1000.0 + c as f32;
        }
        // A bright pixel elsewhere establishes the channel maxima.
        image[(0, 3)] = 60000.0;
        let out = recover_highlights(&image, [1.0; 3]);
        assert_eq!(out[(0, 0)], 1000.0);
        assert_eq!(out[(0, 5)], 1005.0);
    }

    #[test]
    fn test_recovery_rebuilds_clipped_channel_proportionally() {
        let mut image = Matrix::with_size(1, 6);
        // First pixel: red clipped, green and blue at half range.
        image[(0, 0)] = 65535.0;
        image[(0, 1)] = 60000.0;
        image[(0, 2)] = 60000.0;
        // Second pixel sets maxima near full range on all channels.
        image[(0, 3)] = 65535.0;
        image[(0, 4)] = 65535.0;
        image[(0, 5)] = 65535.0;

        let out = recover_highlights(&image, [1.0; 3]);
        // The rebuilt red never drops below its recorded value and the
        // surviving channels pass through untouched.
        assert!(out[(0, 0)] >= 65535.0);
        assert_eq!(out[(0, 1)], 60000.0);
        // Fully clipped pixels land on their clip levels.
        assert_eq!(out[(0, 3)], 65535.0);
    }
}
