//! White balance, color matrix and exposure, applied before filmulation.

use rayon::prelude::*;

use crate::decoders::Sidecar;
use crate::matrix::Matrix;
use crate::params::PrefilmParams;

/// Temperature at which the white-balance controls are neutral.
pub const NEUTRAL_TEMPERATURE: f32 = 5200.0;

/// Convert a color temperature in Kelvin to RGB correction multipliers,
/// normalized to green.
///
/// Uses Tanner Helland's polynomial approximation of the Planckian
/// locus.
pub fn kelvin_to_rgb_multipliers(kelvin: f32) -> [f32; 3] {
    let temp = (kelvin / 100.0).clamp(10.0, 400.0);

    let (r, g, b) = if temp <= 66.0 {
        let r = 255.0;
        let g = 99.470_802 * temp.ln() - 161.119_568;
        let b = if temp <= 19.0 {
            0.0
        } else {
            138.517_731 * (temp - 10.0).ln() - 305.044_792
        };
        (r, g.clamp(0.0, 255.0), b.clamp(0.0, 255.0))
    } else {
        let r = 329.698_727 * (temp - 60.0).powf(-0.133_204_76);
        let g = 288.122_17 * (temp - 60.0).powf(-0.075_514_85);
        let b = 255.0;
        (r.clamp(0.0, 255.0), g.clamp(0.0, 255.0), b)
    };

    let g_ref = (g / 255.0).max(0.001);
    [
        g_ref / (r / 255.0).max(0.001),
        1.0,
        g_ref / (b / 255.0).max(0.001),
    ]
}

/// Per-channel gains for the requested temperature and tint, relative to
/// the neutral setting, referenced against the camera's as-shot
/// multipliers (already applied before demosaic) and carrying the
/// daylight multipliers forward.
fn white_balance_gains(params: &PrefilmParams, sidecar: &Sidecar) -> [f32; 3] {
    let wb = kelvin_to_rgb_multipliers(params.temperature);
    let reference = kelvin_to_rgb_multipliers(NEUTRAL_TEMPERATURE);
    let tint = params.tint.max(0.01);

    let mut gains = [0.0f32; 3];
    for ch in 0..3 {
        gains[ch] = wb[ch] / reference[ch] * sidecar.pre_mul[ch] / sidecar.cam_mul[ch];
    }
    gains[1] /= tint;
    gains
}

/// Apply white balance, the camera color matrix and exposure
/// compensation in one pass, producing the pre-film image.
pub fn white_balance(
    input: &Matrix<f32>,
    params: &PrefilmParams,
    sidecar: &Sidecar,
) -> Matrix<f32> {
    let gains = white_balance_gains(params, sidecar);
    let exposure = 2.0f32.powf(params.exposure_comp);
    let matrix = sidecar.cam_to_rgb;

    let mut out = Matrix::with_size(input.nr(), input.nc());
    out.par_rows_mut().enumerate().for_each(|(r, row)| {
        let src = input.row(r);
        for (px, spx) in row.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
            let balanced = [
                spx[0] * gains[0],
                spx[1] * gains[1],
                spx[2] * gains[2],
            ];
            for ch in 0..3 {
                let v = matrix[ch][0] * balanced[0]
                    + matrix[ch][1] * balanced[1]
                    + matrix[ch][2] * balanced[2];
                px[ch] = (v * exposure).max(0.0);
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_image(value: f32) -> Matrix<f32> {
        let mut m = Matrix::with_size(2, 6);
        for v in m.as_mut_slice() {
            *v = value;
        }
        m
    }

    #[test]
    fn test_neutral_settings_are_identity() {
        let image = flat_image(1000.0);
        let out = white_balance(&image, &PrefilmParams::default(), &Sidecar::neutral(2, 2));
        for &v in out.as_slice() {
            assert!((v - 1000.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_exposure_compensation_scales_linearly() {
        let image = flat_image(1000.0);
        let params = PrefilmParams {
            exposure_comp: 1.0,
            ..PrefilmParams::default()
        };
        let out = white_balance(&image, &params, &Sidecar::neutral(2, 2));
        for &v in out.as_slice() {
            assert!((v - 2000.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_warm_temperature_shifts_red_up() {
        let image = flat_image(1000.0);
        let params = PrefilmParams {
            temperature: 3000.0,
            ..PrefilmParams::default()
        };
        let out = white_balance(&image, &params, &Sidecar::neutral(2, 2));
        let r = out[(0, 0)];
        let b = out[(0, 2)];
        assert!(r < b, "correcting a tungsten shot suppresses red: r={r} b={b}");
    }

    #[test]
    fn test_tint_divides_green() {
        let image = flat_image(1000.0);
        let params = PrefilmParams {
            tint: 2.0,
            ..PrefilmParams::default()
        };
        let out = white_balance(&image, &params, &Sidecar::neutral(2, 2));
        assert!((out[(0, 1)] - 500.0).abs() < 0.01);
        assert!((out[(0, 0)] - 1000.0).abs() < 0.01);
    }
}
