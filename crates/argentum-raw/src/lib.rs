//! Raw file decoding using rawloader.
//!
//! This crate isolates the raw-container dependency so the development
//! pipeline stays decoder-agnostic: it implements the core crate's
//! [`RawSource`] contract and nothing else.

use std::path::Path;

use tracing::debug;

use argentum_core::decoders::{
    DecodeError, ImageMetadata, RawCapture, RawSource, SensorImage,
};
use argentum_core::matrix::Matrix;

/// List of supported raw file extensions.
pub const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "nrw", "arw", "raf", "rw2", "orf", "pef", "dng", "3fr", "fff", "iiq",
    "rwl", "raw",
];

/// Check if a file extension is a supported raw format.
pub fn is_raw_extension(ext: &str) -> bool {
    RAW_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// `RawSource` backed by the rawloader crate.
///
/// rawloader decodes in one shot, so the abort callback is honored at
/// the phase boundaries around the container decode rather than inside
/// it.
pub struct RawloaderSource;

/// sRGB primaries to XYZ (D65), used to turn rawloader's camera matrix
/// into a camera-to-RGB matrix.
const XYZ_FROM_SRGB: [[f32; 3]; 3] = [
    [0.412_453, 0.357_580, 0.180_423],
    [0.212_671, 0.715_160, 0.072_169],
    [0.019_334, 0.119_193, 0.950_227],
];

impl RawSource for RawloaderSource {
    fn decode(&self, path: &Path, abort: &dyn Fn() -> bool) -> Result<RawCapture, DecodeError> {
        if abort() {
            return Err(DecodeError::Cancelled);
        }

        let raw = rawloader::decode_file(path)
            .map_err(|e| DecodeError::Decode(e.to_string()))?;

        if abort() {
            return Err(DecodeError::Cancelled);
        }

        debug!(
            width = raw.width,
            height = raw.height,
            cpp = raw.cpp,
            make = %raw.clean_make,
            model = %raw.clean_model,
            "decoded raw container"
        );

        // Active area after the sensor margins.
        let top = raw.crops[0];
        let right = raw.crops[1];
        let bottom = raw.crops[2];
        let left = raw.crops[3];
        let full_width = raw.width;
        let width = raw.width.saturating_sub(left + right);
        let height = raw.height.saturating_sub(top + bottom);
        if width == 0 || height == 0 {
            return Err(DecodeError::Decode("raw frame has no active area".into()));
        }

        let cpp = raw.cpp.max(1);
        if cpp != 1 && cpp != 3 {
            return Err(DecodeError::Unsupported(format!(
                "raw with {cpp} components per pixel"
            )));
        }
        let floating_point = matches!(raw.data, rawloader::RawImageData::Float(_));
        let mut sensor = Matrix::with_size(height, width * cpp);
        {
            let copy_row = |dst: &mut [f32], src_f: &dyn Fn(usize) -> f32, row: usize| {
                let base = (row + top) * full_width * cpp + left * cpp;
                for (c, v) in dst.iter_mut().enumerate() {
                    *v = src_f(base + c);
                }
            };
            match &raw.data {
                rawloader::RawImageData::Integer(data) => {
                    for row in 0..height {
                        copy_row(sensor.row_mut(row), &|i| data[i] as f32, row);
                    }
                }
                rawloader::RawImageData::Float(data) => {
                    for row in 0..height {
                        copy_row(sensor.row_mut(row), &|i| data[i], row);
                    }
                }
            }
        }

        let cam_mul = normalize_wb(raw.wb_coeffs);
        let is_monochrome = raw.cfa.width == 0 || !raw.wb_coeffs[0].is_finite();

        // 2x2 pattern for Bayer sensors, 6x6 for X-Trans.
        let mut cfa = [[6u32; 2]; 2];
        let mut xtrans = [[0u32; 6]; 6];
        if raw.cfa.width == 6 {
            for (i, row) in xtrans.iter_mut().enumerate() {
                for (j, color) in row.iter_mut().enumerate() {
                    *color = raw.cfa.color_at(i, j) as u32;
                }
            }
            cfa = [[1, 1], [1, 1]];
        } else if raw.cfa.width > 0 && cpp == 1 {
            for (i, row) in cfa.iter_mut().enumerate() {
                for (j, color) in row.iter_mut().enumerate() {
                    *color = raw.cfa.color_at(i, j) as u32;
                }
            }
        }

        let metadata = ImageMetadata {
            make: raw.clean_make.clone(),
            model: raw.clean_model.clone(),
            white_balance: if is_monochrome {
                None
            } else {
                Some("As Shot".into())
            },
            ..ImageMetadata::default()
        };

        Ok(RawCapture {
            width,
            height,
            sensor: if cpp == 3 {
                SensorImage::ThreeColor(sensor)
            } else {
                SensorImage::Mosaic(sensor)
            },
            black: raw.blacklevels[0] as f32,
            black_tile: Matrix::new(),
            white: raw.whitelevels[0] as f32,
            cam_mul,
            // rawloader does not expose calibration daylight
            // multipliers; the as-shot coefficients stand in.
            pre_mul: cam_mul,
            cam_to_rgb: cam_to_rgb_matrix(&raw.xyz_to_cam),
            cfa,
            xtrans,
            is_sraw: cpp == 3,
            is_nikon_sraw: false,
            floating_point,
            metadata,
        })
    }
}

/// First three white-balance coefficients with NaN and zero guards.
fn normalize_wb(coeffs: [f32; 4]) -> [f32; 3] {
    let mut out = [1.0f32; 3];
    for (o, &c) in out.iter_mut().zip(coeffs.iter()) {
        if c.is_finite() && c > 0.0 {
            *o = c;
        }
    }
    out
}

/// Camera-to-linear-sRGB matrix from the camera's XYZ matrix, with rows
/// normalized so white maps to white. Falls back to identity when the
/// matrix is singular or absent.
fn cam_to_rgb_matrix(xyz_to_cam: &[[f32; 3]; 4]) -> [[f32; 3]; 3] {
    let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    if xyz_to_cam.iter().all(|row| row.iter().all(|&v| v == 0.0)) {
        return identity;
    }

    // rgb_to_cam = xyz_to_cam * xyz_from_srgb, rows normalized to 1.
    let mut rgb_to_cam = [[0.0f32; 3]; 3];
    for i in 0..3 {
        let mut row_sum = 0.0;
        for j in 0..3 {
            let mut v = 0.0;
            for (k, xyz_row) in XYZ_FROM_SRGB.iter().enumerate() {
                v += xyz_to_cam[i][k] * xyz_row[j];
            }
            rgb_to_cam[i][j] = v;
            row_sum += v;
        }
        if row_sum.abs() > f32::EPSILON {
            for j in 0..3 {
                rgb_to_cam[i][j] /= row_sum;
            }
        }
    }

    invert3(&rgb_to_cam).unwrap_or(identity)
}

fn invert3(m: &[[f32; 3]; 3]) -> Option<[[f32; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut out = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            let a = m[(j + 1) % 3][(i + 1) % 3] * m[(j + 2) % 3][(i + 2) % 3];
            let b = m[(j + 1) % 3][(i + 2) % 3] * m[(j + 2) % 3][(i + 1) % 3];
            out[i][j] = (a - b) * inv_det;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_extension_detection() {
        assert!(is_raw_extension("ARW"));
        assert!(is_raw_extension("raf"));
        assert!(!is_raw_extension("jpg"));
    }

    #[test]
    fn test_normalize_wb_guards() {
        assert_eq!(normalize_wb([f32::NAN, 1.0, 0.0, 0.0]), [1.0, 1.0, 1.0]);
        assert_eq!(normalize_wb([2.0, 1.0, 1.5, 0.0]), [2.0, 1.0, 1.5]);
    }

    #[test]
    fn test_identity_inversion() {
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(invert3(&identity), Some(identity));
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let singular = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [1.0, 1.0, 1.0]];
        assert_eq!(invert3(&singular), None);
    }

    #[test]
    fn test_zero_camera_matrix_falls_back_to_identity() {
        let out = cam_to_rgb_matrix(&[[0.0; 3]; 4]);
        assert_eq!(out[0], [1.0, 0.0, 0.0]);
        assert_eq!(out[1], [0.0, 1.0, 0.0]);
    }
}
