//! Load stage: black subtraction and sidecar assembly.

use rayon::prelude::*;

use super::{ImageMetadata, RawCapture, SensorImage};
use crate::matrix::Matrix;

/// Calibration state produced once by the load stage and consumed by
/// reference everywhere downstream.
#[derive(Debug, Clone)]
pub struct Sidecar {
    pub cam_to_rgb: [[f32; 3]; 3],

    /// White-balance multipliers as shot, normalized so the smallest
    /// component is 1.
    pub cam_mul: [f32; 3],

    /// Daylight multipliers, normalized the same way.
    pub pre_mul: [f32; 3],

    /// Saturation level after black subtraction.
    pub max_value: f32,

    /// 2x2 Bayer pattern over {0, 1, 2}, or all 6 for full-color files.
    pub cfa: [[u32; 2]; 2],

    pub xtrans: [[u32; 6]; 6],
    pub max_xtrans: u32,

    pub is_sraw: bool,
    pub is_nikon_sraw: bool,
    pub is_monochrome: bool,

    pub raw_width: usize,
    pub raw_height: usize,
}

impl Sidecar {
    /// Neutral sidecar for inputs that arrive already demosaiced and
    /// scaled (TIFF, JPEG).
    pub fn neutral(width: usize, height: usize) -> Self {
        Sidecar {
            cam_to_rgb: IDENTITY,
            cam_mul: [1.0; 3],
            pre_mul: [1.0; 3],
            max_value: 65535.0,
            cfa: [[0, 1], [1, 2]],
            xtrans: [[0; 6]; 6],
            max_xtrans: 0,
            is_sraw: false,
            is_nikon_sraw: false,
            is_monochrome: false,
            raw_width: width,
            raw_height: height,
        }
    }
}

const IDENTITY: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Normalize multipliers so the smallest component equals 1.
fn normalize_muls(muls: [f32; 3]) -> [f32; 3] {
    let min = muls[0].min(muls[1]).min(muls[2]);
    if min <= 0.0 {
        return [1.0; 3];
    }
    [muls[0] / min, muls[1] / min, muls[2] / min]
}

/// Turn a raw capture into the black-subtracted sensor matrix plus the
/// immutable sidecar.
///
/// Black subtraction removes the global black level plus, when the
/// camera provides one, the per-position offset from the tiled black
/// frame; the largest tile offset also comes off the saturation level.
pub fn load_raw(capture: RawCapture) -> (Matrix<f32>, Sidecar, ImageMetadata) {
    let RawCapture {
        width,
        height,
        sensor,
        black,
        black_tile,
        white,
        cam_mul,
        pre_mul,
        cam_to_rgb,
        mut cfa,
        xtrans,
        is_sraw,
        is_nikon_sraw,
        floating_point: _,
        metadata,
    } = capture;

    let tile_rows = black_tile.nr();
    let tile_cols = black_tile.nc();
    let max_tile = black_tile.max();
    let max_value = white - black - max_tile;

    // The demosaic consumers expect the palette {0, 1, 2}; decoders
    // reporting the second green as 3 get it remapped to 1.
    for row in cfa.iter_mut() {
        for color in row.iter_mut() {
            if *color == 3 {
                *color = 1;
            }
        }
    }

    let mut max_xtrans = 0;
    for row in &xtrans {
        for &color in row {
            max_xtrans = max_xtrans.max(color);
        }
    }

    // Full-color converter output reports a CFA of all sixes, exactly
    // like a monochrome sensor; only the populated white-balance tag
    // tells them apart.
    let is_weird = cfa.iter().flatten().all(|&c| c == 6);
    let is_monochrome = metadata.white_balance.is_none();
    let is_sraw = is_sraw || (is_weird && !is_monochrome);

    let mut raw_image = match sensor {
        SensorImage::Mosaic(m) => m,
        SensorImage::ThreeColor(m) => m,
    };

    raw_image
        .par_rows_mut()
        .enumerate()
        .for_each(|(row, samples)| {
            let site_width = samples.len() / width.max(1);
            for (col, v) in samples.iter_mut().enumerate() {
                let site = col / site_width.max(1);
                let mut level = black;
                if tile_rows > 0 && tile_cols > 0 {
                    level += black_tile[(row % tile_rows, site % tile_cols)];
                }
                *v -= level;
            }
        });

    let sidecar = Sidecar {
        cam_to_rgb,
        cam_mul: normalize_muls(cam_mul),
        pre_mul: normalize_muls(pre_mul),
        max_value,
        cfa,
        xtrans,
        max_xtrans,
        is_sraw,
        is_nikon_sraw,
        is_monochrome,
        raw_width: width,
        raw_height: height,
    };

    (raw_image, sidecar, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::{RawCapture, SensorImage};

    fn capture_with(sensor: Matrix<f32>, cfa: [[u32; 2]; 2]) -> RawCapture {
        let (height, width) = (sensor.nr(), sensor.nc());
        RawCapture {
            width,
            height,
            sensor: SensorImage::Mosaic(sensor),
            black: 64.0,
            black_tile: Matrix::new(),
            white: 1087.0,
            cam_mul: [2.0, 1.0, 1.5],
            pre_mul: [2.2, 1.1, 1.65],
            cam_to_rgb: IDENTITY,
            cfa,
            xtrans: [[0; 6]; 6],
            is_sraw: false,
            is_nikon_sraw: false,
            floating_point: false,
            metadata: ImageMetadata {
                white_balance: Some("Auto".into()),
                ..ImageMetadata::default()
            },
        }
    }

    #[test]
    fn test_black_subtraction_and_max_value() {
        let mut sensor = Matrix::with_size(2, 2);
        sensor[(0, 0)] = 100.0;
        sensor[(1, 1)] = 1087.0;
        let (raw, sidecar, _) = load_raw(capture_with(sensor, [[0, 1], [1, 2]]));

        assert_eq!(raw[(0, 0)], 36.0);
        assert_eq!(raw[(1, 1)], 1023.0);
        assert_eq!(sidecar.max_value, 1023.0);
    }

    #[test]
    fn test_black_tile_offsets() {
        let mut sensor = Matrix::with_size(2, 4);
        for r in 0..2 {
            for c in 0..4 {
                sensor[(r, c)] = 200.0;
            }
        }
        let mut capture = capture_with(sensor, [[0, 1], [1, 2]]);
        let mut tile = Matrix::with_size(2, 2);
        tile[(0, 1)] = 8.0;
        tile[(1, 0)] = 4.0;
        capture.black_tile = tile;

        let (raw, sidecar, _) = load_raw(capture);
        // (row mod 2, col mod 2) indexes the tile.
        assert_eq!(raw[(0, 0)], 136.0);
        assert_eq!(raw[(0, 3)], 128.0);
        assert_eq!(raw[(1, 2)], 132.0);
        // The largest tile offset also reduces the saturation level.
        assert_eq!(sidecar.max_value, 1087.0 - 64.0 - 8.0);
    }

    #[test]
    fn test_multiplier_normalization() {
        let (_, sidecar, _) = load_raw(capture_with(Matrix::with_size(2, 2), [[0, 1], [1, 2]]));
        assert_eq!(sidecar.cam_mul, [2.0, 1.0, 1.5]);
        assert_eq!(sidecar.pre_mul, [2.0, 1.0, 1.5]);
        let min = sidecar.cam_mul.iter().cloned().fold(f32::MAX, f32::min);
        assert_eq!(min, 1.0);
    }

    #[test]
    fn test_cfa_second_green_remap() {
        let (_, sidecar, _) = load_raw(capture_with(Matrix::with_size(2, 2), [[0, 1], [3, 2]]));
        assert_eq!(sidecar.cfa, [[0, 1], [1, 2]]);
    }

    #[test]
    fn test_fullcolor_sentinel_needs_white_balance_tag() {
        // CFA all sixes with a populated WB tag: full-color raw.
        let mut capture = capture_with(Matrix::with_size(2, 2), [[6, 6], [6, 6]]);
        capture.width = 2;
        capture.sensor = SensorImage::ThreeColor(Matrix::with_size(2, 6));
        let (_, sidecar, _) = load_raw(capture);
        assert!(sidecar.is_sraw);
        assert!(!sidecar.is_monochrome);

        // Same CFA without the tag: monochrome sensor.
        let mut capture = capture_with(Matrix::with_size(2, 2), [[6, 6], [6, 6]]);
        capture.metadata.white_balance = None;
        let (_, sidecar, _) = load_raw(capture);
        assert!(!sidecar.is_sraw);
        assert!(sidecar.is_monochrome);
    }
}
