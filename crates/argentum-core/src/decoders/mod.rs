//! Input providers: raw captures, TIFF and JPEG readers.
//!
//! Raw container parsing itself is delegated to a [`RawSource`]
//! implementation; this module defines the contract and the data it must
//! fill in, plus concrete readers for already-demosaiced TIFF and JPEG
//! inputs. All readers produce interleaved samples on the pipeline's
//! 0..65535 working scale.

mod jpeg;
mod load;
mod tiff;

pub use jpeg::read_jpeg;
pub use load::{load_raw, Sidecar};
pub use tiff::read_tiff;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matrix::Matrix;

/// Reasons an input provider can fail.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not open input file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode input: {0}")]
    Decode(String),

    #[error("unsupported input format: {0}")]
    Unsupported(String),

    #[error("decode cancelled by parameter change")]
    Cancelled,
}

/// Image metadata carried through development and embedded on export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    pub make: String,
    pub model: String,
    pub lens_model: String,
    pub iso: Option<u32>,
    pub exposure_time: Option<f32>,
    pub fnumber: Option<f32>,
    pub focal_length: Option<f32>,

    /// The white-balance tag as written by the camera. Its absence marks
    /// a monochrome capture; full-color converter output (CFA all 6)
    /// keeps the tag populated.
    pub white_balance: Option<String>,
}

/// Sensor data as delivered by a raw decoder, before black subtraction.
#[derive(Debug, Clone)]
pub enum SensorImage {
    /// One sensel per site, CFA-mosaiced, rows of width `W`.
    Mosaic(Matrix<f32>),

    /// Full RGB per site (sRAW and full-color converter files), rows of
    /// width `3 * W`.
    ThreeColor(Matrix<f32>),
}

/// Everything a raw decoder hands the load stage: the sensor matrix plus
/// the calibration sidecar values needed to develop it.
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub width: usize,
    pub height: usize,
    pub sensor: SensorImage,

    /// Global black level in sensor units.
    pub black: f32,

    /// Per-position black offsets, tiled over the frame. May be empty.
    pub black_tile: Matrix<f32>,

    /// White saturation level in sensor units.
    pub white: f32,

    /// Camera white-balance multipliers, as shot.
    pub cam_mul: [f32; 3],

    /// Daylight multipliers from calibration.
    pub pre_mul: [f32; 3],

    /// Camera-space to linear RGB matrix.
    pub cam_to_rgb: [[f32; 3]; 3],

    /// 2x2 Bayer pattern; decoders may report green pairs as {1, 3}.
    pub cfa: [[u32; 2]; 2],

    /// 6x6 X-Trans pattern, all zero for Bayer sensors.
    pub xtrans: [[u32; 6]; 6],

    pub is_sraw: bool,
    pub is_nikon_sraw: bool,

    /// Set for floating-point raws, which the pipeline does not properly
    /// support; the integer path runs regardless.
    pub floating_point: bool,

    pub metadata: ImageMetadata,
}

/// Abstract raw decoder.
///
/// The abort callback is polled from the decoder's progress path and
/// returns `true` when decoding should stop; the implementation then
/// returns [`DecodeError::Cancelled`].
pub trait RawSource: Send + Sync {
    fn decode(&self, path: &Path, abort: &dyn Fn() -> bool) -> Result<RawCapture, DecodeError>;
}
