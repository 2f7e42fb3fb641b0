//! Per-stage parameter snapshots.
//!
//! One struct per pipeline stage. The executor never reads these directly
//! from storage; it claims an atomic snapshot through the
//! [`ParameterManager`](super::ParameterManager) at each stage boundary.

use serde::{Deserialize, Serialize};

/// Input selection for the load stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadParams {
    /// Path of the image to develop.
    pub full_filename: String,

    /// Treat the input as TIFF rather than raw.
    pub tiff_in: bool,

    /// Treat the input as JPEG rather than raw.
    pub jpeg_in: bool,
}

impl Default for LoadParams {
    fn default() -> Self {
        LoadParams {
            full_filename: String::new(),
            tiff_in: false,
            jpeg_in: false,
        }
    }
}

/// Demosaic-stage parameters: CA correction, highlight recovery mode and
/// the lens-correction lookup keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemosaicParams {
    /// Number of chromatic-aberration auto-correct passes (0 disables).
    pub ca_enabled: u32,

    /// Highlight recovery mode: 0 = clip, 1 = unclipped passthrough,
    /// >= 2 = inpaint reconstruction.
    pub highlights: u32,

    /// Camera body name for the lens-database lookup.
    pub camera_name: String,

    /// Lens name for the lens-database lookup. A leading backslash means
    /// "search all cameras", not just the matched body.
    pub lens_name: String,

    /// Focal length the photo was taken at, in mm.
    pub focal_length: f32,

    /// Aperture the photo was taken at.
    pub fnumber: f32,

    /// Enable transverse chromatic-aberration correction.
    pub lens_ca: bool,

    /// Enable vignetting correction.
    pub lens_vignetting: bool,

    /// Enable geometric distortion correction (with autoscale).
    pub lens_distortion: bool,
}

impl Default for DemosaicParams {
    fn default() -> Self {
        DemosaicParams {
            ca_enabled: 0,
            highlights: 0,
            camera_name: String::new(),
            lens_name: String::new(),
            focal_length: 50.0,
            fnumber: 5.6,
            lens_ca: false,
            lens_vignetting: false,
            lens_distortion: false,
        }
    }
}

/// White balance and exposure applied before film simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefilmParams {
    /// Color temperature in Kelvin.
    pub temperature: f32,

    /// Green-magenta tint multiplier (1.0 = neutral).
    pub tint: f32,

    /// Exposure compensation in stops.
    pub exposure_comp: f32,
}

impl Default for PrefilmParams {
    fn default() -> Self {
        PrefilmParams {
            temperature: 5200.0,
            tint: 1.0,
            exposure_comp: 0.0,
        }
    }
}

/// Film simulation parameters, consumed only by the filmulation operator.
///
/// The developer model treats the frame as a sheet of film of
/// `film_area` square millimeters developed in `development_steps`
/// increments; developer migrates laterally between steps and is
/// replenished from a reservoir. A `simulation_strength` of zero renders
/// the stage a passthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilmParams {
    /// Number of development increments. 0 skips development entirely.
    pub development_steps: u32,

    /// Simulated film area in mm^2 (135 full frame = 864).
    pub film_area: f32,

    /// Fraction of developer that migrates to neighboring sites between
    /// steps.
    pub layer_mix: f32,

    /// Fraction of consumed developer replenished from the reservoir
    /// between steps.
    pub reservoir_replenishment: f32,

    /// Sensor level above which highlight response rolls off.
    pub rolloff_boundary: f32,

    /// Overall strength of the tone-mapping effect, 0 to 1.
    pub simulation_strength: f32,
}

impl Default for FilmParams {
    fn default() -> Self {
        FilmParams {
            development_steps: 12,
            film_area: 864.0,
            layer_mix: 0.2,
            reservoir_replenishment: 0.5,
            rolloff_boundary: 51275.0,
            simulation_strength: 1.0,
        }
    }
}

/// Rotation, crop and linear white/black point remapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackWhiteParams {
    /// Free rotation angle in degrees, counterclockwise.
    pub rotation: f32,

    /// Crop height as a fraction of the rotated image height, 0..=1.
    /// Zero or below disables cropping.
    pub crop_height: f32,

    /// Crop aspect ratio (width over height).
    pub crop_aspect: f32,

    /// Horizontal crop offset as a fraction of image width.
    pub crop_hoffset: f32,

    /// Vertical crop offset as a fraction of image height.
    pub crop_voffset: f32,

    /// Sample value remapped to full white, relative to 1.0 = 65535.
    pub whitepoint: f32,

    /// Sample value remapped to black.
    pub blackpoint: f32,
}

impl Default for BlackWhiteParams {
    fn default() -> Self {
        BlackWhiteParams {
            rotation: 0.0,
            crop_height: 0.0,
            crop_aspect: 1.5,
            crop_hoffset: 0.0,
            crop_voffset: 0.0,
            whitepoint: 1.0,
            blackpoint: 0.0,
        }
    }
}

/// Reserved: the color-curve stage currently applies identity LUTs only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorCurveParams {}

/// Final tonal shaping: shadows/highlights curve, vibrance/saturation,
/// and the monochrome conversion weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilmlikeCurvesParams {
    /// Shadow control point input, 0..=1.
    pub shadows_x: f32,

    /// Shadow control point output, 0..=1.
    pub shadows_y: f32,

    /// Highlight control point input, 0..=1.
    pub highlights_x: f32,

    /// Highlight control point output, 0..=1.
    pub highlights_y: f32,

    /// Saturation boost weighted toward low-saturation pixels, -1..=1.
    pub vibrance: f32,

    /// Uniform saturation adjustment, -1..=1.
    pub saturation: f32,

    /// Convert the output to grayscale using the bw multipliers.
    pub monochrome: bool,

    pub bw_rmult: f32,
    pub bw_gmult: f32,
    pub bw_bmult: f32,
}

impl Default for FilmlikeCurvesParams {
    fn default() -> Self {
        FilmlikeCurvesParams {
            shadows_x: 0.25,
            shadows_y: 0.25,
            highlights_x: 0.75,
            highlights_y: 0.75,
            vibrance: 0.0,
            saturation: 0.0,
            monochrome: false,
            bw_rmult: 0.21,
            bw_gmult: 0.72,
            bw_bmult: 0.07,
        }
    }
}
