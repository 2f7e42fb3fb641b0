//! Pipeline executor.
//!
//! Maps the current validity level to the minimum recomputation needed:
//! validity selects an entry point into the ordered stage list and the
//! executor runs from there to the end, claiming parameters at every
//! stage boundary and abandoning the run the moment the parameter
//! manager reports a restart. Intermediate artifacts live on the
//! executor so a later run can resume mid-ladder; the cache policy
//! decides whether they survive between stages.
//!
//! Every failure is in-band: a restart, a decode error or a cancelled
//! filmulation all surface as the empty matrix.


use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config;
use crate::decoders::{load_raw, read_jpeg, read_tiff, ImageMetadata, RawSource, Sidecar};
use crate::film::filmulate;
use crate::lens::{
    apply_geometry_distortion, apply_subpixel_distortion, apply_vignetting, LensDatabase, Modifier,
};
use crate::matrix::Matrix;
use crate::params::{AbortStatus, DemosaicParams, ParameterManager, Valid};
use crate::sink::PipelineSink;
use crate::stages::curves::{
    color_curves, default_tonecurve, film_like_curve, monochrome_convert, shadows_highlights,
    vibrance_saturation, whitepoint_blackpoint, Lut,
};
use crate::stages::demosaic::demosaic_image;
use crate::stages::geometry::{crop_window, downscale_and_crop, rotate_image, CropWindow};
use crate::stages::highlight::{clip_highlights, recover_highlights};
use crate::stages::white_balance::white_balance;

/// Whether intermediate artifacts survive between pipeline invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NoCache,
    Cache,
}

/// Whether histogram payloads are emitted to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramMode {
    NoHisto,
    WithHisto,
}

/// Output resolution class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Clamp to the configured low resolution after demosaic.
    Low,
    /// Clamp to the configured preview resolution after demosaic.
    Preview,
    /// Full resolution; may borrow demosaic output from a sibling.
    High,
}

/// Demosaic-stage state published by a preview pipeline so a full-quality
/// export can skip decode and demosaic entirely. Shared by reference
/// counting; the stealing pipeline never deep-copies the image at
/// transfer time.
pub struct DevelopSnapshot {
    pub input_image: Matrix<f32>,
    pub sidecar: Sidecar,
    pub metadata: ImageMetadata,
}

/// Relative completion cost per validity level, indexed by
/// [`Valid::index`]. Partial levels carry no weight; the final curve
/// stage is deliberately unweighted.
const COMPLETION_TIMES: [f32; Valid::COUNT] = [
    0.0, 0.0, 5.0, 0.0, 50.0, 0.0, 5.0, 0.0, 50.0, 0.0, 10.0, 0.0, 10.0, 0.0, 0.0,
];

/// Executable stages in ladder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Load,
    Demosaic,
    Prefilm,
    Film,
    BlackWhite,
    ColorCurve,
    FilmLikeCurve,
}

const STAGE_ORDER: [Stage; 7] = [
    Stage::Load,
    Stage::Demosaic,
    Stage::Prefilm,
    Stage::Film,
    Stage::BlackWhite,
    Stage::ColorCurve,
    Stage::FilmLikeCurve,
];

/// First stage that must rerun for a given validity level, or `None`
/// when every artifact is trusted.
fn entry_stage(valid: Valid) -> Option<usize> {
    let stage = match valid {
        Valid::None | Valid::PartLoad => Stage::Load,
        Valid::Load | Valid::PartDemosaic => Stage::Demosaic,
        Valid::Demosaic | Valid::PartPrefilmulation => Stage::Prefilm,
        Valid::Prefilmulation | Valid::PartFilmulation => Stage::Film,
        Valid::Filmulation | Valid::PartBlackWhite => Stage::BlackWhite,
        Valid::BlackWhite | Valid::PartColorCurve => Stage::ColorCurve,
        Valid::ColorCurve | Valid::PartFilmLikeCurve => Stage::FilmLikeCurve,
        Valid::FilmLikeCurve => return None,
    };
    STAGE_ORDER.iter().position(|&s| s == stage)
}

/// One resumable development pipeline instance.
///
/// Owns every intermediate artifact exclusively; the only sharing point
/// is the read-only [`DevelopSnapshot`] handed between siblings.
pub struct ImagePipeline {
    cache: CachePolicy,
    histo: HistogramMode,
    quality: Quality,
    resolution: usize,

    has_started_processing: bool,
    cache_empty: bool,
    valid: Valid,

    raw_source: Option<Arc<dyn RawSource>>,
    lens_db: Option<Arc<dyn LensDatabase>>,
    steal_source: Option<Arc<DevelopSnapshot>>,

    sidecar: Sidecar,
    metadata: ImageMetadata,

    raw_image: Matrix<f32>,
    input_image: Matrix<f32>,
    recovered_image: Matrix<f32>,
    pre_film_image: Matrix<f32>,
    filmulated_image: Matrix<f32>,
    contrast_image: Matrix<f32>,
    color_curve_image: Matrix<u16>,
    vibrance_saturation_image: Matrix<u16>,
}

impl ImagePipeline {
    pub fn new(cache: CachePolicy, histo: HistogramMode, quality: Quality) -> Self {
        let defaults = &config::pipeline_config_handle().config.defaults;
        ImagePipeline {
            cache,
            histo,
            quality,
            resolution: defaults.preview_resolution,
            has_started_processing: false,
            cache_empty: true,
            valid: Valid::None,
            raw_source: None,
            lens_db: None,
            steal_source: None,
            sidecar: Sidecar::neutral(0, 0),
            metadata: ImageMetadata::default(),
            raw_image: Matrix::new(),
            input_image: Matrix::new(),
            recovered_image: Matrix::new(),
            pre_film_image: Matrix::new(),
            filmulated_image: Matrix::new(),
            contrast_image: Matrix::new(),
            color_curve_image: Matrix::new(),
            vibrance_saturation_image: Matrix::new(),
        }
    }

    /// Change the cache policy. Ignored once processing has started.
    pub fn set_cache(&mut self, cache: CachePolicy) {
        if !self.has_started_processing {
            self.cache = cache;
        }
    }

    /// Square clamp used in preview quality.
    pub fn set_resolution(&mut self, resolution: usize) {
        self.resolution = resolution.max(1);
    }

    pub fn set_raw_source(&mut self, source: Arc<dyn RawSource>) {
        self.raw_source = Some(source);
    }

    pub fn set_lens_database(&mut self, db: Arc<dyn LensDatabase>) {
        self.lens_db = Some(db);
    }

    /// Configure a sibling's demosaic snapshot to borrow from. Only a
    /// high-quality pipeline consults it.
    pub fn set_steal_source(&mut self, snapshot: Arc<DevelopSnapshot>) {
        self.steal_source = Some(snapshot);
    }

    /// Publish this pipeline's demosaic state for a sibling to borrow.
    /// Requires a cached full-resolution input image.
    pub fn publish_snapshot(&self) -> Option<Arc<DevelopSnapshot>> {
        if self.input_image.is_empty() {
            return None;
        }
        Some(Arc::new(DevelopSnapshot {
            input_image: self.input_image.clone(),
            sidecar: self.sidecar.clone(),
            metadata: self.metadata.clone(),
        }))
    }

    /// Metadata of the currently loaded image, for embedding on export.
    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    pub fn sidecar(&self) -> &Sidecar {
        &self.sidecar
    }

    // Artifact accessors, used by diagnostics and the property tests.
    pub fn raw_image(&self) -> &Matrix<f32> {
        &self.raw_image
    }
    pub fn input_image(&self) -> &Matrix<f32> {
        &self.input_image
    }
    pub fn recovered_image(&self) -> &Matrix<f32> {
        &self.recovered_image
    }
    pub fn pre_film_image(&self) -> &Matrix<f32> {
        &self.pre_film_image
    }
    pub fn filmulated_image(&self) -> &Matrix<f32> {
        &self.filmulated_image
    }
    pub fn contrast_image(&self) -> &Matrix<f32> {
        &self.contrast_image
    }
    pub fn color_curve_image(&self) -> &Matrix<u16> {
        &self.color_curve_image
    }

    /// Run the pipeline from wherever validity allows resuming.
    ///
    /// Returns the finished 16-bit image, or the empty matrix when the
    /// run was aborted or an input could not be decoded.
    pub fn process_image(
        &mut self,
        param_manager: &ParameterManager,
        sink: &dyn PipelineSink,
    ) -> Matrix<u16> {
        // Freeze the cache policy for the lifetime of this instance.
        self.has_started_processing = true;
        let run_start = Instant::now();

        self.valid = param_manager.get_valid();
        if self.cache == CachePolicy::NoCache || self.cache_empty {
            // Nothing is retained between calls, so start fresh.
            self.valid = Valid::None;
        }
        self.update_progress(sink, 0.0);

        let entry = entry_stage(self.valid);
        if let Some(start) = entry {
            for &stage in &STAGE_ORDER[start..] {
                let stage_start = Instant::now();
                let ok = match stage {
                    Stage::Load => self.do_load(param_manager, sink),
                    Stage::Demosaic => self.do_demosaic(param_manager, sink),
                    Stage::Prefilm => self.do_prefilm(param_manager, sink),
                    Stage::Film => self.do_film(param_manager, sink),
                    Stage::BlackWhite => self.do_blackwhite(param_manager, sink),
                    Stage::ColorCurve => self.do_colorcurve(param_manager, sink),
                    Stage::FilmLikeCurve => self.do_filmlike(param_manager, sink),
                };
                if !ok {
                    debug!(?stage, "pipeline aborted");
                    return Matrix::new();
                }
                debug!(?stage, elapsed = ?stage_start.elapsed(), "stage complete");
            }
        }

        // Output: the final artifact is the one buffer that survives
        // regardless of cache policy.
        if self.cache == CachePolicy::NoCache {
            self.cache_empty = true;
        } else {
            self.cache_empty = false;
        }
        if self.histo == HistogramMode::WithHisto {
            sink.update_hist_final(&self.vibrance_saturation_image);
        }
        self.valid = param_manager.mark_filmlike_complete();
        self.update_progress(sink, 0.0);
        info!(elapsed = ?run_start.elapsed(), "pipeline run complete");
        self.vibrance_saturation_image.clone()
    }

    fn update_progress(&self, sink: &dyn PipelineSink, step_progress: f32) {
        let mut total = f32::EPSILON;
        let mut completed = 0.0;
        for (i, &weight) in COMPLETION_TIMES.iter().enumerate() {
            total += weight;
            let fraction = if i <= self.valid.index() {
                1.0
            } else if i == self.valid.index() + 1 {
                step_progress
            } else {
                0.0
            };
            completed += weight * fraction;
        }
        sink.set_progress(completed / total);
    }

    fn stealing(&self) -> bool {
        self.quality == Quality::High && self.steal_source.is_some()
    }

    // ------------------------------------------------------------------
    // Stages. Each returns false to abort the run.
    // ------------------------------------------------------------------

    fn do_load(&mut self, param_manager: &ParameterManager, sink: &dyn PipelineSink) -> bool {
        let (valid, abort, load) = param_manager.claim_load_params();
        self.valid = valid;
        if abort == AbortStatus::Restart {
            return false;
        }

        if !load.tiff_in && !load.jpeg_in && !self.stealing() {
            let Some(source) = self.raw_source.clone() else {
                warn!("no raw decoder configured for {}", load.full_filename);
                return false;
            };
            let abort_cb = || param_manager.claim_demosaic_abort() == AbortStatus::Restart;
            let capture = match source.decode(Path::new(&load.full_filename), &abort_cb) {
                Ok(capture) => capture,
                Err(e) => {
                    warn!("could not read input file {}: {e}", load.full_filename);
                    return false;
                }
            };
            if capture.floating_point {
                // Floating-point raws are not properly supported; the
                // integer path runs anyway and will not produce a
                // meaningful image.
                warn!("floating point raw is unsupported: {}", load.full_filename);
            }
            let (raw_image, sidecar, metadata) = load_raw(capture);
            self.raw_image = raw_image;
            self.sidecar = sidecar;
            self.metadata = metadata;

            if self.histo == HistogramMode::WithHisto {
                sink.update_hist_raw(&self.raw_image, self.sidecar.max_value, &self.sidecar);
            }
        }

        self.valid = param_manager.mark_load_complete();
        self.update_progress(sink, 0.0);
        true
    }

    fn do_demosaic(&mut self, param_manager: &ParameterManager, sink: &dyn PipelineSink) -> bool {
        let (valid, abort, load, demosaic) = param_manager.claim_demosaic_params();
        self.valid = valid;
        if abort == AbortStatus::Restart {
            return false;
        }

        let steal = if self.stealing() {
            self.steal_source.clone()
        } else {
            None
        };

        // Produce the full-resolution input image, or borrow the
        // sibling's along with its sidecar state.
        if let Some(snapshot) = steal.as_deref() {
            self.sidecar = snapshot.sidecar.clone();
            self.metadata = snapshot.metadata.clone();
        } else if load.tiff_in {
            match read_tiff(&load.full_filename) {
                Ok((image, metadata)) => {
                    self.sidecar = Sidecar::neutral(image.nc() / 3, image.nr());
                    self.metadata = metadata;
                    self.input_image = image;
                }
                Err(e) => {
                    warn!("could not open image {}: {e}", load.full_filename);
                    return false;
                }
            }
        } else if load.jpeg_in {
            match read_jpeg(&load.full_filename) {
                Ok((image, metadata)) => {
                    self.sidecar = Sidecar::neutral(image.nc() / 3, image.nr());
                    self.metadata = metadata;
                    self.input_image = image;
                }
                Err(e) => {
                    warn!("could not open image {}: {e}", load.full_filename);
                    return false;
                }
            }
        } else {
            self.input_image = demosaic_image(&self.raw_image, &self.sidecar, &demosaic);
            if self.cache == CachePolicy::NoCache {
                self.raw_image.set_size(0, 0);
                self.cache_empty = true;
            }
        }

        // Quality-driven downscale; in high quality the full-resolution
        // buffer is used directly.
        let scaled_image: Option<Matrix<f32>> = {
            let source: &Matrix<f32> = match steal.as_deref() {
                Some(snapshot) => &snapshot.input_image,
                None => &self.input_image,
            };
            let full_window = CropWindow {
                start_x: 0,
                start_y: 0,
                width: source.nc() / 3,
                height: source.nr(),
            };
            let defaults = &config::pipeline_config_handle().config.defaults;
            match self.quality {
                Quality::Low => Some(downscale_and_crop(
                    source,
                    full_window,
                    defaults.low_resolution,
                    defaults.low_resolution,
                )),
                Quality::Preview => Some(downscale_and_crop(
                    source,
                    full_window,
                    self.resolution,
                    self.resolution,
                )),
                Quality::High => None,
            }
        };

        // Highlight recovery on whichever buffer is the scaled image.
        self.recovered_image = match demosaic.highlights {
            0 => {
                let src = scaled_image.as_ref().unwrap_or_else(|| match steal.as_deref() {
                    Some(snapshot) => &snapshot.input_image,
                    None => &self.input_image,
                });
                clip_highlights(src)
            }
            h if h >= 2 => {
                let src = scaled_image.as_ref().unwrap_or_else(|| match steal.as_deref() {
                    Some(snapshot) => &snapshot.input_image,
                    None => &self.input_image,
                });
                recover_highlights(src, self.sidecar.cam_mul)
            }
            _ => match scaled_image {
                // The downscaled buffer moves straight in.
                Some(scaled) => scaled,
                None => match steal.as_deref() {
                    // Borrowed snapshot: the one unavoidable copy.
                    Some(snapshot) => snapshot.input_image.clone(),
                    // Full quality consumes the input wholesale unless a
                    // later resume will want it from the cache.
                    None if self.cache == CachePolicy::Cache => self.input_image.clone(),
                    None => self.input_image.take(),
                },
            },
        };

        if self.cache == CachePolicy::NoCache && !self.input_image.is_empty() {
            self.input_image.set_size(0, 0);
            self.cache_empty = true;
        }

        self.apply_lens_corrections(&demosaic);

        self.valid = param_manager.mark_demosaic_complete();
        self.update_progress(sink, 0.0);
        true
    }

    /// Look up the camera and lens, then apply the enabled corrections:
    /// vignetting in place, then the subpixel remap (TCA, combined with
    /// distortion when both are requested) or the geometric remap alone.
    /// A database miss anywhere leaves the image uncorrected.
    fn apply_lens_corrections(&mut self, demosaic: &DemosaicParams) {
        if !(demosaic.lens_ca || demosaic.lens_vignetting || demosaic.lens_distortion) {
            return;
        }
        let Some(db) = self.lens_db.clone() else {
            return;
        };
        let cameras = db.find_cameras(&demosaic.camera_name);
        let Some(camera) = cameras.first() else {
            info!("camera {:?} not in lens database", demosaic.camera_name);
            return;
        };
        if demosaic.lens_name.is_empty() {
            return;
        }
        // A leading backslash means the lens is searched across all
        // camera mounts instead of just the matched body.
        let (camera_filter, lens_name) = match demosaic.lens_name.strip_prefix('\\') {
            Some(stripped) => (None, stripped),
            None => (Some(camera), demosaic.lens_name.as_str()),
        };
        let lenses = db.find_lenses(camera_filter, lens_name);
        let Some(lens) = lenses.first() else {
            info!("lens {:?} not in lens database", lens_name);
            return;
        };

        let width = self.recovered_image.nc() / 3;
        let height = self.recovered_image.nr();
        let mut modifier = Modifier::new(camera.crop_factor, width, height);
        if demosaic.lens_ca && !self.sidecar.is_monochrome {
            modifier.enable_tca(lens, demosaic.focal_length);
        }
        if demosaic.lens_vignetting {
            modifier.enable_vignetting(lens, demosaic.focal_length, demosaic.fnumber);
        }
        if demosaic.lens_distortion {
            modifier.enable_distortion(lens, demosaic.focal_length);
            debug!(autoscale = modifier.autoscale(), "distortion autoscale");
        }

        if modifier.has_vignetting() {
            apply_vignetting(&mut self.recovered_image, &modifier);
        }
        if modifier.has_tca() {
            self.recovered_image = apply_subpixel_distortion(&self.recovered_image, &modifier);
        } else if modifier.has_distortion() {
            self.recovered_image = apply_geometry_distortion(&self.recovered_image, &modifier);
        }
    }

    fn do_prefilm(&mut self, param_manager: &ParameterManager, sink: &dyn PipelineSink) -> bool {
        let (valid, abort, prefilm) = param_manager.claim_prefilm_params();
        self.valid = valid;
        if abort == AbortStatus::Restart {
            return false;
        }

        self.pre_film_image = white_balance(&self.recovered_image, &prefilm, &self.sidecar);

        if self.cache == CachePolicy::NoCache {
            self.recovered_image.set_size(0, 0);
            self.cache_empty = true;
        } else {
            self.cache_empty = false;
        }
        if self.histo == HistogramMode::WithHisto {
            sink.update_hist_pre_film(&self.pre_film_image, 65535.0);
        }

        self.valid = param_manager.mark_prefilm_complete();
        self.update_progress(sink, 0.0);
        true
    }

    fn do_film(&mut self, param_manager: &ParameterManager, sink: &dyn PipelineSink) -> bool {
        // No claim out here: filmulate claims its own parameters and
        // polls for cancellation between development increments.
        if filmulate(
            &self.pre_film_image,
            &mut self.filmulated_image,
            param_manager,
        ) {
            return false;
        }

        if self.cache == CachePolicy::NoCache {
            self.pre_film_image.set_size(0, 0);
            self.cache_empty = true;
        } else {
            self.cache_empty = false;
        }
        if self.histo == HistogramMode::WithHisto {
            sink.update_hist_post_film(&self.filmulated_image, 0.0025);
        }

        self.valid = param_manager.mark_film_complete();
        self.update_progress(sink, 0.0);
        true
    }

    fn do_blackwhite(&mut self, param_manager: &ParameterManager, sink: &dyn PipelineSink) -> bool {
        let (valid, abort, blackwhite) = param_manager.claim_blackwhite_params();
        self.valid = valid;
        if abort == AbortStatus::Restart {
            return false;
        }

        let rotated_image = rotate_image(&self.filmulated_image, blackwhite.rotation);

        if self.cache == CachePolicy::NoCache {
            self.filmulated_image.set_size(0, 0);
            self.cache_empty = true;
        } else {
            self.cache_empty = false;
        }

        let window = crop_window(rotated_image.nc() / 3, rotated_image.nr(), &blackwhite);
        let cropped_image =
            downscale_and_crop(&rotated_image, window, window.width, window.height);
        drop(rotated_image);

        self.contrast_image = whitepoint_blackpoint(
            &cropped_image,
            blackwhite.whitepoint,
            blackwhite.blackpoint,
        );

        self.valid = param_manager.mark_blackwhite_complete();
        self.update_progress(sink, 0.0);
        true
    }

    fn do_colorcurve(&mut self, param_manager: &ParameterManager, sink: &dyn PipelineSink) -> bool {
        let (valid, abort, _colorcurve) = param_manager.claim_colorcurve_params();
        self.valid = valid;
        if abort == AbortStatus::Restart {
            return false;
        }

        // No per-channel curve controls exist yet; the LUTs stay unity.
        let lut_r = Lut::unity();
        let lut_g = Lut::unity();
        let lut_b = Lut::unity();
        self.color_curve_image = color_curves(&self.contrast_image, &lut_r, &lut_g, &lut_b);

        if self.cache == CachePolicy::NoCache {
            self.contrast_image.set_size(0, 0);
            self.cache_empty = true;
        } else {
            self.cache_empty = false;
        }

        self.valid = param_manager.mark_colorcurves_complete();
        self.update_progress(sink, 0.0);
        true
    }

    fn do_filmlike(&mut self, param_manager: &ParameterManager, sink: &dyn PipelineSink) -> bool {
        let (valid, abort, curves) = param_manager.claim_filmlike_params();
        self.valid = valid;
        if abort == AbortStatus::Restart {
            return false;
        }

        let film_like_lut = Lut::fill(|input| {
            let sh = shadows_highlights(
                input as f32 / 65535.0,
                curves.shadows_x,
                curves.shadows_y,
                curves.highlights_x,
                curves.highlights_y,
            );
            (65535.0 * default_tonecurve(sh)).round() as u16
        });
        let film_curve_image = film_like_curve(&self.color_curve_image, &film_like_lut);

        if self.cache == CachePolicy::NoCache {
            self.color_curve_image.set_size(0, 0);
            self.cache_empty = true;
        } else {
            self.cache_empty = false;
        }

        self.vibrance_saturation_image = if !curves.monochrome {
            vibrance_saturation(&film_curve_image, curves.vibrance, curves.saturation)
        } else {
            monochrome_convert(
                &film_curve_image,
                curves.bw_rmult,
                curves.bw_gmult,
                curves.bw_bmult,
            )
        };

        self.update_progress(sink, 0.0);
        true
    }
}
