//! Progress and histogram sink.
//!
//! The pipeline reports progress fractions and intermediate histograms
//! through this trait; the GUI-side receiver lives outside this crate.
//! Histogram callbacks are only invoked when the pipeline runs with
//! [`HistogramMode::WithHisto`](crate::pipeline::HistogramMode).

use crate::decoders::Sidecar;
use crate::matrix::Matrix;

/// Receiver for pipeline events. Implementations must tolerate being
/// called from the pipeline's thread.
pub trait PipelineSink {
    /// Overall completion in `[0, 1]`, weighted by per-stage cost.
    fn set_progress(&self, _fraction: f32) {}

    /// Histogram payload for the black-subtracted sensor image.
    fn update_hist_raw(&self, _image: &Matrix<f32>, _max_value: f32, _sidecar: &Sidecar) {}

    /// Histogram payload after white balance and exposure.
    fn update_hist_pre_film(&self, _image: &Matrix<f32>, _maximum: f32) {}

    /// Histogram payload after film simulation; `scale` maps simulation
    /// output onto display range.
    fn update_hist_post_film(&self, _image: &Matrix<f32>, _scale: f32) {}

    /// Histogram payload for the finished 16-bit output.
    fn update_hist_final(&self, _image: &Matrix<u16>) {}
}

/// Sink that discards every event.
pub struct NullSink;

impl PipelineSink for NullSink {}
