//! JPEG reader.

use std::path::Path;

use super::{DecodeError, ImageMetadata};
use crate::matrix::Matrix;

/// Read a JPEG into an interleaved RGB matrix on the 0..65535 scale.
pub fn read_jpeg<P: AsRef<Path>>(path: P) -> Result<(Matrix<f32>, ImageMetadata), DecodeError> {
    let decoded = image::ImageReader::open(path.as_ref())?
        .decode()
        .map_err(|e| DecodeError::Decode(format!("failed to decode JPEG: {e}")))?;

    let rgb = decoded.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    let mut out = Matrix::with_size(height, width * 3);
    for (o, &v) in out.as_mut_slice().iter_mut().zip(rgb.as_raw().iter()) {
        *o = v as f32 * 257.0;
    }
    Ok((out, ImageMetadata::default()))
}
