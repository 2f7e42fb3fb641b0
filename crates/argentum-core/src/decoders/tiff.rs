//! TIFF reader.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::ColorType;

use super::{DecodeError, ImageMetadata};
use crate::matrix::Matrix;

/// Read a TIFF into an interleaved RGB matrix on the 0..65535 scale.
pub fn read_tiff<P: AsRef<Path>>(path: P) -> Result<(Matrix<f32>, ImageMetadata), DecodeError> {
    let file = File::open(path.as_ref())?;

    // Large scans exceed the decoder's default buffer limits.
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024;
    limits.ifd_value_size = 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;

    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| DecodeError::Decode(format!("failed to create TIFF decoder: {e}")))?
        .with_limits(limits);

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| DecodeError::Decode(format!("failed to get TIFF dimensions: {e}")))?;
    let color_type = decoder
        .colortype()
        .map_err(|e| DecodeError::Decode(format!("failed to get TIFF color type: {e}")))?;
    let image_data = decoder
        .read_image()
        .map_err(|e| DecodeError::Decode(format!("failed to read TIFF image data: {e}")))?;

    let data = match image_data {
        DecodingResult::U8(buf) => interleave(&buf, width, height, color_type)?,
        DecodingResult::U16(buf) => interleave(&buf, width, height, color_type)?,
        other => {
            return Err(DecodeError::Unsupported(format!(
                "TIFF sample format {:?} not supported",
                std::mem::discriminant(&other)
            )))
        }
    };

    Ok((data, ImageMetadata::default()))
}

/// Sample types that scale onto the 16-bit working range.
trait TiffValue: Copy {
    fn to_working_scale(self) -> f32;
}

impl TiffValue for u8 {
    #[inline]
    fn to_working_scale(self) -> f32 {
        self as f32 * 257.0
    }
}

impl TiffValue for u16 {
    #[inline]
    fn to_working_scale(self) -> f32 {
        self as f32
    }
}

fn interleave<T: TiffValue>(
    buf: &[T],
    width: u32,
    height: u32,
    color_type: ColorType,
) -> Result<Matrix<f32>, DecodeError> {
    let channels: usize = match color_type {
        ColorType::Gray(_) => 1,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => {
            return Err(DecodeError::Unsupported(format!(
                "TIFF color type {other:?} not supported"
            )))
        }
    };

    let (width, height) = (width as usize, height as usize);
    let expected = width * height * channels;
    if buf.len() != expected {
        return Err(DecodeError::Decode(format!(
            "TIFF buffer size mismatch: expected {expected}, got {}",
            buf.len()
        )));
    }

    let mut image = Matrix::with_size(height, width * 3);
    let out = image.as_mut_slice();
    match channels {
        1 => {
            for (i, &v) in buf.iter().enumerate() {
                let gray = v.to_working_scale();
                out[i * 3] = gray;
                out[i * 3 + 1] = gray;
                out[i * 3 + 2] = gray;
            }
        }
        4 => {
            for (i, px) in buf.chunks_exact(4).enumerate() {
                out[i * 3] = px[0].to_working_scale();
                out[i * 3 + 1] = px[1].to_working_scale();
                out[i * 3 + 2] = px[2].to_working_scale();
            }
        }
        _ => {
            for (o, &v) in out.iter_mut().zip(buf.iter()) {
                *o = v.to_working_scale();
            }
        }
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_u16_rgb() {
        let dir = std::env::temp_dir().join("argentum-tiff-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rt.tiff");

        let data: Vec<u16> = (0..2 * 2 * 3).map(|v| (v * 1000) as u16).collect();
        let file = File::create(&path).unwrap();
        let mut encoder = tiff::encoder::TiffEncoder::new(std::io::BufWriter::new(file)).unwrap();
        encoder
            .write_image::<tiff::encoder::colortype::RGB16>(2, 2, &data)
            .unwrap();
        drop(encoder);

        let (image, _) = read_tiff(&path).unwrap();
        assert_eq!(image.nr(), 2);
        assert_eq!(image.nc(), 6);
        assert_eq!(image[(1, 5)], 11000.0);
    }
}
