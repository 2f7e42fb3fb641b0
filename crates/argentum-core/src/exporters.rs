//! Output writers for developed images.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use crate::decoders::ImageMetadata;
use crate::matrix::Matrix;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("could not create output file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode output: {0}")]
    Encode(String),

    #[error("nothing to export: the pipeline returned an empty image")]
    EmptyImage,
}

/// Write a developed 16-bit interleaved RGB matrix as TIFF.
///
/// `grayscale` collapses the three (identical) channels of a monochrome
/// development into a single-channel file.
pub fn export_tiff16<P: AsRef<Path>>(
    image: &Matrix<u16>,
    _metadata: &ImageMetadata,
    path: P,
    grayscale: bool,
) -> Result<(), ExportError> {
    if image.is_empty() {
        return Err(ExportError::EmptyImage);
    }
    let width = (image.nc() / 3) as u32;
    let height = image.nr() as u32;

    let file = File::create(path.as_ref())?;
    let mut encoder = tiff::encoder::TiffEncoder::new(BufWriter::new(file))
        .map_err(|e| ExportError::Encode(format!("failed to create TIFF encoder: {e}")))?;

    if grayscale {
        let data: Vec<u16> = image
            .as_slice()
            .chunks_exact(3)
            .map(|px| px[1])
            .collect();
        encoder
            .write_image::<tiff::encoder::colortype::Gray16>(width, height, &data)
            .map_err(|e| ExportError::Encode(format!("failed to write grayscale TIFF: {e}")))?;
    } else {
        encoder
            .write_image::<tiff::encoder::colortype::RGB16>(width, height, image.as_slice())
            .map_err(|e| ExportError::Encode(format!("failed to write TIFF: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_image_is_rejected() {
        let image: Matrix<u16> = Matrix::new();
        let dir = std::env::temp_dir().join("argentum-export-test");
        std::fs::create_dir_all(&dir).unwrap();
        let result = export_tiff16(
            &image,
            &ImageMetadata::default(),
            dir.join("empty.tiff"),
            false,
        );
        assert!(matches!(result, Err(ExportError::EmptyImage)));
    }

    #[test]
    fn test_rgb_export_round_trips() {
        let mut image: Matrix<u16> = Matrix::with_size(2, 6);
        image[(0, 0)] = 1000;
        image[(1, 5)] = 64000;
        let dir = std::env::temp_dir().join("argentum-export-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rt16.tiff");
        export_tiff16(&image, &ImageMetadata::default(), &path, false).unwrap();

        let (decoded, _) = crate::decoders::read_tiff(&path).unwrap();
        assert_eq!(decoded.nr(), 2);
        assert_eq!(decoded.nc(), 6);
        assert_eq!(decoded[(0, 0)], 1000.0);
        assert_eq!(decoded[(1, 5)], 64000.0);
    }
}
