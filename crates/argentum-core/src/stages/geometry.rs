//! Rotation, cropping and downscaling.

use rayon::prelude::*;

use crate::matrix::Matrix;
use crate::params::BlackWhiteParams;

/// Crop rectangle in pixels, produced by [`crop_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub start_x: usize,
    pub start_y: usize,
    pub width: usize,
    pub height: usize,
}

/// Resolve the crop parameters against an image of `im_width` by
/// `im_height` sites.
///
/// The requested height is a fraction of the image height clamped to
/// `[0, 1]`; zero or below disables the crop. The aspect ratio is
/// clamped to `[0.0001, 10000]` and the offsets to whatever keeps the
/// window inside the frame. When the leftover border is an odd number of
/// pixels the offsets are rounded half-pixel-aware so the window stays
/// integer-aligned.
pub fn crop_window(im_width: usize, im_height: usize, params: &BlackWhiteParams) -> CropWindow {
    if params.crop_height <= 0.0 {
        return CropWindow {
            start_x: 0,
            start_y: 0,
            width: im_width,
            height: im_height,
        };
    }

    let imw = im_width as f32;
    let imh = im_height as f32;
    let temp_height = imh * params.crop_height.clamp(0.0, 1.0);
    let temp_aspect = params.crop_aspect.clamp(0.0001, 10000.0);

    let width = (temp_height * temp_aspect).min(imw).round();
    let height = temp_height.min(imw / temp_aspect).round();

    let max_hoffset = (1.0 - width / imw) / 2.0;
    let max_voffset = (1.0 - height / imh) / 2.0;
    let odd_h = if ((imw - width) / 2.0).round() * 2.0 == imw - width {
        0.0
    } else {
        0.5
    };
    let odd_v = if ((imh - height) / 2.0).round() * 2.0 == imh - height {
        0.0
    } else {
        0.5
    };
    let hoffset = ((params.crop_hoffset.clamp(-max_hoffset, max_hoffset) * imw + odd_h).round()
        - odd_h)
        / imw;
    let voffset = ((params.crop_voffset.clamp(-max_voffset, max_voffset) * imh + odd_v).round()
        - odd_v)
        / imh;

    let start_x = (0.5 * (imw - width) + hoffset * imw).round().max(0.0) as usize;
    let start_y = (0.5 * (imh - height) + voffset * imh).round().max(0.0) as usize;
    let width = (width as usize).min(im_width - start_x.min(im_width));
    let height = (height as usize).min(im_height - start_y.min(im_height));

    CropWindow {
        start_x,
        start_y,
        width,
        height,
    }
}

/// Rotate an interleaved RGB image by a free angle, counterclockwise.
///
/// The output canvas is the bounding box of the rotated frame; samples
/// falling outside the source are black. A zero angle is a plain copy.
pub fn rotate_image(input: &Matrix<f32>, degrees: f32) -> Matrix<f32> {
    if degrees.abs() < 1e-6 {
        return input.clone();
    }

    let src_h = input.nr();
    let src_w = input.nc() / 3;
    let theta = degrees.to_radians();
    let (sin_t, cos_t) = theta.sin_cos();

    let fw = src_w as f32;
    let fh = src_h as f32;
    let out_w = (fw * cos_t.abs() + fh * sin_t.abs()).round().max(1.0) as usize;
    let out_h = (fw * sin_t.abs() + fh * cos_t.abs()).round().max(1.0) as usize;

    let src_cx = (fw - 1.0) / 2.0;
    let src_cy = (fh - 1.0) / 2.0;
    let dst_cx = (out_w as f32 - 1.0) / 2.0;
    let dst_cy = (out_h as f32 - 1.0) / 2.0;

    let mut out = Matrix::with_size(out_h, out_w * 3);
    out.par_rows_mut().enumerate().for_each(|(y, row)| {
        let dy = y as f32 - dst_cy;
        for x in 0..out_w {
            let dx = x as f32 - dst_cx;
            // Inverse mapping: rotate the destination coordinate back
            // into the source frame.
            let sx = cos_t * dx + sin_t * dy + src_cx;
            let sy = -sin_t * dx + cos_t * dy + src_cy;
            if sx < 0.0 || sy < 0.0 || sx > fw - 1.0 || sy > fh - 1.0 {
                continue;
            }
            let x0 = sx.floor() as usize;
            let x1 = (sx.ceil() as usize).min(src_w - 1);
            let y0 = sy.floor() as usize;
            let y1 = (sy.ceil() as usize).min(src_h - 1);
            let wx = sx - sx.floor();
            let wy = sy - sy.floor();
            for ch in 0..3 {
                row[x * 3 + ch] = input[(y0, x0 * 3 + ch)] * (1.0 - wy) * (1.0 - wx)
                    + input[(y1, x0 * 3 + ch)] * wy * (1.0 - wx)
                    + input[(y0, x1 * 3 + ch)] * (1.0 - wy) * wx
                    + input[(y1, x1 * 3 + ch)] * wy * wx;
            }
        }
    });
    out
}

/// Crop an interleaved RGB image to `window` and scale the result down
/// to fit within `target_width` by `target_height`, preserving aspect.
///
/// Scaling is area-averaged and never upscales; when the window already
/// fits, this is a plain crop.
pub fn downscale_and_crop(
    input: &Matrix<f32>,
    window: CropWindow,
    target_width: usize,
    target_height: usize,
) -> Matrix<f32> {
    let crop_w = window.width.max(1);
    let crop_h = window.height.max(1);
    let scale = (target_width as f32 / crop_w as f32)
        .min(target_height as f32 / crop_h as f32)
        .min(1.0);
    let out_w = ((crop_w as f32 * scale).round() as usize).max(1);
    let out_h = ((crop_h as f32 * scale).round() as usize).max(1);

    let mut out = Matrix::with_size(out_h, out_w * 3);
    if out_w == crop_w && out_h == crop_h {
        out.par_rows_mut().enumerate().for_each(|(y, row)| {
            let src = input.row(window.start_y + y);
            row.copy_from_slice(&src[window.start_x * 3..(window.start_x + crop_w) * 3]);
        });
        return out;
    }

    let x_ratio = crop_w as f32 / out_w as f32;
    let y_ratio = crop_h as f32 / out_h as f32;
    out.par_rows_mut().enumerate().for_each(|(y, row)| {
        let sy0 = (y as f32 * y_ratio).floor() as usize;
        let sy1 = (((y + 1) as f32 * y_ratio).ceil() as usize).min(crop_h);
        for x in 0..out_w {
            let sx0 = (x as f32 * x_ratio).floor() as usize;
            let sx1 = (((x + 1) as f32 * x_ratio).ceil() as usize).min(crop_w);
            let mut acc = [0.0f32; 3];
            let mut count: f32 = 0.0;
            for sy in sy0..sy1 {
                let src = input.row(window.start_y + sy);
                for sx in sx0..sx1 {
                    let base = (window.start_x + sx) * 3;
                    acc[0] += src[base];
                    acc[1] += src[base + 1];
                    acc[2] += src[base + 2];
                    count += 1.0;
                }
            }
            for ch in 0..3 {
                row[x * 3 + ch] = acc[ch] / count.max(1.0);
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(height: f32, aspect: f32, hoff: f32, voff: f32) -> BlackWhiteParams {
        BlackWhiteParams {
            crop_height: height,
            crop_aspect: aspect,
            crop_hoffset: hoff,
            crop_voffset: voff,
            ..BlackWhiteParams::default()
        }
    }

    #[test]
    fn test_crop_disabled_returns_full_frame() {
        let w = crop_window(100, 80, &params(0.0, 1.5, 0.3, 0.3));
        assert_eq!(
            w,
            CropWindow {
                start_x: 0,
                start_y: 0,
                width: 100,
                height: 80
            }
        );
    }

    #[test]
    fn test_crop_stays_inside_image() {
        // Sweep a handful of adversarial parameter combinations; the
        // window must always lie fully within the frame.
        for &(h, a, ho, vo) in &[
            (1.0, 1.5, 0.0, 0.0),
            (0.5, 4.0, 0.5, -0.5),
            (0.75, 0.0001, -0.9, 0.9),
            (0.333, 1.0, 0.1, -0.2),
            (1.0, 0.6667, -10.0, 10.0),
        ] {
            let w = crop_window(101, 67, &params(h, a, ho, vo));
            assert!(w.width >= 1 && w.height >= 1, "degenerate window");
            assert!(w.start_x + w.width <= 101, "x overflow: {w:?}");
            assert!(w.start_y + w.height <= 67, "y overflow: {w:?}");
        }

        // An extreme aspect ratio collapses one dimension; the window
        // must still sit inside the frame.
        let w = crop_window(101, 67, &params(0.5, 10000.0, 0.5, -0.5));
        assert!(w.start_x + w.width <= 101);
        assert!(w.start_y + w.height <= 67);
    }

    #[test]
    fn test_crop_aspect_respected() {
        let w = crop_window(300, 200, &params(0.5, 2.0, 0.0, 0.0));
        // height = 100, width = 200.
        assert_eq!(w.height, 100);
        assert_eq!(w.width, 200);
    }

    #[test]
    fn test_rotate_zero_is_copy() {
        let mut m = Matrix::with_size(3, 9);
        m[(1, 4)] = 7.0;
        let out = rotate_image(&m, 0.0);
        assert_eq!(out, m);
    }

    #[test]
    fn test_rotate_90_swaps_dimensions() {
        let m = Matrix::with_size(4, 6 * 3);
        let out = rotate_image(&m, 90.0);
        assert_eq!(out.nr(), 6);
        assert_eq!(out.nc(), 4 * 3);
    }

    #[test]
    fn test_downscale_preserves_flat_value() {
        let mut m = Matrix::with_size(10, 30);
        for v in m.as_mut_slice() {
            *v = 400.0;
        }
        let window = CropWindow {
            start_x: 0,
            start_y: 0,
            width: 10,
            height: 10,
        };
        let out = downscale_and_crop(&m, window, 4, 4);
        assert_eq!(out.nr(), 4);
        assert_eq!(out.nc(), 12);
        for &v in out.as_slice() {
            assert!((v - 400.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_plain_crop_copies_window() {
        let mut m = Matrix::with_size(4, 12);
        m[(2, 6)] = 9.0; // site (2, 2), red
        let window = CropWindow {
            start_x: 2,
            start_y: 2,
            width: 2,
            height: 2,
        };
        let out = downscale_and_crop(&m, window, 2, 2);
        assert_eq!(out.nr(), 2);
        assert_eq!(out.nc(), 6);
        assert_eq!(out[(0, 0)], 9.0);
    }
}
