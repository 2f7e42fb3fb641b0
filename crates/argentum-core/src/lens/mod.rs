//! Lens and camera corrections.
//!
//! The database is an abstract lookup service: callers resolve a camera
//! record (for its crop factor) and a lens record (for its correction
//! coefficients), then build a [`Modifier`] that exposes the three
//! corrections the pipeline applies after highlight recovery:
//! vignetting, transverse chromatic aberration and geometric distortion.
//! A miss anywhere in the lookup chain simply means no correction.

use rayon::prelude::*;

use crate::matrix::Matrix;

/// Camera body record.
#[derive(Debug, Clone)]
pub struct CameraRecord {
    pub name: String,
    pub crop_factor: f32,
}

/// Lens record with correction coefficients, measured at `focal_ref` mm
/// and wide open at `fnumber_wide`.
#[derive(Debug, Clone)]
pub struct LensRecord {
    pub name: String,

    /// Radial distortion coefficient; negative for barrel distortion.
    pub distortion_a: f32,

    /// Radial scale of the red plane relative to green.
    pub tca_red: f32,

    /// Radial scale of the blue plane relative to green.
    pub tca_blue: f32,

    /// Vignetting falloff polynomial coefficients.
    pub vignetting_k1: f32,
    pub vignetting_k2: f32,

    pub focal_ref: f32,
    pub fnumber_wide: f32,
}

/// Abstract lens/camera database.
pub trait LensDatabase: Send + Sync {
    fn find_cameras(&self, name: &str) -> Vec<CameraRecord>;

    /// Look up lenses by name, optionally restricted to one camera's
    /// mount.
    fn find_lenses(&self, camera: Option<&CameraRecord>, name: &str) -> Vec<LensRecord>;
}

/// In-memory database, sufficient for tests and embedded profiles.
#[derive(Default)]
pub struct StaticLensDatabase {
    cameras: Vec<CameraRecord>,
    /// Lens records, each optionally restricted to a camera name.
    lenses: Vec<(Option<String>, LensRecord)>,
}

impl StaticLensDatabase {
    pub fn new() -> Self {
        StaticLensDatabase::default()
    }

    pub fn add_camera(&mut self, camera: CameraRecord) {
        self.cameras.push(camera);
    }

    pub fn add_lens(&mut self, camera_name: Option<&str>, lens: LensRecord) {
        self.lenses
            .push((camera_name.map(str::to_owned), lens));
    }
}

impl LensDatabase for StaticLensDatabase {
    fn find_cameras(&self, name: &str) -> Vec<CameraRecord> {
        self.cameras
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
            .collect()
    }

    fn find_lenses(&self, camera: Option<&CameraRecord>, name: &str) -> Vec<LensRecord> {
        self.lenses
            .iter()
            .filter(|(cam, lens)| {
                lens.name.eq_ignore_ascii_case(name)
                    && match (cam, camera) {
                        (Some(restricted), Some(wanted)) => {
                            restricted.eq_ignore_ascii_case(&wanted.name)
                        }
                        _ => true,
                    }
            })
            .map(|(_, lens)| lens.clone())
            .collect()
    }
}

/// Configured correction set for one image geometry.
pub struct Modifier {
    width: usize,
    center_x: f32,
    center_y: f32,
    /// Reciprocal of the half-diagonal, scaled by the crop factor so
    /// coefficients calibrated on full frame transfer to crop sensors.
    radius_norm: f32,
    vignetting: Option<(f32, f32)>,
    tca: Option<(f32, f32)>,
    distortion: Option<f32>,
    scale: f32,
}

impl Modifier {
    pub fn new(crop_factor: f32, width: usize, height: usize) -> Self {
        let center_x = (width as f32 - 1.0) / 2.0;
        let center_y = (height as f32 - 1.0) / 2.0;
        let half_diagonal = (center_x * center_x + center_y * center_y).sqrt().max(1.0);
        Modifier {
            width,
            center_x,
            center_y,
            radius_norm: 1.0 / (half_diagonal * crop_factor.max(0.1)),
            vignetting: None,
            tca: None,
            distortion: None,
            scale: 1.0,
        }
    }

    /// First-order focal interpolation of a coefficient measured at the
    /// record's reference focal length.
    fn focal_adjust(lens_ref: f32, focal: f32) -> f32 {
        (lens_ref / focal.max(1.0)).clamp(0.25, 4.0)
    }

    pub fn enable_vignetting(&mut self, lens: &LensRecord, _focal: f32, fnumber: f32) {
        // Falloff weakens as the lens is stopped down.
        let attenuation = (lens.fnumber_wide / fnumber.max(0.1)).powi(2).min(1.0);
        self.vignetting = Some((
            lens.vignetting_k1 * attenuation,
            lens.vignetting_k2 * attenuation,
        ));
    }

    pub fn enable_tca(&mut self, lens: &LensRecord, _focal: f32) {
        self.tca = Some((lens.tca_red, lens.tca_blue));
    }

    /// Enable distortion correction and set the autoscale that keeps the
    /// corrected frame free of void corners.
    pub fn enable_distortion(&mut self, lens: &LensRecord, focal: f32) {
        let a = lens.distortion_a * Self::focal_adjust(lens.focal_ref, focal);
        self.distortion = Some(a);
        self.scale = 1.0 / (1.0 + a).max(0.1);
    }

    pub fn autoscale(&self) -> f32 {
        self.scale
    }

    pub fn has_tca(&self) -> bool {
        self.tca.is_some()
    }

    pub fn has_distortion(&self) -> bool {
        self.distortion.is_some()
    }

    pub fn has_vignetting(&self) -> bool {
        self.vignetting.is_some()
    }

    #[inline]
    fn normalized_radius2(&self, x: f32, y: f32) -> f32 {
        let dx = (x - self.center_x) * self.radius_norm;
        let dy = (y - self.center_y) * self.radius_norm;
        dx * dx + dy * dy
    }

    /// Multiply one interleaved row by the inverse vignetting falloff.
    pub fn apply_vignetting_row(&self, row: &mut [f32], y: usize) {
        let Some((k1, k2)) = self.vignetting else {
            return;
        };
        for (site, px) in row.chunks_exact_mut(3).enumerate() {
            let r2 = self.normalized_radius2(site as f32, y as f32);
            let gain = 1.0 + k1 * r2 + k2 * r2 * r2;
            for v in px {
                *v *= gain;
            }
        }
    }

    /// Source coordinate for a destination pixel under distortion (when
    /// enabled) and the given extra per-channel radial scale.
    #[inline]
    fn source_coord(&self, x: f32, y: f32, channel_scale: f32) -> (f32, f32) {
        let mut factor = self.scale * channel_scale;
        if let Some(a) = self.distortion {
            let r2 = self.normalized_radius2(x, y) * self.scale * self.scale;
            factor *= 1.0 + a * r2;
        }
        (
            self.center_x + (x - self.center_x) * factor,
            self.center_y + (y - self.center_y) * factor,
        )
    }

    /// Per-channel source coordinates for one row: `width * 2 * 3`
    /// interleaved as x,y per channel. Combines TCA with distortion when
    /// the latter is enabled.
    pub fn subpixel_coords(&self, y: usize, coords: &mut Vec<f32>) {
        let (kr, kb) = self.tca.unwrap_or((1.0, 1.0));
        coords.clear();
        coords.reserve(self.width * 6);
        for x in 0..self.width {
            for scale in [kr, 1.0, kb] {
                let (sx, sy) = self.source_coord(x as f32, y as f32, scale);
                coords.push(sx);
                coords.push(sy);
            }
        }
    }

    /// One source coordinate per pixel for geometric distortion alone:
    /// `width * 2` interleaved x,y.
    pub fn geometry_coords(&self, y: usize, coords: &mut Vec<f32>) {
        coords.clear();
        coords.reserve(self.width * 2);
        for x in 0..self.width {
            let (sx, sy) = self.source_coord(x as f32, y as f32, 1.0);
            coords.push(sx);
            coords.push(sy);
        }
    }
}

#[inline]
fn bilinear(image: &Matrix<f32>, width: usize, height: usize, x: f32, y: f32, ch: usize) -> f32 {
    let sx0 = ((x.floor() as isize).clamp(0, width as isize - 1) as usize) * 3 + ch;
    let sx1 = ((x.ceil() as isize).clamp(0, width as isize - 1) as usize) * 3 + ch;
    let sy0 = (y.floor() as isize).clamp(0, height as isize - 1) as usize;
    let sy1 = (y.ceil() as isize).clamp(0, height as isize - 1) as usize;
    let ewx = x - x.floor();
    let ewy = y - y.floor();
    image[(sy0, sx0)] * (1.0 - ewy) * (1.0 - ewx)
        + image[(sy1, sx0)] * ewy * (1.0 - ewx)
        + image[(sy0, sx1)] * (1.0 - ewy) * ewx
        + image[(sy1, sx1)] * ewy * ewx
}

/// In-place vignetting correction over the whole image.
pub fn apply_vignetting(image: &mut Matrix<f32>, modifier: &Modifier) {
    image.par_rows_mut().enumerate().for_each(|(y, row)| {
        modifier.apply_vignetting_row(row, y);
    });
}

/// Per-channel subpixel remap (TCA, optionally combined with geometric
/// distortion) into a new buffer.
pub fn apply_subpixel_distortion(image: &Matrix<f32>, modifier: &Modifier) -> Matrix<f32> {
    let height = image.nr();
    let width = image.nc() / 3;
    let mut out = Matrix::with_size(height, width * 3);
    out.par_rows_mut().enumerate().for_each(|(y, row)| {
        let mut coords = Vec::new();
        modifier.subpixel_coords(y, &mut coords);
        for x in 0..width {
            let base = x * 6;
            for ch in 0..3 {
                let sx = coords[base + 2 * ch];
                let sy = coords[base + 2 * ch + 1];
                row[x * 3 + ch] = bilinear(image, width, height, sx, sy, ch);
            }
        }
    });
    out
}

/// Geometric distortion remap: one source coordinate per pixel, applied
/// to all three channels.
pub fn apply_geometry_distortion(image: &Matrix<f32>, modifier: &Modifier) -> Matrix<f32> {
    let height = image.nr();
    let width = image.nc() / 3;
    let mut out = Matrix::with_size(height, width * 3);
    out.par_rows_mut().enumerate().for_each(|(y, row)| {
        let mut coords = Vec::new();
        modifier.geometry_coords(y, &mut coords);
        for x in 0..width {
            let sx = coords[x * 2];
            let sy = coords[x * 2 + 1];
            for ch in 0..3 {
                row[x * 3 + ch] = bilinear(image, width, height, sx, sy, ch);
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lens() -> LensRecord {
        LensRecord {
            name: "Testar 50mm f/1.8".into(),
            distortion_a: -0.05,
            tca_red: 1.0005,
            tca_blue: 0.9995,
            vignetting_k1: 0.4,
            vignetting_k2: 0.1,
            focal_ref: 50.0,
            fnumber_wide: 1.8,
        }
    }

    fn gradient(width: usize, height: usize) -> Matrix<f32> {
        let mut m = Matrix::with_size(height, width * 3);
        for r in 0..height {
            for c in 0..width * 3 {
                m[(r, c)] = (r * width * 3 + c) as f32;
            }
        }
        m
    }

    #[test]
    fn test_database_lookup_and_camera_restriction() {
        let mut db = StaticLensDatabase::new();
        db.add_camera(CameraRecord {
            name: "Examplon E-1".into(),
            crop_factor: 1.5,
        });
        db.add_lens(Some("Examplon E-1"), test_lens());

        let cameras = db.find_cameras("examplon e-1");
        assert_eq!(cameras.len(), 1);

        let other = CameraRecord {
            name: "Other".into(),
            crop_factor: 1.0,
        };
        assert_eq!(
            db.find_lenses(Some(&cameras[0]), "Testar 50mm f/1.8").len(),
            1
        );
        assert!(db.find_lenses(Some(&other), "Testar 50mm f/1.8").is_empty());
        // Unrestricted search matches regardless of camera.
        assert_eq!(db.find_lenses(None, "Testar 50mm f/1.8").len(), 1);
    }

    #[test]
    fn test_identity_modifier_remaps_exactly() {
        let modifier = Modifier::new(1.0, 8, 6);
        let image = gradient(8, 6);
        let out = apply_geometry_distortion(&image, &modifier);
        assert_eq!(out, image);
        let out = apply_subpixel_distortion(&image, &modifier);
        assert_eq!(out, image);
    }

    #[test]
    fn test_vignetting_brightens_corners_only() {
        let mut modifier = Modifier::new(1.0, 9, 9);
        modifier.enable_vignetting(&test_lens(), 50.0, 1.8);
        let mut image = Matrix::with_size(9, 27);
        for v in image.as_mut_slice() {
            *v = 100.0;
        }
        apply_vignetting(&mut image, &modifier);
        // The exact center stays put, the corner gains.
        assert!((image[(4, 4 * 3)] - 100.0).abs() < 0.01);
        assert!(image[(0, 0)] > 130.0);
    }

    #[test]
    fn test_vignetting_attenuates_when_stopped_down() {
        let lens = test_lens();
        let mut wide = Modifier::new(1.0, 9, 9);
        wide.enable_vignetting(&lens, 50.0, 1.8);
        let mut stopped = Modifier::new(1.0, 9, 9);
        stopped.enable_vignetting(&lens, 50.0, 8.0);

        let mut image_wide = Matrix::with_size(9, 27);
        let mut image_stopped = Matrix::with_size(9, 27);
        for v in image_wide.as_mut_slice() {
            *v = 100.0;
        }
        for v in image_stopped.as_mut_slice() {
            *v = 100.0;
        }
        apply_vignetting(&mut image_wide, &wide);
        apply_vignetting(&mut image_stopped, &stopped);
        assert!(image_wide[(0, 0)] > image_stopped[(0, 0)]);
    }

    #[test]
    fn test_distortion_autoscale_counteracts_barrel() {
        let mut modifier = Modifier::new(1.0, 100, 100);
        modifier.enable_distortion(&test_lens(), 50.0);
        assert!(modifier.autoscale() > 1.0);

        // With barrel distortion the corrected corner samples from
        // inside the frame.
        let mut coords = Vec::new();
        modifier.geometry_coords(0, &mut coords);
        let sx = coords[0];
        let sy = coords[1];
        assert!(sx >= 0.0 && sy >= 0.0);
    }
}
