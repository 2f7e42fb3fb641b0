//! Film development simulation.
//!
//! Models the exposure of silver-halide crystals and their development
//! in a depleting, laterally diffusing developer bath. Bright regions
//! exhaust developer faster than it is replenished, compressing
//! highlights and pushing local contrast at edges the way chemical film
//! does. The simulation claims its own parameters and polls the
//! parameter manager for cancellation between development increments;
//! callers observe an abort only through the returned flag.

use rayon::prelude::*;

use crate::matrix::Matrix;
use crate::params::{AbortStatus, ParameterManager};

/// Base development rate per unit exposure over a full run.
const DEVELOPMENT_RATE: f32 = 4.0;

/// Developer consumed per unit of developed silver.
const CONSUMPTION_RATE: f32 = 2.0;

/// Reference film area the rate constants are calibrated for.
const REFERENCE_AREA: f32 = 864.0;

/// Develop `pre_film` into `filmulated`, both on the 0..65535 scale.
///
/// Returns `true` when the run was cancelled; `filmulated` is left
/// untouched in that case.
pub fn filmulate(
    pre_film: &Matrix<f32>,
    filmulated: &mut Matrix<f32>,
    param_manager: &ParameterManager,
) -> bool {
    let (_valid, abort, film) = param_manager.claim_film_params();
    if abort == AbortStatus::Restart {
        return true;
    }

    let height = pre_film.nr();
    let width = pre_film.nc();
    let strength = film.simulation_strength.clamp(0.0, 1.0);

    if film.development_steps == 0 || strength == 0.0 || pre_film.is_empty() {
        *filmulated = pre_film.clone();
        return false;
    }

    // Exposure with highlight rolloff above the boundary.
    let rolloff = film.rolloff_boundary.clamp(1.0, 65534.0);
    let mut exposure = Matrix::with_size(height, width);
    exposure.par_rows_mut().enumerate().for_each(|(r, row)| {
        for (e, &v) in row.iter_mut().zip(pre_film.row(r)) {
            let v = if v > rolloff {
                let over = v - rolloff;
                rolloff + over / (1.0 + over / (65535.0 - rolloff))
            } else {
                v
            };
            *e = v / 65535.0;
        }
    });

    // A smaller simulated frame concentrates developer per unit area.
    let area_factor = (REFERENCE_AREA / film.film_area.max(1.0)).sqrt();
    let dev_rate = DEVELOPMENT_RATE * area_factor;
    let dt = 1.0 / film.development_steps as f32;

    let mut silver = Matrix::<f32>::with_size(height, width);
    let mut developer = Matrix::<f32>::with_size(height, width);
    for d in developer.as_mut_slice() {
        *d = 1.0;
    }

    for _ in 0..film.development_steps {
        if param_manager.claim_film_abort() == AbortStatus::Restart {
            return true;
        }

        // Development increment: growth proportional to exposure and
        // local developer concentration.
        silver
            .par_rows_mut()
            .enumerate()
            .for_each(|(r, silver_row)| {
                let exp_row = exposure.row(r);
                let dev_row = developer.row(r);
                for c in 0..width {
                    silver_row[c] += exp_row[c] * dev_row[c] * dev_rate * dt;
                }
            });
        developer
            .par_rows_mut()
            .enumerate()
            .for_each(|(r, dev_row)| {
                let exp_row = exposure.row(r);
                for c in 0..width {
                    let growth = exp_row[c] * dev_row[c] * dev_rate * dt;
                    dev_row[c] = (dev_row[c] - growth * CONSUMPTION_RATE).max(0.0);
                }
            });

        diffuse(&mut developer, film.layer_mix.clamp(0.0, 1.0));

        // Reservoir replenishment back toward the initial concentration.
        let replenish = film.reservoir_replenishment.clamp(0.0, 1.0) * dt;
        developer.par_rows_mut().for_each(|row| {
            for d in row {
                *d += replenish * (1.0 - *d);
            }
        });
    }

    // Developed density back onto the working scale, blended with the
    // input by simulation strength.
    filmulated.set_size(height, width);
    filmulated
        .par_rows_mut()
        .enumerate()
        .for_each(|(r, out_row)| {
            let silver_row = silver.row(r);
            let in_row = pre_film.row(r);
            for c in 0..width {
                let mapped = 65535.0 * (silver_row[c] / dev_rate).min(1.0);
                out_row[c] = in_row[c] * (1.0 - strength) + mapped * strength;
            }
        });
    false
}

/// One lateral diffusion increment of the developer layer. Channels stay
/// separate: the horizontal neighbors of an interleaved sample sit three
/// columns away.
fn diffuse(developer: &mut Matrix<f32>, mix: f32) {
    if mix <= 0.0 {
        return;
    }
    let height = developer.nr();
    let width = developer.nc();
    let source = developer.clone();
    developer.par_rows_mut().enumerate().for_each(|(r, row)| {
        let up = source.row(r.saturating_sub(1));
        let mid = source.row(r);
        let down = source.row((r + 1).min(height - 1));
        for c in 0..width {
            let left = mid[if c >= 3 { c - 3 } else { c }];
            let right = mid[if c + 3 < width { c + 3 } else { c }];
            let neighborhood = 0.25 * (up[c] + down[c] + left + right);
            row[c] = mid[c] * (1.0 - mix) + neighborhood * mix;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{FilmParams, PrefilmParams};

    fn manager_at_film_stage() -> ParameterManager {
        let pm = ParameterManager::new();
        pm.claim_load_params();
        pm.mark_load_complete();
        pm.claim_demosaic_params();
        pm.mark_demosaic_complete();
        pm.claim_prefilm_params();
        pm.mark_prefilm_complete();
        pm
    }

    fn gradient_image() -> Matrix<f32> {
        let mut m = Matrix::with_size(4, 12);
        for (i, v) in m.as_mut_slice().iter_mut().enumerate() {
            *v = i as f32 / 47.0 * 65535.0;
        }
        m
    }

    #[test]
    fn test_zero_strength_is_passthrough() {
        let pm = manager_at_film_stage();
        pm.set_film_params(FilmParams {
            simulation_strength: 0.0,
            ..FilmParams::default()
        });
        // Setting film params keeps prefilmulation valid, so the claim
        // inside filmulate still succeeds.
        let input = gradient_image();
        let mut out = Matrix::new();
        assert!(!filmulate(&input, &mut out, &pm));
        assert_eq!(out, input);
    }

    #[test]
    fn test_development_compresses_highlights() {
        let pm = manager_at_film_stage();
        let mut input = Matrix::with_size(4, 12);
        for (i, v) in input.as_mut_slice().iter_mut().enumerate() {
            *v = if i % 2 == 0 { 6000.0 } else { 60000.0 };
        }
        let mut out = Matrix::new();
        assert!(!filmulate(&input, &mut out, &pm));

        // The bright-to-dark ratio shrinks under development.
        let dark = out[(0, 0)];
        let bright = out[(0, 1)];
        assert!(bright > dark);
        assert!(bright / dark < 10.0, "ratio {}", bright / dark);
    }

    #[test]
    fn test_invalidated_prefilm_cancels() {
        let pm = manager_at_film_stage();
        // An editor rewinds the prefilm stage before development starts.
        pm.set_prefilm_params(PrefilmParams::default());
        let input = gradient_image();
        let mut out = Matrix::new();
        assert!(filmulate(&input, &mut out, &pm));
        assert!(out.is_empty());
    }
}
