//! Parameter storage and the validity/cancellation protocol.
//!
//! The [`ParameterManager`] is the single source of truth for how far the
//! pipeline's cached artifacts can be trusted. Editors store new stage
//! parameters through the `set_*` methods, which lower the validity level
//! to the last stage whose output is still correct. A running pipeline
//! claims an atomic snapshot at every stage boundary with the `claim_*`
//! methods and learns in the same call whether it must abandon the run.

mod stages;

pub use stages::{
    BlackWhiteParams, ColorCurveParams, DemosaicParams, FilmParams, FilmlikeCurvesParams,
    LoadParams, PrefilmParams,
};

use std::sync::Mutex;

/// How far the pipeline's cached artifacts are trusted for the current
/// parameter set.
///
/// The `Part*` variants sit immediately below their completed
/// counterparts and mean "the stage is in progress or was interrupted";
/// the executor redoes a stage whenever validity is at or below its
/// partial level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Valid {
    None,
    PartLoad,
    Load,
    PartDemosaic,
    Demosaic,
    PartPrefilmulation,
    Prefilmulation,
    PartFilmulation,
    Filmulation,
    PartBlackWhite,
    BlackWhite,
    PartColorCurve,
    ColorCurve,
    PartFilmLikeCurve,
    FilmLikeCurve,
}

impl Valid {
    pub const COUNT: usize = 15;

    /// Position in the total order, for progress weighting.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl Default for Valid {
    fn default() -> Self {
        Valid::None
    }
}

/// Whether a claiming stage may proceed or must abandon the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortStatus {
    Continue,
    Restart,
}

#[derive(Default)]
struct ParamState {
    valid: Valid,
    load: LoadParams,
    demosaic: DemosaicParams,
    prefilm: PrefilmParams,
    film: FilmParams,
    blackwhite: BlackWhiteParams,
    colorcurve: ColorCurveParams,
    filmlike: FilmlikeCurvesParams,
}

/// Arbitrator between the pipeline and concurrent parameter editors.
///
/// All access goes through atomic claim/mark/set calls; the executor
/// reads validity at entry and again at every stage boundary.
pub struct ParameterManager {
    state: Mutex<ParamState>,
}

impl ParameterManager {
    pub fn new() -> Self {
        ParameterManager {
            state: Mutex::new(ParamState::default()),
        }
    }

    pub fn get_valid(&self) -> Valid {
        self.state.lock().unwrap().valid
    }

    // ------------------------------------------------------------------
    // Claims: one per stage, called by the executor at stage entry.
    //
    // A claim checks that every earlier stage is still complete; if an
    // editor invalidated one meanwhile, the claim returns `Restart` and
    // the executor abandons the run. Otherwise validity drops to the
    // stage's partial level until the matching mark call.
    // ------------------------------------------------------------------

    /// Single-lock claim: the validity check, the transition to the
    /// partial level and the parameter snapshot happen under one lock so
    /// the caller observes no interleaving with editors.
    fn claim<P>(
        &self,
        prereq: Valid,
        part: Valid,
        snapshot: impl FnOnce(&ParamState) -> P,
    ) -> (Valid, AbortStatus, P) {
        let mut s = self.state.lock().unwrap();
        if s.valid < prereq {
            (s.valid, AbortStatus::Restart, snapshot(&s))
        } else {
            s.valid = part;
            (s.valid, AbortStatus::Continue, snapshot(&s))
        }
    }

    pub fn claim_load_params(&self) -> (Valid, AbortStatus, LoadParams) {
        self.claim(Valid::None, Valid::PartLoad, |s| s.load.clone())
    }

    pub fn claim_demosaic_params(&self) -> (Valid, AbortStatus, LoadParams, DemosaicParams) {
        let (valid, abort, (load, demosaic)) = self.claim(Valid::Load, Valid::PartDemosaic, |s| {
            (s.load.clone(), s.demosaic.clone())
        });
        (valid, abort, load, demosaic)
    }

    pub fn claim_prefilm_params(&self) -> (Valid, AbortStatus, PrefilmParams) {
        self.claim(Valid::Demosaic, Valid::PartPrefilmulation, |s| {
            s.prefilm.clone()
        })
    }

    pub fn claim_film_params(&self) -> (Valid, AbortStatus, FilmParams) {
        self.claim(Valid::Prefilmulation, Valid::PartFilmulation, |s| {
            s.film.clone()
        })
    }

    pub fn claim_blackwhite_params(&self) -> (Valid, AbortStatus, BlackWhiteParams) {
        self.claim(Valid::Filmulation, Valid::PartBlackWhite, |s| {
            s.blackwhite.clone()
        })
    }

    pub fn claim_colorcurve_params(&self) -> (Valid, AbortStatus, ColorCurveParams) {
        self.claim(Valid::BlackWhite, Valid::PartColorCurve, |s| {
            s.colorcurve.clone()
        })
    }

    pub fn claim_filmlike_params(&self) -> (Valid, AbortStatus, FilmlikeCurvesParams) {
        self.claim(Valid::ColorCurve, Valid::PartFilmLikeCurve, |s| {
            s.filmlike.clone()
        })
    }

    /// Abort check hooked into the raw decoder's progress callback.
    ///
    /// Returns `Restart` when the load stage's inputs were invalidated
    /// while the decoder is running.
    pub fn claim_demosaic_abort(&self) -> AbortStatus {
        if self.state.lock().unwrap().valid < Valid::PartLoad {
            AbortStatus::Restart
        } else {
            AbortStatus::Continue
        }
    }

    /// Abort check consulted from inside the filmulation loop.
    pub fn claim_film_abort(&self) -> AbortStatus {
        if self.state.lock().unwrap().valid < Valid::PartFilmulation {
            AbortStatus::Restart
        } else {
            AbortStatus::Continue
        }
    }

    // ------------------------------------------------------------------
    // Marks: advance validity after a stage finished successfully.
    //
    // A mark only advances from the matching partial level; if an editor
    // invalidated the stage mid-flight, validity stays lowered and the
    // next claim restarts the pipeline.
    // ------------------------------------------------------------------

    fn mark(&self, part: Valid, full: Valid) -> Valid {
        let mut s = self.state.lock().unwrap();
        if s.valid == part {
            s.valid = full;
        }
        s.valid
    }

    pub fn mark_load_complete(&self) -> Valid {
        self.mark(Valid::PartLoad, Valid::Load)
    }

    pub fn mark_demosaic_complete(&self) -> Valid {
        self.mark(Valid::PartDemosaic, Valid::Demosaic)
    }

    pub fn mark_prefilm_complete(&self) -> Valid {
        self.mark(Valid::PartPrefilmulation, Valid::Prefilmulation)
    }

    pub fn mark_film_complete(&self) -> Valid {
        self.mark(Valid::PartFilmulation, Valid::Filmulation)
    }

    pub fn mark_blackwhite_complete(&self) -> Valid {
        self.mark(Valid::PartBlackWhite, Valid::BlackWhite)
    }

    pub fn mark_colorcurves_complete(&self) -> Valid {
        self.mark(Valid::PartColorCurve, Valid::ColorCurve)
    }

    pub fn mark_filmlike_complete(&self) -> Valid {
        self.mark(Valid::PartFilmLikeCurve, Valid::FilmLikeCurve)
    }

    // ------------------------------------------------------------------
    // Editor entry points: store parameters and lower validity to the
    // last stage whose output they leave intact.
    // ------------------------------------------------------------------

    fn set(&self, level: Valid, store: impl FnOnce(&mut ParamState)) {
        let mut s = self.state.lock().unwrap();
        store(&mut s);
        if s.valid > level {
            s.valid = level;
        }
    }

    pub fn set_load_params(&self, p: LoadParams) {
        self.set(Valid::None, |s| s.load = p);
    }

    pub fn set_demosaic_params(&self, p: DemosaicParams) {
        self.set(Valid::Load, |s| s.demosaic = p);
    }

    pub fn set_prefilm_params(&self, p: PrefilmParams) {
        self.set(Valid::Demosaic, |s| s.prefilm = p);
    }

    pub fn set_film_params(&self, p: FilmParams) {
        self.set(Valid::Prefilmulation, |s| s.film = p);
    }

    pub fn set_blackwhite_params(&self, p: BlackWhiteParams) {
        self.set(Valid::Filmulation, |s| s.blackwhite = p);
    }

    pub fn set_filmlike_params(&self, p: FilmlikeCurvesParams) {
        self.set(Valid::ColorCurve, |s| s.filmlike = p);
    }
}

impl Default for ParameterManager {
    fn default() -> Self {
        ParameterManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_total_order() {
        assert!(Valid::None < Valid::PartLoad);
        assert!(Valid::PartLoad < Valid::Load);
        assert!(Valid::ColorCurve < Valid::PartFilmLikeCurve);
        assert!(Valid::PartFilmLikeCurve < Valid::FilmLikeCurve);
    }

    #[test]
    fn test_claim_mark_sequence_advances() {
        let pm = ParameterManager::new();

        let (valid, abort, _) = pm.claim_load_params();
        assert_eq!(valid, Valid::PartLoad);
        assert_eq!(abort, AbortStatus::Continue);
        assert_eq!(pm.mark_load_complete(), Valid::Load);

        let (valid, abort, _, _) = pm.claim_demosaic_params();
        assert_eq!(valid, Valid::PartDemosaic);
        assert_eq!(abort, AbortStatus::Continue);
        assert_eq!(pm.mark_demosaic_complete(), Valid::Demosaic);
    }

    #[test]
    fn test_claim_restarts_after_earlier_invalidation() {
        let pm = ParameterManager::new();
        pm.claim_load_params();
        pm.mark_load_complete();
        pm.claim_demosaic_params();
        pm.mark_demosaic_complete();

        // An editor changes the demosaic parameters: validity drops back
        // to Load, so the prefilm claim must restart.
        pm.set_demosaic_params(DemosaicParams::default());
        let (valid, abort, _) = pm.claim_prefilm_params();
        assert_eq!(abort, AbortStatus::Restart);
        assert_eq!(valid, Valid::Load);
    }

    #[test]
    fn test_mark_does_not_advance_after_invalidation() {
        let pm = ParameterManager::new();
        pm.claim_load_params();
        // The load stage's inputs change while it runs.
        pm.set_load_params(LoadParams::default());
        assert_eq!(pm.mark_load_complete(), Valid::None);
        assert_eq!(pm.claim_demosaic_abort(), AbortStatus::Restart);
    }

    #[test]
    fn test_film_abort_tracks_prefilm_invalidation() {
        let pm = ParameterManager::new();
        pm.claim_load_params();
        pm.mark_load_complete();
        pm.claim_demosaic_params();
        pm.mark_demosaic_complete();
        pm.claim_prefilm_params();
        pm.mark_prefilm_complete();
        pm.claim_film_params();
        assert_eq!(pm.claim_film_abort(), AbortStatus::Continue);

        pm.set_prefilm_params(PrefilmParams::default());
        assert_eq!(pm.claim_film_abort(), AbortStatus::Restart);
    }
}
