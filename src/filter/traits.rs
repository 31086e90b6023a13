//! Capability interface implemented by the application
//!
//! The engine owns no physics: motion, sensing, data association and
//! landmark initialisation are all supplied through [`KalmanModel`]. The
//! model is injected when the filter is built.

use nalgebra::{DMatrix, DVector};

use super::config::Dimensions;

/// Default finite-difference step for numeric Jacobians.
pub const DEFAULT_JACOBIAN_INCREMENT: f64 = 1e-6;

/// Data association result for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Association {
    /// Matched to the landmark with this map index
    Landmark(usize),
    /// Not in the map yet; will be injected as a new landmark
    New,
}

impl Association {
    /// Landmark index if matched.
    #[inline]
    pub fn landmark(&self) -> Option<usize> {
        match self {
            Association::Landmark(i) => Some(*i),
            Association::New => None,
        }
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        matches!(self, Association::New)
    }
}

/// Observations gathered this cycle with their data association.
///
/// `associations` is parallel to `observations`. In non-SLAM problems it may
/// be left empty.
#[derive(Debug, Clone, Default)]
pub struct ObservationBatch {
    pub observations: Vec<DVector<f64>>,
    pub associations: Vec<Association>,
}

impl ObservationBatch {
    pub fn new(observations: Vec<DVector<f64>>, associations: Vec<Association>) -> Self {
        Self {
            observations,
            associations,
        }
    }

    /// No observations this cycle.
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Iterator over `(observation index, landmark index)` for matched entries.
    pub fn matched(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.associations
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.landmark().map(|lm| (i, lm)))
    }

    /// Number of observations flagged as new landmarks.
    pub fn num_new(&self) -> usize {
        self.associations.iter().filter(|a| a.is_new()).count()
    }
}

/// How the sensor noise is propagated into a new landmark's covariance.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseForm {
    /// Jacobian of the landmark wrt the observation (`FEAT × OBS`); the
    /// engine adds `dyn_dhn · R · dyn_dhnᵗ`
    Jacobian(DMatrix<f64>),
    /// Precombined `FEAT × FEAT` noise contribution, added as is
    Precombined(DMatrix<f64>),
}

/// Output of the inverse observation model.
#[derive(Debug, Clone)]
pub struct LandmarkInit {
    /// New landmark mean (`FEAT`)
    pub mean: DVector<f64>,
    /// Jacobian of the landmark wrt the vehicle block (`FEAT × VEH`)
    pub dyn_dxv: DMatrix<f64>,
    /// Sensor noise contribution
    pub noise: NoiseForm,
}

/// Application-side models and hooks.
///
/// Required methods describe the problem; methods with default bodies are
/// optional capabilities. Analytic Jacobians return `None` when the model
/// has no closed form, and the engine falls back to numeric estimation.
///
/// State-dependent methods receive the full state `x` explicitly. During
/// numeric differentiation that `x` is a perturbed scratch copy, never the
/// live state.
pub trait KalmanModel {
    /// Block sizes; queried once at filter construction.
    fn dimensions(&self) -> Dimensions;

    /// Control input for this cycle (`ACT`).
    fn action(&mut self) -> DVector<f64>;

    /// Advance the vehicle block `xv` in place under control `u`.
    ///
    /// Return `true` to skip the prediction stage this cycle (e.g. the very
    /// first SLAM iteration). When skipping, `xv` is discarded.
    fn transition_model(&self, u: &DVector<f64>, xv: &mut DVector<f64>) -> bool;

    /// Closed-form transition Jacobian `dfv/dxv` (`VEH × VEH`) at prior `xv`.
    fn transition_jacobian(&self, _u: &DVector<f64>, _xv: &DVector<f64>) -> Option<DMatrix<f64>> {
        None
    }

    /// Finite-difference steps for the transition Jacobian (`VEH`).
    fn transition_jacobian_increments(&self) -> DVector<f64> {
        DVector::from_element(self.dimensions().vehicle, DEFAULT_JACOBIAN_INCREMENT)
    }

    /// Process noise `Q` (`VEH × VEH`) for a transition from prior `xv`.
    fn transition_noise(&self, u: &DVector<f64>, xv: &DVector<f64>) -> DMatrix<f64>;

    /// Sensor noise `R` (`OBS × OBS`) of a single observation.
    fn observation_noise(&self) -> DMatrix<f64>;

    /// Predicted observation (`OBS`) for each requested landmark.
    ///
    /// In non-SLAM problems this is called with `[0]` and predicts the one
    /// system-wide observation.
    fn observation_model(&self, x: &DVector<f64>, landmarks: &[usize]) -> Vec<DVector<f64>>;

    /// Closed-form `(Hx, Hy)` for one landmark: `OBS × VEH` and `OBS × FEAT`.
    fn observation_jacobians(
        &self,
        _x: &DVector<f64>,
        _landmark: usize,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        None
    }

    /// Finite-difference steps for `(Hx, Hy)`: `VEH` and `FEAT`.
    fn observation_jacobian_increments(&self) -> (DVector<f64>, DVector<f64>) {
        let dims = self.dimensions();
        (
            DVector::from_element(dims.vehicle, DEFAULT_JACOBIAN_INCREMENT),
            DVector::from_element(dims.feature, DEFAULT_JACOBIAN_INCREMENT),
        )
    }

    /// Choose which landmarks get Jacobians computed this cycle.
    ///
    /// Sees the raw prediction for every landmark in the map. This is a
    /// performance heuristic only: landmarks it misses but that are then
    /// observed are added by the engine's retry pass. Default: all.
    fn pre_computing_predictions(&self, all_predictions: &[DVector<f64>]) -> Vec<usize> {
        (0..all_predictions.len()).collect()
    }

    /// Gather this cycle's observations and associate them.
    ///
    /// `s` is the innovation covariance over `predicted`, in that order
    /// (block `i` belongs to landmark `predicted[i]`).
    fn observations_and_data_association(
        &mut self,
        all_predictions: &[DVector<f64>],
        s: &DMatrix<f64>,
        predicted: &[usize],
        r: &DMatrix<f64>,
    ) -> ObservationBatch;

    /// `a ⊖ b`; override to wrap angular components.
    fn subtract_observations(&self, a: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
        a - b
    }

    /// Initialise a landmark from an unmatched observation seen from `xv`.
    ///
    /// Only called in SLAM problems; a model that never flags observations
    /// as [`Association::New`] may leave this returning `None`.
    fn inverse_observation_model(
        &self,
        _xv: &DVector<f64>,
        _z: &DVector<f64>,
    ) -> Option<LandmarkInit> {
        None
    }

    /// Notification that observation `observation_index` became landmark
    /// `landmark_index`.
    fn new_landmark_registered(&mut self, _observation_index: usize, _landmark_index: usize) {}

    /// Bring the state back to its canonical range (e.g. wrap angles).
    fn normalize_state(&self, _x: &mut DVector<f64>) {}

    /// Called at the end of every cycle.
    fn post_iteration(&mut self) {}
}
