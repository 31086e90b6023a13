//! Concrete models for the integration tests
//!
//! - [`LinearTrackingModel`] - 3-D pose tracking, no map
//! - [`LinearLandmarkModel`] - 2-D point vehicle, relative-position sensor, scripted association
//! - [`RangeBearingModel`] - planar robot with odometry and a range-bearing sensor

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::f64::consts::PI;

use ekf_slam_rs::{
    Association, Dimensions, KalmanModel, LandmarkInit, NoiseForm, ObservationBatch,
};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub fn wrap_angle(a: f64) -> f64 {
    (a + PI).rem_euclid(2.0 * PI) - PI
}

fn batch_from(script: &[(DVector<f64>, Association)]) -> ObservationBatch {
    let (observations, associations) = script.iter().cloned().unzip();
    ObservationBatch::new(observations, associations)
}

// ============================================================================
// LinearTrackingModel
// ============================================================================

/// `x' = x + u`, `z = x`, no landmarks.
pub struct LinearTrackingModel {
    pub u: DVector<f64>,
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
    /// One entry per cycle; `None` means no observation
    pub observations: VecDeque<Option<DVector<f64>>>,
}

impl LinearTrackingModel {
    pub fn new(q: DMatrix<f64>, r: DMatrix<f64>) -> Self {
        Self {
            u: DVector::zeros(3),
            q,
            r,
            observations: VecDeque::new(),
        }
    }
}

impl KalmanModel for LinearTrackingModel {
    fn dimensions(&self) -> Dimensions {
        Dimensions::new(3, 3, 0, 3)
    }

    fn action(&mut self) -> DVector<f64> {
        self.u.clone()
    }

    fn transition_model(&self, u: &DVector<f64>, xv: &mut DVector<f64>) -> bool {
        *xv += u;
        false
    }

    fn transition_jacobian(&self, _u: &DVector<f64>, _xv: &DVector<f64>) -> Option<DMatrix<f64>> {
        Some(DMatrix::identity(3, 3))
    }

    fn transition_noise(&self, _u: &DVector<f64>, _xv: &DVector<f64>) -> DMatrix<f64> {
        self.q.clone()
    }

    fn observation_noise(&self) -> DMatrix<f64> {
        self.r.clone()
    }

    fn observation_model(&self, x: &DVector<f64>, _landmarks: &[usize]) -> Vec<DVector<f64>> {
        vec![x.rows(0, 3).into_owned()]
    }

    fn observation_jacobians(
        &self,
        _x: &DVector<f64>,
        _landmark: usize,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        Some((DMatrix::identity(3, 3), DMatrix::zeros(3, 0)))
    }

    fn observations_and_data_association(
        &mut self,
        _all_predictions: &[DVector<f64>],
        _s: &DMatrix<f64>,
        _predicted: &[usize],
        _r: &DMatrix<f64>,
    ) -> ObservationBatch {
        match self.observations.front() {
            Some(Some(z)) => ObservationBatch::new(vec![z.clone()], Vec::new()),
            _ => ObservationBatch::empty(),
        }
    }

    fn post_iteration(&mut self) {
        self.observations.pop_front();
    }
}

// ============================================================================
// LinearLandmarkModel
// ============================================================================

/// Vehicle `[px, py]`, landmarks `[lx, ly]`, observation `l − p`.
///
/// Each cycle consumes one scripted batch of `(z, association)` pairs.
pub struct LinearLandmarkModel {
    pub u: DVector<f64>,
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub script: VecDeque<Vec<(DVector<f64>, Association)>>,
    pub heuristic: Option<Vec<usize>>,
    pub skip_prediction: bool,
    pub jacobian_requests: RefCell<Vec<usize>>,
    pub association_calls: usize,
    pub registered: Vec<(usize, usize)>,
}

impl LinearLandmarkModel {
    pub fn new() -> Self {
        Self {
            u: DVector::from_vec(vec![0.5, 0.0]),
            q: DMatrix::identity(2, 2) * 0.01,
            r: DMatrix::from_diagonal(&DVector::from_vec(vec![0.05, 0.08])),
            script: VecDeque::new(),
            heuristic: None,
            skip_prediction: false,
            jacobian_requests: RefCell::new(Vec::new()),
            association_calls: 0,
            registered: Vec::new(),
        }
    }

    pub fn push_cycle(&mut self, entries: Vec<(DVector<f64>, Association)>) {
        self.script.push_back(entries);
    }
}

impl KalmanModel for LinearLandmarkModel {
    fn dimensions(&self) -> Dimensions {
        Dimensions::new(2, 2, 2, 2)
    }

    fn action(&mut self) -> DVector<f64> {
        self.u.clone()
    }

    fn transition_model(&self, u: &DVector<f64>, xv: &mut DVector<f64>) -> bool {
        if self.skip_prediction {
            return true;
        }
        *xv += u;
        false
    }

    fn transition_jacobian(&self, _u: &DVector<f64>, _xv: &DVector<f64>) -> Option<DMatrix<f64>> {
        Some(DMatrix::identity(2, 2))
    }

    fn transition_noise(&self, _u: &DVector<f64>, _xv: &DVector<f64>) -> DMatrix<f64> {
        self.q.clone()
    }

    fn observation_noise(&self) -> DMatrix<f64> {
        self.r.clone()
    }

    fn observation_model(&self, x: &DVector<f64>, landmarks: &[usize]) -> Vec<DVector<f64>> {
        landmarks
            .iter()
            .map(|&i| {
                let off = 2 + 2 * i;
                DVector::from_vec(vec![x[off] - x[0], x[off + 1] - x[1]])
            })
            .collect()
    }

    fn observation_jacobians(
        &self,
        _x: &DVector<f64>,
        landmark: usize,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        self.jacobian_requests.borrow_mut().push(landmark);
        Some((-DMatrix::identity(2, 2), DMatrix::identity(2, 2)))
    }

    fn pre_computing_predictions(&self, all_predictions: &[DVector<f64>]) -> Vec<usize> {
        match &self.heuristic {
            Some(chosen) => chosen.clone(),
            None => (0..all_predictions.len()).collect(),
        }
    }

    fn observations_and_data_association(
        &mut self,
        _all_predictions: &[DVector<f64>],
        _s: &DMatrix<f64>,
        _predicted: &[usize],
        _r: &DMatrix<f64>,
    ) -> ObservationBatch {
        self.association_calls += 1;
        self.script
            .front()
            .map(|entries| batch_from(entries))
            .unwrap_or_default()
    }

    fn inverse_observation_model(
        &self,
        xv: &DVector<f64>,
        z: &DVector<f64>,
    ) -> Option<LandmarkInit> {
        Some(LandmarkInit {
            mean: xv + z,
            dyn_dxv: DMatrix::identity(2, 2),
            noise: NoiseForm::Jacobian(DMatrix::identity(2, 2)),
        })
    }

    fn new_landmark_registered(&mut self, observation_index: usize, landmark_index: usize) {
        self.registered.push((observation_index, landmark_index));
    }

    fn post_iteration(&mut self) {
        self.script.pop_front();
    }
}

// ============================================================================
// RangeBearingModel
// ============================================================================

/// Planar robot `[x, y, φ]` driven by odometry `[d, Δφ]`, observing point
/// landmarks `[lx, ly]` as `[range, bearing]`.
///
/// A ground-truth world is simulated inside the model; data association is
/// by known landmark identity.
pub struct RangeBearingModel {
    pub world: Vec<(f64, f64)>,
    pub true_pose: [f64; 3],
    pub odometry: (f64, f64),
    pub odometry_std: (f64, f64),
    pub range_std: f64,
    pub bearing_std: f64,
    pub max_range: f64,
    pub noisy: bool,
    pub prediction_limit: Option<usize>,
    pub corrupt_jacobian: bool,
    pub map_ids: Vec<usize>,
    pub jacobian_calls: Cell<usize>,
    rng: StdRng,
    pending: Vec<(usize, DVector<f64>)>,
}

impl RangeBearingModel {
    pub fn new(world: Vec<(f64, f64)>, seed: u64) -> Self {
        Self {
            world,
            true_pose: [0.0, 0.0, 0.0],
            odometry: (0.5, 0.05),
            odometry_std: (0.02, 0.01),
            range_std: 0.05,
            bearing_std: 0.01,
            max_range: 50.0,
            noisy: false,
            prediction_limit: None,
            corrupt_jacobian: false,
            map_ids: Vec::new(),
            jacobian_calls: Cell::new(0),
            rng: StdRng::seed_from_u64(seed),
            pending: Vec::new(),
        }
    }

    pub fn noisy(mut self) -> Self {
        self.noisy = true;
        self
    }

    fn sense(&mut self) {
        let [x, y, phi] = self.true_pose;
        let range_noise = Normal::new(0.0, self.range_std).ok();
        let bearing_noise = Normal::new(0.0, self.bearing_std).ok();
        self.pending.clear();
        for (id, &(lx, ly)) in self.world.iter().enumerate() {
            let (dx, dy) = (lx - x, ly - y);
            let mut range = dx.hypot(dy);
            if range > self.max_range {
                continue;
            }
            let mut bearing = wrap_angle(dy.atan2(dx) - phi);
            if self.noisy {
                if let (Some(rn), Some(bn)) = (range_noise, bearing_noise) {
                    range += rn.sample(&mut self.rng);
                    bearing = wrap_angle(bearing + bn.sample(&mut self.rng));
                }
            }
            self.pending
                .push((id, DVector::from_vec(vec![range, bearing])));
        }
    }
}

impl KalmanModel for RangeBearingModel {
    fn dimensions(&self) -> Dimensions {
        Dimensions::new(3, 2, 2, 2)
    }

    fn action(&mut self) -> DVector<f64> {
        let (d, dphi) = self.odometry;
        let [x, y, phi] = self.true_pose;
        self.true_pose = [x + d * phi.cos(), y + d * phi.sin(), wrap_angle(phi + dphi)];
        self.sense();
        DVector::from_vec(vec![d, dphi])
    }

    fn transition_model(&self, u: &DVector<f64>, xv: &mut DVector<f64>) -> bool {
        let phi = xv[2];
        xv[0] += u[0] * phi.cos();
        xv[1] += u[0] * phi.sin();
        xv[2] = wrap_angle(phi + u[1]);
        false
    }

    fn transition_jacobian(&self, u: &DVector<f64>, xv: &DVector<f64>) -> Option<DMatrix<f64>> {
        let phi = xv[2];
        #[rustfmt::skip]
        let f = DMatrix::from_row_slice(3, 3, &[
            1.0, 0.0, -u[0] * phi.sin(),
            0.0, 1.0,  u[0] * phi.cos(),
            0.0, 0.0,  1.0,
        ]);
        Some(f)
    }

    fn transition_noise(&self, _u: &DVector<f64>, xv: &DVector<f64>) -> DMatrix<f64> {
        let phi = xv[2];
        #[rustfmt::skip]
        let g = DMatrix::from_row_slice(3, 2, &[
            phi.cos(), 0.0,
            phi.sin(), 0.0,
            0.0,       1.0,
        ]);
        let (sd, sphi) = self.odometry_std;
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![sd * sd, sphi * sphi]));
        &g * m * g.transpose() + DMatrix::identity(3, 3) * 1e-8
    }

    fn observation_noise(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_vec(vec![
            self.range_std * self.range_std,
            self.bearing_std * self.bearing_std,
        ]))
    }

    fn observation_model(&self, x: &DVector<f64>, landmarks: &[usize]) -> Vec<DVector<f64>> {
        landmarks
            .iter()
            .map(|&i| {
                let off = 3 + 2 * i;
                let (dx, dy) = (x[off] - x[0], x[off + 1] - x[1]);
                DVector::from_vec(vec![dx.hypot(dy), wrap_angle(dy.atan2(dx) - x[2])])
            })
            .collect()
    }

    fn observation_jacobians(
        &self,
        x: &DVector<f64>,
        landmark: usize,
    ) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
        self.jacobian_calls.set(self.jacobian_calls.get() + 1);
        let off = 3 + 2 * landmark;
        let (dx, dy) = (x[off] - x[0], x[off + 1] - x[1]);
        let r2 = dx * dx + dy * dy;
        let r = r2.sqrt();

        #[rustfmt::skip]
        let mut hx = DMatrix::from_row_slice(2, 3, &[
            -dx / r,  -dy / r,   0.0,
             dy / r2, -dx / r2, -1.0,
        ]);
        #[rustfmt::skip]
        let hy = DMatrix::from_row_slice(2, 2, &[
             dx / r,   dy / r,
            -dy / r2,  dx / r2,
        ]);
        if self.corrupt_jacobian {
            hx[(0, 0)] += 0.5;
        }
        Some((hx, hy))
    }

    fn pre_computing_predictions(&self, all_predictions: &[DVector<f64>]) -> Vec<usize> {
        let n = all_predictions.len();
        (0..self.prediction_limit.map_or(n, |k| k.min(n))).collect()
    }

    fn observations_and_data_association(
        &mut self,
        _all_predictions: &[DVector<f64>],
        _s: &DMatrix<f64>,
        _predicted: &[usize],
        _r: &DMatrix<f64>,
    ) -> ObservationBatch {
        let mut batch = ObservationBatch::empty();
        for (id, z) in &self.pending {
            let assoc = self
                .map_ids
                .iter()
                .position(|m| m == id)
                .map_or(Association::New, Association::Landmark);
            batch.observations.push(z.clone());
            batch.associations.push(assoc);
        }
        batch
    }

    fn subtract_observations(&self, a: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
        let mut d = a - b;
        d[1] = wrap_angle(d[1]);
        d
    }

    fn inverse_observation_model(
        &self,
        xv: &DVector<f64>,
        z: &DVector<f64>,
    ) -> Option<LandmarkInit> {
        let (range, bearing) = (z[0], z[1]);
        let a = xv[2] + bearing;
        let (s, c) = a.sin_cos();

        #[rustfmt::skip]
        let dyn_dxv = DMatrix::from_row_slice(2, 3, &[
            1.0, 0.0, -range * s,
            0.0, 1.0,  range * c,
        ]);
        #[rustfmt::skip]
        let dyn_dhn = DMatrix::from_row_slice(2, 2, &[
            c, -range * s,
            s,  range * c,
        ]);
        Some(LandmarkInit {
            mean: DVector::from_vec(vec![xv[0] + range * c, xv[1] + range * s]),
            dyn_dxv,
            noise: NoiseForm::Jacobian(dyn_dhn),
        })
    }

    fn new_landmark_registered(&mut self, observation_index: usize, landmark_index: usize) {
        assert_eq!(landmark_index, self.map_ids.len());
        self.map_ids.push(self.pending[observation_index].0);
    }

    fn normalize_state(&self, x: &mut DVector<f64>) {
        x[2] = wrap_angle(x[2]);
    }
}
