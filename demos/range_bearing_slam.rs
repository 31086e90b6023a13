//! Range-bearing SLAM in a simulated world.
//!
//! A robot drives a loop through a field of point landmarks, sensing range
//! and bearing to those within reach. Data association is nearest neighbour
//! on the Mahalanobis distance, using the innovation covariance handed out
//! by the engine; unmatched observations far from every landmark become new
//! landmarks.
//!
//! Run with: cargo run --example range_bearing_slam

use std::f64::consts::PI;

use ekf_slam_rs::{
    Association, CycleSummary, Dimensions, KalmanFilter, KalmanModel, KfMethod, KfOptions,
    LandmarkInit, NoiseForm, ObservationBatch, StepReporter,
};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const MAX_RANGE: f64 = 8.0;
/// 99% gate of a chi-square with 2 degrees of freedom
const ASSOCIATION_GATE: f64 = 9.21;
/// Beyond this every existing landmark is ruled out
const NEW_LANDMARK_GATE: f64 = 40.0;

fn wrap_angle(a: f64) -> f64 {
    (a + PI).rem_euclid(2.0 * PI) - PI
}

struct Simulation {
    world: Vec<(f64, f64)>,
    true_pose: [f64; 3],
    command: (f64, f64),
    odometry_noise: Normal<f64>,
    turn_noise: Normal<f64>,
    range_noise: Normal<f64>,
    bearing_noise: Normal<f64>,
    rng: StdRng,
    sensed: Vec<DVector<f64>>,
}

impl Simulation {
    fn new(seed: u64) -> Result<Self, rand_distr::NormalError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let world = (0..40)
            .map(|_| (rng.gen_range(-15.0..15.0), rng.gen_range(-15.0..15.0)))
            .collect();
        Ok(Self {
            world,
            true_pose: [-10.0, 0.0, 0.0],
            command: (0.4, 0.04),
            odometry_noise: Normal::new(0.0, 0.02)?,
            turn_noise: Normal::new(0.0, 0.005)?,
            range_noise: Normal::new(0.0, 0.05)?,
            bearing_noise: Normal::new(0.0, 0.01)?,
            rng,
            sensed: Vec::new(),
        })
    }

    /// Move the true robot and return the noisy odometry reading.
    fn drive(&mut self) -> (f64, f64) {
        let (d, dphi) = self.command;
        let [x, y, phi] = self.true_pose;
        self.true_pose = [x + d * phi.cos(), y + d * phi.sin(), wrap_angle(phi + dphi)];
        (
            d + self.odometry_noise.sample(&mut self.rng),
            dphi + self.turn_noise.sample(&mut self.rng),
        )
    }

    fn sense(&mut self) {
        let [x, y, phi] = self.true_pose;
        self.sensed.clear();
        for &(lx, ly) in &self.world {
            let (dx, dy) = (lx - x, ly - y);
            let range = dx.hypot(dy);
            if range > MAX_RANGE {
                continue;
            }
            let bearing = wrap_angle(dy.atan2(dx) - phi);
            self.sensed.push(DVector::from_vec(vec![
                range + self.range_noise.sample(&mut self.rng),
                wrap_angle(bearing + self.bearing_noise.sample(&mut self.rng)),
            ]));
        }
    }
}

impl KalmanModel for Simulation {
    fn dimensions(&self) -> Dimensions {
        Dimensions::new(3, 2, 2, 2)
    }

    fn action(&mut self) -> DVector<f64> {
        let (d, dphi) = self.drive();
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
        let sd = self.odometry_noise.std_dev();
        let sphi = self.turn_noise.std_dev();
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![sd * sd, sphi * sphi]));
        &g * m * g.transpose() + DMatrix::identity(3, 3) * 1e-8
    }

    fn observation_noise(&self) -> DMatrix<f64> {
        let sr = self.range_noise.std_dev();
        let sb = self.bearing_noise.std_dev();
        DMatrix::from_diagonal(&DVector::from_vec(vec![sr * sr, sb * sb]))
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
        let off = 3 + 2 * landmark;
        let (dx, dy) = (x[off] - x[0], x[off + 1] - x[1]);
        let r2 = dx * dx + dy * dy;
        let r = r2.sqrt();
        #[rustfmt::skip]
        let hx = DMatrix::from_row_slice(2, 3, &[
            -dx / r,  -dy / r,   0.0,
             dy / r2, -dx / r2, -1.0,
        ]);
        #[rustfmt::skip]
        let hy = DMatrix::from_row_slice(2, 2, &[
             dx / r,   dy / r,
            -dy / r2,  dx / r2,
        ]);
        Some((hx, hy))
    }

    /// Only landmarks predicted well inside the sensor range.
    fn pre_computing_predictions(&self, all_predictions: &[DVector<f64>]) -> Vec<usize> {
        all_predictions
            .iter()
            .enumerate()
            .filter(|(_, z)| z[0] <= MAX_RANGE - 0.5)
            .map(|(i, _)| i)
            .collect()
    }

    /// Nearest neighbour over the whole map. Landmarks outside the prediction
    /// set are gated with an inflated sensor noise instead of their `S` block;
    /// matching one of them makes the engine retry with its Jacobians.
    fn observations_and_data_association(
        &mut self,
        all_predictions: &[DVector<f64>],
        s: &DMatrix<f64>,
        predicted: &[usize],
        r: &DMatrix<f64>,
    ) -> ObservationBatch {
        let coarse = (r * 16.0).try_inverse();
        let inverses: Vec<Option<DMatrix<f64>>> = (0..all_predictions.len())
            .map(|lm| match predicted.iter().position(|&p| p == lm) {
                Some(k) => s.view((2 * k, 2 * k), (2, 2)).into_owned().try_inverse(),
                None => coarse.clone(),
            })
            .collect();

        let mut batch = ObservationBatch::empty();
        for z in &self.sensed {
            let mut best: Option<(usize, f64)> = None;
            for (lm, prediction) in all_predictions.iter().enumerate() {
                let Some(s_inv) = &inverses[lm] else { continue };
                let nu = self.subtract_observations(z, prediction);
                let d2 = (nu.transpose() * s_inv * &nu)[(0, 0)];
                if best.map_or(true, |(_, b)| d2 < b) {
                    best = Some((lm, d2));
                }
            }
            let association = match best {
                Some((lm, d2)) if d2 < ASSOCIATION_GATE => Association::Landmark(lm),
                // Ambiguous: neither a match nor clearly new
                Some((_, d2)) if d2 < NEW_LANDMARK_GATE => continue,
                _ => Association::New,
            };
            batch.observations.push(z.clone());
            batch.associations.push(association);
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
        let (s, c) = (xv[2] + bearing).sin_cos();
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

    fn normalize_state(&self, x: &mut DVector<f64>) {
        x[2] = wrap_angle(x[2]);
    }
}

/// Prints a line every few cycles.
struct ProgressReporter {
    every: usize,
    retries: usize,
}

impl StepReporter for ProgressReporter {
    fn on_retry(&mut self, _missing: &[usize]) {
        self.retries += 1;
    }

    fn on_cycle_complete(&mut self, summary: &CycleSummary) {
        if summary.cycle % self.every == 0 {
            println!(
                "cycle {:>4}: {:>3} landmarks, {:>2} matched, {:>2} new, update {:.3} ms",
                summary.cycle,
                summary.num_landmarks,
                summary.num_matched,
                summary.num_new,
                summary.timings.update * 1e3
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let simulation = Simulation::new(2024)?;
    let [x0, y0, phi0] = simulation.true_pose;

    let options = KfOptions::default()
        .with_method(KfMethod::FullBatchIkf)
        .with_ikf_iterations(3)
        .with_profiler(true);
    println!("Options:\n{}\n", options.to_json()?);

    let mut filter = KalmanFilter::new(
        simulation,
        DVector::from_vec(vec![x0, y0, phi0]),
        DMatrix::identity(3, 3) * 1e-6,
        options,
    )?
    .with_reporter(ProgressReporter {
        every: 25,
        retries: 0,
    });

    for _ in 0..300 {
        filter.step()?;
    }

    let truth = filter.model().true_pose;
    let estimate = filter.state().vehicle_mean().into_owned();
    println!(
        "\nTrue pose      [{:>7.3}, {:>7.3}, {:>6.3}]",
        truth[0], truth[1], truth[2]
    );
    println!(
        "Estimated pose [{:>7.3}, {:>7.3}, {:>6.3}]",
        estimate[0], estimate[1], estimate[2]
    );
    println!(
        "{} landmarks mapped ({} in the world), {} association retries",
        filter.num_landmarks(),
        filter.model().world.len(),
        filter.reporter().retries
    );
    println!("\n{}", filter.profiler().summary());

    Ok(())
}
