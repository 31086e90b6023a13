//! The filter driver: one call to [`KalmanFilter::step`] runs one complete
//! cycle.
//!
//! ```text
//! action → predict → normalize → predict observations → choose prediction set
//!        → Jacobians → S → data association (→ retry) → update → normalize
//!        → inject new landmarks → post-iteration hook
//! ```

use std::time::Instant;

use nalgebra::{DMatrix, DVector};

use crate::common::linalg::is_diagonal;
use crate::common::profiler::Profiler;
use crate::components::{inject_landmarks, observe, predict, update};
use crate::reporter::{NoOpReporter, StepReporter};

use super::config::{Dimensions, KfMethod, KfOptions, Problem};
use super::errors::KfError;
use super::state::KalmanState;
use super::traits::KalmanModel;

/// Wall-clock seconds spent in the main stages of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub prediction: f64,
    /// Observation prediction, Jacobians and `S`, all retry passes included
    pub observation_prediction: f64,
    /// Data association, all retry passes included
    pub association: f64,
    pub update: f64,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    /// Zero-based cycle number
    pub cycle: usize,
    /// Landmarks in the map at the end of the cycle
    pub num_landmarks: usize,
    /// Size of the final prediction set
    pub num_predicted: usize,
    /// Data-association retry passes
    pub retries: usize,
    /// Observations that drove the update
    pub num_matched: usize,
    /// Landmarks injected this cycle
    pub num_new: usize,
    /// `false` if the transition model skipped prediction
    pub prediction_ran: bool,
    /// `false` if there was nothing to update with
    pub update_ran: bool,
    pub timings: StageTimings,
}

/// EKF/IKF engine over a user-supplied [`KalmanModel`].
///
/// The problem shape (`Tracking` or `Slam`) is fixed at construction from
/// the model's [`Dimensions`].
pub struct KalmanFilter<M: KalmanModel, R: StepReporter = NoOpReporter> {
    model: M,
    options: KfOptions,
    dims: Dimensions,
    problem: Problem,
    state: KalmanState,
    profiler: Profiler,
    reporter: R,
    cycle: usize,
}

impl<M: KalmanModel> KalmanFilter<M, NoOpReporter> {
    /// Create a filter with an empty map.
    ///
    /// # Errors
    /// `Configuration` for degenerate dimensions; `DimensionMismatch` if the
    /// initial vehicle estimate does not match them.
    pub fn new(
        model: M,
        vehicle_mean: DVector<f64>,
        vehicle_covariance: DMatrix<f64>,
        options: KfOptions,
    ) -> Result<Self, KfError> {
        let dims = model.dimensions();
        dims.validate()?;
        KfError::check_dim(dims.vehicle, vehicle_mean.len(), "initial vehicle mean")?;
        let state = KalmanState::new(vehicle_mean, vehicle_covariance, dims.feature)?;

        log::debug!(
            "[KF] new filter: {:?} problem, VEH={} OBS={} FEAT={} ACT={}, method {}",
            dims.problem(),
            dims.vehicle,
            dims.observation,
            dims.feature,
            dims.action,
            options.method.name()
        );

        Ok(Self {
            model,
            profiler: Profiler::new(options.enable_profiler),
            options,
            dims,
            problem: dims.problem(),
            state,
            reporter: NoOpReporter,
            cycle: 0,
        })
    }
}

impl<M: KalmanModel, R: StepReporter> KalmanFilter<M, R> {
    /// Replace the reporter.
    pub fn with_reporter<R2: StepReporter>(self, reporter: R2) -> KalmanFilter<M, R2> {
        KalmanFilter {
            model: self.model,
            options: self.options,
            dims: self.dims,
            problem: self.problem,
            state: self.state,
            profiler: self.profiler,
            reporter,
            cycle: self.cycle,
        }
    }

    pub fn state(&self) -> &KalmanState {
        &self.state
    }

    /// Mutable access to the estimate between cycles.
    pub fn state_mut(&mut self) -> &mut KalmanState {
        &mut self.state
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn options(&self) -> &KfOptions {
        &self.options
    }

    /// Replace the options; takes effect at the next cycle.
    pub fn set_options(&mut self, options: KfOptions) {
        self.profiler.enable(options.enable_profiler);
        self.options = options;
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn problem(&self) -> Problem {
        self.problem
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    /// Number of completed cycles.
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    #[inline]
    pub fn num_landmarks(&self) -> usize {
        self.state.num_landmarks()
    }

    /// Run one complete predict/observe/update/inject cycle.
    ///
    /// # Errors
    /// Configuration errors (`NotImplemented`, `Configuration`,
    /// `NonDiagonalObservationNoise`) are raised before `x` or `P` change.
    /// Consistency errors (`JacobianMismatch`, `NegativeVariance`) and shape
    /// violations abort the cycle; the filter should not be stepped again.
    pub fn step(&mut self) -> Result<CycleSummary, KfError> {
        self.profiler.enter("KF:complete_step");
        let result = self.run_cycle();
        self.profiler.leave("KF:complete_step");
        result
    }

    fn run_cycle(&mut self) -> Result<CycleSummary, KfError> {
        let os = self.dims.observation;

        self.options.validate()?;
        let r = self.model.observation_noise();
        KfError::check_shape(&r, os, os, "observation noise")?;
        if self.options.method == KfMethod::SequentialScalar && !is_diagonal(&r) {
            return Err(KfError::NonDiagonalObservationNoise { noise: r });
        }
        self.state.check_layout()?;

        let mut summary = CycleSummary {
            cycle: self.cycle,
            ..Default::default()
        };

        // 1. Action
        self.profiler.enter("KF:1.OnGetAction");
        let u = self.model.action();
        self.profiler.leave("KF:1.OnGetAction");
        KfError::check_dim(self.dims.action, u.len(), "action")?;

        // 2. Prediction
        let tic = Instant::now();
        self.profiler.enter("KF:2.prediction stage");
        summary.prediction_ran = predict(&self.model, &self.options, &mut self.state, &u)?;
        self.profiler.leave("KF:2.prediction stage");
        summary.timings.prediction = tic.elapsed().as_secs_f64();
        if summary.prediction_ran {
            self.reporter.on_prediction(&self.state);
        }

        // 3-7. Observation prediction, Jacobians, S and data association
        let frame = observe(
            &mut self.model,
            &self.options,
            self.problem,
            &self.state,
            &r,
            &mut self.reporter,
            &mut self.profiler,
        )?;
        summary.num_predicted = frame.predicted.len();
        summary.retries = frame.retries;
        summary.num_matched = frame.num_matched(self.problem);
        summary.timings.observation_prediction = frame.prediction_time;
        summary.timings.association = frame.association_time;

        // 8. Update
        let tic = Instant::now();
        self.profiler.enter("KF:8.update stage");
        summary.update_ran = update(
            &self.model,
            &self.options,
            self.problem,
            &mut self.state,
            &frame,
            &r,
        )?;
        self.profiler.leave("KF:8.update stage");
        summary.timings.update = tic.elapsed().as_secs_f64();
        if summary.update_ran {
            self.reporter.on_update(&self.state);
        }

        // 9. Normalize
        self.profiler.enter("KF:9.OnNormalizeStateVector");
        self.model.normalize_state(self.state.mean_mut());
        self.profiler.leave("KF:9.OnNormalizeStateVector");

        // A. New landmarks
        self.profiler.enter("KF:A.add new landmarks");
        let added = inject_landmarks(
            &mut self.model,
            self.problem,
            &mut self.state,
            &frame.batch,
            &r,
            self.cycle,
        )?;
        self.profiler.leave("KF:A.add new landmarks");
        for &landmark in &added {
            let observation = self.state.landmark_origins()[landmark].observation_index;
            self.reporter.on_landmark_added(observation, landmark);
        }
        summary.num_new = added.len();

        // B. Post-iteration
        self.profiler.enter("KF:B.OnPostIteration");
        self.model.post_iteration();
        self.profiler.leave("KF:B.OnPostIteration");

        summary.num_landmarks = self.state.num_landmarks();
        log::debug!(
            "[KF] {} LMs | Pr: {:.2}ms | Pr.Obs: {:.2}ms | Obs.DA: {:.2}ms | Upd: {:.2}ms",
            summary.num_landmarks,
            summary.timings.prediction * 1e3,
            summary.timings.observation_prediction * 1e3,
            summary.timings.association * 1e3,
            summary.timings.update * 1e3
        );

        self.reporter.on_cycle_complete(&summary);
        self.cycle += 1;
        Ok(summary)
    }
}
