//! Observability for filter cycles.
//!
//! This module provides the [`StepReporter`] trait for debugging and research
//! instrumentation. Reporters receive callbacks at key points of each
//! predict/observe/update/inject cycle without polluting the core algorithm
//! logic.
//!
//! # Zero-Cost Abstraction
//!
//! The default [`NoOpReporter`] compiles to zero overhead - all callback
//! methods are empty and will be optimized away by the compiler.
//!
//! # Example
//!
//! ```ignore
//! use ekf_slam_rs::{DebugReporter, KalmanFilter, KfOptions};
//!
//! let mut filter = KalmanFilter::new(model, x0, p0, KfOptions::default())?
//!     .with_reporter(DebugReporter::new());
//! filter.step()?;
//!
//! println!("{} retry passes", filter.reporter().retries().len());
//! ```

use nalgebra::DMatrix;

use crate::filter::kalman::CycleSummary;
use crate::filter::state::KalmanState;

// ============================================================================
// StepReporter Trait
// ============================================================================

/// Observability trait for filter cycles.
///
/// All methods have default empty implementations, so you only need
/// to override the events you care about.
///
/// Callbacks receive references to avoid cloning overhead. If you need
/// to store the data, clone it within your callback implementation.
///
/// # Example
///
/// ```
/// use ekf_slam_rs::{CycleSummary, StepReporter};
///
/// struct CountingReporter {
///     cycles: usize,
///     landmarks: usize,
/// }
///
/// impl StepReporter for CountingReporter {
///     fn on_landmark_added(&mut self, _observation: usize, _landmark: usize) {
///         self.landmarks += 1;
///     }
///
///     fn on_cycle_complete(&mut self, _summary: &CycleSummary) {
///         self.cycles += 1;
///     }
/// }
/// ```
pub trait StepReporter {
    /// Called after the prediction stage committed a new vehicle estimate.
    ///
    /// Not called when the transition model skipped prediction.
    fn on_prediction(&mut self, _state: &KalmanState) {}

    /// Called with the initial prediction set chosen by the model heuristic.
    fn on_prediction_set(&mut self, _predicted: &[usize]) {}

    /// Called when data association referenced landmarks outside the
    /// prediction set. `missing` are the landmarks added for the next pass.
    fn on_retry(&mut self, _missing: &[usize]) {}

    /// Called each time the innovation covariance is (re)built.
    fn on_innovation_covariance(&mut self, _predicted: &[usize], _s: &DMatrix<f64>) {}

    /// Called after the measurement update, before normalization.
    fn on_update(&mut self, _state: &KalmanState) {}

    /// Called after observation `observation` became landmark `landmark`.
    fn on_landmark_added(&mut self, _observation: usize, _landmark: usize) {}

    /// Called once at the end of every successful cycle.
    fn on_cycle_complete(&mut self, _summary: &CycleSummary) {}
}

impl<R: StepReporter + ?Sized> StepReporter for &mut R {
    fn on_prediction(&mut self, state: &KalmanState) {
        (**self).on_prediction(state);
    }

    fn on_prediction_set(&mut self, predicted: &[usize]) {
        (**self).on_prediction_set(predicted);
    }

    fn on_retry(&mut self, missing: &[usize]) {
        (**self).on_retry(missing);
    }

    fn on_innovation_covariance(&mut self, predicted: &[usize], s: &DMatrix<f64>) {
        (**self).on_innovation_covariance(predicted, s);
    }

    fn on_update(&mut self, state: &KalmanState) {
        (**self).on_update(state);
    }

    fn on_landmark_added(&mut self, observation: usize, landmark: usize) {
        (**self).on_landmark_added(observation, landmark);
    }

    fn on_cycle_complete(&mut self, summary: &CycleSummary) {
        (**self).on_cycle_complete(summary);
    }
}

// ============================================================================
// NoOpReporter
// ============================================================================

/// Zero-cost reporter that does nothing.
///
/// This is the default reporter used when no observability is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

impl NoOpReporter {
    /// Create a new no-op reporter.
    pub fn new() -> Self {
        Self
    }
}

impl StepReporter for NoOpReporter {
    // All methods use default empty implementations
}

// ============================================================================
// DebugReporter
// ============================================================================

/// Reporter that captures all events for debugging.
///
/// State snapshots are full clones of `x` and `P`; for long runs with
/// large maps this grows quickly.
#[derive(Debug, Clone, Default)]
pub struct DebugReporter {
    /// State after each prediction
    predictions: Vec<KalmanState>,

    /// Initial prediction set per cycle
    prediction_sets: Vec<Vec<usize>>,

    /// Landmarks added by each retry pass
    retries: Vec<Vec<usize>>,

    /// Innovation covariance sizes (prediction set length, S rows)
    innovation_sizes: Vec<(usize, usize)>,

    /// State after each update
    updates: Vec<KalmanState>,

    /// (observation index, landmark index) per injected landmark
    landmarks_added: Vec<(usize, usize)>,

    /// Summary of each completed cycle
    cycles: Vec<CycleSummary>,
}

impl DebugReporter {
    /// Create a new debug reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all captured events.
    pub fn clear(&mut self) {
        self.predictions.clear();
        self.prediction_sets.clear();
        self.retries.clear();
        self.innovation_sizes.clear();
        self.updates.clear();
        self.landmarks_added.clear();
        self.cycles.clear();
    }

    pub fn prediction_events(&self) -> &[KalmanState] {
        &self.predictions
    }

    pub fn prediction_sets(&self) -> &[Vec<usize>] {
        &self.prediction_sets
    }

    pub fn retries(&self) -> &[Vec<usize>] {
        &self.retries
    }

    pub fn innovation_sizes(&self) -> &[(usize, usize)] {
        &self.innovation_sizes
    }

    pub fn update_events(&self) -> &[KalmanState] {
        &self.updates
    }

    pub fn landmarks_added(&self) -> &[(usize, usize)] {
        &self.landmarks_added
    }

    pub fn cycles(&self) -> &[CycleSummary] {
        &self.cycles
    }

    /// Total number of captured events across all types.
    pub fn total_events(&self) -> usize {
        self.predictions.len()
            + self.prediction_sets.len()
            + self.retries.len()
            + self.innovation_sizes.len()
            + self.updates.len()
            + self.landmarks_added.len()
            + self.cycles.len()
    }
}

impl StepReporter for DebugReporter {
    fn on_prediction(&mut self, state: &KalmanState) {
        self.predictions.push(state.clone());
    }

    fn on_prediction_set(&mut self, predicted: &[usize]) {
        self.prediction_sets.push(predicted.to_vec());
    }

    fn on_retry(&mut self, missing: &[usize]) {
        self.retries.push(missing.to_vec());
    }

    fn on_innovation_covariance(&mut self, predicted: &[usize], s: &DMatrix<f64>) {
        self.innovation_sizes.push((predicted.len(), s.nrows()));
    }

    fn on_update(&mut self, state: &KalmanState) {
        self.updates.push(state.clone());
    }

    fn on_landmark_added(&mut self, observation: usize, landmark: usize) {
        self.landmarks_added.push((observation, landmark));
    }

    fn on_cycle_complete(&mut self, summary: &CycleSummary) {
        self.cycles.push(summary.clone());
    }
}

// ============================================================================
// LoggingReporter
// ============================================================================

/// Reporter that emits events through the `log` crate.
///
/// # Log Levels
///
/// - `on_cycle_complete`: INFO
/// - `on_retry`, `on_landmark_added`, `on_update`: DEBUG
/// - `on_prediction`, `on_prediction_set`, `on_innovation_covariance`: TRACE
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReporter {
    /// Whether to include state details in log messages
    verbose: bool,
}

impl LoggingReporter {
    /// Create a new logging reporter.
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Create a verbose logging reporter that includes the vehicle estimate.
    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl StepReporter for LoggingReporter {
    fn on_prediction(&mut self, state: &KalmanState) {
        if self.verbose {
            log::trace!(
                "Prediction complete: xv={:?}",
                state.vehicle_mean().as_slice()
            );
        } else {
            log::trace!("Prediction complete: {} state entries", state.len());
        }
    }

    fn on_prediction_set(&mut self, predicted: &[usize]) {
        log::trace!("Prediction set: {} landmarks", predicted.len());
    }

    fn on_retry(&mut self, missing: &[usize]) {
        log::debug!("Association retry: adding landmarks {:?}", missing);
    }

    fn on_innovation_covariance(&mut self, predicted: &[usize], s: &DMatrix<f64>) {
        log::trace!(
            "Innovation covariance: {} landmarks, {}x{}",
            predicted.len(),
            s.nrows(),
            s.ncols()
        );
    }

    fn on_update(&mut self, state: &KalmanState) {
        if self.verbose {
            log::debug!("Update complete: xv={:?}", state.vehicle_mean().as_slice());
        } else {
            log::debug!("Update complete: {} landmarks", state.num_landmarks());
        }
    }

    fn on_landmark_added(&mut self, observation: usize, landmark: usize) {
        log::debug!("Observation {} -> new landmark {}", observation, landmark);
    }

    fn on_cycle_complete(&mut self, summary: &CycleSummary) {
        log::info!(
            "Cycle {} complete: {} LMs, {} matched, {} new, {} retries",
            summary.cycle,
            summary.num_landmarks,
            summary.num_matched,
            summary.num_new,
            summary.retries
        );
    }
}

// ============================================================================
// CompositeReporter
// ============================================================================

/// Reporter that forwards events to two child reporters.
#[derive(Debug, Clone)]
pub struct CompositeReporter<A: StepReporter, B: StepReporter> {
    first: A,
    second: B,
}

impl<A: StepReporter, B: StepReporter> CompositeReporter<A, B> {
    /// Create a new composite reporter.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn first_mut(&mut self) -> &mut A {
        &mut self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }

    pub fn second_mut(&mut self) -> &mut B {
        &mut self.second
    }

    /// Consume and return both reporters.
    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: StepReporter, B: StepReporter> StepReporter for CompositeReporter<A, B> {
    fn on_prediction(&mut self, state: &KalmanState) {
        self.first.on_prediction(state);
        self.second.on_prediction(state);
    }

    fn on_prediction_set(&mut self, predicted: &[usize]) {
        self.first.on_prediction_set(predicted);
        self.second.on_prediction_set(predicted);
    }

    fn on_retry(&mut self, missing: &[usize]) {
        self.first.on_retry(missing);
        self.second.on_retry(missing);
    }

    fn on_innovation_covariance(&mut self, predicted: &[usize], s: &DMatrix<f64>) {
        self.first.on_innovation_covariance(predicted, s);
        self.second.on_innovation_covariance(predicted, s);
    }

    fn on_update(&mut self, state: &KalmanState) {
        self.first.on_update(state);
        self.second.on_update(state);
    }

    fn on_landmark_added(&mut self, observation: usize, landmark: usize) {
        self.first.on_landmark_added(observation, landmark);
        self.second.on_landmark_added(observation, landmark);
    }

    fn on_cycle_complete(&mut self, summary: &CycleSummary) {
        self.first.on_cycle_complete(summary);
        self.second.on_cycle_complete(summary);
    }
}

// ============================================================================
// Tests
// ============================================================================
