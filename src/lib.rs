/*!
# ekf-slam-rs - Generic EKF/IKF SLAM engine

Extended and Iterated Kalman Filter engine for joint vehicle/landmark
estimation. The engine owns the state `x = [vehicle | landmark_1 | ... ]`
and its covariance `P`; all physics is supplied by the application through
the [`KalmanModel`] trait.

## Features

- Full-batch EKF and IKF updates, sequential scalar (Davison-style) update
- Analytic or central-difference numeric Jacobians, with optional cross-checking
- Sparse block innovation covariance and a data-association retry protocol
- Append-only landmark injection from an inverse observation model
- Pure tracking (no map) when the model reports a zero feature size

## Modules

- [`filter`] - Filter driver, model trait, state container, options, errors
- [`components`] - Cycle stages: prediction, observation, update, injection
- [`reporter`] - Observability hooks
- [`common`] - Linear algebra helpers and the stage profiler

## Example

```rust,ignore
use ekf_slam_rs::{KalmanFilter, KfMethod, KfOptions};
use nalgebra::{DMatrix, DVector};

let options = KfOptions::default().with_method(KfMethod::FullBatchIkf);
let mut filter = KalmanFilter::new(
    my_model,
    DVector::zeros(3),
    DMatrix::identity(3, 3) * 1e-3,
    options,
)?;

for _ in 0..100 {
    let summary = filter.step()?;
    println!("{} landmarks", summary.num_landmarks);
}
```
*/

// ============================================================================
// Core modules
// ============================================================================

/// Filter driver and its public types
pub mod filter;

/// Stages of a filter cycle
pub mod components;

/// Observability hooks
pub mod reporter;

/// Low-level utilities (linear algebra, profiling)
pub mod common;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Engine
pub use filter::{CycleSummary, KalmanFilter, StageTimings};

// Configuration
pub use filter::{Dimensions, KfMethod, KfOptions, Problem};

// Errors
pub use filter::{JacobianKind, KfError};

// Model interface
pub use filter::{
    Association, KalmanModel, LandmarkInit, NoiseForm, ObservationBatch,
    DEFAULT_JACOBIAN_INCREMENT,
};

// State
pub use filter::{KalmanState, LandmarkOrigin};

// Reporters
pub use reporter::{CompositeReporter, DebugReporter, LoggingReporter, NoOpReporter, StepReporter};

// Utilities
pub use common::profiler::{Profiler, SectionStats};
pub use components::estimate_jacobian;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
