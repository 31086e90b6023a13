//! Filter engine
//!
//! - [`KalmanFilter`] - The cycle driver
//! - [`KalmanModel`] - Capability trait implemented by the application
//! - [`KalmanState`] - Joint vehicle/landmark estimate
//! - [`KfOptions`] - Method selection and Jacobian policy
//! - [`KfError`] - Error taxonomy

pub mod config;
pub mod errors;
pub mod kalman;
pub mod state;
pub mod traits;

pub use config::{Dimensions, KfMethod, KfOptions, Problem};
pub use errors::{JacobianKind, KfError};
pub use kalman::{CycleSummary, KalmanFilter, StageTimings};
pub use state::{KalmanState, LandmarkOrigin};
pub use traits::{
    Association, KalmanModel, LandmarkInit, NoiseForm, ObservationBatch,
    DEFAULT_JACOBIAN_INCREMENT,
};
