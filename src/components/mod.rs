//! Core algorithmic components
//!
//! The stages of one filter cycle, each a free function over a
//! [`KalmanModel`](crate::filter::traits::KalmanModel) and a
//! [`KalmanState`](crate::filter::state::KalmanState):
//!
//! - [`jacobian`] - Numeric Jacobians and analytic cross-checks
//! - [`prediction`] - Vehicle propagation
//! - [`observation`] - Predicted observations, innovation covariance, data association
//! - [`update`] - EKF / IKF / sequential measurement update
//! - [`injection`] - New landmark insertion

pub mod injection;
pub mod jacobian;
pub mod observation;
pub mod prediction;
pub mod update;

pub use injection::inject_landmarks;
pub use jacobian::{estimate_jacobian, verify_jacobian};
pub use observation::{extend_innovation_covariance, observation_jacobians, observe, ObservationFrame};
pub use prediction::predict;
pub use update::update;
