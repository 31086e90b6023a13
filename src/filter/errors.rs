//! Error types for the Kalman filter engine
//!
//! Every stage returns `Result<_, KfError>`. None of these errors are
//! retried internally: after any of them the filter should be considered
//! unusable until the caller restores a known-good state.

use std::fmt;

use nalgebra::DMatrix;

/// Which Jacobian failed analytic/numeric cross-verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianKind {
    /// Transition Jacobian `dfv/dxv`
    Transition,
    /// Observation Jacobian wrt the vehicle block (`Hx`)
    ObservationVehicle,
    /// Observation Jacobian wrt the landmark block (`Hy`)
    ObservationFeature,
}

impl fmt::Display for JacobianKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JacobianKind::Transition => write!(f, "transition dfv_dxv"),
            JacobianKind::ObservationVehicle => write!(f, "observation Hx"),
            JacobianKind::ObservationFeature => write!(f, "observation Hy"),
        }
    }
}

/// Errors that can occur while running a filter cycle
#[derive(Debug, Clone)]
pub enum KfError {
    /// Invalid option combination
    Configuration {
        /// Description of the configuration issue
        description: String,
    },

    /// A selectable but unimplemented algorithm was requested
    NotImplemented {
        /// Name of the missing feature
        feature: String,
    },

    /// Sequential scalar update selected with correlated sensor noise
    NonDiagonalObservationNoise {
        /// The offending sensor noise covariance
        noise: DMatrix<f64>,
    },

    /// Analytic Jacobian disagrees with its numeric estimate
    JacobianMismatch {
        /// Which Jacobian
        kind: JacobianKind,
        /// Entry-wise L1 norm of the difference
        difference: f64,
        /// Verification threshold in force
        threshold: f64,
        /// Finite-difference estimate
        numeric: DMatrix<f64>,
        /// Model-supplied closed form
        analytic: DMatrix<f64>,
    },

    /// Covariance diagonal went negative
    NegativeVariance {
        /// Diagonal index
        index: usize,
        /// Offending value
        value: f64,
        /// Snapshot of the covariance at failure time
        covariance: DMatrix<f64>,
    },

    /// Matrix inversion failed (singular matrix)
    SingularMatrix {
        /// Description of which matrix failed
        context: String,
    },

    /// Dimension mismatch between expected and actual
    DimensionMismatch {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Context (e.g., "transition noise rows", "prediction count")
        context: String,
    },

    /// Data association referenced a landmark that is not in the map
    InvalidAssociation {
        /// Referenced landmark index
        landmark: usize,
        /// Landmarks currently in the map
        num_landmarks: usize,
    },
}

impl KfError {
    pub(crate) fn dimension(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        KfError::DimensionMismatch {
            expected,
            actual,
            context: context.into(),
        }
    }

    /// Returns `Ok(())` if `expected == actual`, otherwise a dimension error.
    pub(crate) fn check_dim(
        expected: usize,
        actual: usize,
        context: &str,
    ) -> Result<(), KfError> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::dimension(expected, actual, context))
        }
    }

    /// Same as [`KfError::check_dim`] for both dimensions of a matrix.
    pub(crate) fn check_shape(
        m: &DMatrix<f64>,
        rows: usize,
        cols: usize,
        context: &str,
    ) -> Result<(), KfError> {
        Self::check_dim(rows, m.nrows(), &format!("{} rows", context))?;
        Self::check_dim(cols, m.ncols(), &format!("{} cols", context))
    }
}

impl fmt::Display for KfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KfError::Configuration { description } => {
                write!(f, "Configuration error: {}", description)
            }
            KfError::NotImplemented { feature } => write!(f, "Not implemented: {}", feature),
            KfError::NonDiagonalObservationNoise { noise } => {
                write!(
                    f,
                    "Sequential scalar update assumes independent observation noise \
                     components, but R is not diagonal:{}",
                    noise
                )
            }
            KfError::JacobianMismatch {
                kind,
                difference,
                threshold,
                numeric,
                analytic,
            } => {
                write!(
                    f,
                    "Analytic {} Jacobian is wrong (|diff|_1 = {:.3e} > {:.3e})\n\
                     Numeric:{}Analytic:{}Diff:{}",
                    kind,
                    difference,
                    threshold,
                    numeric,
                    analytic,
                    numeric - analytic
                )
            }
            KfError::NegativeVariance {
                index,
                value,
                covariance,
            } => {
                write!(
                    f,
                    "Covariance diagonal entry {} is negative ({:.3e}):{}",
                    index, value, covariance
                )
            }
            KfError::SingularMatrix { context } => {
                write!(f, "Matrix inversion failed: {}", context)
            }
            KfError::DimensionMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Dimension mismatch for {}: expected {}, got {}",
                    context, expected, actual
                )
            }
            KfError::InvalidAssociation {
                landmark,
                num_landmarks,
            } => {
                write!(
                    f,
                    "Data association references landmark {} but the map holds {}",
                    landmark, num_landmarks
                )
            }
        }
    }
}

impl std::error::Error for KfError {}
