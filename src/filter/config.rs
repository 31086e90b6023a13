//! Configuration types for the filter
//!
//! [`KfOptions`] selects the update algorithm and the Jacobian policy.
//! [`Dimensions`] describes the block layout of the state vector and is
//! reported once by the model when the filter is constructed.

use serde::{Deserialize, Serialize};

use super::errors::KfError;

/// Update algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum KfMethod {
    /// Full-batch EKF: one linearisation, one gain over all matched observations
    #[default]
    FullBatchEkf,
    /// Full-batch iterated EKF, re-linearised `ikf_iterations` times
    FullBatchIkf,
    /// Sequential scalar update, one observation component at a time.
    /// Requires diagonal observation noise.
    SequentialScalar,
    /// Scalar-by-scalar iterated EKF (selectable, not implemented)
    ScalarIkf,
}

impl KfMethod {
    /// Short algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            KfMethod::FullBatchEkf => "full-batch EKF",
            KfMethod::FullBatchIkf => "full-batch IKF",
            KfMethod::SequentialScalar => "sequential scalar EKF",
            KfMethod::ScalarIkf => "scalar-by-scalar IKF",
        }
    }
}

/// Filter options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KfOptions {
    /// Update algorithm
    pub method: KfMethod,
    /// Re-linearisation count, only used by [`KfMethod::FullBatchIkf`]
    pub ikf_iterations: usize,
    /// Use the model's closed-form transition Jacobian when it has one
    pub use_analytic_transition_jacobian: bool,
    /// Use the model's closed-form observation Jacobians when it has them
    pub use_analytic_observation_jacobian: bool,
    /// Cross-check analytic Jacobians against numeric estimates
    pub debug_verify_analytic_jacobians: bool,
    /// Maximum entry-wise L1 difference tolerated by the cross-check
    pub debug_verify_analytic_jacobians_threshold: f64,
    /// Time each stage of the cycle
    pub enable_profiler: bool,
}

impl Default for KfOptions {
    fn default() -> Self {
        Self {
            method: KfMethod::FullBatchEkf,
            ikf_iterations: 5,
            use_analytic_transition_jacobian: true,
            use_analytic_observation_jacobian: true,
            debug_verify_analytic_jacobians: false,
            debug_verify_analytic_jacobians_threshold: 1e-2,
            enable_profiler: false,
        }
    }
}

impl KfOptions {
    /// Set the update algorithm.
    pub fn with_method(mut self, method: KfMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the IKF re-linearisation count.
    pub fn with_ikf_iterations(mut self, iterations: usize) -> Self {
        self.ikf_iterations = iterations;
        self
    }

    /// Select analytic (`true`) or numeric (`false`) Jacobians for both models.
    pub fn with_analytic_jacobians(mut self, transition: bool, observation: bool) -> Self {
        self.use_analytic_transition_jacobian = transition;
        self.use_analytic_observation_jacobian = observation;
        self
    }

    /// Enable analytic/numeric Jacobian cross-verification.
    pub fn with_jacobian_verification(mut self, threshold: f64) -> Self {
        self.debug_verify_analytic_jacobians = true;
        self.debug_verify_analytic_jacobians_threshold = threshold;
        self
    }

    /// Enable stage timing.
    pub fn with_profiler(mut self, enabled: bool) -> Self {
        self.enable_profiler = enabled;
        self
    }

    /// Check the options for fatal configuration errors.
    pub fn validate(&self) -> Result<(), KfError> {
        if self.method == KfMethod::ScalarIkf {
            return Err(KfError::NotImplemented {
                feature: "IKF scalar by scalar".to_string(),
            });
        }
        if self.method == KfMethod::FullBatchIkf && self.ikf_iterations == 0 {
            return Err(KfError::Configuration {
                description: "ikf_iterations must be at least 1".to_string(),
            });
        }
        let threshold = self.debug_verify_analytic_jacobians_threshold;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(KfError::Configuration {
                description: format!(
                    "Jacobian verification threshold must be non-negative, got {}",
                    threshold
                ),
            });
        }
        Ok(())
    }

    /// Number of update passes for full-batch methods.
    pub fn update_iterations(&self) -> usize {
        match self.method {
            KfMethod::FullBatchIkf => self.ikf_iterations,
            _ => 1,
        }
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, KfError> {
        serde_json::to_string_pretty(self).map_err(|e| KfError::Configuration {
            description: format!("cannot serialize options: {}", e),
        })
    }

    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, KfError> {
        serde_json::from_str(json).map_err(|e| KfError::Configuration {
            description: format!("invalid options JSON: {}", e),
        })
    }
}

/// Problem shape, decided once from [`Dimensions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    /// Vehicle-only state; one system-wide prediction per cycle
    Tracking,
    /// Vehicle plus a growing set of landmark blocks
    Slam,
}

/// Block sizes of the estimation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Vehicle block length (`VEH_SIZE`)
    pub vehicle: usize,
    /// Single observation length (`OBS_SIZE`)
    pub observation: usize,
    /// Landmark block length (`FEAT_SIZE`); zero for non-SLAM problems
    pub feature: usize,
    /// Control input length (`ACT_SIZE`)
    pub action: usize,
}

impl Dimensions {
    pub fn new(vehicle: usize, observation: usize, feature: usize, action: usize) -> Self {
        Self {
            vehicle,
            observation,
            feature,
            action,
        }
    }

    #[inline]
    pub fn problem(&self) -> Problem {
        if self.feature == 0 {
            Problem::Tracking
        } else {
            Problem::Slam
        }
    }

    pub fn validate(&self) -> Result<(), KfError> {
        if self.vehicle == 0 {
            return Err(KfError::Configuration {
                description: "vehicle block must be non-empty".to_string(),
            });
        }
        if self.observation == 0 {
            return Err(KfError::Configuration {
                description: "observation size must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = KfOptions::default();
        assert_eq!(opts.method, KfMethod::FullBatchEkf);
        assert_eq!(opts.ikf_iterations, 5);
        assert!(opts.use_analytic_transition_jacobian);
        assert!(!opts.debug_verify_analytic_jacobians);
        assert!(opts.validate().is_ok());
        assert_eq!(opts.update_iterations(), 1);
    }

    #[test]
    fn test_validate_rejects_scalar_ikf() {
        let opts = KfOptions::default().with_method(KfMethod::ScalarIkf);
        assert!(matches!(opts.validate(), Err(KfError::NotImplemented { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_ikf_iterations() {
        let opts = KfOptions::default()
            .with_method(KfMethod::FullBatchIkf)
            .with_ikf_iterations(0);
        assert!(matches!(opts.validate(), Err(KfError::Configuration { .. })));

        let opts = opts.with_ikf_iterations(3);
        assert_eq!(opts.update_iterations(), 3);
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let opts = KfOptions::from_json(r#"{ "method": "SequentialScalar" }"#).unwrap();
        assert_eq!(opts.method, KfMethod::SequentialScalar);
        assert_eq!(opts.ikf_iterations, 5);

        let json = opts.to_json().unwrap();
        assert!(json.contains("SequentialScalar"));
        assert_eq!(KfOptions::from_json(&json).unwrap(), opts);

        assert!(KfOptions::from_json("{ not json").is_err());
    }

    #[test]
    fn test_to_json_reports_through_result() {
        let opts = KfOptions::default().with_jacobian_verification(0.25);
        let json: Result<String, KfError> = opts.to_json();
        let value: serde_json::Value = serde_json::from_str(&json.unwrap()).unwrap();
        assert_eq!(value["debug_verify_analytic_jacobians"], true);
        assert_eq!(value["debug_verify_analytic_jacobians_threshold"], 0.25);
        assert_eq!(value["method"], "FullBatchEkf");
    }

    #[test]
    fn test_problem_kind() {
        assert_eq!(Dimensions::new(3, 2, 0, 3).problem(), Problem::Tracking);
        assert_eq!(Dimensions::new(3, 2, 2, 3).problem(), Problem::Slam);
        assert!(Dimensions::new(0, 2, 2, 3).validate().is_err());
    }
}
