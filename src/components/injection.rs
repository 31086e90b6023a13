//! Landmark injection: grow the state with newly observed landmarks.
//!
//! For an unmatched observation `z` seen from vehicle `xv`, the inverse
//! observation model yields `yn = g(xv, z)` with Jacobians `dyn_dxv` and
//! `dyn_dhn`. The covariance grows by one block row/column:
//!
//! ```text
//! P_yn,v   = dyn_dxv · P_vv
//! P_yn,yq  = dyn_dxv · P_v,yq                      (every existing landmark q)
//! P_yn,yn  = dyn_dxv · P_vv · dyn_dxvᵗ + dyn_dhn · R · dyn_dhnᵗ
//! ```
//!
//! Existing entries of `x` and `P` are copied bit for bit.

use nalgebra::DMatrix;

use crate::common::linalg::{multiply_hcht, symmetrize_in_place};
use crate::filter::config::Problem;
use crate::filter::errors::KfError;
use crate::filter::state::{KalmanState, LandmarkOrigin};
use crate::filter::traits::{KalmanModel, NoiseForm, ObservationBatch};

/// Append every observation flagged [`Association::New`](crate::filter::traits::Association::New).
///
/// Returns the map indices of the injected landmarks, in observation order.
/// A no-op for non-SLAM problems.
pub fn inject_landmarks<M: KalmanModel + ?Sized>(
    model: &mut M,
    problem: Problem,
    state: &mut KalmanState,
    batch: &ObservationBatch,
    r: &DMatrix<f64>,
    cycle: usize,
) -> Result<Vec<usize>, KfError> {
    let mut added = Vec::new();
    if problem == Problem::Tracking {
        return Ok(added);
    }

    let vs = state.vehicle_size();
    let fs = state.feature_size();
    let os = r.nrows();

    for (obs_idx, assoc) in batch.associations.iter().enumerate() {
        if !assoc.is_new() {
            continue;
        }
        let z = &batch.observations[obs_idx];
        let xv = state.vehicle_mean().into_owned();

        let init = model
            .inverse_observation_model(&xv, z)
            .ok_or_else(|| KfError::NotImplemented {
                feature: "inverse observation model".to_string(),
            })?;
        KfError::check_dim(fs, init.mean.len(), "inverse observation model mean")?;
        KfError::check_shape(&init.dyn_dxv, fs, vs, "dyn_dxv")?;

        let n = state.len();
        let p_v_all = state.block(0, 0, vs, n);
        let cross = &init.dyn_dxv * &p_v_all;

        let p_vv = p_v_all.columns(0, vs).into_owned();
        let mut self_cov = multiply_hcht(&init.dyn_dxv, &p_vv);
        match &init.noise {
            NoiseForm::Jacobian(dyn_dhn) => {
                KfError::check_shape(dyn_dhn, fs, os, "dyn_dhn")?;
                self_cov += multiply_hcht(dyn_dhn, r);
            }
            NoiseForm::Precombined(term) => {
                KfError::check_shape(term, fs, fs, "precombined landmark noise")?;
                self_cov += term;
            }
        }
        symmetrize_in_place(&mut self_cov);

        let index = state.append_landmark(
            &init.mean,
            &cross,
            &self_cov,
            LandmarkOrigin {
                cycle,
                observation_index: obs_idx,
            },
        )?;
        model.new_landmark_registered(obs_idx, index);
        log::trace!("[KF] observation {} injected as landmark {}", obs_idx, index);
        added.push(index);
    }

    Ok(added)
}
