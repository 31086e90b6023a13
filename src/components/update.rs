//! Measurement update strategies.
//!
//! - **Full batch** (EKF / IKF): one gain over the stacked matched
//!   observations, `K = P·Hᵗ·S⁻¹`, covariance `P ← (I − K·H)·P` once at the end.
//!   IKF passes keep the original innovation `ỹ` and step
//!   `x ← x₀ + K·(ỹ − H·(x − x₀))`.
//! - **Sequential scalar**: one observation component at a time with a
//!   scalar innovation variance; needs independent (diagonal) sensor noise.
//! - **Scalar IKF**: selectable but not implemented.
//!
//! Unmatched observations (new landmarks) never take part in the update.

use nalgebra::{DMatrix, DVector};

use crate::common::linalg::{
    extract_submatrix_symmetric, first_negative_diagonal, inverse_symmetric, is_diagonal,
    stack_vectors, symmetrize_in_place,
};
use crate::filter::config::{KfMethod, KfOptions, Problem};
use crate::filter::errors::KfError;
use crate::filter::state::KalmanState;
use crate::filter::traits::KalmanModel;

use super::observation::{observation_jacobians, ObservationFrame};

/// One observation taking part in the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MatchedObservation {
    /// Index into the observation batch
    observation: usize,
    /// Landmark index in the map (0 for non-SLAM)
    landmark: usize,
    /// Position in the prediction set / `S` block order
    prediction: usize,
}

fn matched_observations(
    frame: &ObservationFrame,
    problem: Problem,
) -> Result<Vec<MatchedObservation>, KfError> {
    match problem {
        Problem::Tracking => Ok((0..frame.batch.len())
            .map(|observation| MatchedObservation {
                observation,
                landmark: 0,
                prediction: 0,
            })
            .collect()),
        Problem::Slam => frame
            .batch
            .matched()
            .map(|(observation, landmark)| {
                frame
                    .position_of(landmark)
                    .map(|prediction| MatchedObservation {
                        observation,
                        landmark,
                        prediction,
                    })
                    .ok_or_else(|| KfError::Configuration {
                        description: format!(
                            "landmark {} was observed but never predicted",
                            landmark
                        ),
                    })
            })
            .collect(),
    }
}

/// Apply the configured update. Returns `false` if there was nothing to
/// update with, in which case `state` is untouched.
pub fn update<M: KalmanModel + ?Sized>(
    model: &M,
    options: &KfOptions,
    problem: Problem,
    state: &mut KalmanState,
    frame: &ObservationFrame,
    r: &DMatrix<f64>,
) -> Result<bool, KfError> {
    let matched = matched_observations(frame, problem)?;
    if matched.is_empty() {
        return Ok(false);
    }

    match options.method {
        KfMethod::FullBatchEkf | KfMethod::FullBatchIkf => {
            full_batch_update(model, options, problem, state, frame, &matched, r)?
        }
        KfMethod::SequentialScalar => {
            sequential_scalar_update(model, state, frame, &matched, r)?
        }
        KfMethod::ScalarIkf => {
            return Err(KfError::NotImplemented {
                feature: "IKF scalar by scalar".to_string(),
            })
        }
    }
    Ok(true)
}

/// Stacked `H` (`m·OBS × len(x)`) over the matched observations.
fn stacked_jacobian(
    state: &KalmanState,
    problem: Problem,
    matched: &[MatchedObservation],
    hx: &[DMatrix<f64>],
    hy: &[DMatrix<f64>],
    os: usize,
) -> DMatrix<f64> {
    let vs = state.vehicle_size();
    let fs = state.feature_size();
    let mut h = DMatrix::zeros(matched.len() * os, state.len());
    for (k, m) in matched.iter().enumerate() {
        h.view_mut((k * os, 0), (os, vs)).copy_from(&hx[k]);
        if problem == Problem::Slam {
            h.view_mut((k * os, state.landmark_offset(m.landmark)), (os, fs))
                .copy_from(&hy[k]);
        }
    }
    h
}

/// Stacked innovation `z ⊖ h(x)` using the given per-match predictions.
fn stacked_innovation<M: KalmanModel + ?Sized>(
    model: &M,
    frame: &ObservationFrame,
    matched: &[MatchedObservation],
    predictions: &[DVector<f64>],
) -> DVector<f64> {
    let blocks: Vec<DVector<f64>> = matched
        .iter()
        .zip(predictions)
        .map(|(m, pred)| model.subtract_observations(&frame.batch.observations[m.observation], pred))
        .collect();
    stack_vectors(&blocks)
}

/// Two observations of the same landmark share `H·P·Hᵗ` but not the sensor
/// noise: the copied `S_ii` in their off-diagonal block must lose its `R`.
fn remove_shared_noise(s_obs: &mut DMatrix<f64>, matched: &[MatchedObservation], r: &DMatrix<f64>) {
    let os = r.nrows();
    for (a, ma) in matched.iter().enumerate() {
        for (b, mb) in matched.iter().enumerate() {
            if a != b && ma.prediction == mb.prediction {
                let mut blk = s_obs.view_mut((a * os, b * os), (os, os));
                blk -= r;
            }
        }
    }
}

fn full_batch_update<M: KalmanModel + ?Sized>(
    model: &M,
    options: &KfOptions,
    problem: Problem,
    state: &mut KalmanState,
    frame: &ObservationFrame,
    matched: &[MatchedObservation],
    r: &DMatrix<f64>,
) -> Result<(), KfError> {
    let os = r.nrows();
    let n = state.len();
    let iterations = options.update_iterations();

    let x0 = state.mean().clone();
    let p0 = state.covariance().clone();

    // Linearisation at the predicted state, from the observation stage
    let mut hx: Vec<DMatrix<f64>> = matched.iter().map(|m| frame.hx[m.prediction].clone()).collect();
    let mut hy: Vec<DMatrix<f64>> = matched.iter().map(|m| frame.hy[m.prediction].clone()).collect();
    let s_idxs: Vec<usize> = matched
        .iter()
        .flat_map(|m| (0..os).map(move |k| m.prediction * os + k))
        .collect();
    let mut s_obs = extract_submatrix_symmetric(&frame.s, &s_idxs);
    remove_shared_noise(&mut s_obs, matched, r);
    // Innovation against the predicted state, held fixed across IKF iterations
    let predictions: Vec<DVector<f64>> = matched
        .iter()
        .map(|m| frame.all_predictions[m.landmark].clone())
        .collect();
    let ytilde = stacked_innovation(model, frame, matched, &predictions);

    let mut x = x0.clone();
    for iteration in 0..iterations {
        if iteration > 0 {
            // Re-linearise around the current estimate, prior covariance fixed
            hx.clear();
            hy.clear();
            for m in matched {
                let (hx_k, hy_k) = observation_jacobians(model, options, problem, &x, m.landmark)?;
                hx.push(hx_k);
                hy.push(hy_k);
            }
            let h = stacked_jacobian(state, problem, matched, &hx, &hy, os);
            s_obs = &h * &p0 * h.transpose();
            for k in 0..matched.len() {
                let mut blk = s_obs.view_mut((k * os, k * os), (os, os));
                blk += r;
            }
            symmetrize_in_place(&mut s_obs);
        }

        let h = stacked_jacobian(state, problem, matched, &hx, &hy, os);
        let s_inv = inverse_symmetric(&s_obs).ok_or_else(|| KfError::SingularMatrix {
            context: "innovation covariance of matched observations".to_string(),
        })?;
        let k_gain = &p0 * h.transpose() * s_inv;

        x = if iterations == 1 {
            &x0 + &k_gain * &ytilde
        } else {
            // x_{i+1} = x0 + K_i·(ỹ − H_i·(x_i − x0))
            let shift = &h * (&x - &x0);
            &x0 + &k_gain * (&ytilde - shift)
        };

        if iteration + 1 == iterations {
            let i_kh = DMatrix::identity(n, n) - &k_gain * &h;
            let mut p = i_kh * &p0;
            symmetrize_in_place(&mut p);
            if let Some((index, value)) = first_negative_diagonal(&p) {
                return Err(KfError::NegativeVariance {
                    index,
                    value,
                    covariance: p,
                });
            }
            *state.covariance_mut() = p;
        }
    }

    *state.mean_mut() = x;
    Ok(())
}

fn sequential_scalar_update<M: KalmanModel + ?Sized>(
    model: &M,
    state: &mut KalmanState,
    frame: &ObservationFrame,
    matched: &[MatchedObservation],
    r: &DMatrix<f64>,
) -> Result<(), KfError> {
    if !is_diagonal(r) {
        return Err(KfError::NonDiagonalObservationNoise { noise: r.clone() });
    }

    let os = r.nrows();
    let vs = state.vehicle_size();
    let fs = state.feature_size();
    let n = state.len();

    for m in matched {
        let idx_off = state.landmark_offset(m.landmark);
        let hx = &frame.hx[m.prediction];
        let hy = &frame.hy[m.prediction];
        let z = &frame.batch.observations[m.observation];

        for j in 0..os {
            // Innovation against the state updated by all previous scalars
            let pred = model
                .observation_model(state.mean(), &[m.landmark])
                .into_iter()
                .next()
                .ok_or_else(|| KfError::dimension(1, 0, "sequential re-prediction count"))?;
            KfError::check_dim(os, pred.len(), "sequential re-prediction")?;
            let ytilde_j = model.subtract_observations(z, &pred)[j];

            // g = P·H_jᵗ, using only the non-zero columns of H_j
            let p = state.covariance();
            let mut g: DVector<f64> = p.columns(0, vs) * hx.row(j).transpose();
            if fs > 0 {
                g += p.columns(idx_off, fs) * hy.row(j).transpose();
            }

            // S_j = H_j·P·H_jᵗ + R_jj
            let mut s_j = r[(j, j)] + hx.row(j).dot(&g.rows(0, vs).transpose());
            if fs > 0 {
                s_j += hy.row(j).dot(&g.rows(idx_off, fs).transpose());
            }
            if s_j <= 0.0 {
                return Err(KfError::SingularMatrix {
                    context: format!("scalar innovation variance {:.3e} for component {}", s_j, j),
                });
            }

            let k_gain = g / s_j;

            let x = state.mean_mut();
            *x += &k_gain * ytilde_j;

            // P ← P − S_j·K·Kᵗ on the upper triangle, mirrored
            let p = state.covariance_mut();
            for a in 0..n {
                for b in a..n {
                    let v = p[(a, b)] - s_j * k_gain[a] * k_gain[b];
                    p[(a, b)] = v;
                    p[(b, a)] = v;
                }
                if p[(a, a)] < 0.0 {
                    return Err(KfError::NegativeVariance {
                        index: a,
                        value: p[(a, a)],
                        covariance: p.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
