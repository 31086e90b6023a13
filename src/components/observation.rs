//! Observation stage: predictions, Jacobians, innovation covariance and the
//! data-association retry protocol.
//!
//! The innovation covariance is assembled block-wise from the sparse
//! observation Jacobian. For predicted landmarks `i`, `j`:
//!
//! ```text
//! S_ij = Hx_i·P_vv·Hx_jᵗ + Hy_i·P_yiv·Hx_jᵗ + Hx_i·P_vyj·Hy_jᵗ + Hy_i·P_yiyj·Hy_jᵗ  (+ R if i == j)
//! ```
//!
//! If data association matches an observation to a landmark that the
//! prediction heuristic left out, the prediction set is grown by exactly
//! the missing landmarks, only their Jacobians and `S` blocks are computed,
//! and association is requested again.

use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use smallvec::SmallVec;

use crate::common::profiler::Profiler;
use crate::filter::config::{KfOptions, Problem};
use crate::filter::errors::{JacobianKind, KfError};
use crate::filter::state::KalmanState;
use crate::filter::traits::{KalmanModel, ObservationBatch};
use crate::reporter::StepReporter;

use super::jacobian::{estimate_jacobian, resolve_jacobian};

/// Everything the update and injection stages need from this cycle's
/// observations.
#[derive(Debug, Clone)]
pub struct ObservationFrame {
    /// Raw prediction for every landmark (or the single system prediction)
    pub all_predictions: Vec<DVector<f64>>,
    /// Prediction set: landmark indices with Jacobians, in `S` block order
    pub predicted: Vec<usize>,
    /// `Hx` per entry of `predicted`
    pub hx: Vec<DMatrix<f64>>,
    /// `Hy` per entry of `predicted`
    pub hy: Vec<DMatrix<f64>>,
    /// Innovation covariance over `predicted`
    pub s: DMatrix<f64>,
    /// Observations and their association
    pub batch: ObservationBatch,
    /// Number of retry passes caused by heuristic misses
    pub retries: usize,
    /// Seconds spent predicting, differentiating and building `S`
    pub prediction_time: f64,
    /// Seconds spent in data association
    pub association_time: f64,
}

impl ObservationFrame {
    /// Position of `landmark` in the prediction set.
    pub fn position_of(&self, landmark: usize) -> Option<usize> {
        self.predicted.iter().position(|&p| p == landmark)
    }

    /// Number of observations that will drive the update.
    pub fn num_matched(&self, problem: Problem) -> usize {
        match problem {
            Problem::Tracking => self.batch.len(),
            Problem::Slam => self.batch.matched().count(),
        }
    }
}

/// Observation Jacobians `(Hx, Hy)` of landmark `landmark` at state `x`.
///
/// In [`Problem::Tracking`] `Hy` is `OBS × 0` and `landmark` is ignored.
pub fn observation_jacobians<M: KalmanModel + ?Sized>(
    model: &M,
    options: &KfOptions,
    problem: Problem,
    x: &DVector<f64>,
    landmark: usize,
) -> Result<(DMatrix<f64>, DMatrix<f64>), KfError> {
    let dims = model.dimensions();
    let (vs, fs, os) = (dims.vehicle, dims.feature, dims.observation);
    let lm = if problem == Problem::Tracking { 0 } else { landmark };

    let use_analytic = options.use_analytic_observation_jacobian;
    let closed_form = if use_analytic || options.debug_verify_analytic_jacobians {
        model.observation_jacobians(x, lm)
    } else {
        None
    };
    let (incr_v, incr_f) = model.observation_jacobian_increments();

    // f(perturbed block) -> prediction, evaluated on an owned copy of x
    let predict_with = |offset: usize, len: usize, block: &DVector<f64>, scratch: &mut DVector<f64>| {
        scratch.rows_mut(offset, len).copy_from(block);
        model
            .observation_model(scratch, &[lm])
            .into_iter()
            .next()
            .unwrap_or_else(|| DVector::zeros(0))
    };

    let hx = resolve_jacobian(
        JacobianKind::ObservationVehicle,
        use_analytic,
        options,
        || closed_form.as_ref().map(|(hx, _)| hx.clone()),
        || {
            let mut scratch = x.clone();
            let xv = x.rows(0, vs).into_owned();
            estimate_jacobian(&xv, &incr_v, |p| predict_with(0, vs, p, &mut scratch))
        },
    )?;
    KfError::check_shape(&hx, os, vs, "observation Jacobian Hx")?;

    let hy = match problem {
        Problem::Tracking => DMatrix::zeros(os, 0),
        Problem::Slam => {
            let offset = vs + lm * fs;
            resolve_jacobian(
                JacobianKind::ObservationFeature,
                use_analytic,
                options,
                || closed_form.as_ref().map(|(_, hy)| hy.clone()),
                || {
                    let mut scratch = x.clone();
                    let y = x.rows(offset, fs).into_owned();
                    estimate_jacobian(&y, &incr_f, |p| predict_with(offset, fs, p, &mut scratch))
                },
            )?
        }
    };
    KfError::check_shape(&hy, os, fs, "observation Jacobian Hy")?;

    Ok((hx, hy))
}

/// Grow `s_old` (covering `predicted[..first_new]`) to cover all of `predicted`.
///
/// Blocks among already-predicted landmarks are copied, not recomputed.
#[allow(clippy::too_many_arguments)]
pub fn extend_innovation_covariance(
    state: &KalmanState,
    problem: Problem,
    predicted: &[usize],
    hx: &[DMatrix<f64>],
    hy: &[DMatrix<f64>],
    s_old: &DMatrix<f64>,
    first_new: usize,
    r: &DMatrix<f64>,
) -> DMatrix<f64> {
    let os = r.nrows();
    let np = predicted.len();

    if problem == Problem::Tracking {
        return &hx[0] * state.covariance() * hx[0].transpose() + r;
    }

    let vs = state.vehicle_size();
    let fs = state.feature_size();
    let p_vv = state.block(0, 0, vs, vs);

    let mut s = DMatrix::zeros(np * os, np * os);
    let kept = first_new * os;
    if kept > 0 {
        s.view_mut((0, 0), (kept, kept))
            .copy_from(&s_old.view((0, 0), (kept, kept)));
    }

    for j in first_new..np {
        let off_j = state.landmark_offset(predicted[j]);
        let p_vyj = state.block(0, off_j, vs, fs);
        for i in 0..=j {
            let off_i = state.landmark_offset(predicted[i]);
            let p_yiv = state.block(off_i, 0, fs, vs);
            let p_yiyj = state.block(off_i, off_j, fs, fs);

            #[rustfmt::skip]
            let mut s_ij = &hx[i] * &p_vv   * hx[j].transpose()
                         + &hy[i] * &p_yiv  * hx[j].transpose()
                         + &hx[i] * &p_vyj  * hy[j].transpose()
                         + &hy[i] * &p_yiyj * hy[j].transpose();

            if i == j {
                s_ij += r;
                crate::common::linalg::symmetrize_in_place(&mut s_ij);
            } else {
                s.view_mut((j * os, i * os), (os, os))
                    .copy_from(&s_ij.transpose());
            }
            s.view_mut((i * os, j * os), (os, os)).copy_from(&s_ij);
        }
    }
    s
}

/// Run the observation stage, including the retry protocol.
pub fn observe<M, R>(
    model: &mut M,
    options: &KfOptions,
    problem: Problem,
    state: &KalmanState,
    r: &DMatrix<f64>,
    reporter: &mut R,
    profiler: &mut Profiler,
) -> Result<ObservationFrame, KfError>
where
    M: KalmanModel + ?Sized,
    R: StepReporter + ?Sized,
{
    let os = model.dimensions().observation;
    let x = state.mean();
    let n_map = state.num_landmarks();
    let mut prediction_time = 0.0;
    let mut association_time = 0.0;

    let mut tic = Instant::now();
    profiler.enter("KF:3.predict all obs");
    let all_predictions = match problem {
        Problem::Tracking => model.observation_model(x, &[0]),
        Problem::Slam => model.observation_model(x, &(0..n_map).collect::<Vec<_>>()),
    };
    profiler.leave("KF:3.predict all obs");
    let expected = if problem == Problem::Tracking { 1 } else { n_map };
    KfError::check_dim(expected, all_predictions.len(), "prediction count")?;
    for pred in &all_predictions {
        KfError::check_dim(os, pred.len(), "predicted observation")?;
    }

    profiler.enter("KF:4.decide pred obs");
    let mut predicted = match problem {
        Problem::Tracking => vec![0],
        Problem::Slam => {
            let mut chosen: Vec<usize> = Vec::new();
            for idx in model.pre_computing_predictions(&all_predictions) {
                if idx >= n_map {
                    return Err(KfError::InvalidAssociation {
                        landmark: idx,
                        num_landmarks: n_map,
                    });
                }
                if !chosen.contains(&idx) {
                    chosen.push(idx);
                }
            }
            chosen
        }
    };
    profiler.leave("KF:4.decide pred obs");
    reporter.on_prediction_set(&predicted);

    let mut hx: Vec<DMatrix<f64>> = Vec::with_capacity(predicted.len());
    let mut hy: Vec<DMatrix<f64>> = Vec::with_capacity(predicted.len());
    let mut s = DMatrix::zeros(0, 0);
    let mut first_new = 0;
    let mut retries = 0;

    loop {
        profiler.enter("KF:5.build Jacobians");
        for &lm in &predicted[first_new..] {
            let (hx_i, hy_i) = observation_jacobians(&*model, options, problem, x, lm)?;
            hx.push(hx_i);
            hy.push(hy_i);
        }
        profiler.leave("KF:5.build Jacobians");

        profiler.enter("KF:6.build S");
        s = extend_innovation_covariance(state, problem, &predicted, &hx, &hy, &s, first_new, r);
        profiler.leave("KF:6.build S");
        prediction_time += tic.elapsed().as_secs_f64();
        reporter.on_innovation_covariance(&predicted, &s);

        let tic_da = Instant::now();
        profiler.enter("KF:7.get obs & DA");
        let batch = model.observations_and_data_association(&all_predictions, &s, &predicted, r);
        profiler.leave("KF:7.get obs & DA");
        association_time += tic_da.elapsed().as_secs_f64();
        validate_batch(&batch, problem, os)?;

        let missing = unpredicted_landmarks(&batch, &predicted, problem, n_map)?;
        if missing.is_empty() {
            return Ok(ObservationFrame {
                all_predictions,
                predicted,
                hx,
                hy,
                s,
                batch,
                retries,
                prediction_time,
                association_time,
            });
        }

        // Every pass adds at least one landmark, so n_map passes suffice
        retries += 1;
        if retries > n_map {
            return Err(KfError::Configuration {
                description: format!(
                    "data association retry did not converge after {} passes",
                    n_map
                ),
            });
        }
        log::warn!(
            "[KF] *Performance Warning*: {} LMs were not correctly predicted by \
             pre_computing_predictions()",
            missing.len()
        );
        reporter.on_retry(&missing);

        first_new = predicted.len();
        predicted.extend_from_slice(&missing);
        tic = Instant::now();
    }
}

fn validate_batch(batch: &ObservationBatch, problem: Problem, os: usize) -> Result<(), KfError> {
    for z in &batch.observations {
        KfError::check_dim(os, z.len(), "observation")?;
    }
    match problem {
        Problem::Tracking => {
            if batch.len() > 1 {
                return Err(KfError::dimension(1, batch.len(), "non-SLAM observation count"));
            }
            if !batch.associations.is_empty() {
                KfError::check_dim(batch.len(), batch.associations.len(), "association count")?;
            }
        }
        Problem::Slam => {
            KfError::check_dim(batch.len(), batch.associations.len(), "association count")?;
        }
    }
    Ok(())
}

/// Landmarks referenced by an association but absent from `predicted`.
fn unpredicted_landmarks(
    batch: &ObservationBatch,
    predicted: &[usize],
    problem: Problem,
    n_map: usize,
) -> Result<SmallVec<[usize; 8]>, KfError> {
    let mut missing = SmallVec::new();
    if problem == Problem::Tracking {
        return Ok(missing);
    }
    for (_, lm) in batch.matched() {
        if lm >= n_map {
            return Err(KfError::InvalidAssociation {
                landmark: lm,
                num_landmarks: n_map,
            });
        }
        if !predicted.contains(&lm) && !missing.contains(&lm) {
            missing.push(lm);
        }
    }
    Ok(missing)
}
