//! Prediction stage: propagate the vehicle block through the motion model.
//!
//! Only the vehicle mean, the vehicle covariance block and the
//! vehicle-landmark cross blocks change; landmarks are static.
//!
//! ```text
//! xv'    = f(xv, u)
//! P_vv'  = F · P_vv · Fᵗ + Q
//! P_vyi' = F · P_vyi        (and P_yiv' = P_vyi'ᵗ)
//! ```

use nalgebra::DVector;

use crate::filter::config::KfOptions;
use crate::filter::errors::{JacobianKind, KfError};
use crate::filter::state::KalmanState;
use crate::filter::traits::KalmanModel;

use super::jacobian::{estimate_jacobian, resolve_jacobian};

/// Run the prediction stage.
///
/// Returns `false` if the model asked to skip prediction this cycle. The
/// transition Jacobian and process noise are fully computed and checked
/// before anything in `state` is written.
pub fn predict<M: KalmanModel + ?Sized>(
    model: &M,
    options: &KfOptions,
    state: &mut KalmanState,
    u: &DVector<f64>,
) -> Result<bool, KfError> {
    let vs = state.vehicle_size();
    let xv_prior: DVector<f64> = state.vehicle_mean().into_owned();

    let mut xv = xv_prior.clone();
    let skip = model.transition_model(u, &mut xv);
    if skip {
        log::trace!("[KF] prediction skipped by the transition model");
        return Ok(false);
    }
    KfError::check_dim(vs, xv.len(), "transition model output")?;

    let dfv_dxv = resolve_jacobian(
        JacobianKind::Transition,
        options.use_analytic_transition_jacobian,
        options,
        || model.transition_jacobian(u, &xv_prior),
        || {
            estimate_jacobian(&xv_prior, &model.transition_jacobian_increments(), |x| {
                let mut out = x.clone();
                model.transition_model(u, &mut out);
                out
            })
        },
    )?;
    KfError::check_shape(&dfv_dxv, vs, vs, "transition Jacobian")?;

    let q = model.transition_noise(u, &xv_prior);
    KfError::check_shape(&q, vs, vs, "transition noise")?;

    // Commit
    let n = state.len();
    let p = state.covariance_mut();

    let p_vv = p.view((0, 0), (vs, vs)).into_owned();
    let mut new_vv = &dfv_dxv * p_vv * dfv_dxv.transpose() + q;
    crate::common::linalg::symmetrize_in_place(&mut new_vv);
    p.view_mut((0, 0), (vs, vs)).copy_from(&new_vv);

    if n > vs {
        let cross = &dfv_dxv * p.view((0, vs), (vs, n - vs));
        p.view_mut((0, vs), (vs, n - vs)).copy_from(&cross);
        p.view_mut((vs, 0), (n - vs, vs)).copy_from(&cross.transpose());
    }

    let x = state.mean_mut();
    x.rows_mut(0, vs).copy_from(&xv);
    model.normalize_state(x);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_models::PointSlamModel;
    use nalgebra::DMatrix;

    fn u() -> DVector<f64> {
        DVector::from_vec(vec![0.4, -0.1])
    }

    #[test]
    fn test_prediction_moves_vehicle_and_inflates_its_covariance() {
        let model = PointSlamModel::with_landmarks(&[(2.0, 1.0), (-1.0, 3.0)]);
        let mut state = model.seeded_state();
        let before = state.clone();

        assert!(predict(&model, &KfOptions::default(), &mut state, &u()).unwrap());

        assert!((state.mean()[0] - 0.9).abs() < 1e-12);
        assert!((state.mean()[1] + 0.3).abs() < 1e-12);
        assert_eq!(state.mean().rows(2, 4), before.mean().rows(2, 4));

        let expected_vv = before.vehicle_covariance().into_owned() + &model.q;
        assert!((state.vehicle_covariance().into_owned() - expected_vv).abs().max() < 1e-12);
        // F = I leaves cross blocks and landmark blocks alone
        assert_eq!(state.block(0, 2, 2, 4), before.block(0, 2, 2, 4));
        assert_eq!(state.block(2, 2, 4, 4), before.block(2, 2, 4, 4));
    }

    #[test]
    fn test_cross_blocks_follow_the_transition_jacobian() {
        let mut model = PointSlamModel::with_landmarks(&[(2.0, 1.0)]);
        model.transition_gain = 2.0;
        let mut state = model.seeded_state();
        let before = state.clone();

        predict(&model, &KfOptions::default(), &mut state, &u()).unwrap();

        let expected = before.block(0, 2, 2, 2) * 2.0;
        assert!((state.block(0, 2, 2, 2) - &expected).abs().max() < 1e-12);
        assert!((state.block(2, 0, 2, 2) - expected.transpose()).abs().max() < 1e-12);
        let expected_vv = before.vehicle_covariance().into_owned() * 4.0 + &model.q;
        assert!((state.vehicle_covariance().into_owned() - expected_vv).abs().max() < 1e-12);
    }

    #[test]
    fn test_skipped_prediction_leaves_state_untouched() {
        let mut model = PointSlamModel::with_landmarks(&[(2.0, 1.0)]);
        model.skip_prediction = true;
        let mut state = model.seeded_state();
        let before = state.clone();

        assert!(!predict(&model, &KfOptions::default(), &mut state, &u()).unwrap());
        assert_eq!(state.mean(), before.mean());
        assert_eq!(state.covariance(), before.covariance());
    }

    #[test]
    fn test_transition_mismatch_is_reported_before_commit() {
        let mut model = PointSlamModel::with_landmarks(&[(2.0, 1.0)]);
        model.transition_gain = 1.5;
        let mut state = model.seeded_state();
        let before = state.clone();
        let options = KfOptions::default().with_jacobian_verification(1e-3);

        let err = predict(&model, &options, &mut state, &u()).unwrap_err();
        assert!(matches!(
            err,
            KfError::JacobianMismatch {
                kind: JacobianKind::Transition,
                ..
            }
        ));
        assert_eq!(state.mean(), before.mean());
        assert_eq!(state.covariance(), before.covariance());
    }

    #[test]
    fn test_numeric_transition_jacobian_matches_analytic() {
        let model = PointSlamModel::with_landmarks(&[(2.0, 1.0)]);
        let mut analytic = model.seeded_state();
        let mut numeric = model.seeded_state();

        predict(&model, &KfOptions::default(), &mut analytic, &u()).unwrap();
        let options = KfOptions::default().with_analytic_jacobians(false, true);
        predict(&model, &options, &mut numeric, &u()).unwrap();

        let diff: DMatrix<f64> = analytic.covariance() - numeric.covariance();
        assert!(diff.abs().max() < 1e-8);
    }
}
