//! Finite-difference Jacobians and analytic cross-verification.
//!
//! [`estimate_jacobian`] differentiates any `f: Rⁿ → Rᵐ` by central
//! differences on an owned scratch copy of the base point. [`resolve_jacobian`]
//! applies the engine's policy: analytic first, numeric fallback, optional
//! cross-check of the two.

use nalgebra::{DMatrix, DVector};

use crate::common::linalg::sum_abs;
use crate::filter::config::KfOptions;
use crate::filter::errors::{JacobianKind, KfError};

/// Numeric Jacobian of `f` at `x0` by central differences.
///
/// Column `k` is `(f(x0 + δ_k e_k) − f(x0 − δ_k e_k)) / (2 δ_k)`. `x0` is never
/// mutated; `f` is evaluated on a private scratch vector.
///
/// # Errors
/// `DimensionMismatch` if `increments` does not match `x0` or `f` changes its
/// output length; `Configuration` if an increment is zero or non-finite.
pub fn estimate_jacobian<F>(
    x0: &DVector<f64>,
    increments: &DVector<f64>,
    mut f: F,
) -> Result<DMatrix<f64>, KfError>
where
    F: FnMut(&DVector<f64>) -> DVector<f64>,
{
    let n = x0.len();
    KfError::check_dim(n, increments.len(), "Jacobian increments")?;
    if let Some(bad) = increments.iter().find(|d| **d == 0.0 || !d.is_finite()) {
        return Err(KfError::Configuration {
            description: format!("invalid finite-difference increment {}", bad),
        });
    }

    let m = f(x0).len();
    let mut jac = DMatrix::zeros(m, n);
    let mut scratch = x0.clone();

    for k in 0..n {
        let delta = increments[k];

        scratch[k] = x0[k] + delta;
        let f_plus = f(&scratch);
        scratch[k] = x0[k] - delta;
        let f_minus = f(&scratch);
        scratch[k] = x0[k];

        KfError::check_dim(m, f_plus.len(), "perturbed function output")?;
        KfError::check_dim(m, f_minus.len(), "perturbed function output")?;

        let inv_2d = 0.5 / delta;
        jac.set_column(k, &((f_plus - f_minus) * inv_2d));
    }

    Ok(jac)
}

/// Fail if `numeric` and `analytic` differ by more than `threshold` (entry-wise L1).
pub fn verify_jacobian(
    kind: JacobianKind,
    numeric: &DMatrix<f64>,
    analytic: &DMatrix<f64>,
    threshold: f64,
) -> Result<(), KfError> {
    KfError::check_shape(
        analytic,
        numeric.nrows(),
        numeric.ncols(),
        &format!("analytic {} Jacobian", kind),
    )?;
    let difference = sum_abs(&(numeric - analytic));
    if difference > threshold {
        log::error!(
            "[KF] analytic {} Jacobian is wrong:\n numeric:{}\n analytic:{}\n diff:{}",
            kind,
            numeric,
            analytic,
            numeric - analytic
        );
        return Err(KfError::JacobianMismatch {
            kind,
            difference,
            threshold,
            numeric: numeric.clone(),
            analytic: analytic.clone(),
        });
    }
    Ok(())
}

/// Pick a Jacobian according to the options.
///
/// The analytic form is queried when `use_analytic` is set or verification
/// is on. The numeric estimate is computed when the analytic form is off or
/// missing, or when verification is on; whenever it is computed it is the
/// one returned.
pub(crate) fn resolve_jacobian<A, N>(
    kind: JacobianKind,
    use_analytic: bool,
    options: &KfOptions,
    analytic: A,
    numeric: N,
) -> Result<DMatrix<f64>, KfError>
where
    A: FnOnce() -> Option<DMatrix<f64>>,
    N: FnOnce() -> Result<DMatrix<f64>, KfError>,
{
    let verify = options.debug_verify_analytic_jacobians;
    let closed_form = if use_analytic || verify {
        analytic()
    } else {
        None
    };

    match closed_form {
        Some(exact) if use_analytic && !verify => Ok(exact),
        closed_form => {
            let estimate = numeric()?;
            if let (true, Some(exact)) = (verify, closed_form.as_ref()) {
                verify_jacobian(
                    kind,
                    &estimate,
                    exact,
                    options.debug_verify_analytic_jacobians_threshold,
                )?;
            }
            Ok(estimate)
        }
    }
}
