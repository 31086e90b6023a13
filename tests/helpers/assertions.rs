//! Generic assertion functions for numerical comparisons with tolerance

use ekf_slam_rs::KalmanState;
use nalgebra::{DMatrix, DVector};

/// Compare scalar values with tolerance
pub fn assert_scalar_close(actual: f64, expected: f64, tolerance: f64, field_name: &str) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "{}: expected {}, got {} (diff: {}, tolerance: {})",
        field_name,
        expected,
        actual,
        diff,
        tolerance
    );
}

/// Compare DVector with tolerance
pub fn assert_dvector_close(
    actual: &DVector<f64>,
    expected: &DVector<f64>,
    tolerance: f64,
    field_name: &str,
) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{}: dimension mismatch (actual: {}, expected: {})",
        field_name,
        actual.len(),
        expected.len()
    );

    for i in 0..actual.len() {
        let diff = (actual[i] - expected[i]).abs();
        assert!(
            diff <= tolerance,
            "{}[{}]: expected {}, got {} (diff: {}, tolerance: {})",
            field_name,
            i,
            expected[i],
            actual[i],
            diff,
            tolerance
        );
    }
}

/// Compare DMatrix with tolerance
pub fn assert_dmatrix_close(
    actual: &DMatrix<f64>,
    expected: &DMatrix<f64>,
    tolerance: f64,
    field_name: &str,
) {
    assert_eq!(
        actual.shape(),
        expected.shape(),
        "{}: shape mismatch",
        field_name
    );

    for row in 0..actual.nrows() {
        for col in 0..actual.ncols() {
            let diff = (actual[(row, col)] - expected[(row, col)]).abs();
            assert!(
                diff <= tolerance,
                "{}[{},{}]: expected {}, got {} (diff: {}, tolerance: {})",
                field_name,
                row,
                col,
                expected[(row, col)],
                actual[(row, col)],
                diff,
                tolerance
            );
        }
    }
}

/// `max|P − Pᵗ| <= tolerance`
pub fn assert_symmetric(matrix: &DMatrix<f64>, tolerance: f64, field_name: &str) {
    let asym = (matrix - matrix.transpose()).abs().max();
    assert!(
        asym <= tolerance,
        "{}: asymmetry {} exceeds tolerance {}",
        field_name,
        asym,
        tolerance
    );
}

/// `len(x) == VEH + N·FEAT` and `P` is `len(x) × len(x)`.
pub fn assert_layout(state: &KalmanState, field_name: &str) {
    let expected = state.vehicle_size() + state.num_landmarks() * state.feature_size();
    assert_eq!(state.len(), expected, "{}: state length", field_name);
    assert_eq!(
        state.covariance().shape(),
        (expected, expected),
        "{}: covariance shape",
        field_name
    );
    assert!(state.check_layout().is_ok(), "{}: layout check", field_name);
}

/// The first `n` entries of `x` and the leading `n × n` block of `P` are
/// bit-identical between `before` and `after`.
pub fn assert_prefix_identical(before: &KalmanState, after: &KalmanState, field_name: &str) {
    let n = before.len();
    assert!(after.len() >= n, "{}: state shrank", field_name);
    for i in 0..n {
        assert_eq!(
            before.mean()[i].to_bits(),
            after.mean()[i].to_bits(),
            "{}: x[{}] changed",
            field_name,
            i
        );
        for j in 0..n {
            assert_eq!(
                before.covariance()[(i, j)].to_bits(),
                after.covariance()[(i, j)].to_bits(),
                "{}: P[{},{}] changed",
                field_name,
                i,
                j
            );
        }
    }
}
