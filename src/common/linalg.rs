//! Linear algebra utilities
//!
//! Dense helpers shared by the prediction, innovation and update stages:
//! symmetric inversion, sub-matrix extraction, `H·C·Hᵗ` products and the
//! symmetry / positivity checks applied to the joint covariance.

use nalgebra::{DMatrix, DVector};

/// Make matrix symmetric
///
/// Ensures a matrix is symmetric by averaging with its transpose
///
/// # Arguments
/// * `matrix` - Matrix to symmetrize
///
/// # Returns
/// Symmetric matrix
pub fn symmetrize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (matrix + matrix.transpose())
}

/// Symmetrize a square matrix in place.
pub fn symmetrize_in_place(matrix: &mut DMatrix<f64>) {
    let n = matrix.nrows();
    for r in 0..n {
        for c in (r + 1)..n {
            let avg = 0.5 * (matrix[(r, c)] + matrix[(c, r)]);
            matrix[(r, c)] = avg;
            matrix[(c, r)] = avg;
        }
    }
}

/// Largest absolute difference between a matrix and its transpose.
///
/// Returns 0 for symmetric matrices, `f64::INFINITY` for non-square input.
pub fn max_asymmetry(matrix: &DMatrix<f64>) -> f64 {
    if !matrix.is_square() {
        return f64::INFINITY;
    }
    let n = matrix.nrows();
    let mut worst = 0.0_f64;
    for r in 0..n {
        for c in (r + 1)..n {
            worst = worst.max((matrix[(r, c)] - matrix[(c, r)]).abs());
        }
    }
    worst
}

/// Inverse of a symmetric positive definite matrix.
///
/// Uses Cholesky (LLᵗ) decomposition for numerical stability and falls back
/// to a general LU inverse when the matrix is not positive definite.
/// Returns `None` if the matrix is singular.
pub fn inverse_symmetric(matrix: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    match matrix.clone().cholesky() {
        Some(chol) => Some(symmetrize(&chol.inverse())),
        None => matrix.clone().try_inverse(),
    }
}

/// Compute `H · C · Hᵗ`.
pub fn multiply_hcht(h: &DMatrix<f64>, c: &DMatrix<f64>) -> DMatrix<f64> {
    h * c * h.transpose()
}

/// Extract the symmetric sub-matrix `M[idxs, idxs]`.
///
/// Row and column `k` of the result are row and column `idxs[k]` of the input.
pub fn extract_submatrix_symmetric(matrix: &DMatrix<f64>, idxs: &[usize]) -> DMatrix<f64> {
    let n = idxs.len();
    DMatrix::from_fn(n, n, |r, c| matrix[(idxs[r], idxs[c])])
}

/// Sum of absolute values of all entries (entry-wise L1 norm).
pub fn sum_abs(matrix: &DMatrix<f64>) -> f64 {
    matrix.iter().map(|v| v.abs()).sum()
}

/// True if every off-diagonal entry is exactly zero.
pub fn is_diagonal(matrix: &DMatrix<f64>) -> bool {
    for r in 0..matrix.nrows() {
        for c in 0..matrix.ncols() {
            if r != c && matrix[(r, c)] != 0.0 {
                return false;
            }
        }
    }
    true
}

/// Index and value of the first negative diagonal entry, if any.
pub fn first_negative_diagonal(matrix: &DMatrix<f64>) -> Option<(usize, f64)> {
    let n = matrix.nrows().min(matrix.ncols());
    (0..n)
        .map(|i| (i, matrix[(i, i)]))
        .find(|&(_, v)| v < 0.0)
}

/// Stack a list of equally sized vectors into one column vector.
pub fn stack_vectors(blocks: &[DVector<f64>]) -> DVector<f64> {
    let len: usize = blocks.iter().map(|b| b.len()).sum();
    let mut out = DVector::zeros(len);
    let mut offset = 0;
    for b in blocks {
        out.rows_mut(offset, b.len()).copy_from(b);
        offset += b.len();
    }
    out
}
