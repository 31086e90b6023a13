//! Joint state vector and covariance.
//!
//! The state is laid out as one vehicle block of length `vehicle_size`
//! followed by `N` landmark blocks of length `feature_size`. Landmarks are
//! only ever appended; existing entries are never reordered or removed.

use nalgebra::{DMatrix, DMatrixView, DVector, DVectorView};

use super::errors::KfError;

/// Where a landmark came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandmarkOrigin {
    /// Filter cycle in which the landmark was injected
    pub cycle: usize,
    /// Index of the observation (within that cycle) it was created from
    pub observation_index: usize,
}

/// Joint mean `x` and covariance `P`.
#[derive(Debug, Clone)]
pub struct KalmanState {
    x: DVector<f64>,
    p: DMatrix<f64>,
    vehicle_size: usize,
    feature_size: usize,
    origins: Vec<LandmarkOrigin>,
}

impl KalmanState {
    /// Create a vehicle-only state.
    pub fn new(
        vehicle_mean: DVector<f64>,
        vehicle_covariance: DMatrix<f64>,
        feature_size: usize,
    ) -> Result<Self, KfError> {
        let n = vehicle_mean.len();
        KfError::check_shape(&vehicle_covariance, n, n, "initial vehicle covariance")?;
        Ok(Self {
            x: vehicle_mean,
            p: vehicle_covariance,
            vehicle_size: n,
            feature_size,
            origins: Vec::new(),
        })
    }

    #[inline]
    pub fn vehicle_size(&self) -> usize {
        self.vehicle_size
    }

    #[inline]
    pub fn feature_size(&self) -> usize {
        self.feature_size
    }

    /// Length of the state vector.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Always false: the vehicle block cannot be empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Number of landmark blocks.
    #[inline]
    pub fn num_landmarks(&self) -> usize {
        if self.feature_size == 0 {
            0
        } else {
            (self.x.len() - self.vehicle_size) / self.feature_size
        }
    }

    #[inline]
    pub fn is_map_empty(&self) -> bool {
        self.x.len() == self.vehicle_size
    }

    /// Offset of landmark `i` in the state vector.
    #[inline]
    pub fn landmark_offset(&self, i: usize) -> usize {
        self.vehicle_size + i * self.feature_size
    }

    #[inline]
    pub fn mean(&self) -> &DVector<f64> {
        &self.x
    }

    #[inline]
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }

    #[inline]
    pub(crate) fn mean_mut(&mut self) -> &mut DVector<f64> {
        &mut self.x
    }

    #[inline]
    pub(crate) fn covariance_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.p
    }

    pub fn vehicle_mean(&self) -> DVectorView<'_, f64> {
        self.x.rows(0, self.vehicle_size)
    }

    pub fn vehicle_covariance(&self) -> DMatrixView<'_, f64> {
        self.p.view((0, 0), (self.vehicle_size, self.vehicle_size))
    }

    pub fn landmark_mean(&self, i: usize) -> Option<DVectorView<'_, f64>> {
        (i < self.num_landmarks()).then(|| self.x.rows(self.landmark_offset(i), self.feature_size))
    }

    pub fn landmark_covariance(&self, i: usize) -> Option<DMatrixView<'_, f64>> {
        (i < self.num_landmarks()).then(|| {
            let off = self.landmark_offset(i);
            self.p.view((off, off), (self.feature_size, self.feature_size))
        })
    }

    /// Copy of the covariance block between state ranges starting at `r` and `c`.
    pub fn block(&self, r: usize, c: usize, rows: usize, cols: usize) -> DMatrix<f64> {
        self.p.view((r, c), (rows, cols)).into_owned()
    }

    /// Overwrite a covariance block and its transposed mirror.
    pub fn set_symmetric_block(&mut self, r: usize, c: usize, block: &DMatrix<f64>) {
        self.p
            .view_mut((r, c), (block.nrows(), block.ncols()))
            .copy_from(block);
        if r != c {
            self.p
                .view_mut((c, r), (block.ncols(), block.nrows()))
                .copy_from(&block.transpose());
        }
    }

    /// Per-landmark provenance, indexed by landmark.
    pub fn landmark_origins(&self) -> &[LandmarkOrigin] {
        &self.origins
    }

    /// Check `len(x) == VEH + N·FEAT` and that `P` matches `x`.
    pub fn check_layout(&self) -> Result<(), KfError> {
        let n = self.x.len();
        KfError::check_shape(&self.p, n, n, "state covariance")?;
        if n < self.vehicle_size {
            return Err(KfError::dimension(self.vehicle_size, n, "state vector length"));
        }
        let map_len = n - self.vehicle_size;
        let expected = if self.feature_size == 0 {
            0
        } else {
            map_len - map_len % self.feature_size
        };
        KfError::check_dim(expected, map_len, "landmark block length")?;
        KfError::check_dim(self.num_landmarks(), self.origins.len(), "landmark origin map")
    }

    /// Append one landmark block.
    ///
    /// `cross` holds the new landmark's covariance against every existing
    /// state entry (`FEAT × len(x)`), `self_cov` its own covariance. The
    /// existing entries of `x` and `P` are copied untouched.
    pub(crate) fn append_landmark(
        &mut self,
        mean: &DVector<f64>,
        cross: &DMatrix<f64>,
        self_cov: &DMatrix<f64>,
        origin: LandmarkOrigin,
    ) -> Result<usize, KfError> {
        let f = self.feature_size;
        let n = self.x.len();
        KfError::check_dim(f, mean.len(), "new landmark mean")?;
        KfError::check_shape(cross, f, n, "new landmark cross covariance")?;
        KfError::check_shape(self_cov, f, f, "new landmark covariance")?;

        let index = self.num_landmarks();

        let mut x = DVector::zeros(n + f);
        x.rows_mut(0, n).copy_from(&self.x);
        x.rows_mut(n, f).copy_from(mean);

        let mut p = DMatrix::zeros(n + f, n + f);
        p.view_mut((0, 0), (n, n)).copy_from(&self.p);
        p.view_mut((n, 0), (f, n)).copy_from(cross);
        p.view_mut((0, n), (n, f)).copy_from(&cross.transpose());
        p.view_mut((n, n), (f, f)).copy_from(self_cov);

        self.x = x;
        self.p = p;
        self.origins.push(origin);
        Ok(index)
    }
}
