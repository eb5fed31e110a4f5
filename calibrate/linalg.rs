//! Dense least-squares kernels shared by the fitter and the simulation harness.
//!
//! Everything here works on `ndarray` value types and delegates the heavy lifting to
//! LAPACK through `ndarray-linalg`. The normal equations are never formed explicitly:
//! a thin Householder QR of the design matrix gives both the coefficient solve and the
//! unscaled covariance `(X'X)^-1 = R^-1 R^-T`.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Diag, QR, SolveTriangular, UPLO};

/// Threshold on `|R_jj| / ||x_j||` below which column `j` is treated as linearly
/// dependent on the columns before it.
pub const RANK_TOLERANCE: f64 = 1e-10;

/// A thin QR factorization `X = Q R` of a tall design matrix.
///
/// `Q` has shape `[n, k]` with orthonormal columns and `R` is `[k, k]` upper triangular.
#[derive(Debug, Clone)]
pub struct LeastSquaresFactor {
    q: Array2<f64>,
    r: Array2<f64>,
    column_norms: Array1<f64>,
}

impl LeastSquaresFactor {
    /// Factorizes `x`. The caller must ensure `x.nrows() >= x.ncols()`.
    pub fn new(x: ArrayView2<f64>) -> Result<Self, LinalgError> {
        let (q, r) = x.qr()?;
        let column_norms = x
            .columns()
            .into_iter()
            .map(|col| col.dot(&col).sqrt())
            .collect();
        Ok(Self { q, r, column_norms })
    }

    pub fn ncols(&self) -> usize {
        self.r.ncols()
    }

    /// Smallest `|R_jj| / ||x_j||` over the columns.
    ///
    /// `|R_jj|` is the distance of column `j` from the span of the columns before it, so
    /// the ratio is the sine of the angle between them and does not depend on the units
    /// of any column. Zero when a column is identically zero or exactly dependent.
    pub fn diagonal_ratio(&self) -> f64 {
        self.r
            .diag()
            .iter()
            .zip(self.column_norms.iter())
            .map(|(&pivot, &norm)| if norm > 0.0 { pivot.abs() / norm } else { 0.0 })
            .fold(f64::INFINITY, f64::min)
    }

    pub fn is_rank_deficient(&self, tolerance: f64) -> bool {
        !(self.diagonal_ratio() > tolerance)
    }

    /// Least-squares coefficients `R^-1 Q' y`.
    pub fn solve(&self, y: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
        let qty = self.q.t().dot(&y);
        self.r.solve_triangular(UPLO::Upper, Diag::NonUnit, &qty)
    }

    /// The unscaled coefficient covariance `(X'X)^-1`, computed as `R^-1 R^-T`.
    pub fn unscaled_covariance(&self) -> Result<Array2<f64>, LinalgError> {
        let identity = Array2::<f64>::eye(self.ncols());
        let r_inv = self
            .r
            .solve_triangular(UPLO::Upper, Diag::NonUnit, &identity)?;
        Ok(r_inv.dot(&r_inv.t()))
    }
}

/// Residuals `y - X beta`.
pub fn residuals(x: ArrayView2<f64>, y: ArrayView1<f64>, beta: ArrayView1<f64>) -> Array1<f64> {
    &y - &x.dot(&beta)
}
