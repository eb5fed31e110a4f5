//! Ordinary least squares with coefficient uncertainty.
//!
//! `fit` is the single entry point used both for one-off fits and inside the coverage
//! harness, so it is pure and cheap to call in a loop.

use crate::calibrate::linalg::{self, LeastSquaresFactor, RANK_TOLERANCE};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two-sided 95% normal quantile used when no multiplier is given.
pub const DEFAULT_CONFIDENCE_Z: f64 = 1.96;

#[derive(Error, Debug)]
pub enum FitError {
    #[error(
        "Design matrix has shape [{rows}, {cols}] but the outcome vector has {outcomes} entries; a fit needs matching rows and at least one column."
    )]
    DimensionMismatch {
        rows: usize,
        cols: usize,
        outcomes: usize,
    },

    #[error(
        "The design matrix is singular: {rows} rows, {cols} columns, smallest relative pivot {pivot_ratio:.3e}. Check for duplicated, all-zero, or otherwise collinear columns."
    )]
    SingularDesignMatrix {
        rows: usize,
        cols: usize,
        pivot_ratio: f64,
    },

    #[error("Confidence multiplier must be finite and positive, but was {0}.")]
    InvalidConfidenceMultiplier(f64),

    #[error("Input contains non-finite values ({0}).")]
    NonFiniteInput(&'static str),

    #[error("A linear system solve failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

/// The immutable outcome of a least-squares fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub coefficients: Array1<f64>,
    pub standard_errors: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
    pub confidence_z: f64,
    /// Residual standard deviation with the `n - k` correction.
    pub residual_sd: f64,
    pub residual_df: usize,
    /// `(X'X)^-1`; multiply by `residual_sd^2` for the coefficient covariance.
    pub unscaled_covariance: Array2<f64>,
}

impl FitResult {
    pub fn num_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    /// True iff `truth` lies inside `[lower_j, upper_j]`.
    ///
    /// # Panics
    /// Panics if `j >= self.num_coefficients()`.
    pub fn covers(&self, j: usize, truth: f64) -> bool {
        self.lower[j] <= truth && truth <= self.upper[j]
    }

    /// Covered flags for a full vector of true parameters.
    ///
    /// # Panics
    /// Panics if `truth` does not have one entry per coefficient.
    pub fn coverage_flags(&self, truth: ArrayView1<f64>) -> Vec<bool> {
        assert_eq!(
            truth.len(),
            self.num_coefficients(),
            "one true value per coefficient is required"
        );
        truth
            .iter()
            .enumerate()
            .map(|(j, &t)| self.covers(j, t))
            .collect()
    }

    /// Linear predictor `X beta_hat` for a new design matrix.
    ///
    /// # Panics
    /// Panics if `x` does not have one column per coefficient.
    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients)
    }
}

/// Fits `y ~ X` by least squares with the default 1.96 multiplier.
pub fn fit_default(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<FitResult, FitError> {
    fit(x, y, DEFAULT_CONFIDENCE_Z)
}

/// Fits `y ~ X` by least squares and attaches standard errors and `beta_hat +- z * se`
/// intervals.
///
/// The residual variance uses `n - k` degrees of freedom, so a fit needs strictly more
/// rows than columns.
pub fn fit(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    confidence_z: f64,
) -> Result<FitResult, FitError> {
    let (n, k) = x.dim();
    if k == 0 || n == 0 || y.len() != n {
        return Err(FitError::DimensionMismatch {
            rows: n,
            cols: k,
            outcomes: y.len(),
        });
    }
    if !(confidence_z.is_finite() && confidence_z > 0.0) {
        return Err(FitError::InvalidConfidenceMultiplier(confidence_z));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteInput("design matrix"));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteInput("outcome vector"));
    }
    if n <= k {
        return Err(FitError::SingularDesignMatrix {
            rows: n,
            cols: k,
            pivot_ratio: 0.0,
        });
    }

    let factor = LeastSquaresFactor::new(x)?;
    let pivot_ratio = factor.diagonal_ratio();
    if factor.is_rank_deficient(RANK_TOLERANCE) {
        log::debug!("Rejecting rank-deficient design [{n}, {k}], pivot ratio {pivot_ratio:.3e}");
        return Err(FitError::SingularDesignMatrix {
            rows: n,
            cols: k,
            pivot_ratio,
        });
    }

    let coefficients = factor.solve(y)?;
    let unscaled_covariance = factor.unscaled_covariance()?;

    let residuals = linalg::residuals(x, y, coefficients.view());
    let residual_df = n - k;
    let rss = residuals.dot(&residuals);
    let sigma2 = rss / residual_df as f64;

    let standard_errors = unscaled_covariance
        .diag()
        .mapv(|v| (sigma2 * v.max(0.0)).sqrt());
    let margin = &standard_errors * confidence_z;
    let lower = &coefficients - &margin;
    let upper = &coefficients + &margin;

    Ok(FitResult {
        coefficients,
        standard_errors,
        lower,
        upper,
        confidence_z,
        residual_sd: sigma2.sqrt(),
        residual_df,
        unscaled_covariance,
    })
}
