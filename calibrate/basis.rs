use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defines the strategy for placing the knots of a broken-stick basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnotStrategy {
    /// Place knots uniformly across the specified data range.
    Uniform,
    /// Place knots at the quantiles of the observed predictor.
    Quantile,
}

/// Describes why a knot sequence was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KnotDefect {
    #[error("knot {index} is not finite ({value})")]
    NonFinite { index: usize, value: f64 },

    #[error("knot {index} ({value}) does not strictly exceed the previous knot ({previous})")]
    NotIncreasing {
        index: usize,
        previous: f64,
        value: f64,
    },

    #[error("{found} knots give too few segments; at least {required} segments are required")]
    TooFewSegments { found: usize, required: usize },
}

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Invalid knot sequence: {0}")]
    InvalidKnots(#[from] KnotDefect),

    #[error("Data range is invalid: start ({0}) must be less than or equal to end ({1}).")]
    InvalidRange(f64, f64),

    #[error("Quantile strategy requires a non-empty data set for quantile calculation.")]
    QuantileDataMissing,

    #[error("Cannot compute {num_quantiles} quantiles from only {num_points} data points.")]
    InsufficientDataForQuantiles {
        num_quantiles: usize,
        num_points: usize,
    },
}

/// An ordered, validated set of knots.
///
/// Knots are finite and strictly increasing. `k` knots split the real line into
/// `k + 1` segments: `(-inf, k_1], (k_1, k_2], ..., (k_k, inf)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct KnotSet {
    knots: Vec<f64>,
}

impl KnotSet {
    pub fn new(knots: Vec<f64>) -> Result<Self, BasisError> {
        for (index, &value) in knots.iter().enumerate() {
            if !value.is_finite() {
                return Err(KnotDefect::NonFinite { index, value }.into());
            }
            if index > 0 {
                let previous = knots[index - 1];
                if value <= previous {
                    return Err(KnotDefect::NotIncreasing {
                        index,
                        previous,
                        value,
                    }
                    .into());
                }
            }
        }
        Ok(Self { knots })
    }

    /// Places `count` knots uniformly inside `range`, excluding the end points.
    pub fn uniform(range: (f64, f64), count: usize) -> Result<Self, BasisError> {
        let (min_val, max_val) = range;
        if min_val > max_val {
            return Err(BasisError::InvalidRange(min_val, max_val));
        }
        let h = (max_val - min_val) / (count as f64 + 1.0);
        Self::new((1..=count).map(|i| min_val + i as f64 * h).collect())
    }

    /// Places `count` knots at the interior quantiles `1/(count+1), ..., count/(count+1)`
    /// of `data`, using linear interpolation (Type 7 in R).
    pub fn quantile(data: ArrayView1<f64>, count: usize) -> Result<Self, BasisError> {
        if count == 0 {
            return Self::new(Vec::new());
        }
        if data.is_empty() {
            return Err(BasisError::QuantileDataMissing);
        }
        if data.len() < count {
            return Err(BasisError::InsufficientDataForQuantiles {
                num_quantiles: count,
                num_points: data.len(),
            });
        }

        let mut sorted_data = data.to_vec();
        sorted_data.sort_unstable_by(|a, b| a.total_cmp(b));

        let n = sorted_data.len();
        let knots = (1..=count)
            .map(|k| {
                let p = k as f64 / (count as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;

                if lower_idx == upper_idx {
                    sorted_data[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted_data[lower_idx] * (1.0 - fraction) + sorted_data[upper_idx] * fraction
                }
            })
            .collect();

        // Ties in the data collapse adjacent quantiles; those are rejected as duplicates.
        Self::new(knots)
    }

    /// Places `count` knots with the given strategy. `data` supplies the quantiles and
    /// `range` the uniform grid; each strategy ignores the other input.
    pub fn place(
        strategy: KnotStrategy,
        data: ArrayView1<f64>,
        range: (f64, f64),
        count: usize,
    ) -> Result<Self, BasisError> {
        match strategy {
            KnotStrategy::Uniform => Self::uniform(range, count),
            KnotStrategy::Quantile => Self::quantile(data, count),
        }
    }

    pub fn len(&self) -> usize {
        self.knots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    pub fn num_segments(&self) -> usize {
        self.knots.len() + 1
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.knots
    }

    /// Fails with `InvalidKnots` unless the set yields at least `required` segments.
    pub fn require_segments(&self, required: usize) -> Result<(), BasisError> {
        if self.num_segments() < required {
            return Err(KnotDefect::TooFewSegments {
                found: self.len(),
                required,
            }
            .into());
        }
        Ok(())
    }

    /// The amount of `x` accumulated inside segment `j`.
    ///
    /// The first segment is anchored at zero: it contributes `min(x, k_1)` without any
    /// clipping from below. Interior segments contribute `clip(x, k_{j-1}, k_j) - k_{j-1}`
    /// and the last segment contributes `max(x, k_last) - k_last`.
    ///
    /// # Panics
    /// Panics if `j >= self.num_segments()`.
    pub fn segment_contribution(&self, x: f64, j: usize) -> f64 {
        let m = self.num_segments();
        debug_assert!(j < m);
        let upper = self.knots.get(j).copied().unwrap_or(f64::INFINITY);
        if j == 0 {
            return x.min(upper);
        }
        let lower = self.knots[j - 1];
        x.clamp(lower, upper) - lower
    }
}

impl TryFrom<Vec<f64>> for KnotSet {
    type Error = BasisError;

    fn try_from(knots: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(knots)
    }
}

impl From<KnotSet> for Vec<f64> {
    fn from(set: KnotSet) -> Self {
        set.knots
    }
}

/// Builds the aggregator design matrix for a broken-stick model.
///
/// Column `j` of row `i` holds the part of `x_i` that falls inside segment `j`, so that
/// `matrix.dot(slopes)` is the continuous piecewise-linear function with slope
/// `slopes[j]` on segment `j` and value zero at the origin.
///
/// # Returns
/// An `Array2<f64>` of shape `[x.len(), knots.num_segments()]`.
pub fn build_aggregator_matrix(x: ArrayView1<f64>, knots: &KnotSet) -> Array2<f64> {
    let num_segments = knots.num_segments();
    Array2::from_shape_fn((x.len(), num_segments), |(i, j)| {
        knots.segment_contribution(x[i], j)
    })
}

/// Validates a raw knot slice and builds the aggregator design matrix.
///
/// `min_segments` is the number of segments the caller needs; passing an empty knot
/// slice with `min_segments > 1` is an error rather than a silent single-column basis.
pub fn create_aggregator_basis(
    x: ArrayView1<f64>,
    knots: &[f64],
    min_segments: usize,
) -> Result<Array2<f64>, BasisError> {
    let knot_set = KnotSet::new(knots.to_vec())?;
    knot_set.require_segments(min_segments)?;
    Ok(build_aggregator_matrix(x, &knot_set))
}

/// Evaluates the continuous piecewise-linear function directly from the knots.
///
/// Equivalent to `build_aggregator_matrix(x, knots).dot(slopes)` row by row, but walks
/// the segments instead of materializing the matrix.
///
/// # Panics
/// Panics unless `slopes` has one entry per segment.
pub fn evaluate_piecewise(x: f64, knots: &KnotSet, slopes: ArrayView1<f64>) -> f64 {
    assert_eq!(
        slopes.len(),
        knots.num_segments(),
        "one slope per segment is required"
    );
    let mut value = slopes[0] * x.min(knots.knots.first().copied().unwrap_or(f64::INFINITY));
    for (j, window) in knots.knots.windows(2).enumerate() {
        if x <= window[0] {
            return value;
        }
        value += slopes[j + 1] * (x.min(window[1]) - window[0]);
    }
    if let Some(&last) = knots.knots.last() {
        if x > last {
            value += slopes[knots.len()] * (x - last);
        }
    }
    value
}

/// Evaluates the piecewise function for every element of `x`.
///
/// # Panics
/// Panics unless `slopes` has one entry per segment.
pub fn evaluate_piecewise_all(
    x: ArrayView1<f64>,
    knots: &KnotSet,
    slopes: ArrayView1<f64>,
) -> Array1<f64> {
    x.mapv(|xi| evaluate_piecewise(xi, knots, slopes))
}
