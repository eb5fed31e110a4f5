//! Synthetic data generation for broken-stick fits and coverage replicates.
//!
//! Every function takes the random source explicitly. Within one call the draws happen in
//! a fixed order, so the same seeded generator always yields the same dataset:
//!
//! 1. design entries (Bernoulli columns row-major, or predictor values in observation order)
//! 2. true parameters in column order
//! 3. the noise standard deviation
//! 4. noise, one draw per observation in order

use crate::calibrate::basis::{self, BasisError, KnotSet};
use crate::calibrate::ols::{self, FitError, FitResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default success probability for the 0/1 covariate columns.
pub const DEFAULT_BERNOULLI_P: f64 = 0.25;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Range for {name} is invalid: ({lo}, {hi}) must be finite with lo <= hi and a finite width.")]
    InvalidRange { name: &'static str, lo: f64, hi: f64 },

    #[error("Noise standard deviation range ({0}, {1}) must be strictly positive.")]
    InvalidSigmaRange(f64, f64),

    #[error("Bernoulli probability must lie in [0, 1], but was {0}.")]
    InvalidProbability(f64),

    #[error("A design needs at least {required} columns, but {found} were requested.")]
    TooFewColumns { found: usize, required: usize },

    #[error("Expected {expected} true parameters, but {found} were supplied.")]
    ParameterCountMismatch { expected: usize, found: usize },

    #[error("Broken-stick basis construction failed: {0}")]
    Basis(#[from] BasisError),

    #[error("Fitting the simulated data failed: {0}")]
    Fit(#[from] FitError),
}

pub(crate) fn check_range(name: &'static str, range: (f64, f64)) -> Result<(), SimulationError> {
    let (lo, hi) = range;
    // Uniform sampling scales by hi - lo, which overflows for ranges near f64::MAX.
    if !(lo.is_finite() && hi.is_finite() && lo <= hi && (hi - lo).is_finite()) {
        return Err(SimulationError::InvalidRange { name, lo, hi });
    }
    Ok(())
}

pub(crate) fn check_sigma_range(range: (f64, f64)) -> Result<(), SimulationError> {
    check_range("sigma", range)?;
    if range.0 <= 0.0 {
        return Err(SimulationError::InvalidSigmaRange(range.0, range.1));
    }
    Ok(())
}

fn uniform_sampler(name: &'static str, range: (f64, f64)) -> Result<Uniform<f64>, SimulationError> {
    check_range(name, range)?;
    Ok(Uniform::new_inclusive(range.0, range.1))
}

/// How the design matrix of a replicate is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesignSpec {
    /// An intercept column followed by `n_params - 1` iid Bernoulli(p) columns.
    Bernoulli {
        n_params: usize,
        #[serde(default = "default_bernoulli_p")]
        p: f64,
    },
    /// An optional intercept column followed by the aggregator basis of a predictor
    /// drawn uniformly from `predictor_range`.
    BrokenStick {
        knots: KnotSet,
        predictor_range: (f64, f64),
        #[serde(default)]
        intercept: bool,
    },
}

fn default_bernoulli_p() -> f64 {
    DEFAULT_BERNOULLI_P
}

impl DesignSpec {
    pub fn num_params(&self) -> usize {
        match self {
            DesignSpec::Bernoulli { n_params, .. } => *n_params,
            DesignSpec::BrokenStick {
                knots, intercept, ..
            } => knots.num_segments() + usize::from(*intercept),
        }
    }

    /// Parameter names in column order.
    pub fn param_names(&self) -> Vec<String> {
        match self {
            DesignSpec::Bernoulli { n_params, .. } => (0..*n_params)
                .map(|j| {
                    if j == 0 {
                        "intercept".to_string()
                    } else {
                        format!("x{j}")
                    }
                })
                .collect(),
            DesignSpec::BrokenStick {
                knots, intercept, ..
            } => broken_stick_names(knots.num_segments(), *intercept),
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        match self {
            DesignSpec::Bernoulli { n_params, p } => {
                if *n_params == 0 {
                    return Err(SimulationError::TooFewColumns {
                        found: 0,
                        required: 1,
                    });
                }
                if !(0.0..=1.0).contains(p) {
                    return Err(SimulationError::InvalidProbability(*p));
                }
                Ok(())
            }
            DesignSpec::BrokenStick {
                knots,
                predictor_range,
                ..
            } => {
                knots.require_segments(2)?;
                check_range("predictor", *predictor_range)
            }
        }
    }

    /// Draws one design matrix of `n_obs` rows.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        n_obs: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>, SimulationError> {
        self.validate()?;
        match self {
            DesignSpec::Bernoulli { n_params, p } => {
                let coin = Bernoulli::new(*p).map_err(|_| SimulationError::InvalidProbability(*p))?;
                let mut design = Array2::zeros((n_obs, *n_params));
                for mut row in design.rows_mut() {
                    row[0] = 1.0;
                    for j in 1..*n_params {
                        row[j] = if coin.sample(rng) { 1.0 } else { 0.0 };
                    }
                }
                Ok(design)
            }
            DesignSpec::BrokenStick {
                knots,
                predictor_range,
                intercept,
            } => {
                let predictor = draw_predictor(n_obs, *predictor_range, rng)?;
                Ok(broken_stick_design(predictor.view(), knots, *intercept))
            }
        }
    }
}

fn broken_stick_names(num_segments: usize, intercept: bool) -> Vec<String> {
    let mut names = Vec::with_capacity(num_segments + usize::from(intercept));
    if intercept {
        names.push("intercept".to_string());
    }
    names.extend((1..=num_segments).map(|j| format!("slope{j}")));
    names
}

/// The aggregator basis, optionally preceded by a column of ones.
pub fn broken_stick_design(x: ArrayView1<f64>, knots: &KnotSet, intercept: bool) -> Array2<f64> {
    let aggregator = basis::build_aggregator_matrix(x, knots);
    if !intercept {
        return aggregator;
    }
    let (n, m) = aggregator.dim();
    let mut design = Array2::ones((n, m + 1));
    design.slice_mut(ndarray::s![.., 1..]).assign(&aggregator);
    design
}

/// Draws `n_obs` predictor values uniformly from `range`.
pub fn draw_predictor<R: Rng + ?Sized>(
    n_obs: usize,
    range: (f64, f64),
    rng: &mut R,
) -> Result<Array1<f64>, SimulationError> {
    let sampler = uniform_sampler("predictor", range)?;
    Ok(Array1::from_iter((0..n_obs).map(|_| sampler.sample(rng))))
}

/// Draws `count` true parameters uniformly from `range`.
pub fn draw_parameters<R: Rng + ?Sized>(
    count: usize,
    range: (f64, f64),
    rng: &mut R,
) -> Result<Array1<f64>, SimulationError> {
    let sampler = uniform_sampler("parameters", range)?;
    Ok(Array1::from_iter((0..count).map(|_| sampler.sample(rng))))
}

/// Draws the replicate's noise standard deviation uniformly from a strictly positive range.
pub fn draw_sigma<R: Rng + ?Sized>(range: (f64, f64), rng: &mut R) -> Result<f64, SimulationError> {
    check_sigma_range(range)?;
    Ok(Uniform::new_inclusive(range.0, range.1).sample(rng))
}

/// Observations `X beta + e` with `e ~ N(0, sigma^2)` drawn in observation order.
pub fn simulate_outcomes<R: Rng + ?Sized>(
    design: ArrayView2<f64>,
    truth: ArrayView1<f64>,
    sigma: f64,
    rng: &mut R,
) -> Result<Array1<f64>, SimulationError> {
    if truth.len() != design.ncols() {
        return Err(SimulationError::ParameterCountMismatch {
            expected: design.ncols(),
            found: truth.len(),
        });
    }
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(SimulationError::InvalidSigmaRange(sigma, sigma));
    }
    let noise =
        Normal::new(0.0, sigma).map_err(|_| SimulationError::InvalidSigmaRange(sigma, sigma))?;
    let mut outcomes = design.dot(&truth);
    outcomes.mapv_inplace(|mean| mean + noise.sample(rng));
    Ok(outcomes)
}

/// A simulated dataset together with the parameters that generated it.
#[derive(Debug, Clone)]
pub struct SimulatedDataset {
    /// The raw predictor, when the design came from one.
    pub predictor: Option<Array1<f64>>,
    pub design: Array2<f64>,
    pub outcomes: Array1<f64>,
    pub truth: Array1<f64>,
    pub sigma: f64,
    pub param_names: Vec<String>,
}

/// One row of the fitted-parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEstimate {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub lower: f64,
    pub upper: f64,
    pub truth: f64,
    pub covered: bool,
}

/// Estimates next to the values that generated the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterTable {
    pub rows: Vec<ParameterEstimate>,
    pub residual_sd: f64,
    pub true_sigma: f64,
    pub confidence_z: f64,
}

impl ParameterTable {
    pub fn from_fit(fit: &FitResult, dataset: &SimulatedDataset) -> Self {
        let rows = dataset
            .param_names
            .iter()
            .enumerate()
            .map(|(j, name)| ParameterEstimate {
                name: name.clone(),
                estimate: fit.coefficients[j],
                std_error: fit.standard_errors[j],
                lower: fit.lower[j],
                upper: fit.upper[j],
                truth: dataset.truth[j],
                covered: fit.covers(j, dataset.truth[j]),
            })
            .collect();
        Self {
            rows,
            residual_sd: fit.residual_sd,
            true_sigma: dataset.sigma,
            confidence_z: fit.confidence_z,
        }
    }

    pub fn row(&self, name: &str) -> Option<&ParameterEstimate> {
        self.rows.iter().find(|row| row.name == name)
    }
}

/// A fully specified broken-stick data-generating process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokenStickScenario {
    pub n_obs: usize,
    pub knots: KnotSet,
    /// One slope per segment.
    pub slopes: Vec<f64>,
    /// Value at the origin; `None` fits and simulates without an intercept column.
    #[serde(default)]
    pub intercept: Option<f64>,
    pub sigma: f64,
    pub predictor_range: (f64, f64),
}

impl BrokenStickScenario {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.slopes.len() != self.knots.num_segments() {
            return Err(SimulationError::ParameterCountMismatch {
                expected: self.knots.num_segments(),
                found: self.slopes.len(),
            });
        }
        check_range("predictor", self.predictor_range)?;
        check_sigma_range((self.sigma, self.sigma))
    }

    pub fn truth(&self) -> Array1<f64> {
        self.intercept
            .iter()
            .chain(self.slopes.iter())
            .copied()
            .collect()
    }

    /// Draws the predictor, builds the design and simulates outcomes.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SimulatedDataset, SimulationError> {
        self.validate()?;
        let predictor = draw_predictor(self.n_obs, self.predictor_range, rng)?;
        let design = broken_stick_design(predictor.view(), &self.knots, self.intercept.is_some());
        let truth = self.truth();
        let outcomes = simulate_outcomes(design.view(), truth.view(), self.sigma, rng)?;
        Ok(SimulatedDataset {
            predictor: Some(predictor),
            design,
            outcomes,
            truth,
            sigma: self.sigma,
            param_names: broken_stick_names(self.knots.num_segments(), self.intercept.is_some()),
        })
    }
}

/// Simulates one dataset from `scenario`, fits it, and tabulates the estimates.
pub fn fit_scenario<R: Rng + ?Sized>(
    scenario: &BrokenStickScenario,
    confidence_z: f64,
    rng: &mut R,
) -> Result<(SimulatedDataset, ParameterTable), SimulationError> {
    let dataset = scenario.simulate(rng)?;
    let fit = ols::fit(dataset.design.view(), dataset.outcomes.view(), confidence_z)?;
    log::info!(
        "Fitted {} parameters on {} observations; residual sd {:.4} (true {:.4})",
        fit.num_coefficients(),
        dataset.outcomes.len(),
        fit.residual_sd,
        dataset.sigma
    );
    let table = ParameterTable::from_fit(&fit, &dataset);
    Ok((dataset, table))
}
