//! Monte Carlo coverage studies.
//!
//! Each replicate draws a design, true parameters, a noise level and outcomes, fits the
//! model by OLS and records whether every true parameter landed inside its interval.
//! Replicates own independent random streams derived from one master seed, so the report
//! is the same whether replicates run sequentially or on the rayon pool.

use crate::calibrate::config::{ConfigError, CoverageConfig, FailurePolicy};
use crate::calibrate::ols;
use crate::calibrate::simulate::{self, SimulationError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Replicate {replicate} failed: {source}")]
    ReplicateFailed {
        replicate: usize,
        #[source]
        source: SimulationError,
    },

    #[error("All {attempted} replicates failed; no coverage can be reported.")]
    NoSuccessfulReplicates { attempted: usize },
}

/// Coverage tally for one parameter position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCoverage {
    pub name: String,
    pub covered: usize,
    /// `covered / successful_replicates`.
    pub proportion: f64,
}

/// The aggregated outcome of a coverage study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub parameters: Vec<ParameterCoverage>,
    pub attempted_replicates: usize,
    pub successful_replicates: usize,
    pub failed_replicates: usize,
    pub master_seed: u64,
    pub confidence_z: f64,
}

impl CoverageReport {
    pub fn proportion(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.proportion)
    }

    /// Parameter name to covered proportion, in column order.
    pub fn proportions(&self) -> Vec<(String, f64)> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.proportion))
            .collect()
    }
}

/// Derives the seed of replicate `replicate` from the master seed (a SplitMix64 step).
pub fn replicate_seed(master: u64, replicate: usize) -> u64 {
    let mut z = master
        .wrapping_add((replicate as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Runs one replicate and returns the covered flag of each parameter.
pub fn run_replicate(
    config: &CoverageConfig,
    master_seed: u64,
    replicate: usize,
) -> Result<Vec<bool>, SimulationError> {
    let mut rng = StdRng::seed_from_u64(replicate_seed(master_seed, replicate));
    let design = config.design.draw(config.n_obs, &mut rng)?;
    let truth = simulate::draw_parameters(design.ncols(), config.param_range, &mut rng)?;
    let sigma = simulate::draw_sigma(config.sigma_range, &mut rng)?;
    let outcomes = simulate::simulate_outcomes(design.view(), truth.view(), sigma, &mut rng)?;
    let fit = ols::fit(design.view(), outcomes.view(), config.confidence_z)?;
    Ok(fit.coverage_flags(truth.view()))
}

/// Runs the coverage study described by `config`.
pub fn run_study(config: &CoverageConfig) -> Result<CoverageReport, StudyError> {
    config.validate()?;

    let master_seed = config.seed.unwrap_or_else(rand::random);
    let names = config.design.param_names();
    log::info!(
        "Starting coverage study: {} replicates of {} observations x {} parameters (seed {}, z = {}, {})",
        config.n_replicates,
        config.n_obs,
        names.len(),
        master_seed,
        config.confidence_z,
        if config.parallel { "parallel" } else { "sequential" }
    );

    let outcomes: Vec<Result<Vec<bool>, SimulationError>> = if config.parallel {
        (0..config.n_replicates)
            .into_par_iter()
            .map(|r| run_replicate(config, master_seed, r))
            .collect()
    } else {
        (0..config.n_replicates)
            .map(|r| run_replicate(config, master_seed, r))
            .collect()
    };

    let mut covered = vec![0_usize; names.len()];
    let mut successful = 0_usize;
    let mut failed = 0_usize;
    for (replicate, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(flags) => {
                log::debug!("Replicate {replicate}: covered {flags:?}");
                successful += 1;
                for (count, flag) in covered.iter_mut().zip(flags) {
                    *count += usize::from(flag);
                }
            }
            Err(source) => match config.failure_policy {
                FailurePolicy::Abort => {
                    log::error!("Replicate {replicate} failed, aborting study: {source}");
                    return Err(StudyError::ReplicateFailed { replicate, source });
                }
                FailurePolicy::Skip => {
                    log::warn!("Skipping replicate {replicate}: {source}");
                    failed += 1;
                }
            },
        }
    }

    if successful == 0 {
        return Err(StudyError::NoSuccessfulReplicates {
            attempted: config.n_replicates,
        });
    }

    let parameters = names
        .into_iter()
        .zip(covered)
        .map(|(name, covered)| ParameterCoverage {
            proportion: covered as f64 / successful as f64,
            name,
            covered,
        })
        .collect::<Vec<_>>();

    for p in &parameters {
        log::info!("{}: covered {}/{} ({:.3})", p.name, p.covered, successful, p.proportion);
    }
    if failed > 0 {
        log::warn!("{failed} of {} replicates failed and were skipped", config.n_replicates);
    }

    Ok(CoverageReport {
        parameters,
        attempted_replicates: config.n_replicates,
        successful_replicates: successful,
        failed_replicates: failed,
        master_seed,
        confidence_z: config.confidence_z,
    })
}

/// Bernoulli-design coverage study with `z = 1.96`, sequential execution and failed
/// replicates skipped.
pub fn run_coverage_study(
    n_obs: usize,
    n_params: usize,
    n_replicates: usize,
    param_range: (f64, f64),
    sigma_range: (f64, f64),
    seed: Option<u64>,
) -> Result<CoverageReport, StudyError> {
    let mut config =
        CoverageConfig::bernoulli(n_obs, n_params, n_replicates, param_range, sigma_range, seed);
    config.parallel = false;
    run_study(&config)
}
