use crate::calibrate::ols::DEFAULT_CONFIDENCE_Z;
use crate::calibrate::simulate::{self, DEFAULT_BERNOULLI_P, DesignSpec, SimulationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// What the coverage harness does when a single replicate cannot be fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure, leave the replicate out of every proportion and carry on.
    #[default]
    Skip,
    /// Stop the study and return the first failure in replicate order.
    Abort,
}

/// The complete description of a coverage study.
/// This is the structure read from and written to the study TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    pub n_obs: usize,
    pub n_replicates: usize,
    pub param_range: (f64, f64),
    pub sigma_range: (f64, f64),
    /// Master seed; every replicate derives its own stream from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default = "default_confidence_z")]
    pub confidence_z: f64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Run replicates on the rayon pool. Results do not depend on this flag.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// How each replicate's design matrix is drawn.
    pub design: DesignSpec,
}

fn default_confidence_z() -> f64 {
    DEFAULT_CONFIDENCE_Z
}

fn default_parallel() -> bool {
    true
}

/// Custom error type for loading, saving and validating study configurations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid study configuration: {field} {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Invalid study configuration: {0}")]
    InvalidSimulation(#[from] SimulationError),
}

impl CoverageConfig {
    /// A Bernoulli-design study with the usual defaults:
    /// `p = 0.25`, `z = 1.96`, skip failed replicates.
    pub fn bernoulli(
        n_obs: usize,
        n_params: usize,
        n_replicates: usize,
        param_range: (f64, f64),
        sigma_range: (f64, f64),
        seed: Option<u64>,
    ) -> Self {
        Self {
            n_obs,
            n_replicates,
            param_range,
            sigma_range,
            seed,
            confidence_z: DEFAULT_CONFIDENCE_Z,
            failure_policy: FailurePolicy::Skip,
            parallel: true,
            design: DesignSpec::Bernoulli {
                n_params,
                p: DEFAULT_BERNOULLI_P,
            },
        }
    }

    pub fn num_params(&self) -> usize {
        self.design.num_params()
    }

    /// Checks everything that can be checked before drawing a single number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_replicates == 0 {
            return Err(ConfigError::InvalidField {
                field: "n_replicates",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.n_obs <= self.num_params() {
            return Err(ConfigError::InvalidField {
                field: "n_obs",
                reason: format!(
                    "({}) must exceed the number of parameters ({})",
                    self.n_obs,
                    self.num_params()
                ),
            });
        }
        if !(self.confidence_z.is_finite() && self.confidence_z > 0.0) {
            return Err(ConfigError::InvalidField {
                field: "confidence_z",
                reason: format!("({}) must be finite and positive", self.confidence_z),
            });
        }
        simulate::check_range("parameters", self.param_range)?;
        simulate::check_sigma_range(self.sigma_range)?;
        self.design.validate()?;
        Ok(())
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::basis::KnotSet;

    #[test]
    fn parses_broken_stick_study_with_defaults() {
        let text = r#"
            n_obs = 250
            n_replicates = 40
            param_range = [-2.0, 2.0]
            sigma_range = [0.5, 1.5]
            seed = 17

            [design]
            kind = "broken_stick"
            knots = [1.0, 2.0]
            predictor_range = [0.0, 3.0]
            intercept = true
        "#;
        let config: CoverageConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.num_params(), 4);
        assert_eq!(config.confidence_z, DEFAULT_CONFIDENCE_Z);
        assert_eq!(config.failure_policy, FailurePolicy::Skip);
        assert!(config.parallel);
        assert_eq!(config.seed, Some(17));
    }

    #[test]
    fn bernoulli_probability_defaults_to_a_quarter() {
        let text = r#"
            n_obs = 100
            n_replicates = 10
            param_range = [0.0, 1.0]
            sigma_range = [1.0, 1.0]
            failure_policy = "abort"

            [design]
            kind = "bernoulli"
            n_params = 3
        "#;
        let config: CoverageConfig = toml::from_str(text).unwrap();
        assert_eq!(
            config.design,
            DesignSpec::Bernoulli {
                n_params: 3,
                p: 0.25
            }
        );
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
    }

    #[test]
    fn unsorted_knots_fail_to_parse() {
        let text = r#"
            n_obs = 100
            n_replicates = 10
            param_range = [0.0, 1.0]
            sigma_range = [1.0, 1.0]

            [design]
            kind = "broken_stick"
            knots = [2.0, 1.0]
            predictor_range = [0.0, 3.0]
        "#;
        assert!(toml::from_str::<CoverageConfig>(text).is_err());
    }

    #[test]
    fn validation_rejects_degenerate_settings() {
        let mut config = CoverageConfig::bernoulli(50, 3, 10, (-1.0, 1.0), (0.5, 1.0), None);
        config.validate().unwrap();

        config.n_replicates = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "n_replicates",
                ..
            })
        ));

        config.n_replicates = 10;
        config.sigma_range = (0.0, 1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSimulation(
                SimulationError::InvalidSigmaRange(..)
            ))
        ));

        config.sigma_range = (0.5, 1.0);
        config.n_obs = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { field: "n_obs", .. })
        ));

        config.n_obs = 50;
        config.design = DesignSpec::BrokenStick {
            knots: KnotSet::new(Vec::new()).unwrap(),
            predictor_range: (0.0, 1.0),
            intercept: false,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSimulation(SimulationError::Basis(_)))
        ));
    }

    #[test]
    fn overflowing_parameter_range_fails_validation() {
        let config = CoverageConfig::bernoulli(50, 3, 10, (-1e308, 1e308), (0.5, 1.0), Some(1));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSimulation(SimulationError::InvalidRange {
                name: "parameters",
                ..
            }))
        ));

        let mut config = CoverageConfig::bernoulli(50, 3, 10, (-1.0, 1.0), (0.5, 1.0), Some(1));
        config.param_range = (1.0, -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn saved_file_is_complete_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.toml");
        let path = path.to_str().unwrap();
        let config = CoverageConfig::bernoulli(120, 4, 15, (-2.0, 2.0), (0.5, 1.5), Some(8));
        config.save(path).unwrap();

        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("[design]"));
        assert!(text.contains("kind = \"bernoulli\""));
        assert_eq!(CoverageConfig::load(path).unwrap(), config);
    }
}
