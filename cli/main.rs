#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::process;

use brokenstick::calibrate::basis::{KnotSet, KnotStrategy};
use brokenstick::calibrate::config::{CoverageConfig, FailurePolicy};
use brokenstick::calibrate::coverage::run_study;
use brokenstick::calibrate::ols::DEFAULT_CONFIDENCE_Z;
use brokenstick::calibrate::report;
use brokenstick::calibrate::simulate::{
    BrokenStickScenario, DEFAULT_BERNOULLI_P, DesignSpec, draw_predictor, fit_scenario,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum KnotStrategyCli {
    Uniform,
    Quantile,
}

impl From<KnotStrategyCli> for KnotStrategy {
    fn from(value: KnotStrategyCli) -> Self {
        match value {
            KnotStrategyCli::Uniform => KnotStrategy::Uniform,
            KnotStrategyCli::Quantile => KnotStrategy::Quantile,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FailurePolicyCli {
    Skip,
    Abort,
}

impl From<FailurePolicyCli> for FailurePolicy {
    fn from(value: FailurePolicyCli) -> Self {
        match value {
            FailurePolicyCli::Skip => FailurePolicy::Skip,
            FailurePolicyCli::Abort => FailurePolicy::Abort,
        }
    }
}

#[derive(Args)]
pub struct FitArgs {
    /// Number of simulated observations
    #[arg(long, default_value = "1000")]
    pub n_obs: usize,

    /// Comma-separated knot locations, strictly increasing
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = [1.0])]
    pub knots: Vec<f64>,

    /// Place this many knots automatically instead of using --knots
    #[arg(long, value_name = "N")]
    pub num_knots: Option<usize>,

    /// Placement rule used with --num-knots
    #[arg(long, value_enum, default_value_t = KnotStrategyCli::Quantile)]
    pub knot_strategy: KnotStrategyCli,

    /// Comma-separated true slope for each segment (one more than the number of knots)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = [0.5, 2.5])]
    pub slopes: Vec<f64>,

    /// True value at the origin; omit to fit without an intercept column
    #[arg(long, allow_hyphen_values = true)]
    pub intercept: Option<f64>,

    /// Noise standard deviation
    #[arg(long, default_value = "0.4")]
    pub sigma: f64,

    /// Lower end of the uniform predictor range
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    pub x_min: f64,

    /// Upper end of the uniform predictor range
    #[arg(long, default_value = "3.0", allow_hyphen_values = true)]
    pub x_max: f64,

    /// Confidence interval multiplier
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_Z)]
    pub z: f64,

    /// Random seed; a fresh one is drawn when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Also write the parameter table as TSV to this path
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct CoverageArgs {
    /// Study configuration (.toml); overrides every other study flag
    #[arg(long)]
    pub config: Option<String>,

    /// Observations per replicate
    #[arg(long, default_value = "200")]
    pub n_obs: usize,

    /// Number of parameters including the intercept (Bernoulli design)
    #[arg(long, default_value = "3")]
    pub n_params: usize,

    /// Success probability of the Bernoulli covariates
    #[arg(long, default_value_t = DEFAULT_BERNOULLI_P)]
    pub p: f64,

    /// Use a broken-stick design with these knots instead of Bernoulli covariates
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub knots: Option<Vec<f64>>,

    /// Predictor range for the broken-stick design, as MIN,MAX
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = [0.0, 3.0])]
    pub predictor_range: Vec<f64>,

    /// Include an intercept column in the broken-stick design
    #[arg(long)]
    pub intercept: bool,

    /// Number of replicates
    #[arg(long, default_value = "300")]
    pub replicates: usize,

    /// Range of the true parameters, as MIN,MAX
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = [-2.0, 2.0])]
    pub param_range: Vec<f64>,

    /// Range of the noise standard deviation, as MIN,MAX (strictly positive)
    #[arg(long, value_delimiter = ',', default_values_t = [0.5, 2.0])]
    pub sigma_range: Vec<f64>,

    /// Confidence interval multiplier
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_Z)]
    pub z: f64,

    /// Master random seed; a fresh one is drawn when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// What to do when a replicate cannot be fitted
    #[arg(long, value_enum, default_value_t = FailurePolicyCli::Skip)]
    pub on_failure: FailurePolicyCli,

    /// Run replicates one after another instead of on the thread pool
    #[arg(long)]
    pub sequential: bool,

    /// Write the effective study configuration to this path
    #[arg(long)]
    pub save_config: Option<String>,

    /// Also write the coverage table as TSV to this path
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "brokenstick",
    about = "Broken-stick regression and confidence interval coverage studies",
    long_about = "Fits piecewise-linear regressions through an aggregator design matrix and \
                 checks, by simulation, that OLS confidence intervals reach their nominal coverage."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one broken-stick dataset and fit it
    #[command(about = "Simulate and fit a broken-stick model (prints the parameter table)")]
    Fit(FitArgs),

    /// Run a Monte Carlo coverage study
    #[command(about = "Run a confidence interval coverage study (prints the coverage table)")]
    Coverage(CoverageArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Coverage(args)) => coverage(args),
        Some(Commands::Version) => {
            println!("brokenstick {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn pair(values: &[f64], flag: &str) -> Result<(f64, f64), Box<dyn std::error::Error>> {
    match values {
        [lo, hi] => Ok((*lo, *hi)),
        _ => Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("--{flag} expects exactly two comma-separated values"),
        ))),
    }
}

fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let predictor_range = (args.x_min, args.x_max);

    let knots = match args.num_knots {
        Some(count) => {
            // Quantile placement looks at a pilot draw from the same predictor distribution.
            let pilot = draw_predictor(args.n_obs, predictor_range, &mut rng)?;
            KnotSet::place(args.knot_strategy.into(), pilot.view(), predictor_range, count)?
        }
        None => KnotSet::new(args.knots)?,
    };
    log::info!(
        "Simulating {} observations with knots {:?} and slopes {:?} (seed {seed})",
        args.n_obs,
        knots.as_slice(),
        args.slopes
    );

    let scenario = BrokenStickScenario {
        n_obs: args.n_obs,
        knots,
        slopes: args.slopes,
        intercept: args.intercept,
        sigma: args.sigma,
        predictor_range,
    };
    let (_, table) = fit_scenario(&scenario, args.z, &mut rng)?;

    print!("{}", report::format_parameter_table(&table));
    if let Some(path) = args.output {
        report::save_parameter_table(&table, &path)?;
        println!("Parameter table saved to: {}", path.display());
    }
    Ok(())
}

fn coverage(args: CoverageArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => {
            println!("Loading study configuration from: {path}");
            CoverageConfig::load(path)?
        }
        None => {
            let design = match &args.knots {
                Some(knots) => DesignSpec::BrokenStick {
                    knots: KnotSet::new(knots.clone())?,
                    predictor_range: pair(&args.predictor_range, "predictor-range")?,
                    intercept: args.intercept,
                },
                None => DesignSpec::Bernoulli {
                    n_params: args.n_params,
                    p: args.p,
                },
            };
            CoverageConfig {
                n_obs: args.n_obs,
                n_replicates: args.replicates,
                param_range: pair(&args.param_range, "param-range")?,
                sigma_range: pair(&args.sigma_range, "sigma-range")?,
                seed: args.seed,
                confidence_z: args.z,
                failure_policy: args.on_failure.into(),
                parallel: !args.sequential,
                design,
            }
        }
    };

    if let Some(path) = &args.save_config {
        config.save(path)?;
        println!("Study configuration saved to: {path}");
    }

    let report = run_study(&config)?;
    print!("{}", report::format_coverage_report(&report));

    if let Some(path) = args.output {
        report::save_coverage_report(&report, &path)?;
        println!("Coverage table saved to: {}", path.display());
    }
    Ok(())
}
