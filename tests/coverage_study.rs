use brokenstick::calibrate::basis::KnotSet;
use brokenstick::calibrate::config::CoverageConfig;
use brokenstick::calibrate::coverage::{run_coverage_study, run_study};
use brokenstick::calibrate::ols::{FitError, fit_default};
use brokenstick::calibrate::simulate::DesignSpec;
use ndarray::{Array1, Array2};

#[test]
fn coverage_is_calibrated_for_bernoulli_design() {
    let report = run_coverage_study(200, 3, 300, (-2.0, 2.0), (0.5, 2.0), Some(20240917)).unwrap();
    assert_eq!(report.failed_replicates, 0);
    for p in &report.parameters {
        assert!(
            (0.90..=0.99).contains(&p.proportion),
            "{} covered in {:.3} of replicates",
            p.name,
            p.proportion
        );
    }
}

#[test]
fn coverage_is_calibrated_for_broken_stick_design() {
    let mut config = CoverageConfig::bernoulli(200, 1, 300, (-2.0, 2.0), (0.2, 1.0), Some(31337));
    config.design = DesignSpec::BrokenStick {
        knots: KnotSet::new(vec![1.0, 2.0]).unwrap(),
        predictor_range: (0.0, 3.0),
        intercept: true,
    };
    let report = run_study(&config).unwrap();
    assert_eq!(report.parameters.len(), 4);
    for p in &report.parameters {
        assert!(
            (0.90..=0.99).contains(&p.proportion),
            "{} covered in {:.3} of replicates",
            p.name,
            p.proportion
        );
    }
}

#[test]
fn identical_columns_signal_singular_design() {
    let n = 40;
    let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
        0 => 1.0,
        _ => (i as f64 * 0.37).sin(),
    });
    let y = Array1::from_shape_fn(n, |i| i as f64);
    assert!(matches!(
        fit_default(x.view(), y.view()),
        Err(FitError::SingularDesignMatrix { .. })
    ));
}

#[test]
fn same_seed_gives_identical_reports() {
    let first = run_coverage_study(60, 4, 50, (-1.0, 1.0), (0.3, 0.9), Some(5)).unwrap();
    let second = run_coverage_study(60, 4, 50, (-1.0, 1.0), (0.3, 0.9), Some(5)).unwrap();
    assert_eq!(first, second);

    let different = run_coverage_study(60, 4, 50, (-1.0, 1.0), (0.3, 0.9), Some(6)).unwrap();
    assert_eq!(different.master_seed, 6);
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let mut config = CoverageConfig::bernoulli(80, 3, 64, (-1.0, 1.0), (0.5, 1.5), Some(99));
    config.parallel = true;
    let parallel = run_study(&config).unwrap();
    config.parallel = false;
    let sequential = run_study(&config).unwrap();
    assert_eq!(parallel, sequential);
}

#[test]
fn config_file_round_trip_reproduces_the_study() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("study.toml");
    let path = path.to_str().unwrap();

    let mut config = CoverageConfig::bernoulli(70, 2, 30, (-1.5, 1.5), (0.4, 0.8), Some(123));
    config.design = DesignSpec::BrokenStick {
        knots: KnotSet::new(vec![0.75]).unwrap(),
        predictor_range: (-1.0, 2.0),
        intercept: false,
    };
    config.save(path).unwrap();
    let loaded = CoverageConfig::load(path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(run_study(&loaded).unwrap(), run_study(&config).unwrap());
}
