use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use brokenstick::calibrate::config::CoverageConfig;
use tempfile::tempdir;

fn run_cli(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_brokenstick"))
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("run brokenstick cli")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "CLI exited with status {:?}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn fit_writes_parameter_table() {
    let tmp = tempdir().expect("temporary directory");
    let table_path = tmp.path().join("fit.tsv");

    let output = run_cli(
        tmp.path(),
        &["fit", "--seed", "1", "--output", table_path.to_str().expect("path str")],
    );
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("slope2"), "stdout was:\n{stdout}");

    let table = fs::read_to_string(&table_path).expect("read parameter table");
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines[0], "name\testimate\tstd_error\tlower\tupper\ttruth\tcovered");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("slope1\t"));
    assert!(lines[2].starts_with("slope2\t"));
}

#[test]
fn fit_places_knots_with_either_strategy() {
    let tmp = tempdir().expect("temporary directory");
    for strategy in ["uniform", "quantile"] {
        let table_path = tmp.path().join(format!("{strategy}.tsv"));
        let output = run_cli(
            tmp.path(),
            &[
                "fit",
                "--seed",
                "4",
                "--num-knots",
                "2",
                "--knot-strategy",
                strategy,
                "--slopes",
                "1.0,-0.5,2.0",
                "--intercept",
                "0.3",
                "--output",
                table_path.to_str().expect("path str"),
            ],
        );
        assert_success(&output);

        let table = fs::read_to_string(&table_path).expect("read parameter table");
        let names: Vec<&str> = table
            .lines()
            .skip(1)
            .filter_map(|line| line.split('\t').next())
            .collect();
        assert_eq!(names, vec!["intercept", "slope1", "slope2", "slope3"]);
    }
}

#[test]
fn coverage_saves_config_that_reproduces_the_study() {
    let tmp = tempdir().expect("temporary directory");
    let config_path = tmp.path().join("study.toml");
    let first_report = tmp.path().join("first.tsv");
    let second_report = tmp.path().join("second.tsv");
    let config_str = config_path.to_str().expect("path str");

    let output = run_cli(
        tmp.path(),
        &[
            "coverage",
            "--replicates",
            "20",
            "--seed",
            "1",
            "--save-config",
            config_str,
            "--output",
            first_report.to_str().expect("path str"),
        ],
    );
    assert_success(&output);

    let config = CoverageConfig::load(config_str).expect("load saved config");
    assert_eq!(config.n_replicates, 20);
    assert_eq!(config.seed, Some(1));
    assert_eq!(config.num_params(), 3);

    let report = fs::read_to_string(&first_report).expect("read coverage report");
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines[0], "parameter\tcovered\treplicates\tproportion");
    assert_eq!(lines.len(), 4);

    // The file wins over the study flags given alongside it.
    let output = run_cli(
        tmp.path(),
        &[
            "coverage",
            "--config",
            config_str,
            "--replicates",
            "500",
            "--seed",
            "99",
            "--output",
            second_report.to_str().expect("path str"),
        ],
    );
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(" of 20 replicates fitted (seed 1"), "stdout was:\n{stdout}");
    assert_eq!(
        fs::read_to_string(&second_report).expect("read coverage report"),
        report
    );
}

#[test]
fn malformed_range_exits_with_status_one() {
    let tmp = tempdir().expect("temporary directory");

    let output = run_cli(tmp.path(), &["coverage", "--replicates", "5", "--param-range", "1"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--param-range"), "stderr was:\n{stderr}");

    let output = run_cli(
        tmp.path(),
        &["coverage", "--replicates", "5", "--param-range=-1e308,1e308"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: "));
}

#[test]
fn version_reports_package_version() {
    let tmp = tempdir().expect("temporary directory");
    let output = run_cli(tmp.path(), &["version"]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("brokenstick {}", env!("CARGO_PKG_VERSION")));
}
