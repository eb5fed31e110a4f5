use crate::calibrate::coverage::CoverageReport;
use crate::calibrate::simulate::ParameterTable;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    IoError(#[from] io::Error),
    #[error("Failed to encode report as TSV: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Serialize)]
struct CoverageRow<'a> {
    parameter: &'a str,
    covered: usize,
    replicates: usize,
    proportion: f64,
}

fn tsv_writer<W: Write>(sink: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b'\t').from_writer(sink)
}

/// Writes the fitted-parameter table as TSV with a header row.
pub fn write_parameter_table<W: Write>(table: &ParameterTable, sink: W) -> Result<(), ReportError> {
    let mut writer = tsv_writer(sink);
    for row in &table.rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one row per parameter: name, covered count, successful replicates, proportion.
pub fn write_coverage_report<W: Write>(report: &CoverageReport, sink: W) -> Result<(), ReportError> {
    let mut writer = tsv_writer(sink);
    for p in &report.parameters {
        writer.serialize(CoverageRow {
            parameter: &p.name,
            covered: p.covered,
            replicates: report.successful_replicates,
            proportion: p.proportion,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_parameter_table(table: &ParameterTable, path: &Path) -> Result<(), ReportError> {
    write_parameter_table(table, File::create(path)?)
}

pub fn save_coverage_report(report: &CoverageReport, path: &Path) -> Result<(), ReportError> {
    write_coverage_report(report, File::create(path)?)
}

/// Renders the parameter table for a terminal.
pub fn format_parameter_table(table: &ParameterTable) -> String {
    let mut out = format!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8}\n",
        "parameter", "estimate", "std_error", "lower", "upper", "truth", "covered"
    );
    for row in &table.rows {
        out.push_str(&format!(
            "{:<12} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>8}\n",
            row.name, row.estimate, row.std_error, row.lower, row.upper, row.truth, row.covered
        ));
    }
    out.push_str(&format!(
        "residual sd {:.4} (true {:.4}), z = {}\n",
        table.residual_sd, table.true_sigma, table.confidence_z
    ));
    out
}

/// Renders the coverage report for a terminal.
pub fn format_coverage_report(report: &CoverageReport) -> String {
    let mut out = format!("{:<12} {:>10} {:>10}\n", "parameter", "covered", "proportion");
    for p in &report.parameters {
        out.push_str(&format!(
            "{:<12} {:>10} {:>10.3}\n",
            p.name, p.covered, p.proportion
        ));
    }
    out.push_str(&format!(
        "{} of {} replicates fitted (seed {}, z = {})\n",
        report.successful_replicates,
        report.attempted_replicates,
        report.master_seed,
        report.confidence_z
    ));
    out
}
