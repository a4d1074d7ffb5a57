//! Report encoding
//!
//! This module renders pipeline output for the presentation boundary.
//! Floats are written with fixed precision so identical input produces
//! byte-identical output.

use crate::error::PipelineError;
use crate::pipeline::PipelineReport;
use crate::summary::DatasetSummary;
use crate::types::RankedDistrict;
use std::fmt::Write as _;
use std::io::Write;

/// Decimal places for scores in CSV and table output
pub const SCORE_PRECISION: usize = 6;

/// Column width for scores in the text table
const SCORE_WIDTH: usize = SCORE_PRECISION + 5;

const CSV_HEADER: [&str; 13] = [
    "rank",
    "district",
    "state",
    "period",
    "enrolments",
    "demographic_updates",
    "biometric_updates",
    "vgs_proxy",
    "mpi",
    "bsi",
    "composite_score",
    "tier",
    "actions",
];

/// Encode the full report as pretty JSON
pub fn to_json(report: &PipelineReport) -> Result<String, PipelineError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Keep at most `top` rows (all when `None`)
fn limit(ranking: &[RankedDistrict], top: Option<usize>) -> &[RankedDistrict] {
    match top {
        Some(n) => &ranking[..n.min(ranking.len())],
        None => ranking,
    }
}

/// Write the ranking as CSV
pub fn write_csv<W: Write>(
    ranking: &[RankedDistrict],
    top: Option<usize>,
    writer: W,
) -> Result<(), PipelineError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(CSV_HEADER)?;

    for row in limit(ranking, top) {
        let m = &row.metrics;
        csv_writer.write_record([
            row.rank.to_string(),
            m.district.clone(),
            m.state.clone(),
            m.period.map(|p| p.to_string()).unwrap_or_default(),
            m.enrolments.to_string(),
            m.demographic_updates.to_string(),
            m.biometric_updates.to_string(),
            fixed(m.vgs_proxy),
            fixed(m.mpi),
            fixed(m.bsi),
            fixed(row.composite_score),
            row.tier.to_string(),
            row.actions.join(" | "),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Render the ranking as a fixed-width text table
pub fn render_table(ranking: &[RankedDistrict], top: Option<usize>) -> String {
    let rows = limit(ranking, top);
    let district_width = rows
        .iter()
        .map(|r| r.metrics.district.chars().count())
        .max()
        .unwrap_or(0)
        .max("District".len());
    let state_width = rows
        .iter()
        .map(|r| r.metrics.state.chars().count())
        .max()
        .unwrap_or(0)
        .max("State".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:<dw$}  {:<sw$}  {:<7}  {:>10}  {:>sc$}  {:>sc$}  {:>sc$}  {:<6}  Actions",
        "Rank",
        "District",
        "State",
        "Period",
        "Enrolments",
        "VGS",
        "MPI",
        "BSI",
        "Tier",
        dw = district_width,
        sw = state_width,
        sc = SCORE_WIDTH,
    );

    for row in rows {
        let m = &row.metrics;
        let period = m.period.map(|p| p.to_string()).unwrap_or_else(|| "all".to_string());
        let _ = writeln!(
            out,
            "{:>4}  {:<dw$}  {:<sw$}  {:<7}  {:>10}  {:>sc$.p$}  {:>sc$.p$}  {:>sc$.p$}  {:<6}  {}",
            row.rank,
            m.district,
            m.state,
            period,
            m.enrolments,
            m.vgs_proxy,
            m.mpi,
            m.bsi,
            row.tier.as_str(),
            row.actions.join(" | "),
            dw = district_width,
            sw = state_width,
            sc = SCORE_WIDTH,
            p = SCORE_PRECISION,
        );
    }

    out
}

/// Render headline KPIs and the monthly trend
pub fn render_summary(summary: &DatasetSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total enrolments:            {}", summary.total_enrolments);
    let _ = writeln!(out, "Total demographic updates:   {}", summary.total_demographic_updates);
    let _ = writeln!(out, "Total biometric updates:     {}", summary.total_biometric_updates);
    match &summary.peak_day {
        Some(peak) => {
            let _ = writeln!(out, "Peak enrolment day:          {} ({})", peak.date, peak.enrolments);
        }
        None => {
            let _ = writeln!(out, "Peak enrolment day:          N/A");
        }
    }

    let _ = writeln!(out, "\nMonthly activity");
    let _ = writeln!(out, "{:<7}  {:>12}  {:>12}  {:>12}", "Period", "Enrolments", "Demographic", "Biometric");
    for month in &summary.monthly {
        let _ = writeln!(
            out,
            "{:<7}  {:>12}  {:>12}  {:>12}",
            month.period.to_string(),
            month.enrolments,
            month.demographic_updates,
            month.biometric_updates
        );
    }

    if !summary.age_composition.is_empty() {
        let _ = writeln!(out, "\nAge composition of enrolments");
        for band in &summary.age_composition {
            let _ = writeln!(out, "  {:<30} {:>12}", band.column, band.count);
        }
    }

    let _ = writeln!(out, "\nEnrolments by state");
    for state in &summary.states {
        let _ = writeln!(out, "  {:<30} {:>12}", state.state, state.enrolments);
    }

    out
}

fn fixed(value: f64) -> String {
    format!("{:.*}", SCORE_PRECISION, value)
}
