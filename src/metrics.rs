//! Metric derivation
//!
//! This module derives the three district indices from joined rows:
//! - MPI: demographic updates per enrolment
//! - BSI: biometric updates per enrolment
//! - VGS_proxy: `1 - enrolments / max_enrolments`, clamped to [0, 1]
//!
//! VGS_proxy is dataset-relative. `max_enrolments` is the largest enrolment
//! volume among the records scored in this run, so values from two runs over
//! different inputs (or different filters) are not comparable.

use crate::normalizer::NormalizedTable;
use crate::types::{AggregationMode, DistrictPeriodRecord, MetricRecord, Period};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Metric records for one run, with the normalization base used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub mode: AggregationMode,
    /// Denominator of VGS_proxy for this run
    pub max_enrolments: u64,
    /// Sorted by (district, state, period)
    pub records: Vec<MetricRecord>,
}

#[derive(Debug, Default)]
struct Totals {
    enrolments: u64,
    demographic_updates: u64,
    biometric_updates: u64,
}

impl Totals {
    fn add(&mut self, row: &DistrictPeriodRecord) {
        self.enrolments = self.enrolments.saturating_add(row.enrolments);
        self.demographic_updates = self
            .demographic_updates
            .saturating_add(row.demographic_updates);
        self.biometric_updates = self.biometric_updates.saturating_add(row.biometric_updates);
    }
}

/// Engine computing MPI, BSI and VGS_proxy
pub struct MetricEngine;

impl MetricEngine {
    /// Compute metrics for every district (or district-period in monthly mode)
    pub fn compute(table: &NormalizedTable, mode: AggregationMode) -> MetricSet {
        let mut groups: BTreeMap<(String, String, Option<Period>), Totals> = BTreeMap::new();

        for row in &table.records {
            let period = match mode {
                AggregationMode::AllPeriods => None,
                AggregationMode::Monthly => Some(row.period),
            };
            groups
                .entry((row.district.clone(), row.state.clone(), period))
                .or_default()
                .add(row);
        }

        let max_enrolments = groups.values().map(|t| t.enrolments).max().unwrap_or(0);

        let records: Vec<MetricRecord> = groups
            .into_iter()
            .map(|((district, state, period), totals)| MetricRecord {
                district,
                state,
                period,
                enrolments: totals.enrolments,
                demographic_updates: totals.demographic_updates,
                biometric_updates: totals.biometric_updates,
                vgs_proxy: visibility_gap(totals.enrolments, max_enrolments),
                mpi: per_enrolment(totals.demographic_updates, totals.enrolments),
                bsi: per_enrolment(totals.biometric_updates, totals.enrolments),
            })
            .collect();

        info!(
            mode = ?mode,
            records = records.len(),
            max_enrolments,
            "computed metrics"
        );

        MetricSet {
            mode,
            max_enrolments,
            records,
        }
    }
}

/// Ratio of updates to enrolments; a zero base yields zero pressure
pub fn per_enrolment(updates: u64, enrolments: u64) -> f64 {
    if enrolments == 0 {
        0.0
    } else {
        updates as f64 / enrolments as f64
    }
}

/// Inverse visibility against the run's peak enrolment volume.
/// Zero enrolments (including an all-zero dataset) score 1.0.
pub fn visibility_gap(enrolments: u64, max_enrolments: u64) -> f64 {
    if max_enrolments == 0 {
        return 1.0;
    }
    (1.0 - enrolments as f64 / max_enrolments as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(district: &str, period: &str, enrol: u64, demo: u64, bio: u64) -> DistrictPeriodRecord {
        DistrictPeriodRecord {
            district: district.to_string(),
            state: "Test".to_string(),
            period: period.parse().unwrap(),
            enrolments: enrol,
            demographic_updates: demo,
            biometric_updates: bio,
        }
    }

    fn table(records: Vec<DistrictPeriodRecord>) -> NormalizedTable {
        NormalizedTable {
            records,
            excluded_districts: 0,
            unmatched_period_rows: 0,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_reference_example() {
        let input = table(vec![
            row("D1", "2025-03", 100, 10, 5),
            row("D2", "2025-03", 0, 0, 0),
        ]);

        let set = MetricEngine::compute(&input, AggregationMode::AllPeriods);
        let d1 = &set.records[0];
        let d2 = &set.records[1];

        assert_eq!(set.max_enrolments, 100);
        assert!((d1.mpi - 0.10).abs() < 1e-12);
        assert!((d1.bsi - 0.05).abs() < 1e-12);
        assert_eq!(d1.vgs_proxy, 0.0);
        assert_eq!(d2.mpi, 0.0);
        assert_eq!(d2.bsi, 0.0);
        assert_eq!(d2.vgs_proxy, 1.0);
    }

    #[test]
    fn test_all_periods_sums_each_district() {
        let input = table(vec![
            row("D1", "2025-03", 60, 6, 0),
            row("D1", "2025-04", 40, 4, 20),
            row("D2", "2025-03", 50, 0, 0),
        ]);

        let set = MetricEngine::compute(&input, AggregationMode::AllPeriods);

        assert_eq!(set.records.len(), 2);
        assert_eq!(set.records[0].period, None);
        assert_eq!(set.records[0].enrolments, 100);
        assert!((set.records[0].mpi - 0.1).abs() < 1e-12);
        assert!((set.records[0].bsi - 0.2).abs() < 1e-12);
        assert!((set.records[1].vgs_proxy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_monthly_mode_keeps_periods() {
        let input = table(vec![
            row("D1", "2025-03", 60, 6, 0),
            row("D1", "2025-04", 40, 4, 20),
        ]);

        let set = MetricEngine::compute(&input, AggregationMode::Monthly);

        assert_eq!(set.records.len(), 2);
        assert_eq!(set.max_enrolments, 60);
        assert_eq!(set.records[0].period, Some("2025-03".parse().unwrap()));
        assert_eq!(set.records[0].vgs_proxy, 0.0);
        assert!((set.records[1].vgs_proxy - (1.0 - 40.0 / 60.0)).abs() < 1e-12);
    }

    #[test]
    fn test_single_district() {
        let set = MetricEngine::compute(
            &table(vec![row("Only", "2025-03", 42, 1, 1)]),
            AggregationMode::AllPeriods,
        );
        assert_eq!(set.records[0].vgs_proxy, 0.0);

        let set = MetricEngine::compute(
            &table(vec![row("Only", "2025-03", 0, 1, 1)]),
            AggregationMode::AllPeriods,
        );
        assert_eq!(set.records[0].vgs_proxy, 1.0);
        assert_eq!(set.records[0].mpi, 0.0);
    }

    #[test]
    fn test_ties_share_vgs() {
        let set = MetricEngine::compute(
            &table(vec![
                row("A", "2025-03", 30, 0, 0),
                row("B", "2025-03", 30, 0, 0),
                row("C", "2025-03", 90, 0, 0),
            ]),
            AggregationMode::AllPeriods,
        );
        assert_eq!(set.records[0].vgs_proxy, set.records[1].vgs_proxy);
    }

    #[test]
    fn test_bounds_hold() {
        let set = MetricEngine::compute(
            &table(vec![
                row("A", "2025-03", 1, 500, 900),
                row("B", "2025-03", u64::MAX, 0, 0),
                row("C", "2025-03", 0, 3, 3),
            ]),
            AggregationMode::AllPeriods,
        );
        for record in &set.records {
            assert!((0.0..=1.0).contains(&record.vgs_proxy));
            assert!(record.mpi >= 0.0);
            assert!(record.bsi >= 0.0);
        }
    }

    #[test]
    fn test_empty_table() {
        let set = MetricEngine::compute(&table(vec![]), AggregationMode::AllPeriods);
        assert!(set.records.is_empty());
        assert_eq!(set.max_enrolments, 0);
    }
}
