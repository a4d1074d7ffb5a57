//! Dataset-level KPIs
//!
//! Headline totals, the monthly activity trend across the three datasets,
//! enrolment by state, the age composition of enrolments and the single
//! busiest enrolment day.
//!
//! Update counts only include districts present in the (filtered) enrolment
//! data, the same universe the ranking is computed over.

use crate::config::KeyRules;
use crate::loader::{LoadedDataset, LoadedDatasets};
use crate::normalizer::RecordFilter;
use crate::types::Period;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

type DistrictKey = (Option<String>, String);

/// Totals for one month across all three datasets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyActivity {
    pub period: Period,
    pub enrolments: u64,
    pub demographic_updates: u64,
    pub biometric_updates: u64,
}

/// Enrolment total for one state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTotal {
    pub state: String,
    pub enrolments: u64,
}

/// Enrolments recorded under one count column (an age band)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTotal {
    pub column: String,
    pub count: u64,
}

/// The day with the most enrolments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakDay {
    pub date: NaiveDate,
    pub enrolments: u64,
}

/// Summary of the (filtered) input datasets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub total_enrolments: u64,
    pub total_demographic_updates: u64,
    pub total_biometric_updates: u64,
    pub peak_day: Option<PeakDay>,
    /// Outer join of the three datasets by month, sorted by period
    pub monthly: Vec<MonthlyActivity>,
    /// Sorted by enrolments descending, then state name
    pub states: Vec<StateTotal>,
    /// Enrolment count columns in header order
    pub age_composition: Vec<ColumnTotal>,
}

impl DatasetSummary {
    /// Summarize loaded datasets, honouring the same filter as the join
    pub fn compute(datasets: &LoadedDatasets, rules: &KeyRules, filter: &RecordFilter) -> Self {
        let universe: BTreeSet<DistrictKey> = datasets
            .enrolment
            .records
            .iter()
            .filter(|r| filter.accepts(&r.state, r.period, rules))
            .map(|r| rules.district_key(&r.district, &r.state))
            .collect();

        let enrolment = monthly_totals(&datasets.enrolment, rules, filter, &universe);
        let demographic = monthly_totals(&datasets.demographic, rules, filter, &universe);
        let biometric = monthly_totals(&datasets.biometric, rules, filter, &universe);

        let mut monthly: BTreeMap<Period, MonthlyActivity> = BTreeMap::new();
        for (&period, &count) in &enrolment {
            month_slot(&mut monthly, period).enrolments = count;
        }
        for (&period, &count) in &demographic {
            month_slot(&mut monthly, period).demographic_updates = count;
        }
        for (&period, &count) in &biometric {
            month_slot(&mut monthly, period).biometric_updates = count;
        }

        let mut by_state: BTreeMap<&str, u64> = BTreeMap::new();
        for record in &datasets.enrolment.records {
            if filter.accepts(&record.state, record.period, rules) {
                let total = by_state.entry(record.state.as_str()).or_insert(0);
                *total = total.saturating_add(record.count);
            }
        }
        let mut states: Vec<StateTotal> = by_state
            .into_iter()
            .map(|(state, enrolments)| StateTotal {
                state: state.to_string(),
                enrolments,
            })
            .collect();
        states.sort_by(|a, b| b.enrolments.cmp(&a.enrolments).then_with(|| a.state.cmp(&b.state)));

        Self {
            total_enrolments: saturating_sum(enrolment.values()),
            total_demographic_updates: saturating_sum(demographic.values()),
            total_biometric_updates: saturating_sum(biometric.values()),
            peak_day: peak_day(&datasets.enrolment, rules, filter),
            monthly: monthly.into_values().collect(),
            states,
            age_composition: age_composition(&datasets.enrolment, rules, filter),
        }
    }
}

fn saturating_sum<'a>(values: impl Iterator<Item = &'a u64>) -> u64 {
    values.fold(0, |acc, &v| acc.saturating_add(v))
}

fn month_slot(monthly: &mut BTreeMap<Period, MonthlyActivity>, period: Period) -> &mut MonthlyActivity {
    monthly.entry(period).or_insert(MonthlyActivity {
        period,
        enrolments: 0,
        demographic_updates: 0,
        biometric_updates: 0,
    })
}

fn monthly_totals(
    dataset: &LoadedDataset,
    rules: &KeyRules,
    filter: &RecordFilter,
    universe: &BTreeSet<DistrictKey>,
) -> BTreeMap<Period, u64> {
    let mut totals = BTreeMap::new();
    for record in &dataset.records {
        if filter.accepts(&record.state, record.period, rules)
            && universe.contains(&rules.district_key(&record.district, &record.state))
        {
            let total: &mut u64 = totals.entry(record.period).or_insert(0);
            *total = total.saturating_add(record.count);
        }
    }
    totals
}

/// Per-column enrolment totals, in the order the columns were first seen
fn age_composition(
    dataset: &LoadedDataset,
    rules: &KeyRules,
    filter: &RecordFilter,
) -> Vec<ColumnTotal> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for entry in &dataset.columns {
        if filter.accepts(&entry.state, entry.period, rules) {
            let total = totals.entry(entry.column.as_str()).or_insert(0);
            *total = total.saturating_add(entry.count);
        }
    }

    dataset
        .count_columns
        .iter()
        .map(|column| ColumnTotal {
            column: column.clone(),
            count: totals.get(column.as_str()).copied().unwrap_or(0),
        })
        .collect()
}

/// Busiest day; the earliest date wins a tie
fn peak_day(dataset: &LoadedDataset, rules: &KeyRules, filter: &RecordFilter) -> Option<PeakDay> {
    let mut by_date: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for day in &dataset.daily {
        if filter.accepts(&day.state, Period::of_date(day.date), rules) {
            let total = by_date.entry(day.date).or_insert(0);
            *total = total.saturating_add(day.count);
        }
    }

    let mut best: Option<PeakDay> = None;
    for (date, enrolments) in by_date {
        if best.as_ref().map_or(true, |b| enrolments > b.enrolments) {
            best = Some(PeakDay { date, enrolments });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnCount, DailyCount, DatasetKind, RawCountRecord};
    use pretty_assertions::assert_eq;

    fn record(state: &str, period: &str, count: u64) -> RawCountRecord {
        RawCountRecord {
            district: "D".to_string(),
            state: state.to_string(),
            period: period.parse().unwrap(),
            count,
        }
    }

    fn daily(date: &str, state: &str, count: u64) -> DailyCount {
        DailyCount {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            state: state.to_string(),
            district: "D".to_string(),
            count,
        }
    }

    fn sample() -> LoadedDatasets {
        LoadedDatasets {
            enrolment: LoadedDataset {
                records: vec![
                    record("Goa", "2025-03", 30),
                    record("Kerala", "2025-03", 50),
                    record("Goa", "2025-04", 40),
                ],
                daily: vec![
                    daily("2025-03-02", "Goa", 30),
                    daily("2025-03-02", "Kerala", 20),
                    daily("2025-03-09", "Kerala", 30),
                    daily("2025-04-01", "Goa", 40),
                ],
                ..LoadedDataset::empty(DatasetKind::Enrolment)
            },
            demographic: LoadedDataset {
                records: vec![record("Goa", "2025-05", 7)],
                ..LoadedDataset::empty(DatasetKind::Demographic)
            },
            biometric: LoadedDataset {
                records: vec![record("Kerala", "2025-03", 9)],
                ..LoadedDataset::empty(DatasetKind::Biometric)
            },
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_totals_and_trend() {
        let summary =
            DatasetSummary::compute(&sample(), &KeyRules::default(), &RecordFilter::default());

        assert_eq!(summary.total_enrolments, 120);
        assert_eq!(summary.total_demographic_updates, 7);
        assert_eq!(summary.total_biometric_updates, 9);
        let periods: Vec<String> = summary.monthly.iter().map(|m| m.period.to_string()).collect();
        assert_eq!(periods, vec!["2025-03", "2025-04", "2025-05"]);
        assert_eq!(summary.monthly[0].enrolments, 80);
        assert_eq!(summary.monthly[0].biometric_updates, 9);
        assert_eq!(summary.monthly[2].enrolments, 0);
        assert_eq!(summary.monthly[2].demographic_updates, 7);
    }

    #[test]
    fn test_state_totals_sorted() {
        let summary =
            DatasetSummary::compute(&sample(), &KeyRules::default(), &RecordFilter::default());
        assert_eq!(
            summary.states,
            vec![
                StateTotal {
                    state: "Goa".to_string(),
                    enrolments: 70
                },
                StateTotal {
                    state: "Kerala".to_string(),
                    enrolments: 50
                },
            ]
        );
    }

    #[test]
    fn test_peak_day() {
        let summary =
            DatasetSummary::compute(&sample(), &KeyRules::default(), &RecordFilter::default());
        let peak = summary.peak_day.unwrap();
        assert_eq!(peak.date.to_string(), "2025-03-02");
        assert_eq!(peak.enrolments, 50);
    }

    #[test]
    fn test_filter_applies() {
        let filter = RecordFilter {
            period: None,
            state: Some("KERALA".to_string()),
        };
        let summary = DatasetSummary::compute(&sample(), &KeyRules::default(), &filter);

        assert_eq!(summary.total_enrolments, 50);
        assert_eq!(summary.total_demographic_updates, 0);
        assert_eq!(summary.peak_day.unwrap().enrolments, 30);
    }

    #[test]
    fn test_totals_saturate() {
        let mut input = sample();
        input.enrolment.records = vec![
            record("Goa", "2025-03", u64::MAX),
            record("Goa", "2025-04", 5),
        ];

        let summary = DatasetSummary::compute(&input, &KeyRules::default(), &RecordFilter::default());
        assert_eq!(summary.total_enrolments, u64::MAX);
    }

    #[test]
    fn test_updates_outside_enrolment_universe_not_counted() {
        let mut input = sample();
        input.biometric.records.push(RawCountRecord {
            district: "Ghost".to_string(),
            state: "Kerala".to_string(),
            period: "2025-03".parse().unwrap(),
            count: 1000,
        });

        let summary = DatasetSummary::compute(&input, &KeyRules::default(), &RecordFilter::default());

        assert_eq!(summary.total_biometric_updates, 9);
        assert_eq!(summary.monthly[0].biometric_updates, 9);
    }

    #[test]
    fn test_age_composition_in_header_order() {
        let column = |state: &str, period: &str, column: &str, count: u64| ColumnCount {
            district: "D".to_string(),
            state: state.to_string(),
            period: period.parse().unwrap(),
            column: column.to_string(),
            count,
        };
        let mut input = sample();
        input.enrolment.count_columns = vec![
            "age_0_5".to_string(),
            "age_5_17".to_string(),
            "age_18_greater".to_string(),
        ];
        input.enrolment.columns = vec![
            column("Goa", "2025-03", "age_0_5", 20),
            column("Goa", "2025-03", "age_18_greater", 10),
            column("Kerala", "2025-03", "age_0_5", 50),
        ];

        let summary = DatasetSummary::compute(&input, &KeyRules::default(), &RecordFilter::default());
        assert_eq!(
            summary.age_composition,
            vec![
                ColumnTotal {
                    column: "age_0_5".to_string(),
                    count: 70
                },
                ColumnTotal {
                    column: "age_5_17".to_string(),
                    count: 0
                },
                ColumnTotal {
                    column: "age_18_greater".to_string(),
                    count: 10
                },
            ]
        );

        let goa = RecordFilter {
            period: None,
            state: Some("goa".to_string()),
        };
        let summary = DatasetSummary::compute(&input, &KeyRules::default(), &goa);
        assert_eq!(summary.age_composition[0].count, 20);
    }
}
