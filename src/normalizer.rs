//! District-period join
//!
//! This module aligns the three datasets on a common (district, period) key.
//! - Enrolment rows define the universe of (district, period) keys
//! - Demographic and biometric counts are left-joined; absence means zero
//! - District names are folded per [`KeyRules`] and spelling merges logged
//! - Districts seen only in update datasets are excluded and counted

use crate::config::KeyRules;
use crate::loader::{LoadedDataset, LoadedDatasets};
use crate::types::{Diagnostic, DistrictPeriodRecord, Period, RawCountRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Restricts which records enter the join
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub period: Option<Period>,
    /// Compared after key normalization
    pub state: Option<String>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.period.is_none() && self.state.is_none()
    }

    /// Whether a record with this state and period passes
    pub fn accepts(&self, state: &str, period: Period, rules: &KeyRules) -> bool {
        if self.period.is_some_and(|p| p != period) {
            return false;
        }
        match &self.state {
            Some(wanted) => rules.normalize(wanted) == rules.normalize(state),
            None => true,
        }
    }
}

/// The joined table plus what the join had to say about its inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTable {
    /// One row per enrolment (district, period), sorted by (district, state, period)
    pub records: Vec<DistrictPeriodRecord>,
    /// Distinct districts dropped because enrolment data never mentions them
    pub excluded_districts: usize,
    /// Update rows for known districts in periods with no enrolment row
    pub unmatched_period_rows: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Folded join key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DistrictKey {
    state: Option<String>,
    district: String,
}

impl DistrictKey {
    fn of(record: &RawCountRecord, rules: &KeyRules) -> Self {
        let (state, district) = rules.district_key(&record.district, &record.state);
        Self { state, district }
    }

    fn label(&self) -> String {
        match &self.state {
            Some(state) => format!("{state}/{}", self.district),
            None => self.district.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct JoinedCounts {
    enrolments: u64,
    demographic_updates: u64,
    biometric_updates: u64,
}

/// Spellings and states seen for one key
#[derive(Debug, Default)]
struct KeyNames {
    spellings: BTreeSet<String>,
    states: BTreeMap<String, u64>,
}

/// Normalizer for joining loaded datasets into district-period rows
pub struct Normalizer;

impl Normalizer {
    /// Join the three datasets on (district, period)
    pub fn join(
        datasets: &LoadedDatasets,
        rules: &KeyRules,
        filter: &RecordFilter,
    ) -> NormalizedTable {
        let mut diagnostics = Vec::new();
        let mut rows: BTreeMap<(DistrictKey, Period), JoinedCounts> = BTreeMap::new();
        let mut names: BTreeMap<DistrictKey, KeyNames> = BTreeMap::new();

        for record in filtered(&datasets.enrolment, rules, filter) {
            let key = DistrictKey::of(record, rules);
            let entry = names.entry(key.clone()).or_default();
            entry.spellings.insert(record.district.clone());
            *entry.states.entry(record.state.clone()).or_insert(0) += record.count;

            let row = rows.entry((key, record.period)).or_default();
            row.enrolments = row.enrolments.saturating_add(record.count);
        }

        let mut excluded: BTreeSet<String> = BTreeSet::new();
        let mut unmatched_period_rows = 0;

        for (dataset, is_demographic) in [(&datasets.demographic, true), (&datasets.biometric, false)]
        {
            let mut unmatched = 0;
            for record in filtered(dataset, rules, filter) {
                let key = DistrictKey::of(record, rules);
                let Some(entry) = names.get_mut(&key) else {
                    excluded.insert(key.label());
                    continue;
                };
                entry.spellings.insert(record.district.clone());

                match rows.get_mut(&(key, record.period)) {
                    Some(row) if is_demographic => {
                        row.demographic_updates =
                            row.demographic_updates.saturating_add(record.count)
                    }
                    Some(row) => {
                        row.biometric_updates = row.biometric_updates.saturating_add(record.count)
                    }
                    None => unmatched += 1,
                }
            }

            if unmatched > 0 {
                let diag = Diagnostic::UnmatchedPeriodRows {
                    dataset: dataset.kind,
                    count: unmatched,
                };
                warn!("{diag}");
                diagnostics.push(diag);
                unmatched_period_rows += unmatched;
            }
        }

        // Display name and state per key
        let mut resolved: BTreeMap<DistrictKey, (String, String)> = BTreeMap::new();
        for (key, key_names) in &names {
            let display = key_names
                .spellings
                .iter()
                .next()
                .cloned()
                .unwrap_or_else(|| key.district.clone());

            if key_names.spellings.len() > 1 {
                let diag = Diagnostic::DistrictMerged {
                    key: key.label(),
                    variants: key_names.spellings.iter().cloned().collect(),
                };
                warn!("{diag}");
                diagnostics.push(diag);
            }

            let state = dominant_state(&key_names.states);
            if key_names.states.len() > 1 {
                let diag = Diagnostic::StateConflict {
                    district: display.clone(),
                    states: key_names.states.keys().cloned().collect(),
                    kept: state.clone(),
                };
                warn!("{diag}");
                diagnostics.push(diag);
            }

            resolved.insert(key.clone(), (display, state));
        }

        if !excluded.is_empty() {
            let diag = Diagnostic::ExcludedDistricts {
                count: excluded.len(),
                districts: excluded.iter().cloned().collect(),
            };
            warn!("{diag}");
            diagnostics.push(diag);
        }

        let mut records: Vec<DistrictPeriodRecord> = rows
            .into_iter()
            .filter_map(|((key, period), counts)| {
                let (district, state) = resolved.get(&key)?.clone();
                Some(DistrictPeriodRecord {
                    district,
                    state,
                    period,
                    enrolments: counts.enrolments,
                    demographic_updates: counts.demographic_updates,
                    biometric_updates: counts.biometric_updates,
                })
            })
            .collect();
        records.sort_by(|a, b| {
            (&a.district, &a.state, a.period).cmp(&(&b.district, &b.state, b.period))
        });

        info!(
            rows = records.len(),
            districts = names.len(),
            excluded = excluded.len(),
            "joined datasets"
        );

        NormalizedTable {
            records,
            excluded_districts: excluded.len(),
            unmatched_period_rows,
            diagnostics,
        }
    }
}

fn filtered<'a>(
    dataset: &'a LoadedDataset,
    rules: &'a KeyRules,
    filter: &'a RecordFilter,
) -> impl Iterator<Item = &'a RawCountRecord> + 'a {
    dataset
        .records
        .iter()
        .filter(move |r| filter.accepts(&r.state, r.period, rules))
}

/// State with the most enrolments; ties go to the alphabetically first
fn dominant_state(states: &BTreeMap<String, u64>) -> String {
    let mut best: Option<(&String, u64)> = None;
    for (state, &count) in states {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((state, count));
        }
    }
    best.map(|(state, _)| state.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatasetKind;
    use pretty_assertions::assert_eq;

    fn record(district: &str, state: &str, period: &str, count: u64) -> RawCountRecord {
        RawCountRecord {
            district: district.to_string(),
            state: state.to_string(),
            period: period.parse().unwrap(),
            count,
        }
    }

    fn dataset(kind: DatasetKind, records: Vec<RawCountRecord>) -> LoadedDataset {
        LoadedDataset {
            records,
            ..LoadedDataset::empty(kind)
        }
    }

    fn datasets(
        enrolment: Vec<RawCountRecord>,
        demographic: Vec<RawCountRecord>,
        biometric: Vec<RawCountRecord>,
    ) -> LoadedDatasets {
        LoadedDatasets {
            enrolment: dataset(DatasetKind::Enrolment, enrolment),
            demographic: dataset(DatasetKind::Demographic, demographic),
            biometric: dataset(DatasetKind::Biometric, biometric),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_left_join_defaults_missing_updates_to_zero() {
        let input = datasets(
            vec![
                record("Pune", "Maharashtra", "2025-03", 100),
                record("Pune", "Maharashtra", "2025-04", 50),
            ],
            vec![record("Pune", "Maharashtra", "2025-03", 10)],
            vec![],
        );

        let table = Normalizer::join(&input, &KeyRules::default(), &RecordFilter::default());

        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].demographic_updates, 10);
        assert_eq!(table.records[0].biometric_updates, 0);
        assert_eq!(table.records[1].demographic_updates, 0);
        assert!(table.diagnostics.is_empty());
    }

    #[test]
    fn test_update_only_districts_excluded() {
        let input = datasets(
            vec![record("Pune", "Maharashtra", "2025-03", 100)],
            vec![record("Ghost", "Maharashtra", "2025-03", 7)],
            vec![
                record("Ghost", "Maharashtra", "2025-03", 3),
                record("Phantom", "Goa", "2025-03", 1),
            ],
        );

        let table = Normalizer::join(&input, &KeyRules::default(), &RecordFilter::default());

        assert_eq!(table.records.len(), 1);
        assert_eq!(table.excluded_districts, 2);
        assert_eq!(
            table.diagnostics,
            vec![Diagnostic::ExcludedDistricts {
                count: 2,
                districts: vec!["ghost".to_string(), "phantom".to_string()],
            }]
        );
    }

    #[test]
    fn test_case_variants_merged_and_logged() {
        let input = datasets(
            vec![
                record("Pune", "Maharashtra", "2025-03", 60),
                record("PUNE ", "Maharashtra", "2025-03", 40),
            ],
            vec![record("pune", "Maharashtra", "2025-03", 5)],
            vec![],
        );

        let table = Normalizer::join(&input, &KeyRules::default(), &RecordFilter::default());

        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].enrolments, 100);
        assert_eq!(table.records[0].demographic_updates, 5);
        assert_eq!(table.records[0].district, "PUNE ");
        assert!(matches!(
            &table.diagnostics[0],
            Diagnostic::DistrictMerged { key, variants } if key == "pune" && variants.len() == 3
        ));
    }

    #[test]
    fn test_state_conflict_is_warning() {
        let input = datasets(
            vec![
                record("Aurangabad", "Bihar", "2025-03", 10),
                record("Aurangabad", "Maharashtra", "2025-03", 30),
            ],
            vec![],
            vec![],
        );

        let table = Normalizer::join(&input, &KeyRules::default(), &RecordFilter::default());

        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].state, "Maharashtra");
        assert_eq!(table.records[0].enrolments, 40);
        assert!(matches!(
            &table.diagnostics[0],
            Diagnostic::StateConflict { kept, .. } if kept == "Maharashtra"
        ));
    }

    #[test]
    fn test_include_state_keeps_namesakes_apart() {
        let input = datasets(
            vec![
                record("Aurangabad", "Bihar", "2025-03", 10),
                record("Aurangabad", "Maharashtra", "2025-03", 30),
            ],
            vec![],
            vec![],
        );
        let rules = KeyRules {
            include_state: true,
            ..KeyRules::default()
        };

        let table = Normalizer::join(&input, &rules, &RecordFilter::default());

        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].state, "Bihar");
        assert_eq!(table.records[1].state, "Maharashtra");
        assert!(table.diagnostics.is_empty());
    }

    #[test]
    fn test_update_rows_outside_enrolment_periods_dropped() {
        let input = datasets(
            vec![record("Pune", "Maharashtra", "2025-03", 100)],
            vec![record("Pune", "Maharashtra", "2025-05", 10)],
            vec![],
        );

        let table = Normalizer::join(&input, &KeyRules::default(), &RecordFilter::default());

        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].demographic_updates, 0);
        assert_eq!(table.unmatched_period_rows, 1);
        assert_eq!(table.excluded_districts, 0);
        assert_eq!(
            table.diagnostics,
            vec![Diagnostic::UnmatchedPeriodRows {
                dataset: DatasetKind::Demographic,
                count: 1,
            }]
        );
    }

    #[test]
    fn test_filter_by_period_and_state() {
        let input = datasets(
            vec![
                record("Pune", "Maharashtra", "2025-03", 100),
                record("Pune", "Maharashtra", "2025-04", 50),
                record("North Goa", "Goa", "2025-03", 20),
            ],
            vec![],
            vec![],
        );
        let filter = RecordFilter {
            period: Some("2025-03".parse().unwrap()),
            state: Some(" maharashtra".to_string()),
        };

        let table = Normalizer::join(&input, &KeyRules::default(), &filter);

        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].district, "Pune");
        assert_eq!(table.records[0].enrolments, 100);
    }
}
