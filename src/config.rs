//! Pipeline configuration
//!
//! Everything that would otherwise be implicit string matching lives here:
//! file name patterns per dataset, header names, count-column selection,
//! join-key normalization, ranking weights and tier cut points.
//!
//! Example JSON (every field optional):
//! ```json
//! {
//!   "datasets": {
//!     "enrolment": { "file_pattern": "enrol_*.csv", "count_columns": ["age_"] }
//!   },
//!   "keys": { "include_state": true },
//!   "ranking": {
//!     "weights": { "vgs_proxy": 1.0, "mpi": 0.25, "bsi": 0.25 },
//!     "tiers": { "high": 0.7, "medium": 0.4 }
//!   }
//! }
//! ```

use crate::error::PipelineError;
use crate::types::DatasetKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub datasets: DatasetSources,
    pub columns: ColumnNames,
    pub keys: KeyRules,
    pub ranking: RankingConfig,
    pub actions: ActionThresholds,
}

impl PipelineConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, PipelineError> {
        match path {
            Some(path) => Self::from_json_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the whole configuration.
    /// Returns every problem at once, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for kind in DatasetKind::ALL {
            let source = self.datasets.get(kind);
            if source.file_pattern.trim().is_empty() {
                errors.push(format!("datasets.{kind}.file_pattern: must not be empty"));
            } else if let Err(e) = glob::Pattern::new(&source.file_pattern) {
                errors.push(format!(
                    "datasets.{kind}.file_pattern: invalid '{}' - {}",
                    source.file_pattern, e
                ));
            }
            if source.count_columns.iter().all(|c| c.trim().is_empty()) {
                errors.push(format!(
                    "datasets.{kind}.count_columns: at least one non-empty marker required"
                ));
            }
        }

        for (field, value) in [
            ("columns.district", &self.columns.district),
            ("columns.state", &self.columns.state),
            ("columns.period", &self.columns.period),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{field}: must not be empty"));
            }
        }

        let weights = &self.ranking.weights;
        for (field, value) in [
            ("ranking.weights.vgs_proxy", weights.vgs_proxy),
            ("ranking.weights.mpi", weights.mpi),
            ("ranking.weights.bsi", weights.bsi),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("{field}: must be a finite non-negative number"));
            }
        }
        if weights.vgs_proxy == 0.0 && weights.mpi == 0.0 && weights.bsi == 0.0 {
            errors.push("ranking.weights: at least one weight must be positive".to_string());
        }

        let tiers = &self.ranking.tiers;
        if !tiers.high.is_finite() || !tiers.medium.is_finite() {
            errors.push("ranking.tiers: thresholds must be finite".to_string());
        } else {
            if tiers.medium > tiers.high {
                errors.push(format!(
                    "ranking.tiers: medium ({}) must not exceed high ({})",
                    tiers.medium, tiers.high
                ));
            }
            if self.ranking.tier_basis == TierBasis::VgsProxy {
                for (field, value) in [
                    ("ranking.tiers.high", tiers.high),
                    ("ranking.tiers.medium", tiers.medium),
                ] {
                    if !(0.0..=1.0).contains(&value) {
                        errors.push(format!(
                            "{field}: must be within [0, 1] when tier_basis is vgs_proxy"
                        ));
                    }
                }
            }
        }

        for (field, value) in [
            ("actions.vgs_proxy", self.actions.vgs_proxy),
            ("actions.mpi", self.actions.mpi),
            ("actions.bsi", self.actions.bsi),
        ] {
            if !value.is_finite() {
                errors.push(format!("{field}: must be finite"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// File discovery and count-column selection for each dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetSources {
    pub enrolment: DatasetSource,
    pub demographic: DatasetSource,
    pub biometric: DatasetSource,
}

impl DatasetSources {
    pub fn get(&self, kind: DatasetKind) -> &DatasetSource {
        match kind {
            DatasetKind::Enrolment => &self.enrolment,
            DatasetKind::Demographic => &self.demographic,
            DatasetKind::Biometric => &self.biometric,
        }
    }
}

impl Default for DatasetSources {
    fn default() -> Self {
        Self {
            enrolment: DatasetSource::new("api_data_aadhar_enrolment_*.csv", &["age_"]),
            demographic: DatasetSource::new("api_data_aadhar_demographic_*.csv", &["age"]),
            biometric: DatasetSource::new("api_data_aadhar_biometric_*.csv", &["bio", "age"]),
        }
    }
}

/// Where one dataset's files live and which columns carry its counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSource {
    /// Glob matched against file names (case-insensitive)
    pub file_pattern: String,
    /// Case-insensitive substrings; every header containing one is summed
    /// into the row's count
    pub count_columns: Vec<String>,
}

impl DatasetSource {
    pub fn new(file_pattern: &str, count_columns: &[&str]) -> Self {
        Self {
            file_pattern: file_pattern.to_string(),
            count_columns: count_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Whether `header` is one of this dataset's count columns
    pub fn is_count_column(&self, header: &str) -> bool {
        let header = header.trim().to_lowercase();
        self.count_columns
            .iter()
            .map(|marker| marker.trim().to_lowercase())
            .any(|marker| !marker.is_empty() && header.contains(&marker))
    }
}

/// Header names of the key columns (matched case-insensitively)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnNames {
    pub district: String,
    pub state: String,
    pub period: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            district: "district".to_string(),
            state: "state".to_string(),
            period: "date".to_string(),
        }
    }
}

/// Join-key normalization rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyRules {
    pub case_insensitive: bool,
    pub trim: bool,
    /// Fold internal whitespace runs to a single space
    pub collapse_whitespace: bool,
    /// Key districts by (state, district) instead of district alone
    pub include_state: bool,
}

impl Default for KeyRules {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            trim: true,
            collapse_whitespace: true,
            include_state: false,
        }
    }
}

impl KeyRules {
    /// Folded join key of a district: the normalized state (only when
    /// `include_state` is set) and the normalized district name
    pub fn district_key(&self, district: &str, state: &str) -> (Option<String>, String) {
        (
            self.include_state.then(|| self.normalize(state)),
            self.normalize(district),
        )
    }

    /// Normalize a name for key comparison
    pub fn normalize(&self, name: &str) -> String {
        let name = if self.trim { name.trim() } else { name };
        let name = if self.collapse_whitespace {
            name.split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            name.to_string()
        };
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name
        }
    }
}

/// Ranking configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankingConfig {
    pub weights: ScoreWeights,
    pub tiers: TierThresholds,
    pub tier_basis: TierBasis,
}

/// Weights of the composite risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoreWeights {
    pub vgs_proxy: f64,
    pub mpi: f64,
    pub bsi: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            vgs_proxy: 1.0,
            mpi: 0.0,
            bsi: 0.0,
        }
    }
}

/// Lower bounds (inclusive) of the high and medium tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.5,
        }
    }
}

/// Which score the tier thresholds apply to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierBasis {
    #[default]
    VgsProxy,
    Composite,
}

/// Thresholds above which a recommended action is attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionThresholds {
    pub vgs_proxy: f64,
    pub mpi: f64,
    pub bsi: f64,
}

impl Default for ActionThresholds {
    fn default() -> Self {
        Self {
            vgs_proxy: 0.2,
            mpi: 0.5,
            bsi: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "ranking": { "tiers": { "high": 0.7 } }, "keys": { "include_state": true } }"#,
        )
        .unwrap();

        assert_eq!(config.ranking.tiers.high, 0.7);
        assert_eq!(config.ranking.tiers.medium, 0.5);
        assert_eq!(config.ranking.weights, ScoreWeights::default());
        assert!(config.keys.include_state);
        assert!(config.keys.case_insensitive);
        assert_eq!(config.datasets, DatasetSources::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = PipelineConfig::from_json(r#"{ "rankng": {} }"#);
        assert!(matches!(result, Err(PipelineError::Json(_))));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = PipelineConfig::default();
        config.ranking.weights = ScoreWeights {
            vgs_proxy: -1.0,
            mpi: 0.0,
            bsi: 0.0,
        };
        config.ranking.tiers = TierThresholds {
            high: 0.3,
            medium: 0.6,
        };
        config.datasets.biometric.file_pattern = "[".to_string();

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("ranking.weights.vgs_proxy")));
        assert!(errors.iter().any(|e| e.contains("medium (0.6)")));
        assert!(errors.iter().any(|e| e.contains("datasets.biometric.file_pattern")));
    }

    #[test]
    fn test_all_zero_weights_rejected() {
        let mut config = PipelineConfig::default();
        config.ranking.weights.vgs_proxy = 0.0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("at least one weight")));
    }

    #[test]
    fn test_composite_basis_allows_thresholds_above_one() {
        let mut config = PipelineConfig::default();
        config.ranking.tier_basis = TierBasis::Composite;
        config.ranking.tiers.high = 2.5;
        assert!(config.validate().is_ok());

        config.ranking.tier_basis = TierBasis::VgsProxy;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_normalization() {
        let rules = KeyRules::default();
        assert_eq!(rules.normalize("  North   Goa "), "north goa");

        let strict = KeyRules {
            case_insensitive: false,
            trim: true,
            collapse_whitespace: false,
            include_state: false,
        };
        assert_eq!(strict.normalize(" North  Goa"), "North  Goa");
    }

    #[test]
    fn test_district_key_state_only_when_requested() {
        let rules = KeyRules::default();
        assert_eq!(rules.district_key("NORTH GOA", "GOA"), (None, "north goa".to_string()));

        let by_state = KeyRules {
            include_state: true,
            ..KeyRules::default()
        };
        assert_eq!(
            by_state.district_key("NORTH GOA", " Goa"),
            (Some("goa".to_string()), "north goa".to_string())
        );
    }

    #[test]
    fn test_count_column_matching() {
        let sources = DatasetSources::default();
        assert!(sources.enrolment.is_count_column("age_0_5"));
        assert!(sources.enrolment.is_count_column(" AGE_18_GREATER "));
        assert!(!sources.enrolment.is_count_column("pincode"));
        assert!(sources.biometric.is_count_column("bio_age_17_"));
    }
}
