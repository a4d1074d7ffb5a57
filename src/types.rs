//! Core types for the IPD pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw count records, joined district-period records, metric records,
//! and the ranked view handed to the presentation layer.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The three source datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Enrolment,
    Demographic,
    Biometric,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [
        DatasetKind::Enrolment,
        DatasetKind::Demographic,
        DatasetKind::Biometric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Enrolment => "enrolment",
            DatasetKind::Demographic => "demographic",
            DatasetKind::Biometric => "biometric",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A calendar month, the time unit of every join key (`YYYY-MM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Create a period, returning `None` for a month outside 1..=12
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// The month containing `date`
    pub fn of_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{trimmed}'"))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in '{trimmed}'"))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{trimmed}'"))?;
        Period::new(year, month).ok_or_else(|| format!("month out of range in '{trimmed}'"))
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One monthly count for a district, as read from a single dataset.
///
/// `district` and `state` are trimmed but otherwise verbatim; key folding
/// happens in the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCountRecord {
    pub district: String,
    pub state: String,
    pub period: Period,
    pub count: u64,
}

/// Count for one day, kept for the peak-day summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub state: String,
    pub district: String,
    pub count: u64,
}

/// One count column's monthly total for a district, kept for the age
/// composition summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCount {
    pub district: String,
    pub state: String,
    pub period: Period,
    /// Lower-cased header
    pub column: String,
    pub count: u64,
}

/// Joined observation for one (district, period)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictPeriodRecord {
    pub district: String,
    pub state: String,
    pub period: Period,
    pub enrolments: u64,
    pub demographic_updates: u64,
    pub biometric_updates: u64,
}

/// How the metric engine groups district-period rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// One record per district, summed over every period
    #[default]
    AllPeriods,
    /// One record per (district, period)
    Monthly,
}

/// Derived indices for a district (or district-period)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub district: String,
    pub state: String,
    /// `None` when aggregated across all periods
    pub period: Option<Period>,
    pub enrolments: u64,
    pub demographic_updates: u64,
    pub biometric_updates: u64,
    /// Inverse visibility (0-1, higher = less visible)
    pub vgs_proxy: f64,
    /// Mobility Pressure Index (demographic updates per enrolment)
    pub mpi: f64,
    /// Biometric Stress Index (biometric updates per enrolment)
    pub bsi: f64,
}

/// Discrete risk band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric record placed in the risk ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDistrict {
    /// 1-based position in the ordering
    pub rank: usize,
    pub metrics: MetricRecord,
    pub composite_score: f64,
    pub tier: RiskTier,
    pub actions: Vec<String>,
}

/// Non-fatal issue found while loading or joining.
///
/// Processing continues with the documented substitution; the caller decides
/// how to surface these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Bad cell coerced to zero, or an unkeyable row skipped
    DataQuality {
        dataset: DatasetKind,
        file: PathBuf,
        line: u64,
        message: String,
    },
    /// A later shard replaced a (district, period) row from an earlier one
    DuplicateRecord {
        dataset: DatasetKind,
        district: String,
        period: Period,
        replaced_from: PathBuf,
        kept_from: PathBuf,
    },
    /// Spellings that fold to the same join key
    DistrictMerged { key: String, variants: Vec<String> },
    /// A district reported under more than one state
    StateConflict {
        district: String,
        states: Vec<String>,
        kept: String,
    },
    /// Districts seen only in update datasets, never in enrolment
    ExcludedDistricts { count: usize, districts: Vec<String> },
    /// Update rows for known districts in months with no enrolment row
    UnmatchedPeriodRows { dataset: DatasetKind, count: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DataQuality {
                dataset,
                file,
                line,
                message,
            } => write!(f, "{dataset} {}:{line}: {message}", file.display()),
            Diagnostic::DuplicateRecord {
                dataset,
                district,
                period,
                replaced_from,
                kept_from,
            } => write!(
                f,
                "{dataset}: duplicate {district} {period}; {} replaces {}",
                kept_from.display(),
                replaced_from.display()
            ),
            Diagnostic::DistrictMerged { key, variants } => {
                write!(f, "merged district spellings {variants:?} as '{key}'")
            }
            Diagnostic::StateConflict {
                district,
                states,
                kept,
            } => write!(f, "district {district} appears in states {states:?}; kept {kept}"),
            Diagnostic::ExcludedDistricts { count, .. } => {
                write!(f, "{count} district(s) absent from enrolment data were excluded")
            }
            Diagnostic::UnmatchedPeriodRows { dataset, count } => write!(
                f,
                "{dataset}: {count} row(s) in months without enrolment data were dropped"
            ),
        }
    }
}
