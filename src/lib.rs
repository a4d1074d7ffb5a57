//! IPD - Invisible Population Detector
//!
//! IPD turns per-district enrolment, demographic-update and biometric-update
//! counts into district risk indices through a deterministic batch pipeline:
//! dataset loading → district-period join → metric derivation → risk ranking.
//!
//! ## Indices
//!
//! - **VGS_proxy**: visibility gap, `1 - enrolments / max_enrolments` (0-1).
//!   Relative to the busiest district in the same run.
//! - **MPI**: Mobility Pressure Index, demographic updates per enrolment
//! - **BSI**: Biometric Stress Index, biometric updates per enrolment

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod loader;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod ranker;
pub mod report;
pub mod summary;
pub mod types;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use loader::{DatasetLoader, LoadedDatasets};
pub use metrics::MetricEngine;
pub use normalizer::{Normalizer, RecordFilter};
pub use pipeline::{process_datasets, run_pipeline, IpdProcessor, PipelineOptions, PipelineReport};
pub use ranker::RiskRanker;
pub use types::{AggregationMode, Diagnostic, MetricRecord, Period, RankedDistrict, RiskTier};

/// IPD version embedded in CLI output
pub const IPD_VERSION: &str = env!("CARGO_PKG_VERSION");
