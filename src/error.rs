//! Error types for IPD
//!
//! Only fatal conditions live here. Recoverable data problems are reported as
//! [`Diagnostic`](crate::types::Diagnostic) values alongside the results.

use crate::types::DatasetKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the pipeline before any metric is computed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No {kind} files match pattern '{pattern}'")]
    MissingDataset { kind: DatasetKind, pattern: String },

    #[error("Missing required column(s) in {}: {}", path.display(), missing.join(", "))]
    Schema { path: PathBuf, missing: Vec<String> },

    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
