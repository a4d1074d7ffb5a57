//! Input fingerprinting and report caching
//!
//! A fingerprint identifies an input file set by path, size and modification
//! time. [`ReportCache`] holds at most one report keyed by fingerprint and
//! options; it is owned by whoever drives the pipeline.

use crate::error::PipelineError;
use crate::loader::DiscoveredFiles;
use crate::pipeline::{PipelineOptions, PipelineReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Identity of one input file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    pub path: PathBuf,
    pub size: u64,
    /// `None` where the platform cannot report it
    pub modified: Option<DateTime<Utc>>,
}

/// Identity of a whole input file set, sorted by path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub files: Vec<FileStamp>,
}

impl InputFingerprint {
    /// Stat every discovered file
    pub fn of(files: &DiscoveredFiles) -> Result<Self, PipelineError> {
        let mut stamps = Vec::new();
        for path in files.all() {
            let metadata = fs::metadata(path)?;
            stamps.push(FileStamp {
                path: path.clone(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        stamps.sort();
        Ok(Self { files: stamps })
    }
}

#[derive(Debug)]
struct CacheEntry {
    fingerprint: InputFingerprint,
    options: PipelineOptions,
    report: PipelineReport,
}

/// Single-slot report cache
#[derive(Debug, Default)]
pub struct ReportCache {
    entry: Option<CacheEntry>,
}

impl ReportCache {
    /// Return the cached report when fingerprint and options match,
    /// otherwise compute, store and return a fresh one.
    ///
    /// A failed computation leaves the cache empty.
    pub fn get_or_compute<F>(
        &mut self,
        fingerprint: InputFingerprint,
        options: &PipelineOptions,
        compute: F,
    ) -> Result<&PipelineReport, PipelineError>
    where
        F: FnOnce() -> Result<PipelineReport, PipelineError>,
    {
        match self.entry.take() {
            Some(entry) if entry.fingerprint == fingerprint && entry.options == *options => {
                debug!("input unchanged; reusing cached report");
                Ok(&self.entry.insert(entry).report)
            }
            _ => {
                let report = compute()?;
                let entry = CacheEntry {
                    fingerprint,
                    options: options.clone(),
                    report,
                };
                Ok(&self.entry.insert(entry).report)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}
