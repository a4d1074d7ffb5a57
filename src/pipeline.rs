//! Pipeline orchestration
//!
//! This module provides the public API for IPD.
//! It runs the full batch from CSV shards on disk to a ranked metric table.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fingerprint::{InputFingerprint, ReportCache};
use crate::loader::{DatasetLoader, LoadedDatasets};
use crate::metrics::MetricEngine;
use crate::normalizer::{Normalizer, RecordFilter};
use crate::ranker::RiskRanker;
use crate::summary::DatasetSummary;
use crate::types::{AggregationMode, Diagnostic, MetricRecord, RankedDistrict};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Per-run options chosen by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub mode: AggregationMode,
    pub filter: RecordFilter,
}

/// Everything the presentation layer needs from one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub options: PipelineOptions,
    /// Denominator used for VGS_proxy in this run
    pub max_enrolments: u64,
    /// Sorted by (district, state, period)
    pub metrics: Vec<MetricRecord>,
    /// Highest risk first
    pub ranking: Vec<RankedDistrict>,
    pub summary: DatasetSummary,
    pub excluded_districts: usize,
    /// Loader diagnostics followed by join diagnostics
    pub diagnostics: Vec<Diagnostic>,
}

/// Load the datasets under `data_dir` and run every stage.
///
/// Pipeline stages:
/// 1. DatasetLoader - Discover shards, validate headers, parse counts
/// 2. Normalizer - Join on (district, period) with enrolment as the universe
/// 3. MetricEngine - Compute MPI, BSI and VGS_proxy
/// 4. RiskRanker - Order, tier and annotate districts
///
/// # Example
/// ```ignore
/// let report = run_pipeline(Path::new("data"), &PipelineConfig::default(), &PipelineOptions::default())?;
/// for row in report.ranking.iter().take(10) {
///     println!("{} {:.3}", row.metrics.district, row.metrics.vgs_proxy);
/// }
/// ```
pub fn run_pipeline(
    data_dir: &Path,
    config: &PipelineConfig,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    config.validate().map_err(PipelineError::InvalidConfig)?;

    let datasets = DatasetLoader::new(config).load_dir(data_dir)?;
    process_datasets(datasets, config, options)
}

/// Run stages 2-4 over datasets that are already loaded.
///
/// Pure: identical input always yields an identical report.
pub fn process_datasets(
    datasets: LoadedDatasets,
    config: &PipelineConfig,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    config.validate().map_err(PipelineError::InvalidConfig)?;

    let table = Normalizer::join(&datasets, &config.keys, &options.filter);
    let metric_set = MetricEngine::compute(&table, options.mode);

    let ranker = RiskRanker::new(config.ranking.clone(), config.actions.clone());
    let ranking = ranker.rank(&metric_set.records);

    let summary = DatasetSummary::compute(&datasets, &config.keys, &options.filter);

    let mut diagnostics = datasets.diagnostics;
    diagnostics.extend(table.diagnostics);

    info!(
        districts = ranking.len(),
        diagnostics = diagnostics.len(),
        "pipeline complete"
    );

    Ok(PipelineReport {
        options: options.clone(),
        max_enrolments: metric_set.max_enrolments,
        metrics: metric_set.records,
        ranking,
        summary,
        excluded_districts: table.excluded_districts,
        diagnostics,
    })
}

/// Stateful processor that skips recomputation while inputs are unchanged.
///
/// The cache belongs to this processor (the caller), never to the pipeline
/// functions above.
pub struct IpdProcessor {
    config: PipelineConfig,
    cache: ReportCache,
}

impl Default for IpdProcessor {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            cache: ReportCache::default(),
        }
    }
}

impl IpdProcessor {
    /// Create a processor, rejecting an invalid configuration up front
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        Ok(Self {
            config,
            cache: ReportCache::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run against `data_dir`, reusing the last report if neither the files
    /// (paths, sizes, modification times) nor the options changed.
    pub fn run(
        &mut self,
        data_dir: &Path,
        options: &PipelineOptions,
    ) -> Result<&PipelineReport, PipelineError> {
        let loader = DatasetLoader::new(&self.config);
        let files = loader.discover(data_dir)?;
        let fingerprint = InputFingerprint::of(&files)?;
        let config = &self.config;

        self.cache.get_or_compute(fingerprint, options, || {
            let datasets = loader.load(&files)?;
            process_datasets(datasets, config, options)
        })
    }

    /// Drop any cached report
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}
