//! Dataset loading
//!
//! Discovers the enrolment, demographic-update and biometric-update CSV
//! shards, validates their headers and parses each shard into monthly
//! per-district counts.
//!
//! - Rows within one shard that share (district, state, month) are summed,
//!   since the source files are daily and sub-district.
//! - Across shards the last-loaded value wins for each folded
//!   (district, month) key and a `DuplicateRecord` diagnostic is recorded.
//! - Bad count cells are coerced to zero and invalid UTF-8 is replaced, each
//!   with a `DataQuality` diagnostic. Only I/O failures abort a shard.

use crate::config::{ColumnNames, DatasetSource, KeyRules, PipelineConfig};
use crate::error::PipelineError;
use crate::types::{ColumnCount, DailyCount, DatasetKind, Diagnostic, Period, RawCountRecord};
use chrono::NaiveDate;
use glob::MatchOptions;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Day-first formats come first; the source exports use `DD-MM-YYYY`
const DATE_FORMATS: [&str; 4] = ["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d", "%d.%m.%Y"];

/// Files found for each dataset, sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredFiles {
    pub enrolment: Vec<PathBuf>,
    pub demographic: Vec<PathBuf>,
    pub biometric: Vec<PathBuf>,
}

impl DiscoveredFiles {
    pub fn get(&self, kind: DatasetKind) -> &[PathBuf] {
        match kind {
            DatasetKind::Enrolment => &self.enrolment,
            DatasetKind::Demographic => &self.demographic,
            DatasetKind::Biometric => &self.biometric,
        }
    }

    fn get_mut(&mut self, kind: DatasetKind) -> &mut Vec<PathBuf> {
        match kind {
            DatasetKind::Enrolment => &mut self.enrolment,
            DatasetKind::Demographic => &mut self.demographic,
            DatasetKind::Biometric => &mut self.biometric,
        }
    }

    /// Every discovered file, in dataset order
    pub fn all(&self) -> impl Iterator<Item = &PathBuf> {
        self.enrolment
            .iter()
            .chain(self.demographic.iter())
            .chain(self.biometric.iter())
    }
}

/// One dataset after all its shards are merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDataset {
    pub kind: DatasetKind,
    pub files: Vec<PathBuf>,
    /// Sorted by (district, state, period)
    pub records: Vec<RawCountRecord>,
    /// Sorted by (date, state, district); rows with a bare `YYYY-MM` period
    /// contribute nothing here
    pub daily: Vec<DailyCount>,
    /// Per-column split of `records`, sorted by (district, state, period, column)
    pub columns: Vec<ColumnCount>,
    /// Count columns in the order first seen across shards
    pub count_columns: Vec<String>,
}

impl LoadedDataset {
    pub fn empty(kind: DatasetKind) -> Self {
        Self {
            kind,
            files: Vec::new(),
            records: Vec::new(),
            daily: Vec::new(),
            columns: Vec::new(),
            count_columns: Vec::new(),
        }
    }
}

/// Output of the loader: the three datasets plus any diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDatasets {
    pub enrolment: LoadedDataset,
    pub demographic: LoadedDataset,
    pub biometric: LoadedDataset,
    pub diagnostics: Vec<Diagnostic>,
}

/// Records parsed from one shard before cross-shard merging
#[derive(Debug, Default)]
struct Shard {
    records: BTreeMap<RecordKey, u64>,
    columns: BTreeMap<(RecordKey, String), u64>,
    daily: BTreeMap<DailyKey, u64>,
    count_columns: Vec<String>,
}

/// (district, state, period) as spelled in the file
type RecordKey = (String, String, Period);
/// (date, state, district)
type DailyKey = (NaiveDate, String, String);
/// Folded (state, district) per [`KeyRules::district_key`], plus the period
type MergeKey = (Option<String>, String, Period);

/// Everything one shard contributed under one merge key
#[derive(Debug, Default)]
struct ShardGroup {
    shard: usize,
    records: Vec<(RecordKey, u64)>,
    columns: Vec<((RecordKey, String), u64)>,
    daily: Vec<(DailyKey, u64)>,
}

/// Resolved column positions for one shard
struct HeaderLayout {
    district: usize,
    state: usize,
    period: usize,
    /// (position, lower-cased header)
    counts: Vec<(usize, String)>,
}

/// Loader for the three source datasets
pub struct DatasetLoader<'a> {
    config: &'a PipelineConfig,
}

impl<'a> DatasetLoader<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Find the files for each dataset under `dir`.
    ///
    /// Fails with `MissingDataset` if any kind has no match.
    pub fn discover(&self, dir: &Path) -> Result<DiscoveredFiles, PipelineError> {
        let found = self.scan(dir)?;
        self.require_all(found)
    }

    /// Like [`discover`](Self::discover) but tolerates kinds with no files
    pub fn scan(&self, dir: &Path) -> Result<DiscoveredFiles, PipelineError> {
        let mut found = DiscoveredFiles::default();

        for kind in DatasetKind::ALL {
            let pattern = &self.config.datasets.get(kind).file_pattern;
            let full = glob::Pattern::escape(&dir.to_string_lossy());
            let full = Path::new(&full).join(pattern);
            let entries = glob::glob_with(&full.to_string_lossy(), MATCH_OPTIONS).map_err(
                |e| PipelineError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                },
            )?;

            let files = found.get_mut(kind);
            for entry in entries {
                let path = entry.map_err(io::Error::from)?;
                if path.is_file() {
                    files.push(path);
                }
            }
            files.sort();
            debug!(dataset = %kind, dir = %dir.display(), count = files.len(), "discovered files");
        }

        Ok(found)
    }

    /// Sort an explicit path set into datasets by file-name pattern.
    ///
    /// Paths matching no pattern are ignored; a path matching several is
    /// assigned to the first in enrolment, demographic, biometric order.
    pub fn classify(&self, paths: &[PathBuf]) -> Result<DiscoveredFiles, PipelineError> {
        let mut patterns = Vec::new();
        for kind in DatasetKind::ALL {
            let pattern = &self.config.datasets.get(kind).file_pattern;
            let compiled =
                glob::Pattern::new(pattern).map_err(|e| PipelineError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            patterns.push((kind, compiled));
        }

        let mut found = DiscoveredFiles::default();
        for path in paths {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
                continue;
            };
            match patterns
                .iter()
                .find(|(_, p)| p.matches_with(&name, MATCH_OPTIONS))
            {
                Some((kind, _)) => found.get_mut(*kind).push(path.clone()),
                None => debug!(path = %path.display(), "path matches no dataset pattern"),
            }
        }
        for kind in DatasetKind::ALL {
            found.get_mut(kind).sort();
        }

        self.require_all(found)
    }

    fn require_all(&self, found: DiscoveredFiles) -> Result<DiscoveredFiles, PipelineError> {
        for kind in DatasetKind::ALL {
            if found.get(kind).is_empty() {
                return Err(PipelineError::MissingDataset {
                    kind,
                    pattern: self.config.datasets.get(kind).file_pattern.clone(),
                });
            }
        }
        Ok(found)
    }

    /// Discover and load everything under `dir`
    pub fn load_dir(&self, dir: &Path) -> Result<LoadedDatasets, PipelineError> {
        let files = self.discover(dir)?;
        self.load(&files)
    }

    /// Load all three datasets from an already-discovered file set
    pub fn load(&self, files: &DiscoveredFiles) -> Result<LoadedDatasets, PipelineError> {
        let mut diagnostics = Vec::new();

        let enrolment = self.load_kind(DatasetKind::Enrolment, files, &mut diagnostics)?;
        let demographic = self.load_kind(DatasetKind::Demographic, files, &mut diagnostics)?;
        let biometric = self.load_kind(DatasetKind::Biometric, files, &mut diagnostics)?;

        Ok(LoadedDatasets {
            enrolment,
            demographic,
            biometric,
            diagnostics,
        })
    }

    fn load_kind(
        &self,
        kind: DatasetKind,
        files: &DiscoveredFiles,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<LoadedDataset, PipelineError> {
        let paths = files.get(kind);
        let mut shards = Vec::with_capacity(paths.len());
        for path in paths {
            let file = File::open(path)?;
            let shard = self.parse_shard(kind, path, file, diagnostics)?;
            shards.push((path.clone(), shard));
        }

        let dataset = merge_shards(kind, shards, &self.config.keys, diagnostics);
        info!(
            dataset = %kind,
            files = dataset.files.len(),
            records = dataset.records.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// Parse one shard from any reader. `path` labels diagnostics.
    fn parse_shard<R: Read>(
        &self,
        kind: DatasetKind,
        path: &Path,
        reader: R,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Shard, PipelineError> {
        let source = self.config.datasets.get(kind);
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect();
        let layout = resolve_headers(&headers, &self.config.columns, source, path)?;

        let mut shard = Shard {
            count_columns: layout.counts.iter().map(|(_, name)| name.clone()).collect(),
            ..Shard::default()
        };
        let mut report = |line: u64, message: String| {
            let diag = Diagnostic::DataQuality {
                dataset: kind,
                file: path.to_path_buf(),
                line,
                message,
            };
            warn!("{diag}");
            diagnostics.push(diag);
        };

        // Byte records: a malformed cell must not abort the whole shard
        for row in csv_reader.byte_records() {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            let cells: Vec<Cow<'_, str>> = row.iter().map(String::from_utf8_lossy).collect();
            if cells.iter().any(|c| matches!(c, Cow::Owned(_))) {
                report(line, "invalid UTF-8 replaced with U+FFFD".to_string());
            }
            let cell = |idx: usize| cells.get(idx).map(|c| c.trim()).unwrap_or("");

            let district = cell(layout.district);
            if district.is_empty() {
                report(line, "empty district; row skipped".to_string());
                continue;
            }
            let state = cell(layout.state);
            let raw_period = cell(layout.period);
            let Some((period, date)) = parse_period_cell(raw_period) else {
                report(line, format!("unparseable period '{raw_period}'; row skipped"));
                continue;
            };
            let key = (district.to_string(), state.to_string(), period);

            let mut count: u64 = 0;
            for (idx, name) in &layout.counts {
                let raw = cell(*idx);
                match parse_count(raw) {
                    Ok(value) => {
                        count = count.saturating_add(value);
                        let total = shard.columns.entry((key.clone(), name.clone())).or_insert(0);
                        *total = total.saturating_add(value);
                    }
                    Err(reason) => {
                        report(line, format!("{name}: {reason} '{raw}' coerced to 0"));
                    }
                }
            }

            let total = shard.records.entry(key).or_insert(0);
            *total = total.saturating_add(count);

            if let Some(date) = date {
                let key = (date, state.to_string(), district.to_string());
                let total = shard.daily.entry(key).or_insert(0);
                *total = total.saturating_add(count);
            }
        }

        debug!(
            dataset = %kind,
            file = %path.display(),
            records = shard.records.len(),
            "parsed shard"
        );
        Ok(shard)
    }
}

/// Merge shards in load order.
///
/// Rows are matched on the folded (district, period) key, so a later shard
/// spelling a district differently still replaces the earlier rows.
fn merge_shards(
    kind: DatasetKind,
    shards: Vec<(PathBuf, Shard)>,
    rules: &KeyRules,
    diagnostics: &mut Vec<Diagnostic>,
) -> LoadedDataset {
    let merge_key = |district: &str, state: &str, period: Period| -> MergeKey {
        let (state, district) = rules.district_key(district, state);
        (state, district, period)
    };

    let mut merged: BTreeMap<MergeKey, ShardGroup> = BTreeMap::new();
    let mut files = Vec::with_capacity(shards.len());
    let mut count_columns: Vec<String> = Vec::new();

    for (index, (path, shard)) in shards.into_iter().enumerate() {
        let mut groups: BTreeMap<MergeKey, ShardGroup> = BTreeMap::new();

        for (key, count) in shard.records {
            let target = merge_key(&key.0, &key.1, key.2);
            group_slot(&mut groups, target, index).records.push((key, count));
        }
        for (key, count) in shard.columns {
            let (record_key, _) = &key;
            let target = merge_key(&record_key.0, &record_key.1, record_key.2);
            group_slot(&mut groups, target, index).columns.push((key, count));
        }
        for (key, count) in shard.daily {
            let target = merge_key(&key.2, &key.1, Period::of_date(key.0));
            group_slot(&mut groups, target, index).daily.push((key, count));
        }

        for (key, incoming) in groups {
            if let Some(previous) = merged.get(&key) {
                let diag = Diagnostic::DuplicateRecord {
                    dataset: kind,
                    district: incoming
                        .records
                        .first()
                        .map(|(k, _)| k.0.clone())
                        .unwrap_or_else(|| key.1.clone()),
                    period: key.2,
                    replaced_from: files.get(previous.shard).cloned().unwrap_or_default(),
                    kept_from: path.clone(),
                };
                warn!("{diag}");
                diagnostics.push(diag);
            }
            merged.insert(key, incoming);
        }

        for column in shard.count_columns {
            if !count_columns.contains(&column) {
                count_columns.push(column);
            }
        }
        files.push(path);
    }

    let mut records = Vec::new();
    let mut columns = Vec::new();
    let mut daily = Vec::new();
    for group in merged.into_values() {
        records.extend(group.records.into_iter().map(
            |((district, state, period), count)| RawCountRecord {
                district,
                state,
                period,
                count,
            },
        ));
        columns.extend(group.columns.into_iter().map(
            |(((district, state, period), column), count)| ColumnCount {
                district,
                state,
                period,
                column,
                count,
            },
        ));
        daily.extend(group.daily.into_iter().map(
            |((date, state, district), count)| DailyCount {
                date,
                state,
                district,
                count,
            },
        ));
    }
    records.sort_by(|a, b| (&a.district, &a.state, a.period).cmp(&(&b.district, &b.state, b.period)));
    columns.sort_by(|a, b| {
        (&a.district, &a.state, a.period, &a.column).cmp(&(&b.district, &b.state, b.period, &b.column))
    });
    daily.sort_by(|a, b| (a.date, &a.state, &a.district).cmp(&(b.date, &b.state, &b.district)));

    LoadedDataset {
        kind,
        files,
        records,
        daily,
        columns,
        count_columns,
    }
}

fn group_slot(
    groups: &mut BTreeMap<MergeKey, ShardGroup>,
    key: MergeKey,
    shard: usize,
) -> &mut ShardGroup {
    groups.entry(key).or_insert_with(|| ShardGroup {
        shard,
        ..ShardGroup::default()
    })
}

fn resolve_headers(
    headers: &[String],
    columns: &ColumnNames,
    source: &DatasetSource,
    path: &Path,
) -> Result<HeaderLayout, PipelineError> {
    let find = |name: &str| {
        let name = name.trim();
        headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    };

    let district = find(&columns.district);
    let state = find(&columns.state);
    let period = find(&columns.period);
    let key_columns = [district, state, period];

    let counts: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, h)| !key_columns.contains(&Some(*idx)) && source.is_count_column(h))
        .map(|(idx, h)| (idx, h.to_lowercase()))
        .collect();

    let mut missing = Vec::new();
    if district.is_none() {
        missing.push(columns.district.clone());
    }
    if state.is_none() {
        missing.push(columns.state.clone());
    }
    if period.is_none() {
        missing.push(columns.period.clone());
    }
    if counts.is_empty() {
        missing.push(format!("count column matching {:?}", source.count_columns));
    }

    match (district, state, period) {
        (Some(district), Some(state), Some(period)) if missing.is_empty() => Ok(HeaderLayout {
            district,
            state,
            period,
            counts,
        }),
        _ => Err(PipelineError::Schema {
            path: path.to_path_buf(),
            missing,
        }),
    }
}

/// Parse a period cell into its month and, when a full date was given, the day.
pub fn parse_period_cell(raw: &str) -> Option<(Period, Option<NaiveDate>)> {
    let raw = raw.trim();
    // Timestamps such as "2025-03-01 00:00:00" carry the date first
    let date_part = raw.split_whitespace().next().unwrap_or("");

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Some((Period::of_date(date), Some(date)));
        }
    }

    date_part.parse::<Period>().ok().map(|period| (period, None))
}

/// Parse a count cell. Errors carry the reason for the diagnostic.
fn parse_count(raw: &str) -> Result<u64, &'static str> {
    if raw.is_empty() {
        return Err("empty");
    }
    if let Ok(value) = raw.parse::<i64>() {
        return u64::try_from(value).map_err(|_| "negative");
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value < 0.0 => Err("negative"),
        Ok(value) if value.is_finite() && value.fract() == 0.0 && value <= u64::MAX as f64 => {
            Ok(value as u64)
        }
        _ => Err("non-numeric"),
    }
}
