//! IPD CLI - Command-line interface for the Invisible Population Detector
//!
//! Commands:
//! - rank: Compute indices and print the district risk ranking
//! - summary: Print dataset totals, monthly trend and state totals
//! - validate: Load and join the datasets, reporting every diagnostic
//! - doctor: Diagnose configuration and dataset discovery

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ipd::config::PipelineConfig;
use ipd::loader::DatasetLoader;
use ipd::normalizer::{Normalizer, RecordFilter};
use ipd::pipeline::{run_pipeline, PipelineOptions};
use ipd::report;
use ipd::types::{AggregationMode, DatasetKind, Diagnostic, Period};
use ipd::{PipelineError, IPD_VERSION};

/// IPD - rank districts by invisibility risk
#[derive(Parser)]
#[command(name = "ipd")]
#[command(version = IPD_VERSION)]
#[command(about = "Rank districts by visibility gap, mobility pressure and biometric stress", long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute indices and print the risk ranking
    Rank {
        /// Directory containing the dataset CSV shards
        #[arg(short, long)]
        data_dir: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Aggregate across all periods or per month
        #[arg(long, default_value = "all")]
        mode: Mode,

        /// Only include this month (YYYY-MM)
        #[arg(long)]
        period: Option<Period>,

        /// Only include this state
        #[arg(long)]
        state: Option<String>,

        /// Show only the top N districts
        #[arg(long)]
        top: Option<usize>,

        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,

        /// Output file path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print dataset totals, monthly trend and state totals
    Summary {
        #[arg(short, long)]
        data_dir: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        period: Option<Period>,

        #[arg(long)]
        state: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and join the datasets, reporting every diagnostic
    Validate {
        #[arg(short, long)]
        data_dir: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and dataset discovery
    Doctor {
        /// Check dataset discovery in this directory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// One row per district, summed over every month
    All,
    /// One row per district and month
    Monthly,
}

impl From<Mode> for AggregationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::All => AggregationMode::AllPeriods,
            Mode::Monthly => AggregationMode::Monthly,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Fixed-width text table
    Table,
    /// Full report as pretty JSON
    Json,
    /// Ranking as CSV
    Csv,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), IpdCliError> {
    match cli.command {
        Commands::Rank {
            data_dir,
            config,
            mode,
            period,
            state,
            top,
            format,
            output,
        } => {
            let options = PipelineOptions {
                mode: mode.into(),
                filter: RecordFilter { period, state },
            };
            cmd_rank(&data_dir, config.as_deref(), &options, top, format, output.as_deref())
        }

        Commands::Summary {
            data_dir,
            config,
            period,
            state,
            json,
        } => {
            let options = PipelineOptions {
                mode: AggregationMode::AllPeriods,
                filter: RecordFilter { period, state },
            };
            cmd_summary(&data_dir, config.as_deref(), &options, json)
        }

        Commands::Validate {
            data_dir,
            config,
            json,
        } => cmd_validate(&data_dir, config.as_deref(), json),

        Commands::Doctor {
            data_dir,
            config,
            json,
        } => cmd_doctor(data_dir.as_deref(), config.as_deref(), json),
    }
}

fn cmd_rank(
    data_dir: &Path,
    config_path: Option<&Path>,
    options: &PipelineOptions,
    top: Option<usize>,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<(), IpdCliError> {
    let config = PipelineConfig::load_or_default(config_path)?;
    let report = run_pipeline(data_dir, &config, options)?;

    let mut buffer: Vec<u8> = Vec::new();
    match format {
        OutputFormat::Table => buffer.extend(report::render_table(&report.ranking, top).into_bytes()),
        OutputFormat::Json => {
            buffer.extend(report::to_json(&report)?.into_bytes());
            buffer.push(b'\n');
        }
        OutputFormat::Csv => report::write_csv(&report.ranking, top, &mut buffer)?,
    }

    match output {
        Some(path) => fs::write(path, buffer)?,
        None => {
            let mut stdout = io::stdout();
            stdout.write_all(&buffer)?;
            stdout.flush()?;
        }
    }

    if !report.diagnostics.is_empty() && !matches!(format, OutputFormat::Json) {
        eprintln!(
            "{} data-quality diagnostic(s); run 'ipd validate' for details",
            report.diagnostics.len()
        );
    }

    Ok(())
}

fn cmd_summary(
    data_dir: &Path,
    config_path: Option<&Path>,
    options: &PipelineOptions,
    json: bool,
) -> Result<(), IpdCliError> {
    let config = PipelineConfig::load_or_default(config_path)?;
    let report = run_pipeline(data_dir, &config, options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    } else {
        print!("{}", report::render_summary(&report.summary));
    }

    Ok(())
}

fn cmd_validate(data_dir: &Path, config_path: Option<&Path>, json: bool) -> Result<(), IpdCliError> {
    let config = PipelineConfig::load_or_default(config_path)?;
    config.validate().map_err(PipelineError::InvalidConfig)?;

    let loader = DatasetLoader::new(&config);
    let datasets = loader.load_dir(data_dir)?;
    let table = Normalizer::join(&datasets, &config.keys, &RecordFilter::default());

    let datasets_report = [&datasets.enrolment, &datasets.demographic, &datasets.biometric]
        .into_iter()
        .map(|d| DatasetReport {
            dataset: d.kind,
            files: d.files.len(),
            records: d.records.len(),
        })
        .collect();

    let mut diagnostics = datasets.diagnostics.clone();
    diagnostics.extend(table.diagnostics.iter().cloned());

    let report = ValidationReport {
        datasets: datasets_report,
        joined_rows: table.records.len(),
        excluded_districts: table.excluded_districts,
        unmatched_period_rows: table.unmatched_period_rows,
        diagnostics,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        for d in &report.datasets {
            println!("{:<12} files: {:>3}  records: {:>8}", d.dataset, d.files, d.records);
        }
        println!("Joined rows:            {}", report.joined_rows);
        println!("Excluded districts:     {}", report.excluded_districts);
        println!("Unmatched update rows:  {}", report.unmatched_period_rows);

        if !report.diagnostics.is_empty() {
            println!("\nDiagnostics:");
            for diag in &report.diagnostics {
                println!("  - {diag}");
            }
        }
    }

    Ok(())
}

fn cmd_doctor(
    data_dir: Option<&Path>,
    config_path: Option<&Path>,
    json: bool,
) -> Result<(), IpdCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "ipd_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("IPD version {}", IPD_VERSION),
    });

    let config = match PipelineConfig::load_or_default(config_path) {
        Ok(config) => {
            match config.validate() {
                Ok(()) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: match config_path {
                        Some(path) => format!("Config {} is valid", path.display()),
                        None => "Using default configuration".to_string(),
                    },
                }),
                Err(errors) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: errors.join("; "),
                }),
            }
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            None
        }
    };

    if let (Some(dir), Some(config)) = (data_dir, config.as_ref()) {
        match DatasetLoader::new(config).scan(dir) {
            Ok(found) => {
                for kind in DatasetKind::ALL {
                    let count = found.get(kind).len();
                    let pattern = &config.datasets.get(kind).file_pattern;
                    checks.push(DoctorCheck {
                        name: format!("dataset_{kind}"),
                        status: if count > 0 {
                            CheckStatus::Ok
                        } else {
                            CheckStatus::Error
                        },
                        message: format!("{count} file(s) in {} match '{pattern}'", dir.display()),
                    });
                }
            }
            Err(e) => checks.push(DoctorCheck {
                name: "datasets".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        }
    } else if data_dir.is_none() {
        checks.push(DoctorCheck {
            name: "datasets".to_string(),
            status: CheckStatus::Warning,
            message: "No --data-dir given; dataset discovery not checked".to_string(),
        });
    }

    checks.push(DoctorCheck {
        name: "stdout".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdout) {
            "stdout is a TTY (table output recommended)".to_string()
        } else {
            "stdout is a pipe (json or csv output recommended)".to_string()
        },
    });

    let failed = checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    let report = DoctorReport {
        version: IPD_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("IPD Doctor");
        println!("==========");
        for check in &report.checks {
            let marker = match check.status {
                CheckStatus::Ok => "ok",
                CheckStatus::Warning => "warn",
                CheckStatus::Error => "FAIL",
            };
            println!("[{marker:>4}] {}: {}", check.name, check.message);
        }
    }

    if failed {
        Err(IpdCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum IpdCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    DoctorFailed,
}

impl From<io::Error> for IpdCliError {
    fn from(e: io::Error) -> Self {
        IpdCliError::Io(e)
    }
}

impl From<PipelineError> for IpdCliError {
    fn from(e: PipelineError) -> Self {
        IpdCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for IpdCliError {
    fn from(e: serde_json::Error) -> Self {
        IpdCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<IpdCliError> for CliError {
    fn from(e: IpdCliError) -> Self {
        match e {
            IpdCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            IpdCliError::Pipeline(e) => {
                let (code, hint) = match &e {
                    PipelineError::MissingDataset { .. } => (
                        "MISSING_DATASET",
                        "Run 'ipd doctor --data-dir <DIR>' to see which patterns match",
                    ),
                    PipelineError::Schema { .. } => (
                        "SCHEMA_ERROR",
                        "Check the CSV headers against the configured column names",
                    ),
                    PipelineError::InvalidConfig(_) | PipelineError::InvalidPattern { .. } => (
                        "CONFIG_ERROR",
                        "Fix the configuration file and retry",
                    ),
                    PipelineError::Csv(_) => ("CSV_ERROR", "Check that the input files are valid CSV"),
                    PipelineError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
                    PipelineError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            IpdCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            IpdCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    datasets: Vec<DatasetReport>,
    joined_rows: usize,
    excluded_districts: usize,
    unmatched_period_rows: usize,
    diagnostics: Vec<Diagnostic>,
}

#[derive(serde::Serialize)]
struct DatasetReport {
    dataset: DatasetKind,
    files: usize,
    records: usize,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
