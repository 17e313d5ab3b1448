//! Migraine CLI - Command-line interface for migraine-personalize
//!
//! Commands:
//! - train: Train a population base model into a model store
//! - retrain: Personalize one modality for one user
//! - predict: Predict and fuse tomorrow's migraine risk for one user
//! - validate: Validate daily record schema
//! - doctor: Diagnose store health and configuration
//! - schema: Print feature schemas

use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use migraine_personalize::features::FeatureSchema;
use migraine_personalize::schema::{DatedRecord, RecordAdapter, ValidationResult};
use migraine_personalize::types::Modality;
use migraine_personalize::{
    DailyRecord, ForecastProcessor, ModelStore, PipelineConfig, PipelineError, SensorRecord,
    UserProfile, PIPELINE_VERSION, PRODUCER_NAME, SCHEMA_VERSION,
};

/// Migraine - Per-user migraine risk models from sensor and survey data
#[derive(Parser)]
#[command(name = "migraine")]
#[command(version = PIPELINE_VERSION)]
#[command(about = "Train, personalize and query migraine risk models", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a population base model
    Train {
        /// Modality to train
        #[arg(value_enum)]
        modality: ModalityArg,

        /// Records file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Profiles file (JSON object keyed by user ID), survey only
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Model store directory
        #[arg(long)]
        store: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Personalize one modality for one user
    Retrain {
        /// Modality to personalize
        #[arg(value_enum)]
        modality: ModalityArg,

        /// User ID
        #[arg(short, long)]
        user: String,

        /// Labeled history file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Profiles file (JSON object keyed by user ID), survey only
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Model store directory
        #[arg(long)]
        store: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Predict and fuse migraine risk for one user
    Predict {
        /// User ID
        #[arg(short, long)]
        user: String,

        /// Recent sensor days
        #[arg(long)]
        sensor: Option<PathBuf>,

        /// Recent survey days
        #[arg(long)]
        survey: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Profiles file (JSON object keyed by user ID)
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Model store directory
        #[arg(long)]
        store: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Pretty-print the forecast
        #[arg(long)]
        pretty: bool,
    },

    /// Validate daily record schema
    Validate {
        /// Record kind
        #[arg(value_enum)]
        modality: ModalityArg,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose store health and configuration
    Doctor {
        /// Model store directory
        #[arg(long)]
        store: Option<PathBuf>,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print feature schema information
    Schema {
        /// Modality whose schema to print
        #[arg(value_enum)]
        modality: ModalityArg,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModalityArg {
    /// Daily wearable readings
    Sensor,
    /// Daily trigger surveys
    Survey,
}

impl From<ModalityArg> for Modality {
    fn from(arg: ModalityArg) -> Self {
        match arg {
            ModalityArg::Sensor => Modality::Sensor,
            ModalityArg::Survey => Modality::Survey,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), MigraineCliError> {
    match cli.command {
        Commands::Train {
            modality,
            input,
            input_format,
            profiles,
            store,
            config,
        } => cmd_train(
            modality.into(),
            &input,
            input_format,
            profiles.as_deref(),
            &store,
            config.as_deref(),
        ),
        Commands::Retrain {
            modality,
            user,
            input,
            input_format,
            profiles,
            store,
            config,
        } => cmd_retrain(
            modality.into(),
            &user,
            &input,
            input_format,
            profiles.as_deref(),
            &store,
            config.as_deref(),
        ),
        Commands::Predict {
            user,
            sensor,
            survey,
            input_format,
            profiles,
            store,
            config,
            pretty,
        } => cmd_predict(
            &user,
            sensor.as_deref(),
            survey.as_deref(),
            input_format,
            profiles.as_deref(),
            &store,
            config.as_deref(),
            pretty,
        ),
        Commands::Validate {
            modality,
            input,
            input_format,
            json,
        } => cmd_validate(modality.into(), &input, input_format, json),
        Commands::Doctor {
            store,
            config,
            json,
        } => cmd_doctor(store.as_deref(), config.as_deref(), json),
        Commands::Schema { modality, json } => cmd_schema(modality.into(), json),
    }
}

fn read_input(input: &Path) -> Result<String, MigraineCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_records<T: serde::de::DeserializeOwned>(
    input: &Path,
    format: InputFormat,
) -> Result<Vec<T>, MigraineCliError> {
    let data = read_input(input)?;
    let records = match format {
        InputFormat::Ndjson => RecordAdapter::parse_ndjson(&data)?,
        InputFormat::Json => RecordAdapter::parse_array(&data)?,
    };
    if records.is_empty() {
        return Err(MigraineCliError::NoRecords);
    }
    Ok(records)
}

fn read_profiles(path: Option<&Path>) -> Result<BTreeMap<String, UserProfile>, MigraineCliError> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(BTreeMap::new()),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, MigraineCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn open_processor(store: &Path, config: Option<&Path>) -> Result<ForecastProcessor, MigraineCliError> {
    Ok(ForecastProcessor::open(load_config(config)?, store)?)
}

fn cmd_train(
    modality: Modality,
    input: &Path,
    input_format: InputFormat,
    profiles: Option<&Path>,
    store: &Path,
    config: Option<&Path>,
) -> Result<(), MigraineCliError> {
    let processor = open_processor(store, config)?;

    let artifact = match modality {
        Modality::Sensor => {
            let records: Vec<SensorRecord> = read_records(input, input_format)?;
            processor.train_base_sensor(&records)?
        }
        Modality::Survey => {
            let records: Vec<DailyRecord> = read_records(input, input_format)?;
            let profiles = read_profiles(profiles)?;
            processor.train_base_survey(&records, &profiles)?
        }
    };

    let summary = serde_json::json!({
        "key": artifact.key.to_string(),
        "version": artifact.version,
        "classifier": artifact.classifier.kind(),
        "schema_version": artifact.schema.version,
        "n_samples": artifact.n_samples,
        "n_users": artifact.n_users,
        "metrics": artifact.metrics,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_retrain(
    modality: Modality,
    user: &str,
    input: &Path,
    input_format: InputFormat,
    profiles: Option<&Path>,
    store: &Path,
    config: Option<&Path>,
) -> Result<(), MigraineCliError> {
    let processor = open_processor(store, config)?;

    let outcome = match modality {
        Modality::Sensor => {
            let history: Vec<SensorRecord> = read_records(input, input_format)?;
            processor.retrain_sensor(user, &history)?
        }
        Modality::Survey => {
            let history: Vec<DailyRecord> = read_records(input, input_format)?;
            let profile = read_profiles(profiles)?
                .remove(user)
                .ok_or_else(|| MigraineCliError::MissingProfile(user.to_string()))?;
            processor.retrain_survey(user, &history, &profile)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.success {
        Ok(())
    } else {
        Err(MigraineCliError::RetrainDeclined(outcome.message))
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_predict(
    user: &str,
    sensor: Option<&Path>,
    survey: Option<&Path>,
    input_format: InputFormat,
    profiles: Option<&Path>,
    store: &Path,
    config: Option<&Path>,
    pretty: bool,
) -> Result<(), MigraineCliError> {
    if sensor.is_none() && survey.is_none() {
        return Err(MigraineCliError::NoRecords);
    }
    let processor = open_processor(store, config)?;

    let sensor_days: Vec<SensorRecord> = match sensor {
        Some(path) => read_records(path, input_format)?,
        None => Vec::new(),
    };
    let survey_days: Vec<DailyRecord> = match survey {
        Some(path) => read_records(path, input_format)?,
        None => Vec::new(),
    };
    let profile = read_profiles(profiles)?.remove(user);

    let payload = processor.forecast_payload(user, &sensor_days, &survey_days, profile.as_ref())?;
    let output = if pretty {
        serde_json::to_string_pretty(&payload)?
    } else {
        serde_json::to_string(&payload)?
    };

    let mut stdout = io::stdout();
    writeln!(stdout, "{}", output)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_validate(
    modality: Modality,
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), MigraineCliError> {
    let (total, errors) = match modality {
        Modality::Sensor => {
            let records: Vec<SensorRecord> = read_records(input, input_format)?;
            validate_batch(&records, SensorRecord::validate)
        }
        Modality::Survey => {
            let records: Vec<DailyRecord> = read_records(input, input_format)?;
            validate_batch(&records, DailyRecord::validate)
        }
    };

    let report = ValidationReport {
        total_records: total,
        valid_records: total - errors.len(),
        invalid_records: errors.len(),
        errors: errors
            .into_iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                user_id: r.user_id,
                error: r.error,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  [{}] {}: {}", err.index, err.user_id, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(MigraineCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

/// Field validation plus the one-record-per-user-per-day rule
fn validate_batch<T, F>(records: &[T], validate: F) -> (usize, Vec<ValidationResult>)
where
    T: DatedRecord + Clone,
    F: Fn(&T) -> Result<(), PipelineError>,
{
    let mut errors = RecordAdapter::validate_records(records, validate);
    for (user_id, days) in RecordAdapter::group_by_user(records) {
        if let Err(e) = RecordAdapter::ensure_unique_days(&days) {
            if let Some(index) = records.iter().position(|r| r.user_id() == user_id) {
                errors.push(ValidationResult {
                    index,
                    user_id,
                    error: e.to_string(),
                });
            }
        }
    }
    errors.sort_by_key(|r| r.index);
    (records.len(), errors)
}

fn cmd_doctor(store: Option<&Path>, config: Option<&Path>, json: bool) -> Result<(), MigraineCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "pipeline_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} version {}", PRODUCER_NAME, PIPELINE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Input schema: {}, features: {} / {}",
            SCHEMA_VERSION,
            FeatureSchema::sensor().version,
            FeatureSchema::survey().version
        ),
    });

    let config = match load_config(config) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Configuration valid (min_user_samples={}, cv_folds={})",
                        config.min_user_samples, config.cv_folds
                    ),
                });
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
        },
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Unreadable configuration: {}", e),
            });
            None
        }
    };

    match (store, config) {
        (Some(root), Some(config)) => match ForecastProcessor::open(config, root) {
            Ok(processor) => {
                for modality in Modality::ALL {
                    checks.push(base_check(processor.store().as_ref(), modality));
                    checks.push(match processor.store().list_users(modality) {
                        Ok(users) => DoctorCheck {
                            name: format!("{}_users", modality),
                            status: CheckStatus::Ok,
                            message: format!("{} personalized {} models", users.len(), modality),
                        },
                        Err(e) => DoctorCheck {
                            name: format!("{}_users", modality),
                            status: CheckStatus::Error,
                            message: e.to_string(),
                        },
                    });
                }
            }
            Err(e) => checks.push(DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot open store: {}", e),
            }),
        },
        (Some(_), None) => checks.push(DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Warning,
            message: "Store not checked without a valid configuration".to_string(),
        }),
        (None, _) => checks.push(DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Warning,
            message: "No store directory given".to_string(),
        }),
    }

    let has_errors = checks.iter().any(|c| matches!(c.status, CheckStatus::Error));

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PIPELINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Migraine Doctor");
        println!("===============");
        println!("Producer: {} v{}\n", report.producer, report.version);
        for check in &report.checks {
            let icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("{} {}: {}", icon, check.name, check.message);
        }
    }

    if has_errors {
        Err(MigraineCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn base_check(store: &dyn ModelStore, modality: Modality) -> DoctorCheck {
    let name = format!("{}_base", modality);
    match store.load_base(modality) {
        Ok(Some(artifact)) => match artifact.check_consistency() {
            Ok(()) => DoctorCheck {
                name,
                status: CheckStatus::Ok,
                message: format!(
                    "{} base model {} (cv accuracy {:.3}, {} samples)",
                    artifact.classifier.kind(),
                    artifact.version,
                    artifact.metrics.cv_accuracy,
                    artifact.n_samples
                ),
            },
            Err(e) => DoctorCheck {
                name,
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        },
        Ok(None) => DoctorCheck {
            name,
            status: CheckStatus::Warning,
            message: format!("No {} base model trained", modality),
        },
        Err(e) => DoctorCheck {
            name,
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

fn cmd_schema(modality: Modality, json: bool) -> Result<(), MigraineCliError> {
    let schema = FeatureSchema::for_modality(modality);

    if json {
        println!("{}", serde_json::to_string_pretty(&schema)?);
    } else {
        println!("{} feature schema ({})", modality, schema.version);
        println!("Input records: {}", SCHEMA_VERSION);
        println!();
        for (i, name) in schema.names.iter().enumerate() {
            println!("  {:>2}  {}", i, name);
        }
    }
    Ok(())
}

// Error handling

#[derive(Debug)]
enum MigraineCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    NoRecords,
    MissingProfile(String),
    RetrainDeclined(String),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for MigraineCliError {
    fn from(e: io::Error) -> Self {
        MigraineCliError::Io(e)
    }
}

impl From<PipelineError> for MigraineCliError {
    fn from(e: PipelineError) -> Self {
        MigraineCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for MigraineCliError {
    fn from(e: serde_json::Error) -> Self {
        MigraineCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MigraineCliError> for CliError {
    fn from(e: MigraineCliError) -> Self {
        match e {
            MigraineCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MigraineCliError::Pipeline(e) => CliError {
                code: e.code().to_string(),
                message: e.to_string(),
                hint: Some(
                    match e.kind() {
                        migraine_personalize::ErrorKind::Input => "Run 'migraine validate' on the input",
                        migraine_personalize::ErrorKind::ModelUnavailable => {
                            "Train a base model with 'migraine train'"
                        }
                        migraine_personalize::ErrorKind::Consistency => {
                            "Retrain the affected model; stored schemas disagree"
                        }
                        migraine_personalize::ErrorKind::Storage => "Check the store directory",
                    }
                    .to_string(),
                ),
            },
            MigraineCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MigraineCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            MigraineCliError::MissingProfile(user) => CliError {
                code: "MISSING_PROFILE".to_string(),
                message: format!("No profile for user {}", user),
                hint: Some("Pass --profiles with an entry for the user".to_string()),
            },
            MigraineCliError::RetrainDeclined(message) => CliError {
                code: "RETRAIN_DECLINED".to_string(),
                message,
                hint: Some("Collect more labeled days and retry".to_string()),
            },
            MigraineCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            MigraineCliError::DoctorFailed => CliError {
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
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    user_id: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
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
