use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::RetentionPolicy;

/// Application-level constants
pub const APP_NAME: &str = "ocr-intake";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_ENGINE: &str = "OCR_INTAKE_ENGINE";
pub const ENV_ENGINE_ARGS: &str = "OCR_INTAKE_ENGINE_ARGS";
pub const ENV_DEADLINE_SECS: &str = "OCR_INTAKE_DEADLINE_SECS";
pub const ENV_TIMEOUT_RETRIES: &str = "OCR_INTAKE_TIMEOUT_RETRIES";
pub const ENV_STAGING_DIR: &str = "OCR_INTAKE_STAGING_DIR";
pub const ENV_DB_PATH: &str = "OCR_INTAKE_DB_PATH";
pub const ENV_RETENTION: &str = "OCR_INTAKE_RETENTION";

/// Engine launched when none is configured.
pub const DEFAULT_ENGINE: &str = "ocr-engine";

pub const DEFAULT_DEADLINE_SECS: u64 = 120;

/// Platform data dir (e.g. ~/.local/share/ocr-intake), falling back to the
/// system temp dir when no home can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Root under which each attempt gets its private directory
pub fn staging_dir() -> PathBuf {
    app_data_dir().join("staging")
}

pub fn database_path() -> PathBuf {
    app_data_dir().join("intake.db")
}

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,ocr_intake_lib=debug"
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for the intake service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    pub engine: PathBuf,
    /// Arguments passed to the engine before the input path.
    pub engine_args: Vec<String>,
    pub deadline: Duration,
    pub timeout_retries: u32,
    pub staging_dir: PathBuf,
    pub database_path: PathBuf,
    pub retention: RetentionPolicy,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            engine: PathBuf::from(DEFAULT_ENGINE),
            engine_args: Vec::new(),
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            timeout_retries: 0,
            staging_dir: staging_dir(),
            database_path: database_path(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl IntakeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset or blank variables
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(engine) = get(ENV_ENGINE) {
            config.engine = PathBuf::from(engine.trim());
        }
        if let Some(args) = get(ENV_ENGINE_ARGS) {
            config.engine_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(raw) = get(ENV_DEADLINE_SECS) {
            let secs: u64 = parse_number(ENV_DEADLINE_SECS, &raw)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    var: ENV_DEADLINE_SECS,
                    value: raw,
                    reason: "deadline must be at least one second".into(),
                });
            }
            config.deadline = Duration::from_secs(secs);
        }
        if let Some(raw) = get(ENV_TIMEOUT_RETRIES) {
            config.timeout_retries = parse_number(ENV_TIMEOUT_RETRIES, &raw)?;
        }
        if let Some(dir) = get(ENV_STAGING_DIR) {
            config.staging_dir = PathBuf::from(dir);
        }
        if let Some(path) = get(ENV_DB_PATH) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(raw) = get(ENV_RETENTION) {
            config.retention = raw
                .trim()
                .to_ascii_lowercase()
                .parse::<RetentionPolicy>()
                .map_err(|e| ConfigError::InvalidValue {
                    var: ENV_RETENTION,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(config)
    }
}

fn parse_number<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
