use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::job::parse_schedule;

/// Identifier used to compute per-app configuration directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"local"`.
    pub organization: &'static str,
    /// Application name, e.g. `"pulse"`.
    pub application: &'static str,
}

/// Application configuration persisted to `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tracing level to use if `RUST_LOG` is not set (e.g. `"info"`).
    pub log_level: String,
    /// Bind address of the HTTP control plane.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Self-health monitoring settings.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            listen_addr: default_listen_addr(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

fn default_listen_addr() -> String { "127.0.0.1:3000".to_string() }

impl Config {
    /// Apply `HEALTH_*` / `APP_ENV` overrides from the process environment.
    pub fn with_env_overrides(mut self) -> std::result::Result<Self, ValidationError> {
        let patch = patch_from_lookup(|k| std::env::var(k).ok())?;
        self.monitoring = self.monitoring.apply(&patch)?;
        Ok(self)
    }
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let pd = ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))?;
    let dir = pd.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Load `config.toml` from the app config dir or create a default one.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let dir = config_dir(app)?;
    load_or_init_at(&dir.join("config.toml"))
}

/// Load the config file at `path`, writing defaults there if it does not exist.
pub fn load_or_init_at(path: &Path) -> Result<Config> {
    if path.exists() {
        let txt = fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&txt)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let cfg = Config::default();
        save_config(path, &cfg)?;
        Ok(cfg)
    }
}

fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg)?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/* --------------------- monitoring config --------------------- */

/// Effective configuration of the self-health monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfig {
    /// Whether the scheduled health job is armed.
    pub enabled: bool,
    /// Probe path (joined onto `base_url`) or an absolute `http(s)://` URL.
    pub endpoint: String,
    /// Base URL of the hosting process.
    pub base_url: String,
    /// Cron expression (5-field, or 6/7-field with seconds).
    pub schedule: String,
    /// Per-attempt HTTP timeout.
    pub timeout_ms: u64,
    /// Extra attempts after the first one fails.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    /// Deployment tag written on every log record.
    pub environment: String,
    /// Health log settings.
    pub logging: LoggingConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/health".to_string(),
            base_url: "http://127.0.0.1:3000".to_string(),
            schedule: "*/5 * * * *".to_string(),
            timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            environment: "development".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Health log file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Whether probe attempts are written to disk.
    pub enabled: bool,
    /// Active log file.
    pub file_path: PathBuf,
    /// Rotation threshold in bytes; accepts `"10MB"` style strings on input.
    #[serde(deserialize_with = "deserialize_size")]
    pub max_file_size: u64,
    /// Rotated generations kept next to the active file.
    pub max_files: u32,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_path: PathBuf::from("logs/health-check.log"),
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
            format: LogFormat::Json,
        }
    }
}

/// On-disk line format of the health log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Newline-delimited JSON, readable back by `recent()`.
    #[default]
    Json,
    /// Single-line human-readable text.
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format {other:?} (expected json|text)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        })
    }
}

impl MonitoringConfig {
    /// Full URL the probe is sent to.
    pub fn target_url(&self) -> String {
        let ep = self.endpoint.trim();
        if ep.starts_with("http://") || ep.starts_with("https://") {
            return ep.to_string();
        }
        let base = self.base_url.trim().trim_end_matches('/');
        if ep.starts_with('/') {
            format!("{base}{ep}")
        } else {
            format!("{base}/{ep}")
        }
    }

    /// Check every field and report all violations at once.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = Vec::new();
        self.collect_violations(&mut errors);
        ValidationError::from_fields(errors)
    }

    fn collect_violations(&self, errors: &mut Vec<FieldError>) {
        let ep = self.endpoint.trim();
        if ep.is_empty() {
            errors.push(FieldError::new("endpoint", "must not be empty"));
        } else if !ep.starts_with("http://") && !ep.starts_with("https://") && self.base_url.trim().is_empty() {
            errors.push(FieldError::new("baseUrl", "must not be empty when endpoint is a path"));
        }
        if self.schedule.trim().is_empty() {
            errors.push(FieldError::new("schedule", "must not be empty"));
        } else if let Err(e) = parse_schedule(&self.schedule) {
            errors.push(FieldError::new("schedule", format!("invalid cron expression: {e}")));
        }
        if self.timeout_ms == 0 {
            errors.push(FieldError::new("timeoutMs", "must be greater than 0"));
        }
        if self.logging.enabled {
            if self.logging.file_path.as_os_str().is_empty() {
                errors.push(FieldError::new("logging.filePath", "must not be empty when logging is enabled"));
            }
            if self.logging.max_file_size == 0 {
                errors.push(FieldError::new("logging.maxFileSize", "must be greater than 0"));
            }
            if self.logging.max_files == 0 {
                errors.push(FieldError::new("logging.maxFiles", "must be at least 1"));
            }
        }
    }

    /// Merge `patch` over `self` and validate the result as a whole.
    pub fn apply(&self, patch: &ConfigPatch) -> std::result::Result<Self, ValidationError> {
        let mut errors = Vec::new();
        let mut next = self.clone();

        if let Some(v) = patch.enabled { next.enabled = v; }
        if let Some(v) = &patch.endpoint { next.endpoint = v.clone(); }
        if let Some(v) = &patch.base_url { next.base_url = v.clone(); }
        if let Some(v) = &patch.schedule { next.schedule = v.clone(); }
        if let Some(v) = &patch.environment { next.environment = v.clone(); }
        if let Some(v) = non_negative("timeoutMs", patch.timeout_ms, &mut errors) { next.timeout_ms = v; }
        if let Some(v) = non_negative("maxRetries", patch.max_retries, &mut errors) {
            match u32::try_from(v) {
                Ok(v) => next.max_retries = v,
                Err(_) => errors.push(FieldError::new("maxRetries", "is out of range")),
            }
        }
        if let Some(v) = non_negative("retryDelayMs", patch.retry_delay_ms, &mut errors) { next.retry_delay_ms = v; }

        if let Some(lp) = &patch.logging {
            let log = &mut next.logging;
            if let Some(v) = lp.enabled { log.enabled = v; }
            if let Some(v) = &lp.file_path { log.file_path = PathBuf::from(v); }
            match &lp.max_file_size {
                Some(SizeInput::Bytes(n)) => match u64::try_from(*n) {
                    Ok(n) => log.max_file_size = n,
                    Err(_) => errors.push(FieldError::new("logging.maxFileSize", "must not be negative")),
                },
                Some(SizeInput::Text(s)) => match parse_size(s) {
                    Ok(n) => log.max_file_size = n,
                    Err(e) => errors.push(FieldError::new("logging.maxFileSize", e)),
                },
                None => {}
            }
            if let Some(v) = non_negative("logging.maxFiles", lp.max_files, &mut errors) {
                match u32::try_from(v) {
                    Ok(v) => log.max_files = v,
                    Err(_) => errors.push(FieldError::new("logging.maxFiles", "is out of range")),
                }
            }
            if let Some(v) = &lp.format {
                match v.parse::<LogFormat>() {
                    Ok(f) => log.format = f,
                    Err(e) => errors.push(FieldError::new("logging.format", e)),
                }
            }
        }

        next.collect_violations(&mut errors);
        ValidationError::from_fields(errors).map(|()| next)
    }
}

fn non_negative(field: &'static str, v: Option<i64>, errors: &mut Vec<FieldError>) -> Option<u64> {
    let v = v?;
    match u64::try_from(v) {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(FieldError::new(field, "must not be negative"));
            None
        }
    }
}

/* --------------------- partial updates --------------------- */

/// Partial update of [`MonitoringConfig`]; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigPatch {
    /// See [`MonitoringConfig::enabled`].
    pub enabled: Option<bool>,
    /// See [`MonitoringConfig::endpoint`].
    pub endpoint: Option<String>,
    /// See [`MonitoringConfig::base_url`].
    pub base_url: Option<String>,
    /// See [`MonitoringConfig::schedule`].
    pub schedule: Option<String>,
    /// Signed so that negative input is reported per field.
    pub timeout_ms: Option<i64>,
    /// Signed so that negative input is reported per field.
    pub max_retries: Option<i64>,
    /// Signed so that negative input is reported per field.
    pub retry_delay_ms: Option<i64>,
    /// See [`MonitoringConfig::environment`].
    pub environment: Option<String>,
    /// Logging section.
    pub logging: Option<LoggingPatch>,
}

/// Partial update of [`LoggingConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggingPatch {
    /// See [`LoggingConfig::enabled`].
    pub enabled: Option<bool>,
    /// See [`LoggingConfig::file_path`].
    pub file_path: Option<String>,
    /// Byte count or size string.
    pub max_file_size: Option<SizeInput>,
    /// Signed so that negative input is reported per field.
    pub max_files: Option<i64>,
    /// `json` or `text`.
    pub format: Option<String>,
}

/// A size given either as a byte count or as a string like `"10MB"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeInput {
    /// Raw byte count.
    Bytes(i64),
    /// Human-readable size.
    Text(String),
}

/// Parse a size like `"10MB"`, `"512kb"`, `"1.5GB"` or `"2048"` into bytes (binary multiples).
pub fn parse_size(input: &str) -> std::result::Result<u64, String> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| format!("invalid size {input:?}"))?;
    let mult: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        other => return Err(format!("unknown size unit {other:?} in {input:?}")),
    };
    Ok((value * mult as f64) as u64)
}

fn deserialize_size<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    match SizeInput::deserialize(d)? {
        SizeInput::Bytes(n) => u64::try_from(n).map_err(serde::de::Error::custom),
        SizeInput::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/* --------------------- env overrides --------------------- */

/// Build a patch from `HEALTH_*` / `APP_ENV` variables returned by `lookup`.
pub fn patch_from_lookup<F>(lookup: F) -> std::result::Result<ConfigPatch, ValidationError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();
    let mut patch = ConfigPatch {
        endpoint: lookup("HEALTH_CHECK_ENDPOINT"),
        base_url: lookup("HEALTH_CHECK_BASE_URL"),
        schedule: lookup("HEALTH_CHECK_SCHEDULE"),
        environment: lookup("APP_ENV"),
        ..ConfigPatch::default()
    };
    patch.enabled = env_bool(&lookup, "HEALTH_CHECK_ENABLED", "enabled", &mut errors);
    patch.timeout_ms = env_int(&lookup, "HEALTH_CHECK_TIMEOUT", "timeoutMs", &mut errors);
    patch.max_retries = env_int(&lookup, "HEALTH_CHECK_RETRIES", "maxRetries", &mut errors);
    patch.retry_delay_ms = env_int(&lookup, "HEALTH_CHECK_RETRY_DELAY", "retryDelayMs", &mut errors);

    let logging = LoggingPatch {
        enabled: env_bool(&lookup, "HEALTH_LOG_ENABLED", "logging.enabled", &mut errors),
        file_path: lookup("HEALTH_LOG_FILE"),
        max_file_size: lookup("HEALTH_LOG_MAX_SIZE").map(SizeInput::Text),
        max_files: env_int(&lookup, "HEALTH_LOG_MAX_FILES", "logging.maxFiles", &mut errors),
        format: lookup("HEALTH_LOG_FORMAT"),
    };
    let any_logging = logging.enabled.is_some()
        || logging.file_path.is_some()
        || logging.max_file_size.is_some()
        || logging.max_files.is_some()
        || logging.format.is_some();
    if any_logging {
        patch.logging = Some(logging);
    }

    ValidationError::from_fields(errors).map(|()| patch)
}

fn env_bool<F>(lookup: &F, var: &str, field: &'static str, errors: &mut Vec<FieldError>) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(var)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            errors.push(FieldError::new(field, format!("{var}={raw:?} is not a boolean")));
            None
        }
    }
}

fn env_int<F>(lookup: &F, var: &str, field: &'static str, errors: &mut Vec<FieldError>) -> Option<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(var)?;
    match raw.trim().parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            errors.push(FieldError::new(field, format!("{var}={raw:?} is not an integer")));
            None
        }
    }
}

/* --------------------- validation errors --------------------- */

/// One offending configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field path, e.g. `"timeoutMs"` or `"logging.filePath"`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    /// Build a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Aggregated configuration validation failure listing every offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("invalid configuration: {}", summarize(.errors))]
pub struct ValidationError {
    /// All violations found.
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Single-field failure.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { errors: vec![FieldError::new(field, message)] }
    }

    /// `Ok(())` when `errors` is empty.
    pub fn from_fields(errors: Vec<FieldError>) -> std::result::Result<(), Self> {
        if errors.is_empty() { Ok(()) } else { Err(Self { errors }) }
    }

    /// Whether `field` is among the violations.
    pub fn names(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
