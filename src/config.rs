//! Configuration loader and validator for the survey dispatch service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub render: Render,
    pub email: Email,
    pub whatsapp: WhatsApp,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// How often the record store is snapshotted for pending records.
    pub poll_interval_ms: u64,
    /// Optional JSON-lines file receiving terminal status writes that could not be persisted.
    #[serde(default)]
    pub dead_letter_path: Option<String>,
}

/// PDF rendering settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Render {
    /// Explicit `wkhtmltopdf` binary; looked up on PATH when absent.
    #[serde(default)]
    pub wkhtmltopdf_path: Option<String>,
}

/// SMTP settings for the email channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_name: String,
}

/// WhatsApp Cloud API settings for the messaging channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhatsApp {
    pub token: String,
    pub phone_number_id: String,
    pub api_version: String,
    #[serde(default = "default_ready_check_interval_ms")]
    pub ready_check_interval_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_probe_retry_ms")]
    pub probe_retry_ms: u64,
}

fn default_ready_check_interval_ms() -> u64 {
    2_000
}

fn default_ready_timeout_ms() -> u64 {
    15_000
}

fn default_probe_retry_ms() -> u64 {
    10_000
}

impl App {
    /// Data directory with a leading `~/` expanded against `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Directory receiving the rendered reports.
    pub fn output_dir(&self) -> PathBuf {
        Path::new(&self.resolved_data_dir()).join("generated_pdfs")
    }

    /// SQLite URL, overridable through `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/surveys.db", self.resolved_data_dir()))
    }
}

impl WhatsApp {
    pub fn ready_check_interval(&self) -> Duration {
        Duration::from_millis(self.ready_check_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn probe_retry(&self) -> Duration {
        Duration::from_millis(self.probe_retry_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and the report directory).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.output_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if let Some(path) = &cfg.app.dead_letter_path {
        if path.trim().is_empty() {
            return Err(ConfigError::Invalid("app.dead_letter_path must be non-empty when set"));
        }
    }

    if cfg.email.smtp_host.trim().is_empty() {
        return Err(ConfigError::Invalid("email.smtp_host must be non-empty"));
    }
    if cfg.email.smtp_port == 0 {
        return Err(ConfigError::Invalid("email.smtp_port must be > 0"));
    }
    if cfg.email.username.trim().is_empty() {
        return Err(ConfigError::Invalid("email.username must be non-empty"));
    }

    let wa = &cfg.whatsapp;
    if wa.token.trim().is_empty() {
        return Err(ConfigError::Invalid("whatsapp.token must be non-empty"));
    }
    if wa.phone_number_id.trim().is_empty() {
        return Err(ConfigError::Invalid("whatsapp.phone_number_id must be non-empty"));
    }
    if wa.api_version.trim().is_empty() {
        return Err(ConfigError::Invalid("whatsapp.api_version must be non-empty"));
    }
    if wa.ready_check_interval_ms == 0 {
        return Err(ConfigError::Invalid("whatsapp.ready_check_interval_ms must be > 0"));
    }
    if wa.ready_timeout_ms < wa.ready_check_interval_ms {
        return Err(ConfigError::Invalid(
            "whatsapp.ready_timeout_ms must be >= whatsapp.ready_check_interval_ms",
        ));
    }
    if wa.probe_retry_ms == 0 {
        return Err(ConfigError::Invalid("whatsapp.probe_retry_ms must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 1000
  dead_letter_path: "./data/dead_letter.jsonl"

render:
  wkhtmltopdf_path: null

email:
  smtp_host: "smtp.gmail.com"
  smtp_port: 587
  username: "relatorios@example.com"
  password: "YOUR_SMTP_APP_PASSWORD"
  from_name: "App PitStop"

whatsapp:
  token: "YOUR_WHATSAPP_CLOUD_TOKEN"
  phone_number_id: "WHATSAPP_PHONE_NUMBER_ID"
  api_version: "v19.0"
  ready_check_interval_ms: 2000
  ready_timeout_ms: 15000
  probe_retry_ms: 10000
"#
}
