use serde::Deserialize;
use std::{env, path::Path, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfig,
    pub model: ModelConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub export_traces: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelegramConfig {
    pub bot_token: String,
    pub target_chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduleConfig {
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    /// Fixed interval between runs. Ignored when `hour` is set.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    /// Daily firing time in UTC.
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            interval_minutes: default_interval_minutes(),
            hour: None,
            minute: None,
            misfire_grace_secs: default_misfire_grace_secs(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SummarizerConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            chars_per_token: default_chars_per_token(),
            concurrency: default_concurrency(),
        }
    }
}

impl SummarizerConfig {
    pub fn char_budget(&self) -> usize {
        self.max_context_tokens.saturating_mul(self.chars_per_token)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArchiveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_archive_dir")]
    pub dir: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_archive_dir(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_window_minutes() -> u32 {
    60
}

fn default_interval_minutes() -> u32 {
    60
}

fn default_misfire_grace_secs() -> u64 {
    300
}

fn default_run_timeout_secs() -> u64 {
    600
}

fn default_max_context_tokens() -> usize {
    4000
}

fn default_chars_per_token() -> usize {
    4
}

fn default_concurrency() -> usize {
    4
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid APP_PORT override: {0}")]
    InvalidPort(std::num::ParseIntError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from the provided path, apply environment overrides,
    /// resolve any `env:` indirections and validate the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides()?;
        cfg.resolve_env_markers()?;
        cfg.expand_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = env::var("APP_PORT") {
            let port: u16 = port.parse().map_err(ConfigError::InvalidPort)?;
            self.app.port = port;
        }

        if let Ok(otlp) = env::var("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(otlp);
        }

        if let Ok(model) = env::var("MODEL") {
            self.model.model = model;
        }

        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }

        if let Ok(target) = env::var("TARGET_CHAT_ID") {
            self.telegram.target_chat_id = target;
        }

        Ok(())
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        apply_env_marker(&mut self.app.service_name)?;
        apply_env_marker(&mut self.app.env)?;
        apply_env_marker(&mut self.model.provider)?;
        apply_env_marker(&mut self.model.model)?;
        apply_env_marker(&mut self.telegram.bot_token)?;
        apply_env_marker(&mut self.telegram.target_chat_id)?;
        apply_env_marker(&mut self.telegram.api_base)?;
        apply_env_marker_path(&mut self.paths.database)?;
        apply_env_marker_path(&mut self.archive.dir)?;
        if let Some(endpoint) = &mut self.telemetry.otlp_endpoint {
            apply_env_marker(endpoint)?;
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        self.paths.database = expand_tilde(&self.paths.database);
        self.archive.dir = expand_tilde(&self.archive.dir);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.telegram.bot_token.trim().is_empty() {
            return invalid("telegram.bot_token must be set");
        }
        if self.telegram.target_chat_id.trim().is_empty() {
            return invalid("telegram.target_chat_id must be set");
        }
        if self.model.model.trim().is_empty() {
            return invalid("model.model must be set");
        }

        let schedule = &self.schedule;
        if schedule.window_minutes == 0 {
            return invalid("schedule.window_minutes must be positive");
        }
        match (schedule.hour, schedule.minute) {
            (Some(hour), _) if hour >= 24 => return invalid("schedule.hour must be below 24"),
            (_, Some(minute)) if minute >= 60 => {
                return invalid("schedule.minute must be below 60");
            }
            (None, Some(_)) => return invalid("schedule.minute requires schedule.hour"),
            (None, None) if schedule.interval_minutes == 0 => {
                return invalid("schedule.interval_minutes must be positive");
            }
            _ => {}
        }
        if schedule.run_timeout_secs == 0 {
            return invalid("schedule.run_timeout_secs must be positive");
        }

        let summarizer = &self.summarizer;
        if summarizer.max_context_tokens == 0 || summarizer.chars_per_token == 0 {
            return invalid("summarizer budget must be positive");
        }
        if summarizer.concurrency == 0 {
            return invalid("summarizer.concurrency must be positive");
        }

        Ok(())
    }
}

fn apply_env_marker(value: &mut String) -> Result<(), ConfigError> {
    if let Some(rest) = value.strip_prefix("env:") {
        let resolved = env::var(rest).map_err(|_| ConfigError::MissingEnvVar(rest.to_string()))?;
        *value = resolved;
    }
    Ok(())
}

fn apply_env_marker_path(path: &mut PathBuf) -> Result<(), ConfigError> {
    let mut value = path.to_string_lossy().to_string();
    apply_env_marker(&mut value)?;
    *path = PathBuf::from(value);
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy().to_string();
    PathBuf::from(shellexpand::tilde(&raw).as_ref())
}
