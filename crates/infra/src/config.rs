//! Process configuration.
//!
//! Layers, last wins:
//! 1. built-in defaults
//! 2. `fieldcollect.toml` (optional, working directory)
//! 3. `FIELDCOLLECT__*` environment variables, e.g. `FIELDCOLLECT__SERVER__BIND_ADDR`
//!
//! `.env` is loaded into the environment first when present.

use serde::Deserialize;
use thiserror::Error;

use fieldcollect_observability::LogFormat;
use fieldcollect_routing::OptimizerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_meters_per_minute")]
    pub meters_per_minute: f64,
    #[serde(default = "default_dwell_minutes")]
    pub dwell_minutes: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let defaults = OptimizerSettings::default();
        Self {
            meters_per_minute: defaults.meters_per_minute,
            dwell_minutes: defaults.dwell_minutes,
        }
    }
}

fn default_meters_per_minute() -> f64 {
    OptimizerSettings::default().meters_per_minute
}

fn default_dwell_minutes() -> f64 {
    OptimizerSettings::default().dwell_minutes
}

impl OptimizerConfig {
    pub fn settings(&self) -> OptimizerSettings {
        OptimizerSettings {
            meters_per_minute: self.meters_per_minute,
            dwell_minutes: self.dwell_minutes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let raw = config::Config::builder()
            .add_source(config::File::with_name("fieldcollect").required(false))
            .add_source(config::Environment::with_prefix("FIELDCOLLECT").separator("__"))
            .build()?;

        Self::from_config(raw)
    }

    fn from_config(raw: config::Config) -> Result<Self, ConfigError> {
        let cfg: AppConfig = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind_addr is empty".to_string()));
        }
        self.optimizer
            .settings()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
