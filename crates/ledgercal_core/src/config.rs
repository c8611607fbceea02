//! Pipeline configuration.
//!
//! # Responsibility
//! - Hold every tunable of the request path and the worker in one struct.
//! - Overlay `LEDGERCAL_*` environment variables onto the defaults.
//!
//! # Invariants
//! - A config that passed `validate` yields a usable `BrokerConfig`.

use crate::logging::{default_log_level, LoggingConfig};
use crate::model::money::Money;
use crate::queue::{
    BrokerConfig, DEFAULT_BLOCKED_CONNECTION_TIMEOUT, DEFAULT_HEARTBEAT, DEFAULT_QUEUE_NAME,
};
use crate::service::prediction_service::DEFAULT_PREDICTION_COST;
use crate::worker::runner::DEFAULT_POLL_INTERVAL;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "LEDGERCAL_DB_PATH";
pub const ENV_BROKER_PATH: &str = "LEDGERCAL_BROKER_PATH";
pub const ENV_QUEUE_NAME: &str = "LEDGERCAL_QUEUE";
pub const ENV_PREDICTION_COST: &str = "LEDGERCAL_PREDICTION_COST";
pub const ENV_HEARTBEAT_SECS: &str = "LEDGERCAL_HEARTBEAT_SECS";
pub const ENV_BLOCKED_TIMEOUT_SECS: &str = "LEDGERCAL_BLOCKED_TIMEOUT_SECS";
pub const ENV_POLL_INTERVAL_MS: &str = "LEDGERCAL_POLL_INTERVAL_MS";
pub const ENV_LOG_LEVEL: &str = "LEDGERCAL_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "LEDGERCAL_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable present but unparsable.
    InvalidValue { key: &'static str, value: String },
    EmptyQueueName,
    NonPositiveCost(Money),
    ZeroDuration(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
            Self::EmptyQueueName => write!(f, "queue name cannot be empty"),
            Self::NonPositiveCost(cost) => write!(f, "prediction cost must be positive, got {cost}"),
            Self::ZeroDuration(name) => write!(f, "{name} must be greater than zero"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    pub broker_path: PathBuf,
    pub queue_name: String,
    pub prediction_cost: Money,
    pub heartbeat: Duration,
    pub blocked_connection_timeout: Duration,
    pub poll_interval: Duration,
    pub log_level: String,
    /// `None` leaves logging uninitialized.
    pub log_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ledgercal.sqlite3"),
            broker_path: PathBuf::from("ledgercal-broker.sqlite3"),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            prediction_cost: DEFAULT_PREDICTION_COST,
            heartbeat: DEFAULT_HEARTBEAT,
            blocked_connection_timeout: DEFAULT_BLOCKED_CONNECTION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `LEDGERCAL_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values returned by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DB_PATH) {
            config.db_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_BROKER_PATH) {
            config.broker_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_QUEUE_NAME) {
            config.queue_name = value.trim().to_string();
        }
        if let Some(value) = lookup(ENV_PREDICTION_COST) {
            config.prediction_cost = Money::parse_decimal(&value).ok_or(ConfigError::InvalidValue {
                key: ENV_PREDICTION_COST,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_HEARTBEAT_SECS) {
            config.heartbeat = Duration::from_secs(parse_u64(ENV_HEARTBEAT_SECS, value)?);
        }
        if let Some(value) = lookup(ENV_BLOCKED_TIMEOUT_SECS) {
            config.blocked_connection_timeout =
                Duration::from_secs(parse_u64(ENV_BLOCKED_TIMEOUT_SECS, value)?);
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(parse_u64(ENV_POLL_INTERVAL_MS, value)?);
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            config.log_level = value;
        }
        if let Some(value) = lookup(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName);
        }
        if !self.prediction_cost.is_positive() {
            return Err(ConfigError::NonPositiveCost(self.prediction_cost));
        }
        if self.heartbeat.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat"));
        }
        if self.blocked_connection_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("blocked_connection_timeout"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll_interval"));
        }
        Ok(())
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            path: self.broker_path.clone(),
            queue: self.queue_name.clone(),
            heartbeat: self.heartbeat,
            blocked_connection_timeout: self.blocked_connection_timeout,
        }
    }

    /// Logging settings, when a log directory is configured.
    pub fn logging_config(&self) -> Option<LoggingConfig> {
        self.log_dir
            .as_ref()
            .map(|dir| LoggingConfig::new(self.log_level.clone(), dir.clone()))
    }
}

fn parse_u64(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
