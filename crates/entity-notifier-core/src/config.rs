//! Configuration sources and the resolved notifier configuration.
//!
//! Values come from a [`ConfigSource`]; production reads the process
//! environment (the daemon loads `.env.default` and `.env` first), tests use
//! [`MapConfig`].

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Topic for the primary deployment channel.
pub const SNS_ARN: &str = "SNS_ARN";
/// Topic for the generic event channel.
pub const EVENTS_SNS_ARN: &str = "EVENTS_SNS_ARN";
/// Publish endpoint override.
pub const SNS_ENDPOINT: &str = "SNS_ENDPOINT";
pub const MAX_RETRIES: &str = "MAX_RETRIES";
pub const WAIT_TIME_BETWEEN_RETRIES: &str = "WAIT_TIME_BETWEEN_RETRIES";
pub const DOWNLOAD_QUEUE_CONCURRENCY: &str = "DOWNLOAD_QUEUE_CONCURRENCY";
pub const DOWNLOAD_QUEUE_TIMEOUT: &str = "DOWNLOAD_QUEUE_TIMEOUT";
pub const DOWNLOAD_QUEUE_ADMISSION_THRESHOLD: &str = "DOWNLOAD_QUEUE_ADMISSION_THRESHOLD";
pub const STORAGE_FOLDER: &str = "STORAGE_FOLDER";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {0}")]
    Missing(String),

    #[error("configuration key {key} is not a number: {value}")]
    NotANumber { key: String, value: String },
}

/// Key/value configuration lookup.
pub trait ConfigSource: Send + Sync {
    /// Raw value for `key`; empty strings count as absent.
    fn get_string(&self, key: &str) -> Option<String>;

    fn require_string(&self, key: &str) -> Result<String, ConfigError> {
        self.get_string(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn get_number(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.get_string(key) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::NotANumber {
                    key: key.to_string(),
                    value,
                }),
        }
    }
}

/// Process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvConfig;

impl ConfigSource for EnvConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed in-memory configuration.
#[derive(Debug, Default, Clone)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl ConfigSource for MapConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Downloader retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub wait_between_retries: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            wait_between_retries: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// Zero values fall back to the defaults.
    pub fn load(config: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_retries = config
            .get_number(MAX_RETRIES)?
            .filter(|n| *n > 0)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(defaults.max_retries);
        let wait_between_retries = config
            .get_number(WAIT_TIME_BETWEEN_RETRIES)?
            .filter(|n| *n > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.wait_between_retries);
        Ok(Self {
            max_retries,
            wait_between_retries,
        })
    }
}

/// Download queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub job_timeout: Duration,
    /// Admission waits until fewer than this many jobs are queued or running.
    pub admission_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            job_timeout: Duration::from_millis(100_000),
            admission_threshold: 1000,
        }
    }
}

impl QueueConfig {
    pub fn load(config: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let as_usize = |n: u64| usize::try_from(n).unwrap_or(usize::MAX);
        Ok(Self {
            concurrency: config
                .get_number(DOWNLOAD_QUEUE_CONCURRENCY)?
                .filter(|n| *n > 0)
                .map(as_usize)
                .unwrap_or(defaults.concurrency),
            job_timeout: config
                .get_number(DOWNLOAD_QUEUE_TIMEOUT)?
                .filter(|n| *n > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.job_timeout),
            admission_threshold: config
                .get_number(DOWNLOAD_QUEUE_ADMISSION_THRESHOLD)?
                .filter(|n| *n > 0)
                .map(as_usize)
                .unwrap_or(defaults.admission_threshold),
        })
    }
}

/// Everything the notifier needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub deployment_topic: String,
    pub event_topic: String,
    pub publish_endpoint: Option<String>,
    pub storage_folder: String,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
}

impl NotifierConfig {
    /// Fails fast when either topic is missing.
    pub fn load(config: &dyn ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            deployment_topic: config.require_string(SNS_ARN)?,
            event_topic: config.require_string(EVENTS_SNS_ARN)?,
            publish_endpoint: config.get_string(SNS_ENDPOINT),
            storage_folder: config
                .get_string(STORAGE_FOLDER)
                .unwrap_or_else(|| "content".to_string()),
            retry: RetryConfig::load(config)?,
            queue: QueueConfig::load(config)?,
        })
    }
}
