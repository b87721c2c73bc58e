// Server Configuration Module
// Handles configuration from files; CLI flags override individual fields.

use crate::answers::{default_entries, AnswerBook, AnswerEntry, DEFAULT_ANSWER};
use crate::client::{ConsumerConfig, NetworkCondition, DEFAULT_LOG_CAPACITY};
use crate::dispatcher::FailureInjector;
use crate::pacing::{PacerConfig, WritePacing};
use crate::segment::DEFAULT_CHUNK_SIZE;
use crate::transport::DEFAULT_CHANNEL_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub answers: AnswersConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server or client cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.dispatch.failure_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::Validation(format!(
                "dispatch.failure_rate must be within [0, 1], got {rate}"
            )));
        }
        if self.dispatch.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "dispatch.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.dispatch.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "dispatch.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.client.normal_interval_ms == 0 || self.client.delay_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "client pacer intervals must be at least 1ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Failure injector for `POST /api/suggestions`
    pub fn failure_injector(&self) -> FailureInjector {
        match self.dispatch.seed {
            Some(seed) => FailureInjector::with_seed(self.dispatch.failure_rate, seed),
            None => FailureInjector::new(self.dispatch.failure_rate),
        }
    }

    /// Server-side write pacing
    pub fn write_pacing(&self) -> WritePacing {
        WritePacing::new(
            self.dispatch.write_interval_ms,
            self.dispatch.write_jitter_ms,
            self.dispatch.duplicate_gap_ms,
        )
    }

    /// Answer table for suggestion questions
    pub fn answer_book(&self) -> AnswerBook {
        AnswerBook::new(
            self.answers.entries.clone(),
            self.answers.default_answer.clone(),
        )
    }

    /// Consumer settings for the `watch` command
    pub fn consumer_config(&self) -> ConsumerConfig {
        let client = &self.client;
        ConsumerConfig {
            base_url: client.base_url.clone(),
            pacer: PacerConfig::new(client.normal_interval_ms, client.delay_interval_ms),
            max_duration: client.max_duration_ms.map(Duration::from_millis),
            network: client.network,
            slow_network_delay: Duration::from_millis(client.slow_network_delay_ms),
            log_capacity: client.log_capacity,
        }
    }
}

/// Server network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Stream emission and fault injection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Probability that `POST /api/suggestions` fails with 500 (0.0-1.0)
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
    /// Fixed seed for a repeatable failure sequence
    #[serde(default)]
    pub seed: Option<u64>,
    /// Characters per fragment
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Mean delay after each chunk write (0 = burst)
    #[serde(default)]
    pub write_interval_ms: u64,
    #[serde(default)]
    pub write_jitter_ms: u64,
    /// Delay before the repeated chunk in `duplicate` mode
    #[serde(default = "default_duplicate_gap")]
    pub duplicate_gap_ms: u64,
    /// Write the connection comments before the first frame
    #[serde(default = "default_true")]
    pub keepalive_comments: bool,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_failure_rate() -> f64 {
    0.25
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_duplicate_gap() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            failure_rate: default_failure_rate(),
            seed: None,
            chunk_size: default_chunk_size(),
            write_interval_ms: 0,
            write_jitter_ms: 0,
            duplicate_gap_ms: default_duplicate_gap(),
            keepalive_comments: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Question/answer table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswersConfig {
    #[serde(default = "default_entries")]
    pub entries: Vec<AnswerEntry>,
    #[serde(default = "default_answer")]
    pub default_answer: String,
}

fn default_answer() -> String {
    DEFAULT_ANSWER.to_string()
}

impl Default for AnswersConfig {
    fn default() -> Self {
        Self {
            entries: default_entries(),
            default_answer: default_answer(),
        }
    }
}

/// Settings for the stream consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_normal_interval")]
    pub normal_interval_ms: u64,
    #[serde(default = "default_delay_interval")]
    pub delay_interval_ms: u64,
    /// Cancel streams that run longer than this
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    #[serde(default)]
    pub network: NetworkCondition,
    #[serde(default = "default_slow_network_delay")]
    pub slow_network_delay_ms: u64,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_normal_interval() -> u64 {
    30
}

fn default_delay_interval() -> u64 {
    300
}

fn default_slow_network_delay() -> u64 {
    2000
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            normal_interval_ms: default_normal_interval(),
            delay_interval_ms: default_delay_interval(),
            max_duration_ms: None,
            network: NetworkCondition::Online,
            slow_network_delay_ms: default_slow_network_delay(),
            log_capacity: default_log_capacity(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}
