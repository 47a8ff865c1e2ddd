//! TOML-based configuration, with environment variable override support.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Sqs,
    S3,
}

/// One logical source: either a set of SQS queues driving service mode, or a
/// set of bucket prefixes driving batch mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub queues_url: Vec<String>,
    pub buckets: Vec<String>,
    pub log_format: String,
    pub log_format_options: Option<serde_json::Value>,
    pub key_regex_fields: Option<String>,
    pub poll_frequency_seconds: u64,
    pub since: Option<String>,
    pub to: Option<String>,
    pub fields: HashMap<String, String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            input_type: InputType::Sqs,
            queues_url: Vec::new(),
            buckets: Vec::new(),
            log_format: String::new(),
            log_format_options: None,
            key_regex_fields: None,
            poll_frequency_seconds: 60,
            since: None,
            to: None,
            fields: HashMap::new(),
        }
    }
}

impl InputConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_format.is_empty() {
            return Err(ConfigError::Validation(
                "log_format is required for every input".to_string(),
            ));
        }
        match self.input_type {
            InputType::Sqs if self.queues_url.is_empty() => {
                return Err(ConfigError::Validation(
                    "no queues_url defined for sqs input".to_string(),
                ))
            }
            InputType::S3 if self.buckets.is_empty() => {
                return Err(ConfigError::Validation(
                    "no buckets defined for s3 input".to_string(),
                ))
            }
            _ => {}
        }
        if let Some(since) = &self.since {
            chrono::DateTime::parse_from_rfc3339(since)
                .map_err(|e| ConfigError::Validation(format!("invalid since: {e}")))?;
        }
        if let Some(to) = &self.to {
            chrono::DateTime::parse_from_rfc3339(to)
                .map_err(|e| ConfigError::Validation(format!("invalid to: {e}")))?;
        }
        Ok(())
    }

    /// Parses `since`, defaulting to the Unix epoch when unset.
    pub fn since_parsed(&self) -> chrono::DateTime<chrono::Utc> {
        self.since
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
    }

    /// Parses `to`, defaulting to the far future when unset (matches scanning
    /// "everything up to now and beyond").
    pub fn to_parsed(&self) -> chrono::DateTime<chrono::Utc> {
        self.to
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| chrono::DateTime::from_timestamp(i64::MAX / 1_000_000_000, 0).unwrap())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub inputs: Vec<InputConfig>,
    /// Seconds to wait for in-flight work to drain on shutdown; 0 means wait
    /// indefinitely.
    pub shutdown_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            shutdown_timeout_seconds: 0,
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for input in &self.inputs {
            input.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_sqs_input() {
        let toml = r#"
            [[inputs]]
            type = "sqs"
            queues_url = ["https://sqs.eu-west-1.amazonaws.com/123/logs"]
            log_format = "alb"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.inputs[0].input_type, InputType::Sqs);
    }

    #[test]
    fn sqs_input_without_queues_fails_validation() {
        let toml = r#"
            [[inputs]]
            type = "sqs"
            log_format = "alb"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn s3_input_without_buckets_fails_validation() {
        let toml = r#"
            [[inputs]]
            type = "s3"
            log_format = "waf"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
