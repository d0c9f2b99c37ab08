//! Model: CaptureConfig and its parser and stream sections.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::parser::{KNOWN_FIELDS, MAX_SCAN_LINES, PROBE_LINES, REQUIRED_FIELDS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub parser: ParserConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub parse_timeout_ms: u64,
    /// Reject records that fail validation instead of logging and keeping them
    pub strict_validation: bool,
    /// Extra tries per strategy after the first
    pub retry_attempts: u32,
    /// Backoff unit; attempt n waits n * this
    pub retry_backoff_ms: u64,
    pub max_log_lines: usize,
    pub probe_lines: usize,
    pub required_fields: Vec<String>,
    pub adaptive_selection: bool,
    pub strategy_cache_size: usize,
    pub batch_workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub channel_capacity: usize,
    pub poll_interval_ms: u64,
    /// Longer lines are truncated with a marker
    pub max_line_bytes: usize,
    /// Passed to the docker CLI as DOCKER_HOST; empty uses the CLI default
    pub docker_host: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            parse_timeout_ms: 30_000,
            strict_validation: false,
            retry_attempts: 2,
            retry_backoff_ms: 50,
            max_log_lines: MAX_SCAN_LINES,
            probe_lines: PROBE_LINES,
            required_fields: REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
            adaptive_selection: true,
            strategy_cache_size: 16,
            batch_workers: 4,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            poll_interval_ms: 1000,
            max_line_bytes: 65_536,
            docker_host: String::new(),
        }
    }
}

impl ParserConfig {
    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.parse_timeout_ms == 0 {
            return Err("parser.parse_timeout_ms must be > 0".to_string());
        }
        if self.max_log_lines == 0 {
            return Err("parser.max_log_lines must be > 0".to_string());
        }
        if self.probe_lines == 0 {
            return Err("parser.probe_lines must be > 0".to_string());
        }
        if self.batch_workers == 0 {
            return Err("parser.batch_workers must be > 0".to_string());
        }
        if self.adaptive_selection && self.strategy_cache_size == 0 {
            return Err(
                "parser.strategy_cache_size must be > 0 when adaptive_selection is enabled"
                    .to_string(),
            );
        }
        if self.required_fields.is_empty() {
            return Err("parser.required_fields must not be empty".to_string());
        }
        if let Some(unknown) = self
            .required_fields
            .iter()
            .find(|f| !KNOWN_FIELDS.contains(&f.as_str()))
        {
            return Err(format!("parser.required_fields: unknown field '{}'", unknown));
        }
        Ok(())
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("stream.channel_capacity must be > 0".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("stream.poll_interval_ms must be > 0".to_string());
        }
        if self.max_line_bytes == 0 {
            return Err("stream.max_line_bytes must be > 0".to_string());
        }
        Ok(())
    }
}
