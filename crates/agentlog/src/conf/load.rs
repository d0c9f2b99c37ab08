//! Load: config loading from file and environment variables.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use super::model::CaptureConfig;

pub const CONFIG_FILE_ENV: &str = "AGENTLOG_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "/etc/agentlog/agentlog.toml";

impl CaptureConfig {
    /// Load configuration.
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // A missing .env is the normal case
        let _ = dotenvy::dotenv();

        let config_path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!("Config file not found at {}, using defaults and environment", config_path);
            Self::default()
        };

        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: CaptureConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Overlay environment values. Unparseable values are ignored with a
    /// warning and the current value is kept.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parser = &mut self.parser;
        override_parsed(&lookup, "AGENTLOG_PARSE_TIMEOUT_MS", &mut parser.parse_timeout_ms);
        override_parsed(&lookup, "AGENTLOG_STRICT_VALIDATION", &mut parser.strict_validation);
        override_parsed(&lookup, "AGENTLOG_RETRY_ATTEMPTS", &mut parser.retry_attempts);
        override_parsed(&lookup, "AGENTLOG_RETRY_BACKOFF_MS", &mut parser.retry_backoff_ms);
        override_parsed(&lookup, "AGENTLOG_MAX_LOG_LINES", &mut parser.max_log_lines);
        if let Some(fields) = lookup("AGENTLOG_REQUIRED_FIELDS") {
            parser.required_fields = fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }

        let stream = &mut self.stream;
        override_parsed(&lookup, "AGENTLOG_POLL_INTERVAL_MS", &mut stream.poll_interval_ms);
        override_parsed(&lookup, "AGENTLOG_STREAM_BUFFER", &mut stream.channel_capacity);
        override_parsed(&lookup, "AGENTLOG_MAX_LINE_BYTES", &mut stream.max_line_bytes);
        if let Some(host) = lookup("DOCKER_HOST") {
            stream.docker_host = host;
        }
    }

    /// Validate that configuration values are sane
    pub fn validate(&self) -> Result<(), String> {
        self.parser.validate()?;
        self.stream.validate()?;
        Ok(())
    }
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let mut cfg = CaptureConfig::default();
        cfg.apply_env_from(env(&[
            ("AGENTLOG_PARSE_TIMEOUT_MS", "5000"),
            ("AGENTLOG_STRICT_VALIDATION", "true"),
            ("AGENTLOG_RETRY_ATTEMPTS", "0"),
            ("AGENTLOG_STREAM_BUFFER", "16"),
            ("DOCKER_HOST", "tcp://10.0.0.2:2375"),
        ]));

        assert_eq!(cfg.parser.parse_timeout_ms, 5000);
        assert!(cfg.parser.strict_validation);
        assert_eq!(cfg.parser.retry_attempts, 0);
        assert_eq!(cfg.stream.channel_capacity, 16);
        assert_eq!(cfg.stream.docker_host, "tcp://10.0.0.2:2375");
        // Untouched keys keep their defaults
        assert_eq!(cfg.stream.poll_interval_ms, 1000);
    }

    #[test]
    fn test_env_required_fields_list() {
        let mut cfg = CaptureConfig::default();
        cfg.apply_env_from(env(&[("AGENTLOG_REQUIRED_FIELDS", "session_id, is_error ,")]));
        assert_eq!(cfg.parser.required_fields, vec!["session_id", "is_error"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_invalid_value_is_ignored() {
        let mut cfg = CaptureConfig::default();
        cfg.apply_env_from(env(&[("AGENTLOG_MAX_LOG_LINES", "lots")]));
        assert_eq!(cfg.parser.max_log_lines, 1000);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut cfg: CaptureConfig = toml::from_str("[parser]\nretry_attempts = 5\n").unwrap();
        cfg.apply_env_from(env(&[("AGENTLOG_RETRY_ATTEMPTS", "1")]));
        assert_eq!(cfg.parser.retry_attempts, 1);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("agentlog-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[stream]\nmax_line_bytes = 1024\n").unwrap();

        let cfg = CaptureConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.stream.max_line_bytes, 1024);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_from_file_missing() {
        assert!(CaptureConfig::from_file("/nonexistent/agentlog.toml").is_err());
    }

    #[test]
    fn test_validate_surfaces_section_errors() {
        let mut cfg = CaptureConfig::default();
        cfg.stream.poll_interval_ms = 0;
        assert!(cfg.validate().unwrap_err().contains("poll_interval_ms"));
    }
}
