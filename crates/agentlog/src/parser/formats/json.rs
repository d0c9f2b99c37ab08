use serde_json::{Map, Value};

use super::plan::find_exit_plan_mode;
use super::{contains_plan_mode_shape, json_object_span, PRIORITY_JSON};
use crate::parser::ansi::clean_line;
use crate::parser::traits::*;
use crate::parser::{
    tail_lines, FIELD_TYPE, FIELD_USAGE, MAX_SCAN_LINES, OPTIMIZED_MAX_LINE_SIZE,
    OPTIMIZED_SCAN_LINES, PROBE_LINES, RESULT_TYPE,
};

const RESULT_MARKER: &str = "\"result\"";
const TYPE_MARKER: &str = "\"type\"";

/// Configuration for the JSON strategy
#[derive(Debug, Clone)]
pub struct JsonStrategyConfig {
    pub name: &'static str,
    /// Lines scanned from the end of the blob by `parse`
    pub max_scan_lines: usize,
    /// Lines probed by `can_parse`
    pub probe_lines: usize,
    /// Lines longer than this are skipped without parsing
    pub max_line_size: usize,
}

impl Default for JsonStrategyConfig {
    fn default() -> Self {
        Self {
            name: "json",
            max_scan_lines: MAX_SCAN_LINES,
            probe_lines: PROBE_LINES,
            max_line_size: usize::MAX,
        }
    }
}

impl JsonStrategyConfig {
    /// Size-capped variant that runs ahead of the general scan
    pub fn optimized() -> Self {
        Self {
            name: "json_optimized",
            max_scan_lines: OPTIMIZED_SCAN_LINES,
            probe_lines: PROBE_LINES,
            max_line_size: OPTIMIZED_MAX_LINE_SIZE,
        }
    }
}

/// Finds the agent's final `{"type":"result",...}` line.
///
/// Scans newest-first, so when a blob carries several result lines the
/// last one wins.
#[derive(Debug, Clone, Default)]
pub struct JsonStrategy {
    config: JsonStrategyConfig,
}

impl JsonStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimized() -> Self {
        Self::with_config(JsonStrategyConfig::optimized())
    }

    pub fn with_config(config: JsonStrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JsonStrategyConfig {
        &self.config
    }

    fn looks_like_result_line(&self, line: &str) -> bool {
        line.len() <= self.config.max_line_size
            && line.contains('{')
            && line.contains(TYPE_MARKER)
            && line.contains(RESULT_MARKER)
    }
}

impl ResultStrategy for JsonStrategy {
    fn name(&self) -> &str {
        self.config.name
    }

    fn priority(&self) -> u32 {
        PRIORITY_JSON
    }

    fn can_parse(&self, blob: &str) -> bool {
        if contains_plan_mode_shape(blob, self.config.max_scan_lines) {
            return false;
        }
        tail_lines(blob, self.config.probe_lines).any(|line| self.looks_like_result_line(line))
    }

    fn parse(&self, blob: &str) -> Result<ResultRecord, ParseError> {
        let mut malformed = 0usize;

        for line in tail_lines(blob, self.config.max_scan_lines) {
            if !self.looks_like_result_line(line) {
                continue;
            }

            let cleaned = clean_line(line);
            let Some(span) = json_object_span(&cleaned) else {
                continue;
            };

            let obj: Map<String, Value> = match serde_json::from_str(span) {
                Ok(obj) => obj,
                Err(_) => {
                    malformed += 1;
                    continue;
                }
            };

            if obj.get(FIELD_TYPE).and_then(Value::as_str) != Some(RESULT_TYPE) {
                continue;
            }
            if find_exit_plan_mode(&obj).is_some() {
                continue;
            }

            return Ok(normalize(obj));
        }

        if malformed > 0 {
            Err(ParseError::InvalidFormat(format!(
                "{} candidate result lines were not valid JSON",
                malformed
            )))
        } else {
            Err(ParseError::NoMatchFound(format!(
                "no JSON result line in the last {} lines",
                self.config.max_scan_lines
            )))
        }
    }
}

/// Usage arrives as a nested object; records keep it string-encoded
fn normalize(mut obj: Map<String, Value>) -> ResultRecord {
    if let Some(usage) = obj.get(FIELD_USAGE) {
        if !usage.is_string() && !usage.is_null() {
            let encoded = usage.to_string();
            obj.insert(FIELD_USAGE.to_string(), Value::String(encoded));
        }
    }
    ResultRecord::from(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ResultSubtype, FIELD_SESSION_ID, FIELD_SUBTYPE};

    const RESULT_LINE: &str = r#"{"type":"result","subtype":"success","is_error":false,"session_id":"test-123","duration_ms":1000}"#;

    #[test]
    fn test_parses_plain_result_line() {
        let strategy = JsonStrategy::new();
        assert!(strategy.can_parse(RESULT_LINE));

        let record = strategy.parse(RESULT_LINE).unwrap();
        assert_eq!(record.get_str(FIELD_TYPE), Some("result"));
        assert_eq!(record.get_str(FIELD_SUBTYPE), Some("success"));
        assert_eq!(record.get_u64("duration_ms"), Some(1000));
    }

    #[test]
    fn test_parses_prefixed_result_line() {
        let blob = format!("starting agent\n[12:34:56] INFO: {}\n", RESULT_LINE);
        let strategy = JsonStrategy::new();

        assert!(strategy.can_parse(&blob));
        let record = strategy.parse(&blob).unwrap();
        assert_eq!(record.get_str(FIELD_SESSION_ID), Some("test-123"));
    }

    #[test]
    fn test_parses_colored_result_line() {
        let blob = format!("\x1b[32m{}\x1b[0m", RESULT_LINE);
        let record = JsonStrategy::new().parse(&blob).unwrap();
        assert_eq!(record.get_str(FIELD_SUBTYPE), Some("success"));
    }

    #[test]
    fn test_last_result_line_wins() {
        let blob = concat!(
            r#"{"type":"result","subtype":"error","is_error":true,"session_id":"first"}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[]}}"#,
            "\n",
            r#"{"type":"result","subtype":"success","is_error":false,"session_id":"second"}"#,
        );
        let record = JsonStrategy::new().parse(blob).unwrap();
        assert_eq!(record.session_id(), Some("second"));
    }

    #[test]
    fn test_ignores_non_result_objects() {
        let blob = r#"{"type":"assistant","result":"not it"}"#;
        let err = JsonStrategy::new().parse(blob).unwrap_err();
        assert!(matches!(err, ParseError::NoMatchFound(_)));
    }

    #[test]
    fn test_malformed_candidate_is_invalid_format() {
        let blob = r#"{"type":"result","subtype":"success""#;
        let err = JsonStrategy::new().parse(blob).unwrap_err();
        assert!(matches!(err, ParseError::NoMatchFound(_) | ParseError::InvalidFormat(_)));

        let blob = r#"{"type":"result", subtype: success}"#;
        let err = JsonStrategy::new().parse(blob).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_declines_plan_mode_shape() {
        let blob = concat!(
            r###"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"ExitPlanMode","input":{"plan":"## Plan"}}]}}"###,
            "\n",
            r#"{"type":"result","subtype":"success","is_error":false,"session_id":"s1"}"#,
        );
        let strategy = JsonStrategy::new();
        assert!(!strategy.can_parse(blob));
        // Only the plan-mode object itself is off limits to the scan
        assert_eq!(strategy.parse(blob).unwrap().session_id(), Some("s1"));
    }

    #[test]
    fn test_stream_json_with_tool_list() {
        let blob = concat!(
            r#"{"type":"system","subtype":"init","session_id":"real-1","tools":["Bash","Read","ExitPlanMode"]}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"ls"}}]}}"#,
            "\n",
            r#"{"type":"result","subtype":"success","is_error":false,"session_id":"real-1","num_turns":2}"#,
        );
        let strategy = JsonStrategy::new();
        assert!(strategy.can_parse(blob));
        let record = strategy.parse(blob).unwrap();
        assert_eq!(record.subtype(), Some(ResultSubtype::Success));
        assert_eq!(record.session_id(), Some("real-1"));
    }

    #[test]
    fn test_probe_window_is_bounded() {
        let mut blob = String::from(RESULT_LINE);
        for i in 0..(PROBE_LINES + 5) {
            blob.push_str(&format!("\nnoise line {}", i));
        }
        let strategy = JsonStrategy::new();

        // The probe misses it; the full scan still finds it
        assert!(!strategy.can_parse(&blob));
        assert!(strategy.parse(&blob).is_ok());
    }

    #[test]
    fn test_optimized_skips_oversized_lines() {
        let padding = "x".repeat(OPTIMIZED_MAX_LINE_SIZE);
        let blob = format!(
            r#"{{"type":"result","subtype":"success","is_error":false,"session_id":"big","result":"{}"}}"#,
            padding
        );

        assert!(!JsonStrategy::optimized().can_parse(&blob));
        assert!(JsonStrategy::optimized().parse(&blob).is_err());
        assert_eq!(JsonStrategy::new().parse(&blob).unwrap().session_id(), Some("big"));
    }

    #[test]
    fn test_usage_object_is_string_encoded() {
        let blob = r#"{"type":"result","subtype":"success","is_error":false,"session_id":"u1","usage":{"input_tokens":10,"output_tokens":5}}"#;
        let record = JsonStrategy::new().parse(blob).unwrap();

        let usage = record.get_str(FIELD_USAGE).unwrap();
        let back: Value = serde_json::from_str(usage).unwrap();
        assert_eq!(back["input_tokens"], 10);
    }
}
