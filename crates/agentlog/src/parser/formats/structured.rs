use std::borrow::Cow;

use serde_json::Value;

use super::PRIORITY_STRUCTURED;
use crate::parser::ansi::clean_line;
use crate::parser::traits::*;
use crate::parser::{
    tail_lines, FIELD_DURATION_API_MS, FIELD_DURATION_MS, FIELD_IS_ERROR, FIELD_NUM_TURNS,
    FIELD_TOTAL_COST_USD, KNOWN_FIELDS, MAX_SCAN_LINES, MIN_STRUCTURED_KEYS, PROBE_LINES,
    REQUIRED_FIELDS,
};

/// Extracts `key=value` / `key: value` runs from plain-text output.
///
/// Pairs may be separated by whitespace, `|` or `,`. Values may be quoted.
/// Only result field names are kept; keys are case-sensitive.
#[derive(Debug, Clone)]
pub struct StructuredTextStrategy {
    max_scan_lines: usize,
    probe_lines: usize,
}

impl StructuredTextStrategy {
    pub fn new() -> Self {
        Self {
            max_scan_lines: MAX_SCAN_LINES,
            probe_lines: PROBE_LINES,
        }
    }

    pub fn with_limits(max_scan_lines: usize, probe_lines: usize) -> Self {
        Self { max_scan_lines, probe_lines }
    }
}

impl Default for StructuredTextStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStrategy for StructuredTextStrategy {
    fn name(&self) -> &str {
        "structured_text"
    }

    fn priority(&self) -> u32 {
        PRIORITY_STRUCTURED
    }

    fn can_parse(&self, blob: &str) -> bool {
        tail_lines(blob, self.probe_lines)
            .any(|line| line_record(&clean_line(line)).len() >= MIN_STRUCTURED_KEYS)
    }

    fn parse(&self, blob: &str) -> Result<ResultRecord, ParseError> {
        let lines: Vec<Cow<'_, str>> = tail_lines(blob, self.max_scan_lines)
            .map(clean_line)
            .collect();

        // Newest line with enough recognised keys anchors the record
        let anchor = lines
            .iter()
            .position(|line| line_record(line).len() >= MIN_STRUCTURED_KEYS);

        let (mut record, rest) = match anchor {
            Some(idx) => (line_record(&lines[idx]), &lines[idx + 1..]),
            None => (ResultRecord::new(), &lines[..]),
        };

        // Keep merging older lines, never overwriting, until the required set is met
        for line in rest {
            if has_required(&record) {
                break;
            }
            for (key, value) in line_record(line).into_map() {
                if !record.contains(&key) {
                    record.insert(&key, value);
                }
            }
        }

        if record.len() < MIN_STRUCTURED_KEYS {
            return Err(ParseError::NoMatchFound(format!(
                "fewer than {} result keys in the last {} lines",
                MIN_STRUCTURED_KEYS, self.max_scan_lines
            )));
        }

        Ok(record)
    }
}

fn has_required(record: &ResultRecord) -> bool {
    REQUIRED_FIELDS.iter().all(|field| record.contains(field))
}

/// Recognised pairs of one line. The first occurrence of a key wins.
fn line_record(line: &str) -> ResultRecord {
    let mut record = ResultRecord::new();
    for (key, raw) in pairs(line) {
        if !KNOWN_FIELDS.contains(&key) || record.contains(key) {
            continue;
        }
        record.insert(key, convert(key, &raw));
    }
    record
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || c == '|' || c == ','
}

/// Split a line on delimiters, keeping quoted runs intact
fn tokens(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => {
                in_quotes = !in_quotes;
                start.get_or_insert(i);
            }
            c if !in_quotes && is_delimiter(c) => {
                if let Some(s) = start.take() {
                    out.push(&line[s..i]);
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }
    if let Some(s) = start {
        out.push(&line[s..]);
    }
    out
}

fn unquote(value: &str) -> Cow<'_, str> {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        if inner.contains('\\') {
            return Cow::Owned(inner.replace("\\\"", "\"").replace("\\\\", "\\"));
        }
        return Cow::Borrowed(inner);
    }
    Cow::Borrowed(value)
}

/// `key=value`, `key:value` and `key: value` pairs of a line.
///
/// A `key:` token only takes the next token as its value when that token
/// is not itself a pair, so `Result: type=result` yields `type=result`.
fn pairs(line: &str) -> Vec<(&str, Cow<'_, str>)> {
    let toks = tokens(line);
    let mut out = Vec::new();
    let mut i = 0;

    while i < toks.len() {
        let tok = toks[i];
        i += 1;

        if let Some((key, value)) = tok.split_once('=') {
            if !key.is_empty() {
                out.push((key, unquote(value)));
            }
            continue;
        }

        if let Some(key) = tok.strip_suffix(':') {
            if key.is_empty() {
                continue;
            }
            if let Some(next) = toks.get(i) {
                let next_is_pair = next.contains('=') || next.ends_with(':');
                if !next_is_pair {
                    out.push((key, unquote(next)));
                    i += 1;
                }
            }
            continue;
        }

        if let Some((key, value)) = tok.split_once(':') {
            if !key.is_empty() && !value.is_empty() {
                out.push((key, unquote(value)));
            }
        }
    }

    out
}

/// Typed value for a known field; unparseable input stays a string so the
/// validator reports it.
fn convert(key: &str, raw: &str) -> Value {
    match key {
        FIELD_IS_ERROR => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => Value::from(raw),
        },
        FIELD_DURATION_MS | FIELD_DURATION_API_MS | FIELD_NUM_TURNS => {
            let trimmed = raw.trim_end_matches("ms");
            if let Ok(n) = trimmed.parse::<u64>() {
                Value::from(n)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                if f.is_finite() && f >= 0.0 {
                    Value::from(f.round() as u64)
                } else {
                    Value::from(raw)
                }
            } else {
                Value::from(raw)
            }
        }
        FIELD_TOTAL_COST_USD => raw
            .trim_start_matches('$')
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::from)
            .unwrap_or_else(|| Value::from(raw)),
        _ => Value::from(raw),
    }
}
