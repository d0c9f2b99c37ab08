use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

use super::metrics::MetricErrorType;
use super::validate::{ResultValidator, ValidationError};
use super::{
    FIELD_DURATION_API_MS, FIELD_DURATION_MS, FIELD_IS_ERROR, FIELD_NUM_TURNS, FIELD_RESULT,
    FIELD_SESSION_ID, FIELD_SUBTYPE, FIELD_TOTAL_COST_USD, FIELD_TYPE, FIELD_USAGE, RESULT_TYPE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    /// Agent finished its task
    Success,
    /// Agent reported a failure
    Error,
    /// Session exceeded its time budget
    Timeout,
    /// Session was stopped by an operator
    Cancelled,
    /// Degraded record synthesised from unstructured output
    Fallback,
    /// Agent proposed a plan instead of acting
    PlanMode,
}

impl ResultSubtype {
    pub const ALL: [ResultSubtype; 6] = [
        ResultSubtype::Success,
        ResultSubtype::Error,
        ResultSubtype::Timeout,
        ResultSubtype::Cancelled,
        ResultSubtype::Fallback,
        ResultSubtype::PlanMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSubtype::Success => "success",
            ResultSubtype::Error => "error",
            ResultSubtype::Timeout => "timeout",
            ResultSubtype::Cancelled => "cancelled",
            ResultSubtype::Fallback => "fallback",
            ResultSubtype::PlanMode => "plan_mode",
        }
    }
}

impl fmt::Display for ResultSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultSubtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResultSubtype::ALL
            .iter()
            .copied()
            .find(|subtype| subtype.as_str() == s)
            .ok_or_else(|| format!("unknown result subtype '{}'", s))
    }
}

/// Loosely-typed result record as extracted from a log blob.
///
/// This is what strategies produce and what the validator inspects. Use
/// `ParsedResult::try_from(&record)` to get the typed view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord(Map<String, Value>);

impl ResultRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Non-empty session identifier, if present
    pub fn session_id(&self) -> Option<&str> {
        self.get_str(FIELD_SESSION_ID).filter(|s| !s.is_empty())
    }

    pub fn subtype(&self) -> Option<ResultSubtype> {
        self.get_str(FIELD_SUBTYPE).and_then(|s| s.parse().ok())
    }

    pub fn is_error(&self) -> Option<bool> {
        self.get_bool(FIELD_IS_ERROR)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ResultRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Optional run statistics shared by every result variant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
    pub result: Option<String>,
    /// Usage statistics, kept string-encoded
    pub usage: Option<String>,
}

impl RunStats {
    /// Stats for a synthesised record: durations and cost zeroed.
    ///
    /// `num_turns` stays unset because zero is outside the accepted range.
    pub fn zeroed() -> Self {
        Self {
            duration_ms: Some(0),
            duration_api_ms: Some(0),
            num_turns: None,
            total_cost_usd: Some(0.0),
            result: None,
            usage: None,
        }
    }
}

/// Fields every result variant carries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub session_id: String,
    pub is_error: bool,
    pub stats: RunStats,
}

/// Typed result, one variant per subtype.
///
/// Construction from a record runs strict validation, so a `ParsedResult`
/// always satisfies every field rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ParsedResult {
    Success(Outcome),
    Error(Outcome),
    Timeout(Outcome),
    Cancelled(Outcome),
    Fallback(Outcome),
    PlanMode { outcome: Outcome, plan: String },
}

impl ParsedResult {
    pub fn plan_mode(session_id: impl Into<String>, plan: impl Into<String>) -> Self {
        ParsedResult::PlanMode {
            outcome: Outcome {
                session_id: session_id.into(),
                is_error: false,
                stats: RunStats::zeroed(),
            },
            plan: plan.into(),
        }
    }

    pub fn subtype(&self) -> ResultSubtype {
        match self {
            ParsedResult::Success(_) => ResultSubtype::Success,
            ParsedResult::Error(_) => ResultSubtype::Error,
            ParsedResult::Timeout(_) => ResultSubtype::Timeout,
            ParsedResult::Cancelled(_) => ResultSubtype::Cancelled,
            ParsedResult::Fallback(_) => ResultSubtype::Fallback,
            ParsedResult::PlanMode { .. } => ResultSubtype::PlanMode,
        }
    }

    pub fn outcome(&self) -> &Outcome {
        match self {
            ParsedResult::Success(o)
            | ParsedResult::Error(o)
            | ParsedResult::Timeout(o)
            | ParsedResult::Cancelled(o)
            | ParsedResult::Fallback(o) => o,
            ParsedResult::PlanMode { outcome, .. } => outcome,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.outcome().session_id
    }

    pub fn is_error(&self) -> bool {
        self.outcome().is_error
    }

    pub fn plan(&self) -> Option<&str> {
        match self {
            ParsedResult::PlanMode { plan, .. } => Some(plan),
            _ => None,
        }
    }

    pub fn to_record(&self) -> ResultRecord {
        ResultRecord::from(self)
    }

    fn from_parts(subtype: ResultSubtype, outcome: Outcome, record: &ResultRecord) -> Self {
        match subtype {
            ResultSubtype::Success => ParsedResult::Success(outcome),
            ResultSubtype::Error => ParsedResult::Error(outcome),
            ResultSubtype::Timeout => ParsedResult::Timeout(outcome),
            ResultSubtype::Cancelled => ParsedResult::Cancelled(outcome),
            ResultSubtype::Fallback => ParsedResult::Fallback(outcome),
            ResultSubtype::PlanMode => {
                let plan = record.get_str(FIELD_RESULT).unwrap_or_default().to_string();
                let mut outcome = outcome;
                outcome.stats.result = None;
                ParsedResult::PlanMode { outcome, plan }
            }
        }
    }
}

impl From<&ParsedResult> for ResultRecord {
    fn from(parsed: &ParsedResult) -> Self {
        let outcome = parsed.outcome();
        let stats = &outcome.stats;

        let mut record = ResultRecord::new();
        record.insert(FIELD_TYPE, RESULT_TYPE);
        record.insert(FIELD_SUBTYPE, parsed.subtype().as_str());
        record.insert(FIELD_IS_ERROR, outcome.is_error);
        record.insert(FIELD_SESSION_ID, outcome.session_id.as_str());

        if let Some(v) = stats.duration_ms {
            record.insert(FIELD_DURATION_MS, v);
        }
        if let Some(v) = stats.duration_api_ms {
            record.insert(FIELD_DURATION_API_MS, v);
        }
        if let Some(v) = stats.num_turns {
            record.insert(FIELD_NUM_TURNS, v);
        }
        if let Some(v) = stats.total_cost_usd {
            record.insert(FIELD_TOTAL_COST_USD, v);
        }
        if let Some(v) = &stats.usage {
            record.insert(FIELD_USAGE, v.as_str());
        }

        match parsed.plan() {
            Some(plan) => {
                record.insert(FIELD_RESULT, plan);
            }
            None => {
                if let Some(v) = &stats.result {
                    record.insert(FIELD_RESULT, v.as_str());
                }
            }
        }

        record
    }
}

impl TryFrom<&ResultRecord> for ParsedResult {
    type Error = ValidationError;

    fn try_from(record: &ResultRecord) -> Result<Self, ValidationError> {
        ResultValidator::strict().validate(record)?;

        let subtype = record
            .subtype()
            .ok_or_else(|| ValidationError::required(FIELD_SUBTYPE))?;
        let session_id = record
            .session_id()
            .ok_or_else(|| ValidationError::required(FIELD_SESSION_ID))?
            .to_string();
        let is_error = record
            .is_error()
            .ok_or_else(|| ValidationError::required(FIELD_IS_ERROR))?;

        let stats = RunStats {
            duration_ms: record.get_u64(FIELD_DURATION_MS),
            duration_api_ms: record.get_u64(FIELD_DURATION_API_MS),
            num_turns: record
                .get_u64(FIELD_NUM_TURNS)
                .and_then(|n| u32::try_from(n).ok()),
            total_cost_usd: record.get_f64(FIELD_TOTAL_COST_USD),
            result: record.get_str(FIELD_RESULT).map(str::to_string),
            usage: record.get_str(FIELD_USAGE).map(str::to_string),
        };

        let outcome = Outcome { session_id, is_error, stats };
        Ok(ParsedResult::from_parts(subtype, outcome, record))
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Empty input: execution log is empty")]
    EmptyInput,

    #[error("No match: {0}")]
    NoMatchFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Parse cancelled")]
    Cancelled,

    #[error("Max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: Box<ParseError> },
}

impl ParseError {
    /// Metrics bucket for this error
    pub fn kind(&self) -> MetricErrorType {
        match self {
            ParseError::EmptyInput => MetricErrorType::EmptyInput,
            ParseError::NoMatchFound(_) => MetricErrorType::NoMatch,
            ParseError::InvalidFormat(_) => MetricErrorType::InvalidFormat,
            ParseError::ValidationFailed(_) => MetricErrorType::Validation,
            ParseError::Timeout(_) => MetricErrorType::Timeout,
            ParseError::Cancelled => MetricErrorType::Cancelled,
            ParseError::MaxRetriesExceeded { .. } => MetricErrorType::MaxRetries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_record() -> ResultRecord {
        let mut record = ResultRecord::new();
        record.insert(FIELD_TYPE, "result");
        record.insert(FIELD_SUBTYPE, "success");
        record.insert(FIELD_IS_ERROR, false);
        record.insert(FIELD_SESSION_ID, "test-123");
        record.insert(FIELD_DURATION_MS, 1000u64);
        record.insert(FIELD_NUM_TURNS, 4u64);
        record
    }

    #[test]
    fn test_subtype_from_str() {
        assert_eq!("plan_mode".parse::<ResultSubtype>(), Ok(ResultSubtype::PlanMode));
        assert_eq!("success".parse::<ResultSubtype>(), Ok(ResultSubtype::Success));
        assert!("finished".parse::<ResultSubtype>().is_err());
    }

    #[test]
    fn test_typed_success_from_record() {
        let parsed = ParsedResult::try_from(&success_record()).unwrap();

        assert_eq!(parsed.subtype(), ResultSubtype::Success);
        assert_eq!(parsed.session_id(), "test-123");
        assert!(!parsed.is_error());
        assert_eq!(parsed.outcome().stats.duration_ms, Some(1000));
        assert_eq!(parsed.outcome().stats.num_turns, Some(4));
    }

    #[test]
    fn test_typed_rejects_missing_session_id() {
        let mut record = success_record();
        record.remove(FIELD_SESSION_ID);

        let err = ParsedResult::try_from(&record).unwrap_err();
        assert_eq!(err.field, FIELD_SESSION_ID);
    }

    #[test]
    fn test_plan_mode_record_shape() {
        let parsed = ParsedResult::plan_mode("plan-1", "## Plan\n1. do it");
        let record = parsed.to_record();

        assert_eq!(record.get_str(FIELD_SUBTYPE), Some("plan_mode"));
        assert_eq!(record.get_str(FIELD_RESULT), Some("## Plan\n1. do it"));
        assert_eq!(record.is_error(), Some(false));
        assert_eq!(record.get_u64(FIELD_DURATION_MS), Some(0));
        assert!(!record.contains(FIELD_NUM_TURNS));

        // Typed view survives the trip through the record
        let back = ParsedResult::try_from(&record).unwrap();
        assert_eq!(back.plan(), Some("## Plan\n1. do it"));
    }

    #[test]
    fn test_plan_mode_requires_plan_text() {
        let mut record = ParsedResult::plan_mode("plan-1", "x").to_record();
        record.insert(FIELD_RESULT, "");

        assert!(ParsedResult::try_from(&record).is_err());
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(ParseError::EmptyInput.kind(), MetricErrorType::EmptyInput);
        assert_eq!(ParseError::Cancelled.kind(), MetricErrorType::Cancelled);
        let exhausted = ParseError::MaxRetriesExceeded {
            attempts: 3,
            last: Box::new(ParseError::InvalidFormat("bad".into())),
        };
        assert_eq!(exhausted.kind(), MetricErrorType::MaxRetries);
        assert!(exhausted.to_string().contains("bad"));
    }
}
