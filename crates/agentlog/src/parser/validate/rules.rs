use serde_json::Value;

use super::{ValidationCode, ValidationError};
use crate::parser::{
    ResultSubtype, FIELD_DURATION_API_MS, FIELD_DURATION_MS, FIELD_IS_ERROR, FIELD_NUM_TURNS,
    FIELD_RESULT, FIELD_SESSION_ID, FIELD_SUBTYPE, FIELD_TOTAL_COST_USD, FIELD_TYPE, FIELD_USAGE,
    RESULT_TYPE,
};

pub const MAX_DURATION_MS: f64 = 86_400_000.0; // 24h
pub const MAX_TURNS: f64 = 1000.0;
pub const MAX_COST_USD: f64 = 10_000.0;
pub const MAX_RESULT_BYTES: usize = 1_048_576; // 1MB
pub const MAX_USAGE_BYTES: usize = 10_000;
pub const MAX_SESSION_ID_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Bool,
    Integer,
    Number,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Bool => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Number => value.is_number(),
        }
    }
}

/// What a rule checks. Checks that only make sense for one value kind
/// pass silently on other kinds; the type rule reports those.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleCheck {
    Type(ValueKind),
    Range { min: f64, max: f64 },
    OneOf(Vec<String>),
    MaxLength(usize),
    /// Non-empty, alphanumeric / hyphen / underscore, bounded length
    Identifier { max_len: usize },
}

/// A pure check tagged with the fields it applies to
#[derive(Debug, Clone)]
pub struct FieldRule {
    fields: Vec<String>,
    check: RuleCheck,
}

impl FieldRule {
    pub fn new(fields: &[&str], check: RuleCheck) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            check,
        }
    }

    pub fn applies_to(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    pub fn check(&self, field: &str, value: &Value) -> Option<ValidationError> {
        match &self.check {
            RuleCheck::Type(kind) => {
                if kind.matches(value) {
                    None
                } else {
                    Some(ValidationError::new(
                        field,
                        value.clone(),
                        kind.as_str(),
                        format!("expected {} value", kind.as_str()),
                        ValidationCode::InvalidType,
                    ))
                }
            }
            RuleCheck::Range { min, max } => {
                let n = value.as_f64()?;
                if n < *min || n > *max {
                    Some(ValidationError::new(
                        field,
                        value.clone(),
                        format!("{} ..= {}", min, max),
                        format!("value {} is out of range", n),
                        ValidationCode::OutOfRange,
                    ))
                } else {
                    None
                }
            }
            RuleCheck::OneOf(allowed) => {
                let s = value.as_str()?;
                if allowed.iter().any(|a| a == s) {
                    None
                } else {
                    Some(ValidationError::new(
                        field,
                        value.clone(),
                        allowed.join("|"),
                        format!("'{}' is not an allowed value", s),
                        ValidationCode::InvalidEnum,
                    ))
                }
            }
            RuleCheck::MaxLength(max) => {
                let s = value.as_str()?;
                if s.len() > *max {
                    Some(ValidationError::new(
                        field,
                        Value::from(s.len()),
                        format!("at most {} bytes", max),
                        format!("value is {} bytes long", s.len()),
                        ValidationCode::TooLong,
                    ))
                } else {
                    None
                }
            }
            RuleCheck::Identifier { max_len } => {
                let s = value.as_str()?;
                let well_formed = !s.is_empty()
                    && s.len() <= *max_len
                    && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
                if well_formed {
                    None
                } else {
                    Some(ValidationError::new(
                        field,
                        value.clone(),
                        format!("1..={} chars of [A-Za-z0-9_-]", max_len),
                        "malformed identifier",
                        ValidationCode::InvalidFormat,
                    ))
                }
            }
        }
    }
}

/// Rules for every known result field
pub fn default_rules() -> Vec<FieldRule> {
    let subtypes = ResultSubtype::ALL.iter().map(|s| s.as_str().to_string()).collect();

    vec![
        FieldRule::new(
            &[FIELD_TYPE, FIELD_SUBTYPE, FIELD_SESSION_ID, FIELD_RESULT, FIELD_USAGE],
            RuleCheck::Type(ValueKind::String),
        ),
        FieldRule::new(&[FIELD_IS_ERROR], RuleCheck::Type(ValueKind::Bool)),
        FieldRule::new(
            &[FIELD_DURATION_MS, FIELD_DURATION_API_MS, FIELD_NUM_TURNS],
            RuleCheck::Type(ValueKind::Integer),
        ),
        FieldRule::new(&[FIELD_TOTAL_COST_USD], RuleCheck::Type(ValueKind::Number)),
        FieldRule::new(&[FIELD_TYPE], RuleCheck::OneOf(vec![RESULT_TYPE.to_string()])),
        FieldRule::new(&[FIELD_SUBTYPE], RuleCheck::OneOf(subtypes)),
        FieldRule::new(
            &[FIELD_SESSION_ID],
            RuleCheck::Identifier { max_len: MAX_SESSION_ID_LEN },
        ),
        FieldRule::new(
            &[FIELD_DURATION_MS, FIELD_DURATION_API_MS],
            RuleCheck::Range { min: 0.0, max: MAX_DURATION_MS },
        ),
        FieldRule::new(&[FIELD_NUM_TURNS], RuleCheck::Range { min: 1.0, max: MAX_TURNS }),
        FieldRule::new(
            &[FIELD_TOTAL_COST_USD],
            RuleCheck::Range { min: 0.0, max: MAX_COST_USD },
        ),
        FieldRule::new(&[FIELD_RESULT], RuleCheck::MaxLength(MAX_RESULT_BYTES)),
        FieldRule::new(&[FIELD_USAGE], RuleCheck::MaxLength(MAX_USAGE_BYTES)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(field: &str, value: Value) -> Vec<ValidationError> {
        default_rules()
            .iter()
            .filter(|r| r.applies_to(field))
            .filter_map(|r| r.check(field, &value))
            .collect()
    }

    #[test]
    fn test_type_rule() {
        assert!(run(FIELD_IS_ERROR, json!(false)).is_empty());

        let errors = run(FIELD_IS_ERROR, json!("false"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ValidationCode::InvalidType);
    }

    #[test]
    fn test_range_rules() {
        assert!(run(FIELD_NUM_TURNS, json!(1)).is_empty());
        assert!(run(FIELD_NUM_TURNS, json!(1000)).is_empty());
        assert_eq!(run(FIELD_NUM_TURNS, json!(0))[0].code, ValidationCode::OutOfRange);
        assert_eq!(run(FIELD_NUM_TURNS, json!(1001))[0].code, ValidationCode::OutOfRange);

        assert!(run(FIELD_DURATION_MS, json!(86_400_000u64)).is_empty());
        assert_eq!(run(FIELD_DURATION_MS, json!(-5))[0].code, ValidationCode::OutOfRange);

        assert!(run(FIELD_TOTAL_COST_USD, json!(0.25)).is_empty());
        assert_eq!(run(FIELD_TOTAL_COST_USD, json!(10_000.5))[0].code, ValidationCode::OutOfRange);
    }

    #[test]
    fn test_integer_rule_rejects_float_durations() {
        let errors = run(FIELD_DURATION_MS, json!(12.5));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ValidationCode::InvalidType);
    }

    #[test]
    fn test_enum_rules() {
        assert!(run(FIELD_TYPE, json!("result")).is_empty());
        assert_eq!(run(FIELD_TYPE, json!("assistant"))[0].code, ValidationCode::InvalidEnum);
        assert!(run(FIELD_SUBTYPE, json!("plan_mode")).is_empty());
        assert_eq!(run(FIELD_SUBTYPE, json!("done"))[0].code, ValidationCode::InvalidEnum);
    }

    #[test]
    fn test_session_id_format() {
        assert!(run(FIELD_SESSION_ID, json!("abc-123_XYZ")).is_empty());
        assert_eq!(run(FIELD_SESSION_ID, json!(""))[0].code, ValidationCode::InvalidFormat);
        assert_eq!(run(FIELD_SESSION_ID, json!("has space"))[0].code, ValidationCode::InvalidFormat);
        assert_eq!(run(FIELD_SESSION_ID, json!("a".repeat(101)))[0].code, ValidationCode::InvalidFormat);
    }

    #[test]
    fn test_length_rules() {
        assert!(run(FIELD_USAGE, json!("x".repeat(MAX_USAGE_BYTES))).is_empty());
        let errors = run(FIELD_USAGE, json!("x".repeat(MAX_USAGE_BYTES + 1)));
        assert_eq!(errors[0].code, ValidationCode::TooLong);
    }

    #[test]
    fn test_wrong_kind_reported_once() {
        // Range/enum checks pass silently on the wrong kind; only the type rule fires
        assert_eq!(run(FIELD_NUM_TURNS, json!("three")).len(), 1);
        assert_eq!(run(FIELD_SUBTYPE, json!(7)).len(), 1);
    }
}
