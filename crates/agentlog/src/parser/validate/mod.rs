//! Validate: field rules and the result validator.
//!
//! Rules are independent checks tagged with the fields they apply to.
//! The validator runs every applicable rule for each present field,
//! enforces the required-field list and aggregates the errors.

pub mod rules;
pub mod validator;

use serde_json::Value;
use thiserror::Error;

pub use rules::{default_rules, FieldRule, RuleCheck, ValueKind};
pub use validator::{ResultValidator, ValidationMode};

/// Machine-readable validation failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    Required,
    InvalidType,
    OutOfRange,
    InvalidEnum,
    TooLong,
    InvalidFormat,
    MissingPlan,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::Required => "REQUIRED",
            ValidationCode::InvalidType => "INVALID_TYPE",
            ValidationCode::OutOfRange => "OUT_OF_RANGE",
            ValidationCode::InvalidEnum => "INVALID_ENUM",
            ValidationCode::TooLong => "TOO_LONG",
            ValidationCode::InvalidFormat => "INVALID_FORMAT",
            ValidationCode::MissingPlan => "MISSING_PLAN",
        }
    }
}

/// A single rule violation. Informational: the validator returns these,
/// it never panics or unwinds on them.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message} (expected {expected}, code {})", .code.as_str())]
pub struct ValidationError {
    pub field: String,
    pub value: Value,
    pub expected: String,
    pub message: String,
    pub code: ValidationCode,
}

impl ValidationError {
    pub fn new(
        field: &str,
        value: Value,
        expected: impl Into<String>,
        message: impl Into<String>,
        code: ValidationCode,
    ) -> Self {
        Self {
            field: field.to_string(),
            value,
            expected: expected.into(),
            message: message.into(),
            code,
        }
    }

    pub fn required(field: &str) -> Self {
        Self::new(
            field,
            Value::Null,
            "present",
            format!("required field '{}' is missing", field),
            ValidationCode::Required,
        )
    }
}
