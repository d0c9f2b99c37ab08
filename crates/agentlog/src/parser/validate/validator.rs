use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::rules::{default_rules, FieldRule};
use super::{ValidationCode, ValidationError};
use crate::parser::{ResultRecord, ResultSubtype, FIELD_RESULT, REQUIRED_FIELDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Any error rejects the record
    Strict,
    /// Errors are logged, the record is accepted
    #[default]
    Lenient,
}

/// Applies the rule set to an extracted record
#[derive(Debug, Clone)]
pub struct ResultValidator {
    rules: Vec<FieldRule>,
    required: Vec<String>,
    mode: ValidationMode,
}

impl ResultValidator {
    pub fn new(mode: ValidationMode, required: &[String]) -> Self {
        Self {
            rules: default_rules(),
            required: required.to_vec(),
            mode,
        }
    }

    pub fn strict() -> Self {
        Self::with_default_fields(ValidationMode::Strict)
    }

    pub fn lenient() -> Self {
        Self::with_default_fields(ValidationMode::Lenient)
    }

    fn with_default_fields(mode: ValidationMode) -> Self {
        let required: Vec<String> = REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect();
        Self::new(mode, &required)
    }

    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// True when every required field is present and every present field
    /// satisfies its rules. Independent of the mode.
    pub fn is_valid(&self, record: &ResultRecord) -> bool {
        self.collect_errors(record).is_empty()
    }

    /// Returns the first blocking error.
    ///
    /// In lenient mode nothing blocks: errors are logged and `Ok` is returned.
    pub fn validate(&self, record: &ResultRecord) -> Result<(), ValidationError> {
        self.resolve(self.collect_errors(record))
    }

    /// Apply the mode to an already collected error list
    pub(crate) fn resolve(&self, errors: Vec<ValidationError>) -> Result<(), ValidationError> {
        match self.mode {
            ValidationMode::Strict => match errors.into_iter().next() {
                Some(first) => Err(first),
                None => Ok(()),
            },
            ValidationMode::Lenient => {
                for error in &errors {
                    warn!(
                        field = %error.field,
                        code = error.code.as_str(),
                        "Accepting result with validation issue: {}",
                        error.message
                    );
                }
                Ok(())
            }
        }
    }

    /// Full error list, for diagnostics and metrics
    pub(crate) fn collect_errors(&self, record: &ResultRecord) -> Vec<ValidationError> {
        let mut errors: Vec<ValidationError> = self
            .required
            .iter()
            .filter(|field| matches!(record.get(field), None | Some(Value::Null)))
            .map(|field| ValidationError::required(field))
            .collect();

        for (field, value) in record.iter() {
            if value.is_null() {
                continue;
            }
            errors.extend(
                self.rules
                    .iter()
                    .filter(|rule| rule.applies_to(field))
                    .filter_map(|rule| rule.check(field, value)),
            );
        }

        if record.subtype() == Some(ResultSubtype::PlanMode) {
            let has_plan = record
                .get_str(FIELD_RESULT)
                .map(|plan| !plan.trim().is_empty())
                .unwrap_or(false);
            if !has_plan {
                errors.push(ValidationError::new(
                    FIELD_RESULT,
                    record.get(FIELD_RESULT).cloned().unwrap_or(Value::Null),
                    "non-empty plan text",
                    "plan_mode result carries no plan",
                    ValidationCode::MissingPlan,
                ));
            }
        }

        errors
    }
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::lenient()
    }
}
