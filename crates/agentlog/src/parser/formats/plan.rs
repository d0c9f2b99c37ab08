use serde_json::{Map, Value};
use uuid::Uuid;

use super::{contains_plan_mode_shape, json_object_span, EXIT_PLAN_MODE, PRIORITY_PLAN_MODE, TOOL_USE};
use crate::parser::ansi::clean_line;
use crate::parser::traits::*;
use crate::parser::{tail_lines, ParsedResult, FIELD_SESSION_ID, MAX_SCAN_LINES};

const SESSION_PREFIX: &str = "plan";

/// The `ExitPlanMode` tool-use entry of an assistant message object.
///
/// Accepts both `{"message":{"content":[...]}}` and a bare
/// `{"content":[...]}`.
pub(crate) fn exit_plan_mode_entry(obj: &Map<String, Value>) -> Option<&Value> {
    let content = obj
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| obj.get("content"))?
        .as_array()?;

    content.iter().find(|item| {
        item.get("type").and_then(Value::as_str) == Some(TOOL_USE)
            && item.get("name").and_then(Value::as_str) == Some(EXIT_PLAN_MODE)
    })
}

/// Plan text of the message's `ExitPlanMode` tool use. Returns the plan
/// even when it is empty; callers decide what an empty plan means.
pub(crate) fn find_exit_plan_mode(obj: &Map<String, Value>) -> Option<&str> {
    exit_plan_mode_entry(obj)?
        .get("input")
        .and_then(|input| input.get("plan"))
        .and_then(Value::as_str)
}

/// Turns an agent's proposed plan into a normalized `plan_mode` record
#[derive(Debug, Clone)]
pub struct PlanModeStrategy {
    max_scan_lines: usize,
}

impl PlanModeStrategy {
    pub fn new() -> Self {
        Self { max_scan_lines: MAX_SCAN_LINES }
    }

    pub fn with_max_scan_lines(max_scan_lines: usize) -> Self {
        Self { max_scan_lines }
    }
}

impl Default for PlanModeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStrategy for PlanModeStrategy {
    fn name(&self) -> &str {
        "plan_mode"
    }

    fn priority(&self) -> u32 {
        PRIORITY_PLAN_MODE
    }

    fn can_parse(&self, blob: &str) -> bool {
        contains_plan_mode_shape(blob, self.max_scan_lines)
    }

    fn parse(&self, blob: &str) -> Result<ResultRecord, ParseError> {
        let mut plan: Option<String> = None;
        let mut session_id: Option<String> = None;

        for line in tail_lines(blob, self.max_scan_lines) {
            if !line.contains('{') {
                continue;
            }
            let cleaned = clean_line(line);
            let Some(obj) = json_object_span(&cleaned)
                .and_then(|span| serde_json::from_str::<Map<String, Value>>(span).ok())
            else {
                continue;
            };

            let line_session = obj
                .get(FIELD_SESSION_ID)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());

            if plan.is_none() {
                if let Some(text) = find_exit_plan_mode(&obj) {
                    plan = Some(text.to_string());
                    // The message's own session wins over any seen later in the scan
                    if let Some(id) = line_session {
                        session_id = Some(id.to_string());
                    }
                    continue;
                }
            }

            if session_id.is_none() {
                session_id = line_session.map(str::to_string);
            }
            if plan.is_some() && session_id.is_some() {
                break;
            }
        }

        let plan = plan.ok_or_else(|| {
            ParseError::NoMatchFound("no ExitPlanMode tool use found".to_string())
        })?;
        if plan.trim().is_empty() {
            return Err(ParseError::NoMatchFound(
                "ExitPlanMode tool use carries no plan text".to_string(),
            ));
        }

        let session_id =
            session_id.unwrap_or_else(|| format!("{}-{}", SESSION_PREFIX, Uuid::new_v4()));

        Ok(ParsedResult::plan_mode(session_id, plan).to_record())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::validate::ResultValidator;
    use crate::parser::{ResultSubtype, FIELD_RESULT};

    fn plan_message(plan: &str, session: Option<&str>) -> String {
        let mut obj = serde_json::json!({
            "type": "assistant",
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Here is my plan"},
                    {"type": "tool_use", "id": "tu_1", "name": "ExitPlanMode", "input": {"plan": plan}}
                ]
            }
        });
        if let Some(id) = session {
            obj["session_id"] = Value::from(id);
        }
        obj.to_string()
    }

    #[test]
    fn test_extracts_plan_and_session() {
        let blob = plan_message("## Plan\n1. Refactor", Some("sess-42"));
        let strategy = PlanModeStrategy::new();

        assert!(strategy.can_parse(&blob));
        let record = strategy.parse(&blob).unwrap();

        assert_eq!(record.subtype(), Some(ResultSubtype::PlanMode));
        assert_eq!(record.is_error(), Some(false));
        assert_eq!(record.get_str(FIELD_RESULT), Some("## Plan\n1. Refactor"));
        assert_eq!(record.session_id(), Some("sess-42"));
        assert!(ResultValidator::strict().is_valid(&record));
    }

    #[test]
    fn test_session_from_other_line() {
        let blob = format!(
            "{}\n{}",
            r#"{"type":"system","subtype":"init","session_id":"init-7"}"#,
            plan_message("## Plan", None)
        );
        let record = PlanModeStrategy::new().parse(&blob).unwrap();
        assert_eq!(record.session_id(), Some("init-7"));
    }

    #[test]
    fn test_generates_session_when_absent() {
        let blob = plan_message("## Plan", None);
        let record = PlanModeStrategy::new().parse(&blob).unwrap();

        let session = record.session_id().unwrap();
        assert!(session.starts_with("plan-"));
        assert!(ResultValidator::strict().is_valid(&record));
    }

    #[test]
    fn test_empty_plan_fails() {
        let blob = plan_message("   ", Some("s1"));
        let err = PlanModeStrategy::new().parse(&blob).unwrap_err();
        assert!(matches!(err, ParseError::NoMatchFound(_)));
    }

    #[test]
    fn test_declines_ordinary_output() {
        let blob = r#"{"type":"result","subtype":"success","is_error":false,"session_id":"s1"}"#;
        assert!(!PlanModeStrategy::new().can_parse(blob));
    }

    #[test]
    fn test_mention_without_tool_use_object() {
        let blob = "discussing ExitPlanMode and tool_use in prose";
        let strategy = PlanModeStrategy::new();
        assert!(!strategy.can_parse(blob));
        assert!(strategy.parse(blob).is_err());
    }

    #[test]
    fn test_tool_list_is_not_a_plan() {
        let blob = concat!(
            r#"{"type":"system","subtype":"init","session_id":"s1","tools":["Bash","Read","ExitPlanMode"]}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"ls"}}]}}"#,
            "\n",
        );
        assert!(!PlanModeStrategy::new().can_parse(blob));
    }
}
