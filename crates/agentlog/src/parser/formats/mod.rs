/// Individual result extraction strategies

use serde_json::{Map, Value};

use crate::parser::ansi::clean_line;
use crate::parser::tail_lines;

pub mod json;
pub mod plan;
pub mod structured;
pub mod fallback;

pub use json::{JsonStrategy, JsonStrategyConfig};
pub use plan::PlanModeStrategy;
pub use structured::StructuredTextStrategy;
pub use fallback::FallbackStrategy;

pub const PRIORITY_JSON: u32 = 1;
pub const PRIORITY_PLAN_MODE: u32 = 1;
pub const PRIORITY_STRUCTURED: u32 = 2;
pub const PRIORITY_FALLBACK: u32 = u32::MAX;

const EXIT_PLAN_MODE: &str = "ExitPlanMode";
const TOOL_USE: &str = "tool_use";

/// True when one of the last `scan_lines` lines holds a message with an
/// `ExitPlanMode` tool use.
///
/// Both the JSON and plan-mode probes consult this, so a blob is never
/// accepted by both. A tool list that merely names `ExitPlanMode` does
/// not count.
pub(crate) fn contains_plan_mode_shape(blob: &str, scan_lines: usize) -> bool {
    tail_lines(blob, scan_lines)
        .filter(|line| line.contains(EXIT_PLAN_MODE) && line.contains(TOOL_USE))
        .any(|line| {
            let cleaned = clean_line(line);
            json_object_span(&cleaned)
                .and_then(|span| serde_json::from_str::<Map<String, Value>>(span).ok())
                .map_or(false, |obj| plan::exit_plan_mode_entry(&obj).is_some())
        })
}

/// Slice from the first `{` to the last `}` of a cleaned line
pub(crate) fn json_object_span(line: &str) -> Option<&str> {
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    (end > start).then(|| &line[start..=end])
}
