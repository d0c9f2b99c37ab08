/// Result extraction from agent execution logs
///
/// This module turns the accumulated stdout/stderr blob of one agent session
/// into a structured result record.
///
/// # Architecture
///
/// - `traits.rs`: Strategy contract and the static dispatch enum
/// - `detector.rs`: Strategy factory, adaptive factory and blob fingerprinting
/// - `formats/`: Individual extraction strategies (JSON, plan-mode, structured text, fallback)
/// - `validate/`: Field rules and the result validator
/// - `cache.rs`: Bounded fingerprint -> strategy cache
/// - `metrics.rs`: Parser and stream health counters
///
/// # Safety Guarantees
///
/// All strategies implement:
/// - Bounded scanning (tail windows, never the whole blob line by line)
/// - Binary safety (ANSI and prefix noise stripped before inspection)
/// - Totality through the fallback strategy (non-empty input always yields a record)

pub mod traits;
pub mod detector;
pub mod cache;
pub mod metrics;
pub mod formats;
pub mod model;
pub mod validate;
mod ansi;

// Re-export commonly used types
pub use traits::{ResultStrategy, Strategy};
pub use model::{ParseError, ParsedResult, Outcome, RunStats, ResultRecord, ResultSubtype};
pub use ansi::{strip_ansi_codes, strip_log_prefix};

// Constants
pub const MAX_SCAN_LINES: usize = 1000;
pub const PROBE_LINES: usize = 10;
pub const MIN_STRUCTURED_KEYS: usize = 3;
pub const OPTIMIZED_SCAN_LINES: usize = 200;
pub const OPTIMIZED_MAX_LINE_SIZE: usize = 262_144; // 256KB

// Record field names
pub const FIELD_TYPE: &str = "type";
pub const FIELD_SUBTYPE: &str = "subtype";
pub const FIELD_IS_ERROR: &str = "is_error";
pub const FIELD_SESSION_ID: &str = "session_id";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_DURATION_API_MS: &str = "duration_api_ms";
pub const FIELD_NUM_TURNS: &str = "num_turns";
pub const FIELD_TOTAL_COST_USD: &str = "total_cost_usd";
pub const FIELD_RESULT: &str = "result";
pub const FIELD_USAGE: &str = "usage";

pub const RESULT_TYPE: &str = "result";

pub const REQUIRED_FIELDS: [&str; 4] = [FIELD_TYPE, FIELD_SUBTYPE, FIELD_IS_ERROR, FIELD_SESSION_ID];

pub const KNOWN_FIELDS: [&str; 10] = [
    FIELD_TYPE,
    FIELD_SUBTYPE,
    FIELD_IS_ERROR,
    FIELD_SESSION_ID,
    FIELD_DURATION_MS,
    FIELD_DURATION_API_MS,
    FIELD_NUM_TURNS,
    FIELD_TOTAL_COST_USD,
    FIELD_RESULT,
    FIELD_USAGE,
];

/// Iterate the last `limit` lines of a blob, newest first.
///
/// Empty lines are skipped and do not count toward the limit.
pub(crate) fn tail_lines(blob: &str, limit: usize) -> impl Iterator<Item = &str> {
    blob.lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(limit)
}
