use sha2::{Digest, Sha256};

use super::PRIORITY_FALLBACK;
use crate::parser::ansi::clean_line;
use crate::parser::traits::*;
use crate::parser::validate::rules::{MAX_COST_USD, MAX_DURATION_MS, MAX_RESULT_BYTES, MAX_TURNS};
use crate::parser::{tail_lines, Outcome, ParsedResult, RunStats, MAX_SCAN_LINES};

const ERROR_TERMS: [&str; 8] = [
    "error", "failed", "failure", "exception", "panic", "fatal", "traceback", "denied",
];
const SUCCESS_TERMS: [&str; 6] = ["success", "succeeded", "completed", "finished", "done", "passed"];

const SESSION_PREFIX: &str = "fallback";
const SESSION_HASH_CHARS: usize = 16;
const RESULT_TAIL_LINES: usize = 20;

/// Last-resort strategy: accepts anything and never fails.
///
/// Produces a degraded `fallback` record from keyword and number heuristics.
/// The session id is derived from a hash of the blob, so the same output
/// always yields the same id.
#[derive(Debug, Clone)]
pub struct FallbackStrategy {
    max_scan_lines: usize,
}

impl FallbackStrategy {
    pub fn new() -> Self {
        Self { max_scan_lines: MAX_SCAN_LINES }
    }

    pub fn with_max_scan_lines(max_scan_lines: usize) -> Self {
        Self { max_scan_lines }
    }
}

impl Default for FallbackStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        "fallback"
    }

    fn priority(&self) -> u32 {
        PRIORITY_FALLBACK
    }

    fn can_parse(&self, _blob: &str) -> bool {
        true
    }

    fn parse(&self, blob: &str) -> Result<ResultRecord, ParseError> {
        let lines: Vec<String> = tail_lines(blob, self.max_scan_lines)
            .map(|line| clean_line(line).into_owned())
            .filter(|line| !line.is_empty())
            .collect();

        let mut error_hits = 0usize;
        let mut success_hits = 0usize;
        let mut stats = RunStats::zeroed();

        for line in &lines {
            let lower = line.to_lowercase();
            error_hits += ERROR_TERMS.iter().filter(|t| lower.contains(*t)).count();
            success_hits += SUCCESS_TERMS.iter().filter(|t| lower.contains(*t)).count();

            // Newest value wins; lines are visited newest-first
            let words = words(&lower);
            if stats.duration_ms == Some(0) {
                if let Some(ms) = duration_ms(&words) {
                    stats.duration_ms = Some(ms);
                }
            }
            if stats.total_cost_usd == Some(0.0) {
                if let Some(cost) = cost_usd(&words) {
                    stats.total_cost_usd = Some(cost);
                }
            }
            if stats.num_turns.is_none() {
                stats.num_turns = turns(&words);
            }
        }

        stats.result = summary(&lines);

        let is_error = !(success_hits > 0 && error_hits == 0);
        let outcome = Outcome {
            session_id: synthetic_session_id(blob),
            is_error,
            stats,
        };

        Ok(ParsedResult::Fallback(outcome).to_record())
    }
}

fn synthetic_session_id(blob: &str) -> String {
    let digest = hex::encode(Sha256::digest(blob.as_bytes()));
    format!("{}-{}", SESSION_PREFIX, &digest[..SESSION_HASH_CHARS])
}

/// Last lines of output in original order, capped to the result size limit
fn summary(newest_first: &[String]) -> Option<String> {
    if newest_first.is_empty() {
        return None;
    }
    let mut tail: Vec<&str> = newest_first
        .iter()
        .take(RESULT_TAIL_LINES)
        .map(String::as_str)
        .collect();
    tail.reverse();

    let mut text = tail.join("\n");
    if text.len() > MAX_RESULT_BYTES {
        let mut cut = MAX_RESULT_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    Some(text)
}

fn words(line: &str) -> Vec<&str> {
    line.split(|c: char| c.is_whitespace() || c == ',' || c == '|')
        .filter(|w| !w.is_empty())
        .collect()
}

/// Parse a number out of a word, ignoring surrounding punctuation and units
fn number(word: &str) -> Option<f64> {
    let trimmed = word.trim_matches(|c: char| !(c.is_ascii_digit() || c == '.'));
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0)
}

/// Number attached to a keyword word (`cost=0.4`, `duration:12`) or in the
/// following word (`cost: $0.42`)
fn value_after(words: &[&str], keyword: &str) -> Option<(f64, String)> {
    for (i, word) in words.iter().enumerate() {
        if !word.contains(keyword) {
            continue;
        }
        if let Some((_, inline)) = word.split_once(['=', ':']) {
            if let Some(n) = number(inline) {
                return Some((n, inline.to_string()));
            }
        }
        if let Some(next) = words.get(i + 1) {
            if let Some(n) = number(next) {
                return Some((n, next.to_string()));
            }
        }
    }
    None
}

fn duration_ms(words: &[&str]) -> Option<u64> {
    let (n, raw) = value_after(words, "duration")
        .or_else(|| value_after(words, "took"))
        .or_else(|| value_after(words, "elapsed"))?;

    let ms = if raw.ends_with("ms") {
        n
    } else if raw.ends_with('s') {
        n * 1000.0
    } else if raw.ends_with('m') {
        n * 60_000.0
    } else {
        n
    };
    (ms <= MAX_DURATION_MS).then(|| ms.round() as u64)
}

fn cost_usd(words: &[&str]) -> Option<f64> {
    let (n, _) = value_after(words, "cost")?;
    (n <= MAX_COST_USD).then_some(n)
}

fn turns(words: &[&str]) -> Option<u32> {
    // "7 turns" as well as "turns: 7" / "num_turns=7"
    let before = words
        .iter()
        .position(|w| w.starts_with("turn"))
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| number(words[i]));
    let n = before.or_else(|| value_after(words, "turns").map(|(n, _)| n))?;

    if n.fract() != 0.0 || n < 1.0 || n > MAX_TURNS {
        return None;
    }
    Some(n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::validate::ResultValidator;
    use crate::parser::{ResultSubtype, FIELD_DURATION_MS, FIELD_NUM_TURNS, FIELD_RESULT, FIELD_TOTAL_COST_USD};

    #[test]
    fn test_always_accepts_and_never_fails() {
        let strategy = FallbackStrategy::new();
        for blob in ["x", " ", "\n\n", "\x1b[0m", "💥 ünïcode", "{not json"] {
            assert!(strategy.can_parse(blob));
            let record = strategy.parse(blob).unwrap();
            assert_eq!(record.subtype(), Some(ResultSubtype::Fallback));
            assert!(ResultValidator::strict().is_valid(&record), "invalid for {:?}", blob);
        }
    }

    #[test]
    fn test_nothing_meaningful_is_error() {
        let record = FallbackStrategy::new().parse("hello world").unwrap();
        assert_eq!(record.is_error(), Some(true));
        assert_eq!(record.get_u64(FIELD_DURATION_MS), Some(0));
    }

    #[test]
    fn test_success_terms_without_errors() {
        let record = FallbackStrategy::new()
            .parse("running tests\nall tests passed\ntask completed")
            .unwrap();
        assert_eq!(record.is_error(), Some(false));
    }

    #[test]
    fn test_error_terms_win() {
        let record = FallbackStrategy::new()
            .parse("build completed\nerror: linker failed")
            .unwrap();
        assert_eq!(record.is_error(), Some(true));
    }

    #[test]
    fn test_numbers_are_extracted() {
        let blob = "Task finished in 7 turns\nTotal cost: $0.42\nduration: 12.5s";
        let record = FallbackStrategy::new().parse(blob).unwrap();

        assert_eq!(record.get_u64(FIELD_NUM_TURNS), Some(7));
        assert_eq!(record.get_f64(FIELD_TOTAL_COST_USD), Some(0.42));
        assert_eq!(record.get_u64(FIELD_DURATION_MS), Some(12_500));
    }

    #[test]
    fn test_out_of_range_numbers_are_dropped() {
        let record = FallbackStrategy::new().parse("ran 5000 turns, cost=99999").unwrap();
        assert!(!record.contains(FIELD_NUM_TURNS));
        assert_eq!(record.get_f64(FIELD_TOTAL_COST_USD), Some(0.0));
    }

    #[test]
    fn test_session_id_is_deterministic() {
        let a = FallbackStrategy::new().parse("same output").unwrap();
        let b = FallbackStrategy::new().parse("same output").unwrap();
        let c = FallbackStrategy::new().parse("other output").unwrap();

        assert_eq!(a.session_id(), b.session_id());
        assert_ne!(a.session_id(), c.session_id());
        assert_eq!(a.session_id().unwrap().len(), "fallback-".len() + SESSION_HASH_CHARS);
    }

    #[test]
    fn test_result_keeps_output_tail_in_order() {
        let record = FallbackStrategy::new().parse("first\nsecond\nthird").unwrap();
        assert_eq!(record.get_str(FIELD_RESULT), Some("first\nsecond\nthird"));
    }
}
