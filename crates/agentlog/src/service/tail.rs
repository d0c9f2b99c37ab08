//! Bounded line reading for the live tail and poll deltas.
//!
//! A single agent line can be megabytes of JSON; nothing here buffers more
//! than `max_bytes` of one line.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub const TRUNCATION_MARKER: &str = " ...[truncated]";

/// Where a streamed line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    Stdout,
    Stderr,
    /// Read back from the persisted execution log
    Log,
    /// Produced by the streaming service itself (completion line)
    Synthetic,
}

/// One streamed unit. On the wire only `line` and `timestamp` appear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub line: String,
    /// Capture time, Unix milliseconds
    pub timestamp: i64,
    #[serde(skip)]
    pub source: LineSource,
}

impl LogLine {
    pub fn now(line: impl Into<String>, source: LineSource) -> Self {
        Self {
            line: line.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            source,
        }
    }
}

/// A line read under a byte cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CappedLine {
    pub text: String,
    pub truncated: bool,
}

/// Cut a line to `max_bytes` at a char boundary and mark it
pub fn cap_line(line: &str, max_bytes: usize) -> CappedLine {
    if line.len() <= max_bytes {
        return CappedLine { text: line.to_string(), truncated: false };
    }
    let mut cut = max_bytes;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    CappedLine {
        text: format!("{}{}", &line[..cut], TRUNCATION_MARKER),
        truncated: true,
    }
}

/// Read one `\n`-terminated line, keeping at most `max_bytes` of it.
///
/// The rest of an oversized line is consumed and discarded. Returns
/// `Ok(None)` at EOF. A trailing `\r` is dropped; invalid UTF-8 is replaced.
pub async fn read_capped_line<R>(reader: &mut R, max_bytes: usize) -> io::Result<Option<CappedLine>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut read_any = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if !read_any {
                return Ok(None);
            }
            break;
        }
        read_any = true;

        let (chunk, found_newline) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..pos], true),
            None => (available, false),
        };

        let room = max_bytes.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
        } else {
            buf.extend_from_slice(chunk);
        }

        let consumed = chunk.len() + usize::from(found_newline);
        reader.consume(consumed);

        if found_newline {
            break;
        }
    }

    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if truncated {
        // A cut inside a multi-byte char leaves an incomplete tail; drop it
        if let Err(e) = std::str::from_utf8(&buf) {
            if e.error_len().is_none() {
                buf.truncate(e.valid_up_to());
            }
        }
    }

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    Ok(Some(CappedLine { text, truncated }))
}

/// Tracks how much of a growing log blob has been emitted.
///
/// Only complete lines are emitted while the session runs; a partial
/// trailing line waits for its newline or for the final flush.
#[derive(Debug, Clone)]
pub struct PollCursor {
    offset: usize,
    max_line_bytes: usize,
}

impl PollCursor {
    pub fn new(max_line_bytes: usize) -> Self {
        Self { offset: 0, max_line_bytes }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// New lines since the last call. With `finished`, the partial tail is
    /// flushed as well.
    pub fn advance(&mut self, blob: &str, finished: bool) -> Vec<CappedLine> {
        // Not an append of what we saw: start over
        if self.offset > blob.len() || !blob.is_char_boundary(self.offset) {
            tracing::warn!(
                offset = self.offset,
                len = blob.len(),
                "Execution log shrank or was rewritten, restarting from the top"
            );
            self.offset = 0;
        }

        let fresh = &blob[self.offset..];
        let complete = if finished {
            fresh
        } else {
            match fresh.rfind('\n') {
                Some(pos) => &fresh[..=pos],
                None => "",
            }
        };
        self.offset += complete.len();

        complete
            .lines()
            .map(|line| cap_line(line.strip_suffix('\r').unwrap_or(line), self.max_line_bytes))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_all(input: &[u8], max: usize, capacity: usize) -> Vec<CappedLine> {
        let mut reader = BufReader::with_capacity(capacity, input);
        let mut out = Vec::new();
        while let Some(line) = read_capped_line(&mut reader, max).await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_reads_lines() {
        let lines = read_all(b"one\r\ntwo\nthree", 64, 8).await;
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(lines.iter().all(|l| !l.truncated));
    }

    #[tokio::test]
    async fn test_truncates_oversized_line_and_resyncs() {
        let input = format!("{}\nnext\n", "x".repeat(100));
        let lines = read_all(input.as_bytes(), 10, 16).await;

        assert_eq!(lines.len(), 2);
        assert!(lines[0].truncated);
        assert_eq!(lines[0].text, format!("{}{}", "x".repeat(10), TRUNCATION_MARKER));
        assert_eq!(lines[1].text, "next");
    }

    #[tokio::test]
    async fn test_truncation_keeps_whole_chars() {
        let lines = read_all("ééé\nok\n".as_bytes(), 3, 2).await;
        assert_eq!(lines[0].text, format!("é{}", TRUNCATION_MARKER));
        assert_eq!(lines[0], cap_line("ééé", 3));
        assert_eq!(lines[1].text, "ok");
    }

    #[tokio::test]
    async fn test_empty_lines_are_kept() {
        let lines = read_all(b"a\n\nb\n", 64, 4).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text, "");
    }

    #[test]
    fn test_cap_line_respects_char_boundary() {
        let capped = cap_line("ééé", 3);
        assert!(capped.truncated);
        assert_eq!(capped.text, format!("é{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_poll_cursor_emits_whole_lines_only() {
        let mut cursor = PollCursor::new(1024);

        let first = cursor.advance("alpha\nbe", false);
        assert_eq!(first, vec![cap_line("alpha", 1024)]);

        let second = cursor.advance("alpha\nbeta\ngam", false);
        assert_eq!(second, vec![cap_line("beta", 1024)]);

        assert!(cursor.advance("alpha\nbeta\ngam", false).is_empty());

        let last = cursor.advance("alpha\nbeta\ngamma", true);
        assert_eq!(last, vec![cap_line("gamma", 1024)]);
        assert_eq!(cursor.offset(), "alpha\nbeta\ngamma".len());
    }

    #[test]
    fn test_poll_cursor_restarts_on_rewrite() {
        let mut cursor = PollCursor::new(1024);
        cursor.advance("a long first line\n", false);

        let lines = cursor.advance("short\n", false);
        assert_eq!(lines, vec![cap_line("short", 1024)]);
    }
}
