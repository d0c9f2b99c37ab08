/// ANSI escape stripping and log-prefix removal for captured agent output
///
/// Agent CLIs running under a pseudo-terminal colour their output, and the
/// execution subsystem may prepend its own markers (container timestamps,
/// `[12:34:56] INFO: ` style prefixes) to every captured line. Strategies
/// strip both before looking for a result.

use std::borrow::Cow;

const LEVEL_MARKERS: [&str; 6] = ["TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR"];

/// Strip ANSI escape codes from a captured line
///
/// Handles CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL|ST`) and two-byte
/// Fe sequences. Returns `Cow::Borrowed` when the line has no ESC byte.
pub fn strip_ansi_codes(input: &str) -> Cow<'_, str> {
    if !input.contains('\x1b') {
        return Cow::Borrowed(input);
    }

    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != 0x1b {
            output.push(bytes[i]);
            i += 1;
            continue;
        }

        // Lone trailing ESC
        if i + 1 >= bytes.len() {
            break;
        }

        match bytes[i + 1] {
            b'[' => {
                i += 2;
                while i < bytes.len() {
                    let b = bytes[i];
                    i += 1;
                    if (0x40..=0x7E).contains(&b) {
                        break;
                    }
                }
            }
            b']' => {
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < bytes.len() && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            0x40..=0x5F => i += 2,
            _ => {
                // Not an escape we know; drop the ESC, keep what follows
                i += 1;
            }
        }
    }

    // Only ASCII bytes were removed, so the rest is still valid UTF-8
    Cow::Owned(String::from_utf8_lossy(&output).into_owned())
}

/// Strip a container timestamp prefix: `2026-01-30T03:29:06.691716216Z `
fn strip_container_timestamp(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() < 20 || !bytes[0].is_ascii_digit() || bytes[4] != b'-' || bytes[7] != b'-' {
        return line;
    }
    if !(bytes[10] == b'T' || bytes[10] == b' ') || bytes[13] != b':' || bytes[16] != b':' {
        return line;
    }

    let search_end = bytes.len().min(36);
    match bytes[19..search_end].iter().position(|&b| b == b'Z') {
        Some(z) => line[19 + z + 1..].trim_start(),
        None => line,
    }
}

/// Strip leading log-prefix markers from a line
///
/// Removes, in order and repeatedly: container timestamps, bracketed
/// segments (`[12:34:56]`, `[stdout]`) and a level marker followed by a
/// colon (`INFO:`). Stops at the first token that is none of those.
pub fn strip_log_prefix(line: &str) -> &str {
    let mut rest = line.trim_start();

    loop {
        let before = rest.len();

        rest = strip_container_timestamp(rest);

        if rest.starts_with('[') {
            if let Some(close) = rest.find(']') {
                rest = rest[close + 1..].trim_start();
            }
        }

        if let Some((head, tail)) = rest.split_once(':') {
            if LEVEL_MARKERS.iter().any(|m| head.eq_ignore_ascii_case(m)) {
                rest = tail.trim_start();
            }
        }

        if rest.len() == before {
            return rest;
        }
    }
}

/// Clean a raw captured line: ANSI codes first, then prefix markers
pub(crate) fn clean_line(line: &str) -> Cow<'_, str> {
    match strip_ansi_codes(line) {
        Cow::Borrowed(s) => Cow::Borrowed(strip_log_prefix(s)),
        Cow::Owned(s) => Cow::Owned(strip_log_prefix(&s).to_string()),
    }
}
