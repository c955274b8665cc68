//! Shared utility functions for the gauntlet crate.

use sha2::{Digest, Sha256};

/// Extract the last top-level JSON object from text that may contain other
/// content (reviewer chatter, markdown fences).
///
/// Brace counting skips braces inside JSON string literals. The last object
/// wins because reviewers tend to restate their final answer at the end.
pub fn extract_json_object(text: &str) -> Option<String> {
    let mut found = None;
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                {
                    found = Some(text[s..=i].to_string());
                }
            }
            _ => {}
        }
    }

    found
}

/// Last `n` lines of `text`, joined with newlines.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].join("\n")
}

/// Segment used for the repository root entry point (`.`).
const ROOT_SEGMENT: &str = "root";

/// Reduce an arbitrary string to a file-name-safe job id segment.
///
/// Names made only of `[A-Za-z0-9-]` are kept as they are. Anything else
/// (including `_`, `.`, `@` and `/`, which the log naming scheme reserves)
/// has those characters replaced by `-` and gets the first 8 hex digits of
/// its SHA-256 appended, so `src/api` and `src-api` never share an id.
pub fn sanitize_segment(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c == '/' || c == '.');
    if trimmed.is_empty() {
        return ROOT_SEGMENT.to_string();
    }
    let plain = trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if plain && trimmed != ROOT_SEGMENT {
        return trimmed.to_string();
    }

    let readable: String = trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", readable, &digest[..8])
}
