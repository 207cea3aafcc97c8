//! JSON extraction from judge responses.
//!
//! Judges are asked for a bare JSON object, but models wrap their answer in
//! markdown fences or lead with prose. Extraction tries, in order: a ```json
//! fence, a generic fence, a direct object, and finally the largest valid
//! object anywhere in the text (reasoning models put the real answer last).
//! Truncated objects are reported distinctly so callers can treat them as a
//! parse failure rather than missing output.

use regex::Regex;
use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed brace(s). Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },

    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Extract a JSON object from a judge response.
///
/// # Errors
///
/// Returns [`JsonExtractionError::Truncated`] when an object starts but never
/// closes, and [`JsonExtractionError::NotFound`] when nothing object-shaped is
/// present.
pub fn extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    // Fenced blocks first: the most reliable location for structured output.
    for pattern in [r"```json\s*\n?([\s\S]*?)\n?```", r"```\w*\s*\n?([\s\S]*?)\n?```"] {
        if let Some(candidate) = extract_from_fence(trimmed, pattern) {
            if serde_json::from_str::<serde_json::Value>(&candidate).is_ok() {
                return Ok(candidate);
            }
        }
    }

    // Direct object.
    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Ok(candidate.to_string());
            }
        }
    }

    // Largest valid object anywhere, preferring later occurrences: reasoning
    // output may contain example objects before the real answer.
    if let Some(json) = largest_valid_object(trimmed) {
        return Ok(json);
    }

    // Nothing valid; classify the failure.
    if let Some(start) = trimmed.find('{') {
        let unclosed = count_unclosed_braces(&trimmed[start..]);
        if unclosed > 0 {
            let partial = &trimmed[start..];
            let preview_len = partial
                .char_indices()
                .nth(100)
                .map(|(i, _)| i)
                .unwrap_or(partial.len());
            return Err(JsonExtractionError::Truncated {
                partial_preview: partial[..preview_len].to_string(),
                unclosed_braces: unclosed,
            });
        }
    }

    let preview_len = trimmed
        .char_indices()
        .nth(50)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    Err(JsonExtractionError::NotFound {
        content_preview: trimmed[..preview_len].to_string(),
    })
}

/// Pull the first object out of a fenced code block matching `pattern`.
fn extract_from_fence(content: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(content)?;
    let block = caps.get(1)?.as_str().trim();
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    Some(block[start..=start + end].to_string())
}

/// Index of the brace closing the object that `s` opens with.
///
/// Tracks string literals and escape sequences so braces inside rationale
/// text do not confuse the depth count.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Find every valid JSON object in `content` and keep the largest, breaking
/// ties toward the later occurrence.
fn largest_valid_object(content: &str) -> Option<String> {
    let mut best: Option<(usize, String)> = None;

    for (start, c) in content.char_indices() {
        if c != '{' {
            continue;
        }
        let substr = &content[start..];
        if let Some(end) = find_matching_brace(substr) {
            let candidate = &substr[..=end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                let replace = match &best {
                    Some((_, current)) => candidate.len() >= current.len(),
                    None => true,
                };
                if replace {
                    best = Some((start, candidate.to_string()));
                }
            }
        }
    }

    best.map(|(_, json)| json)
}

/// Number of `{` without a matching `}` outside string literals.
fn count_unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize
}
