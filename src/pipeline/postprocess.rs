//! Post-processing of LLM text: cleanup of prose answers and JSON recovery.
//!
//! ## Why is post-processing necessary?
//!
//! Text models asked for "plain Markdown" or "JSON only" still regularly
//! wrap their answer in ` ```json ` fences, prepend a sentence such as
//! "Here is the plan:", or leak zero-width characters copied from the
//! source PDF. Fixing these deterministically here keeps the prompts about
//! *what* to produce and keeps parse failures rare.
//!
//! ## Rule Order
//!
//! [`clean_text`] strips fences before normalising line endings so the
//! fence regex sees the raw answer, and removes invisible characters last
//! so earlier rules never have to account for them.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

/// Clean a prose answer (query answer, summary section).
///
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to one
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim the whole text
pub fn clean_text(input: &str) -> String {
    let s = strip_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

/// The JSON object inside an LLM answer.
///
/// Fences are removed first; then the slice from the first `{` to the last
/// `}` is taken, which drops any leading or trailing commentary.
pub fn extract_json(input: &str) -> Option<&str> {
    let body = fenced_body(input).unwrap_or(input);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

/// Parse the JSON object inside an LLM answer into `T`.
pub fn parse_json<T: DeserializeOwned>(input: &str) -> Result<T, PipelineError> {
    let json = extract_json(input).ok_or_else(|| {
        PipelineError::InvalidResponse(format!("no JSON object in: {}", preview(input)))
    })?;
    serde_json::from_str(json)
        .map_err(|e| PipelineError::InvalidResponse(format!("{e} in: {}", preview(json))))
}

fn preview(text: &str) -> String {
    let cut: String = text.chars().take(120).collect();
    if cut.len() < text.len() {
        format!("{cut}…")
    } else {
        cut
    }
}

// ── Rule 1: Strip outer fences ───────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

fn fenced_body(input: &str) -> Option<&str> {
    RE_OUTER_FENCES
        .captures(input.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn strip_fences(input: &str) -> String {
    fenced_body(input).unwrap_or(input).to_string()
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 5: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_fences("# Hello"), "# Hello");
    }

    #[test]
    fn clean_text_normalises_whitespace() {
        let input = "```\r\nline one   \r\n\r\n\r\n\r\nline\u{200B} two\r\n```";
        assert_eq!(clean_text(input), "line one\n\nline two");
    }

    #[test]
    fn json_is_found_inside_commentary() {
        let answer = "Here is the plan:\n```json\n{\"sections\": []}\n```\nHope it helps!";
        assert_eq!(extract_json(answer), Some("{\"sections\": []}"));

        let bare = "Sure! {\"a\": {\"b\": 1}} done";
        assert_eq!(extract_json(bare), Some("{\"a\": {\"b\": 1}}"));

        assert_eq!(extract_json("no object here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[derive(Debug, Deserialize)]
    struct Verdict {
        valid: bool,
    }

    #[test]
    fn parse_json_reports_invalid_response() {
        let ok: Verdict = parse_json("```json\n{\"valid\": true}\n```").unwrap();
        assert!(ok.valid);

        let err = parse_json::<Verdict>("I cannot help with that.").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidResponse(_)));

        let err = parse_json::<Verdict>("{\"valid\": \"maybe\"}").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidResponse(_)));
    }
}
