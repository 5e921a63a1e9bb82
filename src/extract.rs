//! Best-effort recovery of the three answer fields from free-form model text.
//!
//! Models are asked for a JSON object but routinely wrap it in prose or code
//! fences, emit invalid JSON around a valid field, or get cut off by
//! `max_tokens`. [`extract_fields`] tries progressively looser layers and
//! keeps the first value found for each field:
//!
//! 1. the first balanced `{…}` that parses as a JSON object
//! 2. a per-field `"field": "…"` regex over the raw text
//! 3. the same pattern with no closing quote (truncated output)
//! 4. bracketed section headers such as `[Cause]` or `[원인]`

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::request::AnalysisReport;

pub const DEFAULT_CAUSE: &str = "Cause analysis completed.";
pub const DEFAULT_SOLUTION: &str = "Solution generated.";
pub const DEFAULT_PREVENTION: &str = "Prevention guide generated.";

const FIELDS: [&str; 3] = ["cause", "solution", "prevention"];

struct FieldPatterns {
    complete: Regex,
    truncated: Regex,
}

static FIELD_PATTERNS: LazyLock<Vec<FieldPatterns>> = LazyLock::new(|| {
    FIELDS
        .iter()
        .map(|field| FieldPatterns {
            complete: Regex::new(&format!(r#""{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#))
                .expect("field pattern compiles"),
            truncated: Regex::new(&format!(r#"(?s)"{field}"\s*:\s*"(.*)\z"#))
                .expect("truncated field pattern compiles"),
        })
        .collect()
});

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t#*]*\[(cause|solution|prevention|원인|해결책|재발 방지)\][ \t]*:?")
        .expect("section header pattern compiles")
});

/// Per-field results; `None` means no layer produced a non-blank value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub cause: Option<String>,
    pub solution: Option<String>,
    pub prevention: Option<String>,
}

impl ExtractedFields {
    pub fn is_complete(&self) -> bool {
        self.cause.is_some() && self.solution.is_some() && self.prevention.is_some()
    }

    /// Names of the fields no layer could recover.
    pub fn missing(&self) -> Vec<&'static str> {
        FIELDS
            .iter()
            .copied()
            .filter(|f| self.get(f).is_none())
            .collect()
    }

    /// Fill gaps with the fixed defaults.
    pub fn into_report(self) -> AnalysisReport {
        AnalysisReport {
            cause: self.cause.unwrap_or_else(|| DEFAULT_CAUSE.to_string()),
            solution: self.solution.unwrap_or_else(|| DEFAULT_SOLUTION.to_string()),
            prevention: self.prevention.unwrap_or_else(|| DEFAULT_PREVENTION.to_string()),
        }
    }

    fn get(&self, field: &str) -> Option<&String> {
        match field {
            "cause" => self.cause.as_ref(),
            "solution" => self.solution.as_ref(),
            "prevention" => self.prevention.as_ref(),
            _ => None,
        }
    }

    fn fill(&mut self, field: &str, value: Option<String>) {
        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            return;
        };
        let slot = match field {
            "cause" => &mut self.cause,
            "solution" => &mut self.solution,
            "prevention" => &mut self.prevention,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value.trim().to_string());
        }
    }
}

/// Run every layer over `raw` and collect whatever each one finds.
pub fn extract_fields(raw: &str) -> ExtractedFields {
    let mut out = ExtractedFields::default();
    if raw.trim().is_empty() {
        return out;
    }

    if let Some(obj) = first_json_object(raw) {
        for field in FIELDS {
            out.fill(field, obj.get(field).and_then(value_to_text));
        }
    }
    if out.is_complete() {
        return out;
    }

    for (field, patterns) in FIELDS.iter().zip(FIELD_PATTERNS.iter()) {
        if out.get(field).is_some() {
            continue;
        }
        let value = patterns
            .complete
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str()));
        out.fill(field, value);
    }

    for (field, patterns) in FIELDS.iter().zip(FIELD_PATTERNS.iter()) {
        if out.get(field).is_some() {
            continue;
        }
        if patterns.complete.is_match(raw) {
            continue;
        }
        let value = patterns
            .truncated
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| strip_truncated_tail(m.as_str()))
            .filter(|v| !has_unescaped_quote(v))
            .map(unescape);
        out.fill(field, value);
    }

    if !out.is_complete() {
        for (field, value) in sections(raw) {
            out.fill(field, Some(value));
        }
    }

    if !out.is_complete() {
        tracing::debug!(missing = ?out.missing(), "extract: fields not recovered");
    }
    out
}

// ── JSON layer ────────────────────────────────────────────────────────────────

/// First balanced `{…}` in `text` that parses as a JSON object.
fn first_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        if let Some(candidate) = balanced_object(&text[start..])
            && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate)
        {
            return Some(map);
        }
        from = start + 1;
    }
    None
}

/// The balanced object starting at `text[0] == '{'`, ignoring braces inside
/// string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let lines: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect();
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// ── Regex layers ──────────────────────────────────────────────────────────────

/// Decode JSON string escapes in a captured value. Falls back to a minimal
/// hand decoder when the capture is not a valid JSON string body.
fn unescape(captured: &str) -> String {
    if let Ok(s) = serde_json::from_str::<String>(&format!("\"{captured}\"")) {
        return s;
    }
    let mut out = String::with_capacity(captured.len());
    let mut chars = captured.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => {}
        }
    }
    out
}

fn strip_truncated_tail(value: &str) -> &str {
    let mut v = value.trim_end();
    loop {
        let next = v
            .trim_end_matches("```")
            .trim_end()
            .trim_end_matches(['"', '}', ','])
            .trim_end();
        if next.len() == v.len() {
            return v;
        }
        v = next;
    }
}

fn has_unescaped_quote(value: &str) -> bool {
    let mut escape_next = false;
    for ch in value.chars() {
        match ch {
            _ if escape_next => escape_next = false,
            '\\' => escape_next = true,
            '"' => return true,
            _ => {}
        }
    }
    false
}

// ── Section layer ─────────────────────────────────────────────────────────────

fn sections(raw: &str) -> Vec<(&'static str, String)> {
    let headers: Vec<_> = SECTION_HEADER.captures_iter(raw).collect();
    let mut out = Vec::new();
    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(raw.len(), |m| m.start());
        let field = match name.as_str().to_lowercase().as_str() {
            "cause" | "원인" => "cause",
            "solution" | "해결책" => "solution",
            _ => "prevention",
        };
        out.push((field, raw[whole.end()..end].trim().to_string()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_json() {
        let raw = r#"{"cause":"pool exhausted","solution":"raise max","prevention":"alert on usage"}"#;
        let f = extract_fields(raw);
        assert!(f.is_complete());
        assert_eq!(f.cause.as_deref(), Some("pool exhausted"));
    }

    #[test]
    fn json_inside_prose_and_fences() {
        let raw = "Sure! Here is my analysis {of sorts}:\n```json\n{\n  \"cause\": \"a {brace} in text\",\n  \"solution\": [\"step one\", \"step two\"],\n  \"prevention\": \"tests\"\n}\n```\nHope it helps.";
        let f = extract_fields(raw);
        assert_eq!(f.cause.as_deref(), Some("a {brace} in text"));
        assert_eq!(f.solution.as_deref(), Some("step one\nstep two"));
        assert_eq!(f.prevention.as_deref(), Some("tests"));
    }

    #[test]
    fn field_regex_survives_invalid_json() {
        let raw = "{\"cause\": \"null deref\\nin handler\", \"solution\": \"check \\\"user\\\"\", \"prevention\": \"lint\",}";
        let f = extract_fields(raw);
        assert_eq!(f.cause.as_deref(), Some("null deref\nin handler"));
        assert_eq!(f.solution.as_deref(), Some("check \"user\""));
        assert_eq!(f.prevention.as_deref(), Some("lint"));
    }

    #[test]
    fn truncated_output_keeps_partial_field() {
        let raw = "{\"cause\": \"disk full\", \"solution\": \"free space\", \"prevention\": \"monitor disk usage and rot";
        let f = extract_fields(raw);
        assert_eq!(f.cause.as_deref(), Some("disk full"));
        assert_eq!(f.prevention.as_deref(), Some("monitor disk usage and rot"));
    }

    #[test]
    fn section_headers_english_and_korean() {
        let raw = "[Cause]\nTimeout talking to [IP_ADDR_0]\n\n[Solution]: retry with backoff\n\n[재발 방지]\n타임아웃 알림 추가";
        let f = extract_fields(raw);
        assert_eq!(f.cause.as_deref(), Some("Timeout talking to [IP_ADDR_0]"));
        assert_eq!(f.solution.as_deref(), Some("retry with backoff"));
        assert_eq!(f.prevention.as_deref(), Some("타임아웃 알림 추가"));
    }

    #[test]
    fn missing_fields_get_defaults() {
        let f = extract_fields("{\"cause\": \"   \", \"solution\": \"restart\"}");
        assert_eq!(f.missing(), vec!["cause", "prevention"]);
        let report = f.into_report();
        assert_eq!(report.cause, DEFAULT_CAUSE);
        assert_eq!(report.solution, "restart");
        assert_eq!(report.prevention, DEFAULT_PREVENTION);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert_eq!(extract_fields("  \n"), ExtractedFields::default());
        assert_eq!(extract_fields("no structure at all").missing().len(), 3);
    }

    #[test]
    fn unescape_falls_back_on_invalid_json_body() {
        assert_eq!(unescape(r"a\qb\n"), "a\\qb\n");
        assert_eq!(unescape(r"tab\there"), "tab\there");
    }

    #[test]
    fn truncated_layer_ignores_closed_strings() {
        assert!(has_unescaped_quote(r#"x", "y"#));
        assert!(!has_unescaped_quote(r#"say \"hi\" and"#));
    }
}
