//! Reversible redaction of sensitive substrings.
//!
//! A [`Masker`] holds the compiled rules and is shared for the life of the
//! process. Each request gets its own [`MaskingTable`] from
//! [`Masker::table`]; the table records placeholder → original pairs while
//! masking outbound text and restores them in the model's answer. Tables are
//! never shared between requests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;

/// Built-in rules, applied in this order.
pub const BUILTIN_RULES: &[(&str, &str)] = &[
    ("IP_ADDR", r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b"),
    ("DOC_REF", r"\b[A-Z]{3}-\d{3}\b"),
];

static BUILTIN: LazyLock<Vec<MaskRule>> = LazyLock::new(|| {
    BUILTIN_RULES
        .iter()
        .map(|(label, pattern)| MaskRule::new(label, pattern).expect("builtin mask pattern compiles"))
        .collect()
});

/// Text already shaped like a placeholder, e.g. a pasted `[IP_ADDR_0]`.
static PLACEHOLDER_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Z][A-Z0-9_]*_\d+\]").expect("placeholder pattern compiles"));

/// One redaction rule: every match of `pattern` becomes `[<label>_<n>]`.
#[derive(Debug, Clone)]
pub struct MaskRule {
    label: String,
    pattern: Regex,
}

impl MaskRule {
    pub fn new(label: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            label: label.trim().to_ascii_uppercase(),
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Process-wide rule set.
#[derive(Debug, Clone)]
pub struct Masker {
    rules: Arc<Vec<MaskRule>>,
}

impl Masker {
    /// Built-in rules followed by `extra`.
    pub fn new(extra: Vec<MaskRule>) -> Self {
        let mut rules = BUILTIN.clone();
        rules.extend(extra);
        Self { rules: Arc::new(rules) }
    }

    /// A masker that leaves text untouched.
    pub fn disabled() -> Self {
        Self { rules: Arc::new(Vec::new()) }
    }

    pub fn is_enabled(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Fresh, empty table for one request.
    pub fn table(&self) -> MaskingTable {
        MaskingTable {
            rules: Arc::clone(&self.rules),
            entries: Vec::new(),
            by_original: HashMap::new(),
            counters: HashMap::new(),
            reserved: HashSet::new(),
        }
    }
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Request-scoped placeholder ↔ original mapping.
#[derive(Debug)]
pub struct MaskingTable {
    rules: Arc<Vec<MaskRule>>,
    /// (placeholder, original) in creation order.
    entries: Vec<(String, String)>,
    by_original: HashMap<(String, String), String>,
    counters: HashMap<String, usize>,
    /// Placeholder-shaped tokens present in the input; never minted.
    reserved: HashSet<String>,
}

impl MaskingTable {
    /// Replace every rule match in `text` with its placeholder.
    ///
    /// The same original always maps to the same placeholder, and counters
    /// keep running across calls, so masking several fields of one request
    /// never produces colliding placeholders. When rules overlap, the rule
    /// listed first wins.
    pub fn mask(&mut self, text: &str) -> String {
        if text.is_empty() || self.rules.is_empty() {
            return text.to_string();
        }
        self.reserve(text);

        let rules = Arc::clone(&self.rules);
        let mut spans: Vec<(usize, usize, String)> = Vec::new();
        for rule in rules.iter() {
            for m in rule.pattern.find_iter(text) {
                if m.as_str().is_empty() {
                    continue;
                }
                let overlaps = spans
                    .iter()
                    .any(|(start, end, _)| m.start() < *end && *start < m.end());
                if overlaps {
                    continue;
                }
                let placeholder = self.placeholder_for(&rule.label, m.as_str());
                spans.push((m.start(), m.end(), placeholder));
            }
        }

        if spans.is_empty() {
            return text.to_string();
        }
        spans.sort_by_key(|(start, _, _)| *start);

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end, placeholder) in spans {
            out.push_str(&text[cursor..start]);
            out.push_str(&placeholder);
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// Record placeholder-shaped tokens already in `text` so masking skips
    /// them. Call with every input before the first [`mask`](Self::mask).
    pub fn reserve(&mut self, text: &str) {
        for m in PLACEHOLDER_SHAPE.find_iter(text) {
            self.reserved.insert(m.as_str().to_string());
        }
    }

    /// Replace every known placeholder in `text` with a space.
    pub fn strip_placeholders(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (placeholder, _) in &self.entries {
            out = out.replace(placeholder.as_str(), " ");
        }
        out
    }

    /// Restore every known placeholder in `text`.
    pub fn unmask(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let mut out = text.to_string();
        for (placeholder, original) in &self.entries {
            if out.contains(placeholder.as_str()) {
                out = out.replace(placeholder.as_str(), original);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Placeholders in creation order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    fn placeholder_for(&mut self, label: &str, original: &str) -> String {
        let key = (label.to_string(), original.to_string());
        if let Some(existing) = self.by_original.get(&key) {
            return existing.clone();
        }
        let counter = self.counters.entry(label.to_string()).or_insert(0);
        let mut placeholder = format!("[{label}_{counter}]");
        while self.reserved.contains(&placeholder) {
            *counter += 1;
            placeholder = format!("[{label}_{counter}]");
        }
        *counter += 1;
        self.entries.push((placeholder.clone(), original.to_string()));
        self.by_original.insert(key, placeholder.clone());
        placeholder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_ips_and_doc_refs() {
        let mut table = Masker::default().table();
        let masked = table.mask("conn to 10.0.0.12 refused, see SEC-042 and 10.0.0.12 again");
        assert_eq!(masked, "conn to [IP_ADDR_0] refused, see [DOC_REF_0] and [IP_ADDR_0] again");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn counters_continue_across_fields() {
        let mut table = Masker::default().table();
        let log = table.mask("upstream 192.168.1.1 timed out");
        let code = table.mask("HOST = \"172.16.0.9\"  # fallback 192.168.1.1");
        assert_eq!(log, "upstream [IP_ADDR_0] timed out");
        assert_eq!(code, "HOST = \"[IP_ADDR_1]\"  # fallback [IP_ADDR_0]");
        let placeholders: Vec<_> = table.placeholders().collect();
        assert_eq!(placeholders, vec!["[IP_ADDR_0]", "[IP_ADDR_1]"]);
    }

    #[test]
    fn unmask_restores_originals() {
        let mut table = Masker::default().table();
        let masked = table.mask("ABC-123 failed on 8.8.8.8");
        let answer = format!("Check {masked}; ticket [DOC_REF_0] covers [IP_ADDR_0].");
        let restored = table.unmask(&answer);
        assert_eq!(restored, "Check ABC-123 failed on 8.8.8.8; ticket ABC-123 covers 8.8.8.8.");
    }

    #[test]
    fn numbering_follows_first_occurrence() {
        let mut table = Masker::default().table();
        let masked = table.mask("b=2.2.2.2 a=1.1.1.1 b=2.2.2.2");
        assert_eq!(masked, "b=[IP_ADDR_0] a=[IP_ADDR_1] b=[IP_ADDR_0]");
    }

    #[test]
    fn lowercase_or_long_codes_are_left_alone() {
        let mut table = Masker::default().table();
        let text = "abc-123 ABCD-1234 version 1.2.3";
        assert_eq!(table.mask(text), text);
        assert!(table.is_empty());
    }

    #[test]
    fn extra_rules_cannot_split_earlier_matches() {
        let extra = vec![MaskRule::new("num", r"\d+").unwrap()];
        let mut table = Masker::new(extra).table();
        let masked = table.mask("ip 10.1.2.3 port 5432");
        assert_eq!(masked, "ip [IP_ADDR_0] port [NUM_0]");
        assert_eq!(table.unmask(&masked), "ip 10.1.2.3 port 5432");
    }

    #[test]
    fn disabled_masker_is_identity() {
        let masker = Masker::disabled();
        assert!(!masker.is_enabled());
        let mut table = masker.table();
        assert_eq!(table.mask("10.0.0.1"), "10.0.0.1");
        assert_eq!(table.unmask("[IP_ADDR_0]"), "[IP_ADDR_0]");
    }

    #[test]
    fn literal_placeholder_in_input_survives_round_trip() {
        let mut table = Masker::default().table();
        let text = "old report said [IP_ADDR_0]; now 10.0.0.1 fails";
        let masked = table.mask(text);
        assert_eq!(masked, "old report said [IP_ADDR_0]; now [IP_ADDR_1] fails");
        assert_eq!(table.unmask(&masked), text);
    }

    #[test]
    fn reserved_tokens_from_a_later_field_are_skipped() {
        let mut table = Masker::default().table();
        let log = "db at 10.0.0.5 down";
        let code = "# see [IP_ADDR_0] in the runbook";
        table.reserve(log);
        table.reserve(code);
        let masked_log = table.mask(log);
        let masked_code = table.mask(code);
        assert_eq!(masked_log, "db at [IP_ADDR_1] down");
        assert_eq!(table.unmask(&masked_code), code);
        assert_eq!(table.unmask(&masked_log), log);
    }

    #[test]
    fn strip_placeholders_blanks_masked_values() {
        let mut table = Masker::default().table();
        let masked = table.mask("timeout from 10.0.0.9 (OPS-404)");
        assert_eq!(table.strip_placeholders(&masked), "timeout from   ( )");
    }

    #[test]
    fn empty_text_is_unchanged() {
        let mut table = Masker::default().table();
        assert_eq!(table.mask(""), "");
        assert_eq!(table.unmask(""), "");
    }
}
