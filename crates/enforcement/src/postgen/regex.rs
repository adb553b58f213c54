//! Regex hard gate: fast pattern matching over the raw response text.

use mandate_core::report::RegexResult;
use mandate_core::schema::Constraint;
use once_cell::sync::Lazy;
use regex::Regex;

/// Default forbidden patterns, always applied.
static DEFAULT_FORBIDDEN_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("ssn", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
        (
            "email",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
        ),
        ("credit_card", Regex::new(r"\b(?:\d{4}[- ]?){3}\d{4}\b").unwrap()),
        (
            "password_disclosure",
            Regex::new(r"(?i)\bpassword\s*[:=]\s*\S+").unwrap(),
        ),
        (
            "guarantee_promise",
            Regex::new(r"(?i)\bI\s+(?:guarantee|promise)\s+(?:you|that)\b").unwrap(),
        ),
        (
            "unconditional_commit",
            Regex::new(r"(?i)\bwe\s+will\s+definitely\b").unwrap(),
        ),
    ]
});

/// Synthesise patterns from `NOT(x)` constraints: a case-insensitive
/// word-boundary search for the forbidden token, with underscores matching
/// either whitespace or literal underscores. PII-flavoured constraints are
/// covered by the default table and synthesise nothing.
#[must_use]
pub fn compile_constraint_patterns(constraints: &[Constraint]) -> Vec<(String, Regex)> {
    let mut patterns = Vec::new();
    for c in constraints {
        if c.constraint.to_lowercase().contains("pii") {
            continue;
        }
        let Some(token) = c.forbidden_token() else {
            continue;
        };
        let body = token
            .split('_')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"[\s_]");
        let pattern = format!(r"(?i)\b{}\b", body);
        if let Ok(re) = Regex::new(&pattern) {
            patterns.push((format!("constraint_{}", c.policy_id), re));
        }
    }
    patterns
}

/// Run every pattern against the response. `passed` iff nothing matched;
/// score is 1 or 0 (this check is a hard gate, not a weighted input).
#[must_use]
pub fn run_regex_check(response_text: &str, constraints: &[Constraint]) -> RegexResult {
    let mut flags = Vec::new();
    let constraint_patterns = compile_constraint_patterns(constraints);
    let all = DEFAULT_FORBIDDEN_PATTERNS
        .iter()
        .map(|(name, re)| (*name, re))
        .chain(constraint_patterns.iter().map(|(name, re)| (name.as_str(), re)));
    for (name, re) in all {
        if let Some(m) = re.find(response_text) {
            flags.push(format!("{}: matched '{}' at pos {}", name, m.as_str(), m.start()));
        }
    }
    let passed = flags.is_empty();
    RegexResult { passed, flags, score: if passed { 1.0 } else { 0.0 } }
}
