//! PII scrubbing for anything that leaves the process in logs.

use std::sync::OnceLock;

use regex::Regex;

pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";
pub const REDACTED_SSN: &str = "[REDACTED_SSN]";
pub const REDACTED_CARD: &str = "[REDACTED_CARD]";
pub const REDACTED_PHONE: &str = "[REDACTED_PHONE]";
const REDACTED_ALL: &str = "[REDACTED]";

// Order matters: SSN and card runs must be consumed before the looser phone pattern.
const PATTERNS: [(&str, &str); 4] = [
    (r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}", REDACTED_EMAIL),
    (r"\b\d{3}-\d{2}-\d{4}\b", REDACTED_SSN),
    (r"\b\d(?:[ -]?\d){12,18}\b", REDACTED_CARD),
    (r"(?:\+\d{1,3}[ .-]?)?(?:\(\d{3}\)\s?|\b\d{3}[ .-]?)\d{3}[ .-]?\d{4}\b", REDACTED_PHONE),
];

static COMPILED: OnceLock<Option<Vec<(Regex, &'static str)>>> = OnceLock::new();

fn compiled() -> Option<&'static [(Regex, &'static str)]> {
    COMPILED
        .get_or_init(|| {
            PATTERNS
                .iter()
                .map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, *replacement)))
                .collect::<Option<Vec<_>>>()
        })
        .as_deref()
}

/// Replaces emails, SSN-shaped runs, card-shaped runs and phone numbers.
/// If the patterns are unavailable nothing of the input is kept.
pub fn redact_pii(text: &str) -> String {
    let Some(patterns) = compiled() else {
        return REDACTED_ALL.to_string();
    };
    patterns.iter().fold(text.to_string(), |current, (pattern, replacement)| {
        pattern.replace_all(&current, *replacement).into_owned()
    })
}
