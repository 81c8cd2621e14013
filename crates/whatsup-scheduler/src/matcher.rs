//! Content rules — evaluate a watch's patterns against a fetched body.

use regex::Regex;
use whatsup_core::types::Pattern;

/// Check that a pattern compiles. The error text is meant for the user.
pub fn validate(regex: &str) -> Result<(), String> {
    Regex::new(regex).map(|_| ()).map_err(|e| e.to_string())
}

/// Whether `pattern` holds for `body`.
///
/// A stored regex that no longer compiles never matches.
pub fn holds(pattern: &Pattern, body: &str) -> bool {
    let matched = match Regex::new(&pattern.regex) {
        Ok(re) => re.is_match(body),
        Err(e) => {
            tracing::warn!("⚠️ Stored pattern {} does not compile: {e}", pattern.id);
            false
        }
    };
    matched == pattern.positive
}

/// First pattern, in the given order, that fails against `body`.
pub fn first_failure<'a>(patterns: &'a [Pattern], body: &str) -> Option<&'a Pattern> {
    patterns.iter().find(|p| !holds(p, body))
}
