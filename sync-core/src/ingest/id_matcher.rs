//! Participant fingerprints
//!
//! A conversation is identified by the set of people in it, not by how
//! their numbers happened to be formatted. Each participant is reduced to a
//! fixed-width fingerprint, the fingerprints are sorted, and the result is
//! joined into the conversation's `id_matcher`.

use crate::error::{Result, SyncError};

/// Numbers shorter than this are carrier short codes and kept whole
const SHORT_CODE_MAX_DIGITS: usize = 6;

/// Significant trailing digits; drops `+1`, `001`, trunk `0` and the like
const SIGNIFICANT_DIGITS: usize = 10;

/// Split a platform participant string (`"a, b; c"`) into trimmed entries
pub fn split_participants(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fingerprint of a single participant, `None` when it is blank
pub fn normalize_participant(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Alphanumeric senders and email addresses are opaque identifiers
    if trimmed.contains('@') {
        return Some(trimmed.to_lowercase());
    }
    if trimmed.chars().any(char::is_alphabetic) {
        return Some(trimmed.to_string());
    }

    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Some(trimmed.to_string());
    }
    if digits.len() <= SHORT_CODE_MAX_DIGITS {
        return Some(digits);
    }

    let tail = &digits[digits.len().saturating_sub(SIGNIFICANT_DIGITS)..];
    Some(format!("{:0>width$}", tail, width = SIGNIFICANT_DIGITS))
}

/// Order-independent fingerprint of a participant set
pub fn id_matcher<S: AsRef<str>>(participants: &[S]) -> Result<String> {
    let mut prints: Vec<String> = participants
        .iter()
        .filter_map(|p| normalize_participant(p.as_ref()))
        .collect();

    if prints.is_empty() {
        return Err(SyncError::InvalidInput(
            "a conversation needs at least one participant".into(),
        ));
    }

    prints.sort();
    prints.dedup();
    Ok(prints.join(","))
}
