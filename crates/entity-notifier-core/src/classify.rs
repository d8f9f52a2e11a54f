//! Permanent vs retryable failure classification.
//!
//! A failure is permanent iff its transport status is in `400..500`:
//! retrying against an unchanging client error cannot succeed. Everything
//! else (network errors, 5xx, timeouts) is retryable.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Permanent,
}

impl FailureClass {
    /// Label value for the `retryable` metric label.
    pub fn retryable_label(self) -> &'static str {
        match self {
            FailureClass::Retryable => "true",
            FailureClass::Permanent => "false",
        }
    }
}

/// Classify from a structured status alone.
pub fn classify_status(status: u16) -> FailureClass {
    if (400..500).contains(&status) {
        FailureClass::Permanent
    } else {
        FailureClass::Retryable
    }
}

fn textual_status() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"status: (\d{3})").ok())
        .as_ref()
}

/// Extract a `status: NNN` marker from an error message.
pub fn status_from_message(message: &str) -> Option<u16> {
    textual_status()?
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Classify a failure.
///
/// The structured status wins. Failures without one fall back to the
/// `status: NNN` marker that transports embed in their messages.
pub fn classify(status: Option<u16>, message: &str) -> FailureClass {
    match status.or_else(|| status_from_message(message)) {
        Some(status) => classify_status(status),
        None => FailureClass::Retryable,
    }
}
