//! Shared utility functions used across multiple modules.

use chrono::{DateTime, Duration, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Truncate text to at most 180 characters for log and error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

/// A write timestamp that sorts strictly after `previous`.
///
/// Guards the successor check in conflict resolution against coarse or
/// skewed clocks: a local write always lands later than what it replaces.
pub fn timestamp_after(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" artist-1 ".to_string())),
            Some("artist-1".to_string())
        );
    }

    #[test]
    fn compact_text_truncates_long_values() {
        let long = "x".repeat(400);
        assert_eq!(compact_text(&long).len(), 180);
    }

    #[test]
    fn timestamp_after_moves_past_future_values() {
        let future = Utc::now() + Duration::hours(1);
        assert!(timestamp_after(future) > future);
    }
}
