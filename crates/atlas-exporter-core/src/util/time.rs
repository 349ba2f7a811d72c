//! Elapsed-time helper for Atlas `created` timestamps.
//!
//! Atlas reports process creation as an RFC 3339 string
//! (`2024-03-01T10:15:00Z`). Parsing is strict: anything else is an error,
//! never a guess.

use chrono::{DateTime, Utc};

/// Error type for timestamp parsing failures.
#[derive(Debug, Clone)]
pub struct TimeParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse time '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for TimeParseError {}

/// Returns seconds elapsed between `created` and now.
///
/// # Examples
///
/// ```
/// use atlas_exporter_core::util::elapsed_since;
///
/// let secs = elapsed_since("2020-01-01T00:00:00Z").unwrap();
/// assert!(secs > 0.0);
/// assert!(elapsed_since("yesterday").is_err());
/// ```
pub fn elapsed_since(created: &str) -> Result<f64, TimeParseError> {
    elapsed_since_at(created, Utc::now())
}

/// Same as [`elapsed_since`] with an explicit reference time.
///
/// A `created` timestamp later than `now` yields a negative value.
pub fn elapsed_since_at(created: &str, now: DateTime<Utc>) -> Result<f64, TimeParseError> {
    let created = DateTime::parse_from_rfc3339(created.trim()).map_err(|e| TimeParseError {
        input: created.to_string(),
        message: e.to_string(),
    })?;

    let diff = now.signed_duration_since(created.with_timezone(&Utc));
    Ok(diff.num_milliseconds() as f64 / 1000.0)
}
