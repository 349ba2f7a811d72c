//! Utility modules for atlas-exporter.

mod time;

pub use time::{TimeParseError, elapsed_since, elapsed_since_at};
