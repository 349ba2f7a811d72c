//! Prometheus metric families produced by the exporter.
//!
//! Two groups with different lifetimes:
//!
//! - [`Snapshot`] - built fresh for every collection cycle, holds the
//!   `up` gauge and the per-process gauge vectors, and is discarded after
//!   it has been rendered into the scrape response.
//! - [`ExporterMetrics`] - lives for the whole process and describes the
//!   exporter itself (collection duration, error counters, build info).
//!
//! The `prometheus` crate has no summary type, so [`DurationSummary`]
//! implements one as a custom collector.

mod exporter;
mod snapshot;
mod summary;

pub use exporter::ExporterMetrics;
pub use snapshot::{ProcessMetrics, Snapshot};
pub use summary::DurationSummary;

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};

/// Content type of the text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders metric families in the Prometheus text format.
pub fn encode_text(families: &[MetricFamily]) -> Result<String, prometheus::Error> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(families, &mut buf)?;
    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
