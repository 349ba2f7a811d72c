//! Metrics about the exporter itself.

use std::time::Duration;

use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry};

use super::DurationSummary;
use crate::{METRICS_NAMESPACE, VERSION};

/// Histogram buckets for collection duration, in seconds.
const DURATION_BUCKETS: &[f64] = &[1.0, 2.5, 5.0, 8.0, 10.0, 15.0];

/// Quantile objectives for the collection duration summary.
const DURATION_OBJECTIVES: &[f64] = &[0.1, 0.5, 0.9, 0.99];

/// Sliding window of the collection duration summary.
const DURATION_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Process-wide exporter metrics, served on the telemetry path.
///
/// Cloning is cheap; clones share the underlying counters.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    duration: Histogram,
    duration_summary: DurationSummary,
    request_errors: IntCounter,
    client_errors: IntCounter,
}

impl ExporterMetrics {
    /// Creates and registers all exporter metrics. `revision` labels
    /// `build_info` alongside the crate version.
    pub fn new(revision: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let build_info = Gauge::with_opts(
            Opts::new(
                "build_info",
                format!(
                    "A metric with a constant '1' value labeled by version and revision from which {} was built.",
                    METRICS_NAMESPACE
                ),
            )
            .namespace(METRICS_NAMESPACE)
            .const_label("version", VERSION)
            .const_label("revision", revision),
        )?;
        build_info.set(1.0);

        let duration_summary = DurationSummary::new(
            Opts::new(
                "collection_duration_quantiles_seconds",
                "Summary duration of collections by the MongoDB Atlas Exporter",
            )
            .namespace(METRICS_NAMESPACE),
            DURATION_OBJECTIVES,
            DURATION_MAX_AGE,
        )?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "collection_duration_seconds",
                "Duration of collections by the MongoDB Atlas Exporter",
            )
            .namespace(METRICS_NAMESPACE)
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;

        let request_errors = IntCounter::with_opts(
            Opts::new(
                "request_errors_total",
                "Errors in requests to the MongoDB Atlas Exporter",
            )
            .namespace(METRICS_NAMESPACE),
        )?;

        let client_errors = IntCounter::with_opts(
            Opts::new("client_errors_total", "Errors with the MongoDB Atlas client")
                .namespace(METRICS_NAMESPACE),
        )?;

        registry.register(Box::new(build_info))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(duration_summary.clone()))?;
        registry.register(Box::new(request_errors.clone()))?;
        registry.register(Box::new(client_errors.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            duration,
            duration_summary,
            request_errors,
            client_errors,
        })
    }

    /// Records one collection cycle's wall time in both the histogram and
    /// the summary.
    pub fn observe_duration(&self, seconds: f64) {
        self.duration.observe(seconds);
        self.duration_summary.observe(seconds);
    }

    /// Handle to the client error counter, shared with collectors.
    pub fn client_errors(&self) -> IntCounter {
        self.client_errors.clone()
    }

    pub fn inc_request_errors(&self) {
        self.request_errors.inc();
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Renders the exporter metrics in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        super::encode_text(&self.gather())
    }
}
