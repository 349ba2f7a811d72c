//! Shared application state and the global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use atlas_exporter_core::client::{AtlasApi, MeasurementWindow};
use atlas_exporter_core::collector::Collector;
use atlas_exporter_core::metrics::ExporterMetrics;

/// Read-only configuration plus the process-wide exporter metrics.
///
/// Cloned into every request. Scrapes share nothing mutable besides the
/// counters inside `metrics`.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) client: Arc<dyn AtlasApi>,
    pub(crate) project_id: String,
    pub(crate) window: MeasurementWindow,
    pub(crate) metrics: ExporterMetrics,
    pub(crate) scrape_path: String,
    pub(crate) telemetry_path: String,
}

impl AppState {
    /// A fresh collector for one scrape.
    pub(crate) fn collector(&self) -> Collector {
        Collector::new(
            self.client.clone(),
            self.project_id.clone(),
            self.metrics.client_errors(),
        )
        .with_window(self.window.clone())
    }
}
