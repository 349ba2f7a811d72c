use std::sync::Arc;

use prometheus::IntCounter;
use tracing::{debug, error, warn};

use super::process::ProcessCollector;
use crate::client::{AtlasApi, MeasurementWindow};
use crate::metrics::Snapshot;

/// Drives one collection cycle against the Atlas API.
///
/// Each call to [`Collector::collect`] starts from an empty [`Snapshot`], so
/// samples from earlier cycles never leak into a later scrape.
#[derive(Clone)]
pub struct Collector {
    client: Arc<dyn AtlasApi>,
    project_id: String,
    window: MeasurementWindow,
    client_errors: IntCounter,
}

impl Collector {
    pub fn new(client: Arc<dyn AtlasApi>, project_id: impl Into<String>, client_errors: IntCounter) -> Self {
        Self {
            client,
            project_id: project_id.into(),
            window: MeasurementWindow::default(),
            client_errors,
        }
    }

    /// Overrides the measurement granularity and period.
    pub fn with_window(mut self, window: MeasurementWindow) -> Self {
        self.window = window;
        self
    }

    /// Runs one cycle.
    ///
    /// `up` is 1 once the project listing succeeded, regardless of what the
    /// process stages return. Upstream failures are counted and logged, never
    /// returned; an `Err` only means the snapshot itself could not be built.
    pub async fn collect(&self) -> Result<Snapshot, prometheus::Error> {
        let snapshot = Snapshot::new()?;

        let projects = match self.client.list_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                error!(error = %e, "unable to reach the Atlas API");
                self.client_errors.inc();
                return Ok(snapshot);
            }
        };

        debug!(count = projects.len(), "projects visible to the API key");
        if !projects.iter().any(|p| p.id == self.project_id) {
            warn!(project = %self.project_id, "configured project is not visible to the API key");
        }

        let stats = ProcessCollector::new(
            self.client.as_ref(),
            &self.project_id,
            &self.window,
            &self.client_errors,
        )
        .collect(snapshot.process())
        .await;

        debug!(
            project = %self.project_id,
            processes = stats.processes,
            primaries = stats.primaries,
            samples = stats.samples,
            errors = stats.errors,
            "collection finished"
        );

        snapshot.set_up(true);
        Ok(snapshot)
    }
}
