//! Process-level collection: uptime, process, database and disk
//! measurements.
//!
//! Stages run in order and share the process list returned by the uptime
//! stage:
//!
//! 1. uptime - lists processes, one `uptime` sample per process
//! 2. process measurements - every process
//! 3. database measurements - primaries only, skip-listed databases dropped
//! 4. disk measurements - primaries only, every partition
//!
//! A failed process listing ends the cycle's process stages. Any other failed
//! call only skips the host, database or disk it was made for.

use prometheus::IntCounter;
use tracing::{debug, error, trace, warn};

use super::cache::{NameCache, NameKind};
use crate::client::{AtlasApi, ClientError, Measurement, MeasurementWindow, Process};
use crate::metrics::ProcessMetrics;
use crate::util::elapsed_since;

/// Counters describing one run of the process stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Processes returned by the process listing.
    pub processes: usize,
    /// Primaries among them (stages 3 and 4 only visit these).
    pub primaries: usize,
    /// Samples written, uptime included.
    pub samples: usize,
    /// Failed upstream calls.
    pub errors: usize,
}

/// Where a measurement list came from.
#[derive(Debug, Clone, Copy)]
enum Source<'a> {
    Process,
    Database(&'a str),
    Disk(&'a str),
}

/// Runs the four process stages against one project.
pub struct ProcessCollector<'a> {
    client: &'a dyn AtlasApi,
    project_id: &'a str,
    window: &'a MeasurementWindow,
    client_errors: &'a IntCounter,
}

impl<'a> ProcessCollector<'a> {
    pub fn new(
        client: &'a dyn AtlasApi,
        project_id: &'a str,
        window: &'a MeasurementWindow,
        client_errors: &'a IntCounter,
    ) -> Self {
        Self {
            client,
            project_id,
            window,
            client_errors,
        }
    }

    /// Runs all stages, writing samples into `metrics`.
    pub async fn collect(&self, metrics: &ProcessMetrics) -> CollectStats {
        let mut stats = CollectStats::default();

        let processes = match self.collect_uptime(metrics, &mut stats).await {
            Ok(processes) => processes,
            Err(e) => {
                error!(error = %e, "failed to list processes");
                self.client_errors.inc();
                stats.errors += 1;
                return stats;
            }
        };

        let mut names = NameCache::new();
        self.collect_process_measurements(&processes, metrics, &mut stats)
            .await;
        self.collect_database_measurements(&processes, &mut names, metrics, &mut stats)
            .await;
        self.collect_disk_measurements(&processes, &mut names, metrics, &mut stats)
            .await;

        stats
    }

    /// Stage 1. Lists processes and records their uptime.
    ///
    /// Returns the process list for the later stages. Processes whose
    /// creation time does not parse are still returned, only their uptime is
    /// missing; each of them counts as a client error.
    pub async fn collect_uptime(
        &self,
        metrics: &ProcessMetrics,
        stats: &mut CollectStats,
    ) -> Result<Vec<Process>, ClientError> {
        let processes = self.client.list_processes(self.project_id).await?;
        stats.processes = processes.len();
        stats.primaries = processes.iter().filter(|p| p.is_primary()).count();

        for process in &processes {
            match elapsed_since(&process.created) {
                Ok(seconds) => {
                    metrics.set_uptime(process, seconds);
                    stats.samples += 1;
                }
                Err(e) => {
                    error!(hostname = %process.hostname, error = %e, "unable to convert created date");
                    self.record_error(stats);
                }
            }
        }

        Ok(processes)
    }

    /// Stage 2. Process-level measurements for every process.
    pub async fn collect_process_measurements(
        &self,
        processes: &[Process],
        metrics: &ProcessMetrics,
        stats: &mut CollectStats,
    ) {
        for process in processes {
            let measurements = match self
                .client
                .list_process_measurements(
                    self.project_id,
                    &process.hostname,
                    process.port,
                    self.window,
                )
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    error!(hostname = %process.hostname, error = %e, "unable to retrieve measurements");
                    self.record_error(stats);
                    continue;
                }
            };

            stats.samples += record(metrics, process, Source::Process, &measurements);
        }
    }

    /// Stage 3. Database measurements for every non-internal database of
    /// every primary.
    pub async fn collect_database_measurements(
        &self,
        processes: &[Process],
        names: &mut NameCache,
        metrics: &ProcessMetrics,
        stats: &mut CollectStats,
    ) {
        for process in processes.iter().filter(|p| p.is_primary()) {
            let databases = match names
                .resolve(NameKind::Database, self.client, self.project_id, process)
                .await
            {
                Ok(dbs) => dbs,
                Err(e) => {
                    error!(hostname = %process.hostname, error = %e, "unable to retrieve databases");
                    self.record_error(stats);
                    continue;
                }
            };

            for database in databases {
                let measurements = match self
                    .client
                    .list_database_measurements(
                        self.project_id,
                        &process.hostname,
                        process.port,
                        database,
                        self.window,
                    )
                    .await
                {
                    Ok(m) => m,
                    Err(e) => {
                        error!(
                            hostname = %process.hostname,
                            database = %database,
                            error = %e,
                            "unable to retrieve database measurements"
                        );
                        self.record_error(stats);
                        continue;
                    }
                };

                stats.samples += record(metrics, process, Source::Database(database), &measurements);
            }
        }
    }

    /// Stage 4. Disk measurements for every partition of every primary.
    pub async fn collect_disk_measurements(
        &self,
        processes: &[Process],
        names: &mut NameCache,
        metrics: &ProcessMetrics,
        stats: &mut CollectStats,
    ) {
        for process in processes.iter().filter(|p| p.is_primary()) {
            let disks = match names
                .resolve(NameKind::Disk, self.client, self.project_id, process)
                .await
            {
                Ok(disks) => disks,
                Err(e) => {
                    error!(hostname = %process.hostname, error = %e, "unable to retrieve disks");
                    self.record_error(stats);
                    continue;
                }
            };

            for disk in disks {
                let measurements = match self
                    .client
                    .list_disk_measurements(
                        self.project_id,
                        &process.hostname,
                        process.port,
                        disk,
                        self.window,
                    )
                    .await
                {
                    Ok(m) => m,
                    Err(e) => {
                        error!(
                            hostname = %process.hostname,
                            disk = %disk,
                            error = %e,
                            "unable to retrieve disk measurements"
                        );
                        self.record_error(stats);
                        continue;
                    }
                };

                stats.samples += record(metrics, process, Source::Disk(disk), &measurements);
            }
        }
    }

    fn record_error(&self, stats: &mut CollectStats) {
        self.client_errors.inc();
        stats.errors += 1;
    }
}

/// Writes the first data point of each measurement. Returns the number of
/// samples written.
fn record(
    metrics: &ProcessMetrics,
    process: &Process,
    source: Source<'_>,
    measurements: &[Measurement],
) -> usize {
    let mut written = 0;

    for measurement in measurements {
        if measurement.data_points.is_empty() {
            match source {
                Source::Process => warn!(
                    hostname = %process.hostname,
                    measurement = %measurement.name,
                    "no datapoint available for process"
                ),
                Source::Database(db) => warn!(
                    hostname = %process.hostname,
                    database = db,
                    measurement = %measurement.name,
                    "no datapoint available for database"
                ),
                Source::Disk(disk) => warn!(
                    hostname = %process.hostname,
                    disk,
                    measurement = %measurement.name,
                    "no datapoint available for disk"
                ),
            }
            continue;
        }

        let Some(value) = measurement.first_value() else {
            trace!(hostname = %process.hostname, measurement = %measurement.name, "first datapoint has no value");
            continue;
        };

        match source {
            Source::Process => metrics.set_process(process, &measurement.name, value),
            Source::Database(db) => metrics.set_database(process, db, &measurement.name, value),
            Source::Disk(disk) => metrics.set_disk(process, disk, &measurement.name, value),
        }
        written += 1;
    }

    debug!(hostname = %process.hostname, ?source, written, "measurements recorded");
    written
}
