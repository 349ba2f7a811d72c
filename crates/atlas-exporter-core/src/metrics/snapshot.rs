//! Per-cycle metric snapshot.

use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Opts, Registry};

use crate::METRICS_NAMESPACE;
use crate::client::Process;

const PROCESS_SUBSYSTEM: &str = "process";

/// Gauge vectors filled by the process collector.
///
/// Setting the same label set twice overwrites the earlier value.
#[derive(Clone)]
pub struct ProcessMetrics {
    uptime: GaugeVec,
    info: GaugeVec,
    database: GaugeVec,
    disk: GaugeVec,
}

impl ProcessMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(METRICS_NAMESPACE)
                .subsystem(PROCESS_SUBSYSTEM)
        };

        Ok(Self {
            uptime: GaugeVec::new(
                opts(
                    "uptime",
                    "Uptime measurements for each member (host) of Atlas MongoDB process (cluster). https://docs.atlas.mongodb.com/reference/api/processes-get-all/",
                ),
                &["rs_nm", "member", "state", "version"],
            )?,
            info: GaugeVec::new(
                opts(
                    "info",
                    "Measurements of each member (host) of a Atlas MongoDB process (cluster). https://docs.atlas.mongodb.com/reference/api/process-measurements/",
                ),
                &["rs_nm", "member", "idx"],
            )?,
            database: GaugeVec::new(
                opts(
                    "database",
                    "Measurements of a database for an specific Atlas MongoDB process (cluster). https://docs.atlas.mongodb.com/reference/api/process-databases-measurements/",
                ),
                &["rs_nm", "member", "db", "idx"],
            )?,
            disk: GaugeVec::new(
                opts(
                    "disk",
                    "Measurements of a disk or partition for specific MongoDB process. https://docs.atlas.mongodb.com/reference/api/process-disks-measurements/",
                ),
                &["rs_nm", "member", "disk", "idx"],
            )?,
        })
    }

    /// Seconds since the process was created.
    pub fn set_uptime(&self, process: &Process, seconds: f64) {
        self.uptime
            .with_label_values(&[
                process.replica_set_name.as_str(),
                process.hostname.as_str(),
                process.type_name.as_str(),
                process.version.as_str(),
            ])
            .set(seconds);
    }

    /// Latest value of a process-level measurement.
    pub fn set_process(&self, process: &Process, measurement: &str, value: f64) {
        self.info
            .with_label_values(&[
                process.replica_set_name.as_str(),
                process.hostname.as_str(),
                measurement,
            ])
            .set(value);
    }

    /// Latest value of a database-level measurement.
    pub fn set_database(&self, process: &Process, database: &str, measurement: &str, value: f64) {
        self.database
            .with_label_values(&[
                process.replica_set_name.as_str(),
                process.hostname.as_str(),
                database,
                measurement,
            ])
            .set(value);
    }

    /// Latest value of a disk-level measurement.
    pub fn set_disk(&self, process: &Process, disk: &str, measurement: &str, value: f64) {
        self.disk
            .with_label_values(&[
                process.replica_set_name.as_str(),
                process.hostname.as_str(),
                disk,
                measurement,
            ])
            .set(value);
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.uptime.clone()))?;
        registry.register(Box::new(self.info.clone()))?;
        registry.register(Box::new(self.database.clone()))?;
        registry.register(Box::new(self.disk.clone()))?;
        Ok(())
    }
}

/// Everything one collection cycle produced.
///
/// `up` starts at 0 and is only raised by the collector once the
/// reachability probe has passed.
pub struct Snapshot {
    up: Gauge,
    process: ProcessMetrics,
}

impl Snapshot {
    pub fn new() -> Result<Self, prometheus::Error> {
        let up = Gauge::with_opts(
            Opts::new("up", "Whether the last query of the Atlas API was successful")
                .namespace(METRICS_NAMESPACE),
        )?;
        Ok(Self {
            up,
            process: ProcessMetrics::new()?,
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.set(if up { 1.0 } else { 0.0 });
    }

    pub fn up(&self) -> f64 {
        self.up.get()
    }

    pub fn process(&self) -> &ProcessMetrics {
        &self.process
    }

    /// Metric families in name order. Families without any sample are left
    /// out, so a failed probe yields only `up`.
    pub fn gather(&self) -> Result<Vec<MetricFamily>, prometheus::Error> {
        let registry = Registry::new();
        registry.register(Box::new(self.up.clone()))?;
        self.process.register(&registry)?;
        Ok(registry.gather())
    }

    /// Renders the snapshot in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        super::encode_text(&self.gather()?)
    }
}
