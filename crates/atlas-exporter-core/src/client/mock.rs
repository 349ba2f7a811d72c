//! In-memory mock Atlas API for testing the collector without network access.
//!
//! `MockAtlas` answers every [`AtlasApi`] call from canned data, can be told
//! to fail specific calls, and counts how often each call was made so tests
//! can assert on upstream traffic (e.g. the name cache fetching once).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    AtlasApi, ClientError, DataPoint, Database, Disk, Measurement, MeasurementWindow, Process,
    Project,
};

/// Upstream operation, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    ListProjects,
    ListProcesses,
    ProcessMeasurements,
    ProcessDatabases,
    DatabaseMeasurements,
    ProcessDisks,
    DiskMeasurements,
}

/// In-memory Atlas API.
///
/// Keys: per-process calls are keyed by hostname, per-database and per-disk
/// calls by `"<hostname>/<name>"`, project-level calls by `""`.
#[derive(Debug, Default)]
pub struct MockAtlas {
    projects: Vec<Project>,
    processes: Vec<Process>,
    process_measurements: HashMap<String, Vec<Measurement>>,
    databases: HashMap<String, Vec<Database>>,
    database_measurements: HashMap<String, Vec<Measurement>>,
    disks: HashMap<String, Vec<Disk>>,
    disk_measurements: HashMap<String, Vec<Measurement>>,
    failures: HashSet<(MockCall, String)>,
    calls: Mutex<HashMap<(MockCall, String), usize>>,
    windows: Mutex<Vec<MeasurementWindow>>,
}

impl MockAtlas {
    /// Creates an empty mock: no projects, no processes.
    pub fn new() -> Self {
        Self::default()
    }

    /// A project with one three-member replica set. Only the primary has
    /// databases (`admin`, `local`, `shop`) and disks (`data`).
    pub fn typical_project() -> Self {
        let member = |host: &str, type_name: &str| {
            process("rs0", host, 27017, type_name, "6.0.14", "2024-01-01T00:00:00Z")
        };
        Self::new()
            .with_project("5e2211c17a3e5a48f5497de3", "production")
            .with_process(member("rs0-0.example.net", "REPLICA_PRIMARY"))
            .with_process(member("rs0-1.example.net", "REPLICA_SECONDARY"))
            .with_process(member("rs0-2.example.net", "REPLICA_SECONDARY"))
            .with_process_measurements(
                "rs0-0.example.net",
                vec![
                    measurement("CONNECTIONS", &[Some(42.0)]),
                    measurement("OPCOUNTER_QUERY", &[Some(7.5)]),
                ],
            )
            .with_process_measurements(
                "rs0-1.example.net",
                vec![measurement("CONNECTIONS", &[Some(3.0)])],
            )
            .with_databases("rs0-0.example.net", &["admin", "local", "shop"])
            .with_database_measurements(
                "rs0-0.example.net",
                "admin",
                vec![measurement("DATABASE_DATA_SIZE", &[Some(1024.0)])],
            )
            .with_database_measurements(
                "rs0-0.example.net",
                "shop",
                vec![measurement("DATABASE_DATA_SIZE", &[Some(4096.0)])],
            )
            .with_disks("rs0-0.example.net", &["data"])
            .with_disk_measurements(
                "rs0-0.example.net",
                "data",
                vec![measurement("DISK_PARTITION_SPACE_FREE", &[Some(1.5e10)])],
            )
    }

    pub fn with_project(mut self, id: &str, name: &str) -> Self {
        self.projects.push(Project {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_process(mut self, process: Process) -> Self {
        self.processes.push(process);
        self
    }

    pub fn with_process_measurements(mut self, host: &str, measurements: Vec<Measurement>) -> Self {
        self.process_measurements
            .insert(host.to_string(), measurements);
        self
    }

    pub fn with_databases(mut self, host: &str, names: &[&str]) -> Self {
        let dbs = names
            .iter()
            .map(|n| Database {
                database_name: n.to_string(),
            })
            .collect();
        self.databases.insert(host.to_string(), dbs);
        self
    }

    pub fn with_database_measurements(
        mut self,
        host: &str,
        database: &str,
        measurements: Vec<Measurement>,
    ) -> Self {
        self.database_measurements
            .insert(resource_key(host, database), measurements);
        self
    }

    pub fn with_disks(mut self, host: &str, names: &[&str]) -> Self {
        let disks = names
            .iter()
            .map(|n| Disk {
                partition_name: n.to_string(),
            })
            .collect();
        self.disks.insert(host.to_string(), disks);
        self
    }

    pub fn with_disk_measurements(
        mut self,
        host: &str,
        disk: &str,
        measurements: Vec<Measurement>,
    ) -> Self {
        self.disk_measurements
            .insert(resource_key(host, disk), measurements);
        self
    }

    /// Makes `call` fail for `key` (see the type docs for key format).
    pub fn failing(mut self, call: MockCall, key: &str) -> Self {
        self.failures.insert((call, key.to_string()));
        self
    }

    /// Total number of times `call` was made, across all keys.
    pub fn calls(&self, call: MockCall) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((c, _), _)| *c == call)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Number of times `call` was made for `key`.
    pub fn calls_for(&self, call: MockCall, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(call, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Every measurement window requested so far, in call order.
    pub fn windows(&self) -> Vec<MeasurementWindow> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: MockCall, key: String) -> Result<(), ClientError> {
        let failing = self.failures.contains(&(call, key.clone()));
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        *calls.entry((call, key.clone())).or_insert(0) += 1;
        drop(calls);
        if failing {
            return Err(ClientError::Transport(format!(
                "mock failure: {:?} {}",
                call, key
            )));
        }
        Ok(())
    }

    fn record_window(&self, window: &MeasurementWindow) {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).push(window.clone());
    }
}

#[async_trait]
impl AtlasApi for MockAtlas {
    async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        self.record(MockCall::ListProjects, String::new())?;
        Ok(self.projects.clone())
    }

    async fn list_processes(&self, _project: &str) -> Result<Vec<Process>, ClientError> {
        self.record(MockCall::ListProcesses, String::new())?;
        Ok(self.processes.clone())
    }

    async fn list_process_measurements(
        &self,
        _project: &str,
        host: &str,
        _port: u16,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError> {
        self.record(MockCall::ProcessMeasurements, host.to_string())?;
        self.record_window(window);
        Ok(self
            .process_measurements
            .get(host)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_process_databases(
        &self,
        _project: &str,
        host: &str,
        _port: u16,
    ) -> Result<Vec<Database>, ClientError> {
        self.record(MockCall::ProcessDatabases, host.to_string())?;
        Ok(self.databases.get(host).cloned().unwrap_or_default())
    }

    async fn list_database_measurements(
        &self,
        _project: &str,
        host: &str,
        _port: u16,
        database: &str,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError> {
        let key = resource_key(host, database);
        self.record(MockCall::DatabaseMeasurements, key.clone())?;
        self.record_window(window);
        Ok(self
            .database_measurements
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_process_disks(
        &self,
        _project: &str,
        host: &str,
        _port: u16,
    ) -> Result<Vec<Disk>, ClientError> {
        self.record(MockCall::ProcessDisks, host.to_string())?;
        Ok(self.disks.get(host).cloned().unwrap_or_default())
    }

    async fn list_disk_measurements(
        &self,
        _project: &str,
        host: &str,
        _port: u16,
        disk: &str,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError> {
        let key = resource_key(host, disk);
        self.record(MockCall::DiskMeasurements, key.clone())?;
        self.record_window(window);
        Ok(self
            .disk_measurements
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

fn resource_key(host: &str, name: &str) -> String {
    format!("{}/{}", host, name)
}

/// Builds a [`Process`] record.
pub fn process(
    replica_set: &str,
    hostname: &str,
    port: u16,
    type_name: &str,
    version: &str,
    created: &str,
) -> Process {
    Process {
        id: format!("{}:{}", hostname, port),
        replica_set_name: replica_set.to_string(),
        hostname: hostname.to_string(),
        port,
        type_name: type_name.to_string(),
        version: version.to_string(),
        created: created.to_string(),
        user_alias: None,
    }
}

/// Builds a [`Measurement`] with one data point per entry of `values`.
pub fn measurement(name: &str, values: &[Option<f64>]) -> Measurement {
    Measurement {
        name: name.to_string(),
        units: "SCALAR".to_string(),
        data_points: values
            .iter()
            .map(|v| DataPoint {
                timestamp: String::new(),
                value: *v,
            })
            .collect(),
    }
}
