//! MongoDB Atlas API contract.
//!
//! The collector depends only on the [`AtlasApi`] trait, so a cycle can run
//! against the real HTTP client or against [`MockAtlas`] in tests:
//!
//! ```text
//!            ┌──────────────┐
//!            │  Collector   │
//!            └──────┬───────┘
//!                   │
//!            ┌──────▼───────┐
//!            │   AtlasApi   │ (trait)
//!            └──────┬───────┘
//!          ┌────────┴────────┐
//!   ┌──────▼──────┐   ┌──────▼──────┐
//!   │ AtlasClient │   │  MockAtlas  │
//!   │ (HTTP)      │   │ (Testing)   │
//!   └─────────────┘   └─────────────┘
//! ```

#[cfg(feature = "http-client")]
mod http;
pub mod mock;

use async_trait::async_trait;
use serde::Deserialize;

#[cfg(feature = "http-client")]
pub use http::{AtlasClient, DEFAULT_BASE_URL};
pub use mock::{MockAtlas, MockCall};

/// `typeName` reported for the primary member of a replica set.
pub const REPLICA_PRIMARY: &str = "REPLICA_PRIMARY";

/// Default sampling interval requested from measurement endpoints.
pub const DEFAULT_GRANULARITY: &str = "PT5M";

/// Default lookback window requested from measurement endpoints.
pub const DEFAULT_PERIOD: &str = "PT1H";

/// Error type for Atlas API calls.
#[derive(Debug)]
pub enum ClientError {
    /// Request could not be sent or the response body could not be read.
    Transport(String),
    /// Server answered with a non-success status.
    Status { status: u16, detail: String },
    /// Response body did not match the expected shape.
    Decode(String),
    /// Digest challenge missing or unusable.
    Auth(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Transport(msg) => write!(f, "Atlas transport error: {}", msg),
            ClientError::Status { status, detail } if detail.is_empty() => {
                write!(f, "Atlas API returned HTTP {}", status)
            }
            ClientError::Status { status, detail } => {
                write!(f, "Atlas API returned HTTP {}: {}", status, detail)
            }
            ClientError::Decode(msg) => write!(f, "Atlas response decode error: {}", msg),
            ClientError::Auth(msg) => write!(f, "Atlas authentication error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

/// Granularity and period sent to the measurement endpoints.
///
/// Both are ISO 8601 durations as Atlas expects them (`PT5M`, `PT1H`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementWindow {
    pub granularity: String,
    pub period: String,
}

impl MeasurementWindow {
    pub fn new(granularity: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            granularity: granularity.into(),
            period: period.into(),
        }
    }
}

impl Default for MeasurementWindow {
    fn default() -> Self {
        Self::new(DEFAULT_GRANULARITY, DEFAULT_PERIOD)
    }
}

/// Atlas project (group).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// One `mongod`/`mongos` endpoint of a project.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub replica_set_name: String,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub user_alias: Option<String>,
}

impl Process {
    /// Returns true if this process is the primary of its replica set.
    pub fn is_primary(&self) -> bool {
        self.type_name == REPLICA_PRIMARY
    }
}

/// A named measurement series.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub name: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub data_points: Vec<DataPoint>,
}

impl Measurement {
    /// Value of the first data point, if there is one and it carries a sample.
    pub fn first_value(&self) -> Option<f64> {
        self.data_points.first().and_then(|p| p.value)
    }
}

/// One observation of a measurement. `value` is `None` when Atlas has no
/// sample for the interval, which is not the same as zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub value: Option<f64>,
}

/// Database reported by a process.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub database_name: String,
}

/// Disk partition reported by a process.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub partition_name: String,
}

/// Operations the collector needs from the Atlas API.
///
/// Every call is scoped to a project id passed explicitly; processes are
/// addressed by `host` and `port`.
#[async_trait]
pub trait AtlasApi: Send + Sync {
    /// Lists every project visible to the API key. Used as reachability probe.
    async fn list_projects(&self) -> Result<Vec<Project>, ClientError>;

    async fn list_processes(&self, project: &str) -> Result<Vec<Process>, ClientError>;

    async fn list_process_measurements(
        &self,
        project: &str,
        host: &str,
        port: u16,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError>;

    async fn list_process_databases(
        &self,
        project: &str,
        host: &str,
        port: u16,
    ) -> Result<Vec<Database>, ClientError>;

    async fn list_database_measurements(
        &self,
        project: &str,
        host: &str,
        port: u16,
        database: &str,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError>;

    async fn list_process_disks(
        &self,
        project: &str,
        host: &str,
        port: u16,
    ) -> Result<Vec<Disk>, ClientError>;

    async fn list_disk_measurements(
        &self,
        project: &str,
        host: &str,
        port: u16,
        disk: &str,
        window: &MeasurementWindow,
    ) -> Result<Vec<Measurement>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_deserialize() {
        let json = r#"{
            "created": "2024-03-01T10:00:00Z",
            "groupId": "5e2211c17a3e5a48f5497de3",
            "hostname": "cluster0-shard-00-00.abcde.mongodb.net",
            "id": "cluster0-shard-00-00.abcde.mongodb.net:27017",
            "lastPing": "2024-03-02T10:00:00Z",
            "port": 27017,
            "replicaSetName": "atlas-xyz-shard-0",
            "typeName": "REPLICA_PRIMARY",
            "userAlias": "cluster0-shard-00-00.abcde.mongodb.net",
            "version": "6.0.14"
        }"#;
        let p: Process = serde_json::from_str(json).unwrap();
        assert_eq!(p.hostname, "cluster0-shard-00-00.abcde.mongodb.net");
        assert_eq!(p.port, 27017);
        assert_eq!(p.replica_set_name, "atlas-xyz-shard-0");
        assert_eq!(p.version, "6.0.14");
        assert!(p.is_primary());
    }

    #[test]
    fn test_measurement_null_value() {
        let json = r#"{
            "name": "CONNECTIONS",
            "units": "SCALAR",
            "dataPoints": [
                {"timestamp": "2024-03-01T10:00:00Z", "value": null},
                {"timestamp": "2024-03-01T10:05:00Z", "value": 12.0}
            ]
        }"#;
        let m: Measurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.data_points.len(), 2);
        assert_eq!(m.data_points[0].value, None);
        // First point decides, even when a later one has a value.
        assert_eq!(m.first_value(), None);
    }

    #[test]
    fn test_measurement_zero_is_a_value() {
        let json = r#"{"name": "OPCOUNTER_CMD", "dataPoints": [{"value": 0}]}"#;
        let m: Measurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.first_value(), Some(0.0));
    }

    #[test]
    fn test_measurement_no_points() {
        let json = r#"{"name": "DISK_PARTITION_IOPS_READ", "units": "SCALAR_PER_SECOND"}"#;
        let m: Measurement = serde_json::from_str(json).unwrap();
        assert!(m.data_points.is_empty());
        assert_eq!(m.first_value(), None);
    }

    #[test]
    fn test_secondary_is_not_primary() {
        let p = Process {
            type_name: "REPLICA_SECONDARY".to_string(),
            ..Default::default()
        };
        assert!(!p.is_primary());
    }

    #[test]
    fn test_client_error_display() {
        let e = ClientError::Status {
            status: 401,
            detail: String::new(),
        };
        assert_eq!(e.to_string(), "Atlas API returned HTTP 401");
        let e = ClientError::Status {
            status: 404,
            detail: "GROUP_NOT_FOUND".to_string(),
        };
        assert_eq!(e.to_string(), "Atlas API returned HTTP 404: GROUP_NOT_FOUND");
    }

    #[test]
    fn test_default_window() {
        let w = MeasurementWindow::default();
        assert_eq!(w.granularity, "PT5M");
        assert_eq!(w.period, "PT1H");
    }
}
