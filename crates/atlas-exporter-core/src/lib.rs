//! atlas-exporter-core - collection pipeline for the MongoDB Atlas exporter.
//!
//! Provides:
//! - `client` - Atlas API contract (`AtlasApi`), record types, and an
//!   in-memory `MockAtlas` for tests
//! - `collector` - per-scrape collection cycle (liveness probe, processes,
//!   databases, disks) with a per-cycle name cache
//! - `metrics` - the per-cycle `Snapshot` and the exporter's own metrics
//! - `util` - helper utilities
//!
//! With `http-client` feature (default):
//! - `client::AtlasClient` - digest-authenticated HTTP client for the Atlas API

pub mod client;
pub mod collector;
pub mod metrics;
pub mod util;

/// Crate version, shared by the binary for `--version` and `build_info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for every metric family the exporter emits.
pub const METRICS_NAMESPACE: &str = "mongodb_atlas";
