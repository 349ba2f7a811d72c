//! Per-cycle cache of database and disk names.
//!
//! Stage 3 and stage 4 of a cycle both iterate primaries; several processes
//! can report the same hostname. Names are fetched once per host and kind,
//! and the cache is dropped with the cycle so new databases show up on the
//! next scrape.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tracing::{debug, trace};

use crate::client::{AtlasApi, ClientError, Process};

/// Databases Atlas creates internally; never reported.
pub const SKIP_DATABASES: &[&str] = &["local", "config", "test"];

/// What a cached name list enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Database,
    Disk,
}

impl std::fmt::Display for NameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameKind::Database => write!(f, "database"),
            NameKind::Disk => write!(f, "disk"),
        }
    }
}

/// Returns true for databases excluded from per-database collection.
pub fn is_skipped_database(name: &str) -> bool {
    SKIP_DATABASES.contains(&name)
}

/// `(kind, hostname) -> names`, filled lazily during one cycle.
#[derive(Debug, Default)]
pub struct NameCache {
    names: HashMap<(NameKind, String), Vec<String>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names of `kind` for `process`'s host, fetching them on
    /// first use. Database names in [`SKIP_DATABASES`] are dropped before
    /// they are stored. Failed fetches are not cached.
    pub async fn resolve(
        &mut self,
        kind: NameKind,
        client: &dyn AtlasApi,
        project: &str,
        process: &Process,
    ) -> Result<&[String], ClientError> {
        match self.names.entry((kind, process.hostname.clone())) {
            Entry::Occupied(entry) => {
                trace!(hostname = %process.hostname, %kind, "name cache hit");
                Ok(entry.into_mut().as_slice())
            }
            Entry::Vacant(entry) => {
                let names = fetch_names(kind, client, project, process).await?;
                debug!(hostname = %process.hostname, %kind, count = names.len(), "names fetched");
                Ok(entry.insert(names).as_slice())
            }
        }
    }

    #[cfg(test)]
    fn contains(&self, kind: NameKind, hostname: &str) -> bool {
        self.names.contains_key(&(kind, hostname.to_string()))
    }
}

async fn fetch_names(
    kind: NameKind,
    client: &dyn AtlasApi,
    project: &str,
    process: &Process,
) -> Result<Vec<String>, ClientError> {
    let names = match kind {
        NameKind::Database => client
            .list_process_databases(project, &process.hostname, process.port)
            .await?
            .into_iter()
            .map(|db| db.database_name)
            .filter(|name| !is_skipped_database(name))
            .collect(),
        NameKind::Disk => client
            .list_process_disks(project, &process.hostname, process.port)
            .await?
            .into_iter()
            .map(|disk| disk.partition_name)
            .collect(),
    };
    Ok(names)
}
