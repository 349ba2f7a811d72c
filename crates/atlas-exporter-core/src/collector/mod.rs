//! Collection cycle.
//!
//! ```text
//!   Collector::collect
//!        │
//!        ├─ list_projects ──── fails ──▶ snapshot with up = 0
//!        │
//!        └─ ProcessCollector
//!             ├─ 1. uptime            (every process)
//!             ├─ 2. process metrics   (every process)
//!             ├─ 3. database metrics  (primaries, via NameCache)
//!             └─ 4. disk metrics      (primaries, via NameCache)
//! ```
//!
//! One cycle runs per scrape. Nothing is kept between cycles.

#[allow(clippy::module_inception)]
mod collector;
mod cache;
mod process;

pub use cache::{NameCache, NameKind, SKIP_DATABASES, is_skipped_database};
pub use collector::Collector;
pub use process::{CollectStats, ProcessCollector};
