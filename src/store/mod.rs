//! The store: the transactional record keeper for properties, job history,
//! and monitored searches (§6.3).

pub mod postgres;

use crate::error::EngineError;
use crate::models::{MonitoredSearch, Property};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

pub use postgres::PgStore;

/// Outcome of a call to [`Store::upsert_properties`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: u64,
    pub updated: u64,
}

/// Filter/sort/paginate parameters for [`Store::find_properties`]. `filter`
/// is the structured JSON object produced by C6 (or crafted directly by a
/// caller), following the grammar in §4.6.
#[derive(Debug, Clone, Default)]
pub struct PropertyQuery {
    pub filter: Option<JsonValue>,
    pub limit: i64,
    pub offset: i64,
}

/// The store's external surface, mirrored by [`PgStore`] (§6.3).
#[async_trait]
pub trait Store: Send + Sync {
    /// Merges scraped records into the store, keyed by `property_id`,
    /// preserving `created_at` on conflict (C5).
    async fn upsert_properties(&self, properties: &[Property]) -> Result<UpsertStats, EngineError>;

    /// Runs `query` against the store, returning matching rows and the total
    /// count ignoring pagination.
    async fn find_properties(&self, query: &PropertyQuery) -> Result<(Vec<Property>, i64), EngineError>;

    /// Returns every `MonitoredSearch` with `active = true`, used by C7's
    /// scan tick.
    async fn find_active_monitored_searches(&self) -> Result<Vec<MonitoredSearch>, EngineError>;

    /// Stamps `last_run_at = now` for `term`.
    async fn mark_monitored_search_run(&self, term: &str) -> Result<(), EngineError>;

    /// Inserts or updates a monitored search definition.
    async fn upsert_monitored_search(&self, search: &MonitoredSearch) -> Result<(), EngineError>;
}
