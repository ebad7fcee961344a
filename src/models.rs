//! Core data model shared by the store, broker, and worker (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scraped property record, keyed by the upstream-assigned `property_id`.
///
/// On re-scrape the record is overwritten in full except `created_at`, which
/// is preserved (last-writer-wins semantics, enforced by [`crate::store`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Property {
    pub property_id: String,
    pub name: String,
    pub prop_type: String,
    pub city: Option<String>,
    pub property_address: String,
    pub assessed_value: i64,
    pub appraised_value: i64,
    pub geo_id: Option<String>,
    pub description: Option<String>,
    pub source_term: String,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status a [`ScrapeJob`] can be in. Transitions are `Pending -> Processing
/// -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "scrape_job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Advisory priority used for broker ordering. Smaller values are claimed
/// first, matching the broker contract's "1 highest" convention (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "int4")]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const LOWEST: Priority = Priority(10);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// One unit of scraping work (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapeJob {
    pub id: i64,
    pub search_term: String,
    pub year: i32,
    pub status: JobStatus,
    pub progress: i32,
    pub result_count: i32,
    pub error: Option<String>,
    pub attempts: i32,
    pub priority: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execute_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// How often a [`MonitoredSearch`] should be re-enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "search_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// The cadence as a [`chrono::Duration`], used to decide eligibility in
    /// C7's scan (`now - last_run_at >= frequency`).
    pub fn as_duration(self) -> chrono::Duration {
        match self {
            Frequency::Hourly => chrono::Duration::hours(1),
            Frequency::Daily => chrono::Duration::days(1),
            Frequency::Weekly => chrono::Duration::weeks(1),
            Frequency::Monthly => chrono::Duration::days(30),
        }
    }
}

/// A term to re-enqueue on a cadence, owned by C7 (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MonitoredSearch {
    pub search_term: String,
    pub frequency: Frequency,
    pub active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}
