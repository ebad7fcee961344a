//! The broker: a durable FIFO queue with priorities, delayed redelivery,
//! claim/ack, and per-job retry state (§6.2).

pub mod postgres;

use crate::error::EngineError;
use crate::models::{Priority, ScrapeJob};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

pub use postgres::PgBroker;

/// Printable-text shape a search term must match: letters, digits, and a
/// handful of punctuation marks that show up in owner names and addresses.
/// Rejects control characters and the Unicode line/paragraph separators C6
/// is explicitly required to tolerate on the read side but which have no
/// business in a term submitted for scraping.
static VALID_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{N}\s.,'&#-]+$").expect("static pattern is valid"));

const MAX_TERM_LEN: usize = 200;

/// Validates a search term before it is ever handed to the broker or the
/// upstream API (§4.8 `VALIDATION_ERROR`: input-classified, never retried).
pub fn validate_term(term: &str) -> Result<(), EngineError> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return Err(EngineError::ValidationError(
            "search term must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TERM_LEN {
        return Err(EngineError::ValidationError(format!(
            "search term exceeds {MAX_TERM_LEN} characters"
        )));
    }
    if !VALID_TERM.is_match(trimmed) {
        return Err(EngineError::ValidationError(
            "search term contains unsupported characters".to_string(),
        ));
    }
    Ok(())
}

/// The broker's external surface, mirrored by [`PgBroker`] (§6.2, §4.4).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueues a new job for `term`/`year` at the given priority, returning
    /// the assigned job id.
    async fn enqueue(&self, term: &str, year: i32, priority: Priority) -> Result<i64, EngineError>;

    /// Claims the next eligible job, if any, stamping it `processing`.
    async fn claim(&self) -> Result<Option<ScrapeJob>, EngineError>;

    /// Advances the advisory progress milestone for an in-flight job.
    async fn set_progress(&self, id: i64, progress: i32) -> Result<(), EngineError>;

    /// Marks a job `completed` with the given result count.
    async fn complete(&self, id: i64, result_count: i32) -> Result<(), EngineError>;

    /// Applies the broker's retry policy: increments `attempts`, and either
    /// reschedules with exponential backoff (returns `true`) or terminally
    /// fails the job once `max_attempts` is exhausted (returns `false`).
    async fn retry_or_fail(
        &self,
        id: i64,
        max_attempts: u32,
        backoff_base: Duration,
        error: &str,
    ) -> Result<bool, EngineError>;

    /// Whether any job for `term` currently holds a claim (approximating
    /// broker "active set" membership — see the design note at the call
    /// site in [`crate::gate`]).
    async fn is_active(&self, term: &str) -> Result<bool, EngineError>;

    /// Clears every claim, recovering jobs left locked by an unclean
    /// shutdown so they re-enter the queue immediately.
    async fn force_unlock_all(&self) -> Result<u64, EngineError>;
}
