use chrono::{DateTime, Utc};
use parcelwatch::models::Property;
use sqlx::PgPool;

/// Build a test [`Property`] with sensible defaults. Only the fields a given
/// test cares about need to be varied; the rest are harmless placeholders.
pub fn make_property(property_id: &str, source_term: &str) -> Property {
    let now = Utc::now();
    Property {
        property_id: property_id.to_string(),
        name: "Jane Doe".to_string(),
        prop_type: "RES".to_string(),
        city: Some("Austin".to_string()),
        property_address: "1 Main St".to_string(),
        assessed_value: 100_000,
        appraised_value: 110_000,
        geo_id: Some("G1".to_string()),
        description: Some("Lot 1".to_string()),
        source_term: source_term.to_string(),
        scraped_at: now,
        created_at: now,
        updated_at: now,
    }
}

/// Insert a scrape job row directly via SQL, bypassing `PgBroker::enqueue`,
/// so tests can control `locked_at`/`attempts`/`priority` precisely.
#[allow(clippy::too_many_arguments)]
pub async fn insert_scrape_job(
    pool: &PgPool,
    search_term: &str,
    year: i32,
    priority: i32,
    locked: bool,
    attempts: i32,
    execute_at: Option<DateTime<Utc>>,
) -> i64 {
    let locked_at = if locked { Some(Utc::now()) } else { None };
    let execute_at = execute_at.unwrap_or_else(Utc::now);

    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO scrape_jobs (search_term, year, priority, locked_at, attempts, execute_at, status)
         VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $4::timestamptz IS NULL THEN 'pending' ELSE 'processing' END)
         RETURNING id",
    )
    .bind(search_term)
    .bind(year)
    .bind(priority)
    .bind(locked_at)
    .bind(attempts)
    .bind(execute_at)
    .fetch_one(pool)
    .await
    .expect("insert_scrape_job failed");

    id
}
