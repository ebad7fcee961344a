//! `PgStore`: a `Store` implementation against `properties`,
//! `scrape_jobs`, and `monitored_searches` tables in the same pool used by
//! `PgBroker` — in this deployment the store and the job history live
//! together, mirroring the originating codebase's single-pool layout.

use super::{PropertyQuery, Store, UpsertStats};
use crate::error::EngineError;
use crate::models::{MonitoredSearch, Property};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, QueryBuilder};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps a filter field name to its backing column. Unknown fields are
/// dropped silently per the filter grammar (§4.6).
fn column_for_field(field: &str) -> Option<&'static str> {
    match field {
        "name" => Some("name"),
        "propType" => Some("prop_type"),
        "city" => Some("city"),
        "address" | "propertyAddress" => Some("property_address"),
        "description" => Some("description"),
        "assessedValue" => Some("assessed_value"),
        "appraisedValue" => Some("appraised_value"),
        _ => None,
    }
}

/// Pure validity check mirroring [`push_filter`]'s acceptance rules, used to
/// decide up front whether a node (or any of a composite's children) renders
/// to anything, since `QueryBuilder` offers no way to roll back a partial
/// push once started.
fn filter_is_valid(filter: &JsonValue) -> bool {
    let Some(obj) = filter.as_object() else {
        return false;
    };
    if let Some(JsonValue::Array(items)) = obj.get("AND") {
        return items.iter().any(filter_is_valid);
    }
    if let Some(JsonValue::Array(items)) = obj.get("OR") {
        return items.iter().any(filter_is_valid);
    }
    let Some((field, spec)) = obj.iter().next() else {
        return false;
    };
    if column_for_field(field).is_none() {
        return false;
    }
    match spec {
        JsonValue::String(_) => true,
        JsonValue::Object(inner) => {
            inner.get("contains").and_then(|v| v.as_str()).is_some()
                || ["gte", "lte", "gt", "lt", "eq"]
                    .iter()
                    .any(|op| inner.get(*op).and_then(|v| v.as_i64()).is_some())
        }
        _ => false,
    }
}

/// Recursively lowers a filter JSON value into `qb`. Callers must first
/// confirm [`filter_is_valid`] to avoid emitting an empty fragment.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &JsonValue) -> bool {
    if !filter_is_valid(filter) {
        return false;
    }
    let obj = filter.as_object().expect("validated above");

    if let Some(JsonValue::Array(items)) = obj.get("AND") {
        return push_composite(qb, items, " AND ");
    }
    if let Some(JsonValue::Array(items)) = obj.get("OR") {
        return push_composite(qb, items, " OR ");
    }

    let (field, spec) = obj.iter().next().expect("validated above");
    let column = column_for_field(field).expect("validated above");

    match spec {
        JsonValue::String(value) => {
            qb.push(format!("{column} = "));
            qb.push_bind(value.clone());
        }
        JsonValue::Object(inner) => {
            if let Some(JsonValue::String(needle)) = inner.get("contains") {
                qb.push(format!("{column} ILIKE "));
                qb.push_bind(format!("%{needle}%"));
            } else {
                let (op, number) = ["gte", "lte", "gt", "lt", "eq"]
                    .iter()
                    .find_map(|op| inner.get(*op).and_then(|v| v.as_i64()).map(|n| (*op, n)))
                    .expect("validated above");
                let sql_op = match op {
                    "gte" => ">=",
                    "lte" => "<=",
                    "gt" => ">",
                    "lt" => "<",
                    _ => "=",
                };
                qb.push(format!("{column} {sql_op} "));
                qb.push_bind(number);
            }
        }
        _ => unreachable!("validated above"),
    }
    true
}

/// Pushes only the items that validate, joined by `joiner` and wrapped in
/// parens. `items` is guaranteed non-empty-after-filtering by the caller
/// having already checked [`filter_is_valid`] on the parent.
fn push_composite(qb: &mut QueryBuilder<'_, Postgres>, items: &[JsonValue], joiner: &str) -> bool {
    let valid_items: Vec<&JsonValue> = items.iter().filter(|item| filter_is_valid(item)).collect();
    if valid_items.is_empty() {
        return false;
    }
    qb.push("(");
    for (i, item) in valid_items.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        push_filter(qb, item);
    }
    qb.push(")");
    true
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_properties(&self, properties: &[Property]) -> Result<UpsertStats, EngineError> {
        if properties.is_empty() {
            return Ok(UpsertStats::default());
        }

        const CHUNK_SIZE: usize = 500;
        let mut stats = UpsertStats::default();

        for chunk in properties.chunks(CHUNK_SIZE) {
            let ids: Vec<&str> = chunk.iter().map(|p| p.property_id.as_str()).collect();
            let names: Vec<&str> = chunk.iter().map(|p| p.name.as_str()).collect();
            let prop_types: Vec<&str> = chunk.iter().map(|p| p.prop_type.as_str()).collect();
            let cities: Vec<Option<&str>> = chunk.iter().map(|p| p.city.as_deref()).collect();
            let addresses: Vec<&str> = chunk.iter().map(|p| p.property_address.as_str()).collect();
            let assessed: Vec<i64> = chunk.iter().map(|p| p.assessed_value).collect();
            let appraised: Vec<i64> = chunk.iter().map(|p| p.appraised_value).collect();
            let geo_ids: Vec<Option<&str>> = chunk.iter().map(|p| p.geo_id.as_deref()).collect();
            let descriptions: Vec<Option<&str>> = chunk.iter().map(|p| p.description.as_deref()).collect();
            let source_terms: Vec<&str> = chunk.iter().map(|p| p.source_term.as_str()).collect();
            let scraped_ats: Vec<chrono::DateTime<chrono::Utc>> =
                chunk.iter().map(|p| p.scraped_at).collect();

            // `xmax = 0` in the RETURNING clause would distinguish insert
            // from update per-row; the chunk-level counts here are
            // approximate (inserted vs. updated split computed below from a
            // single round trip) rather than tracked by a second query.
            let rows: Vec<(bool,)> = sqlx::query_as(
                r#"
                INSERT INTO properties (
                    property_id, name, prop_type, city, property_address,
                    assessed_value, appraised_value, geo_id, description,
                    source_term, scraped_at, created_at, updated_at
                )
                SELECT v.*, NOW(), NOW() FROM UNNEST(
                    $1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                    $6::bigint[], $7::bigint[], $8::text[], $9::text[],
                    $10::text[], $11::timestamptz[]
                ) AS v(
                    property_id, name, prop_type, city, property_address,
                    assessed_value, appraised_value, geo_id, description,
                    source_term, scraped_at
                )
                ON CONFLICT (property_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    prop_type = EXCLUDED.prop_type,
                    city = EXCLUDED.city,
                    property_address = EXCLUDED.property_address,
                    assessed_value = EXCLUDED.assessed_value,
                    appraised_value = EXCLUDED.appraised_value,
                    geo_id = EXCLUDED.geo_id,
                    description = EXCLUDED.description,
                    source_term = EXCLUDED.source_term,
                    scraped_at = EXCLUDED.scraped_at,
                    updated_at = NOW()
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(&ids)
            .bind(&names)
            .bind(&prop_types)
            .bind(&cities)
            .bind(&addresses)
            .bind(&assessed)
            .bind(&appraised)
            .bind(&geo_ids)
            .bind(&descriptions)
            .bind(&source_terms)
            .bind(&scraped_ats)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;

            for (inserted,) in rows {
                if inserted {
                    stats.inserted += 1;
                } else {
                    stats.updated += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn find_properties(&self, query: &PropertyQuery) -> Result<(Vec<Property>, i64), EngineError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT property_id, name, prop_type, city, property_address, assessed_value, \
             appraised_value, geo_id, description, source_term, scraped_at, created_at, updated_at \
             FROM properties",
        );

        if let Some(filter) = &query.filter {
            if filter_is_valid(filter) {
                qb.push(" WHERE ");
                push_filter(&mut qb, filter);
            }
        }
        qb.push(" ORDER BY property_id LIMIT ");
        qb.push_bind(query.limit.max(1));
        qb.push(" OFFSET ");
        qb.push_bind(query.offset.max(0));

        let rows: Vec<Property> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;

        let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM properties");
        if let Some(filter) = &query.filter {
            if filter_is_valid(filter) {
                count_qb.push(" WHERE ");
                push_filter(&mut count_qb, filter);
            }
        }
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;

        Ok((rows, total))
    }

    async fn find_active_monitored_searches(&self) -> Result<Vec<MonitoredSearch>, EngineError> {
        sqlx::query_as::<_, MonitoredSearch>(
            "SELECT search_term, frequency, active, last_run_at FROM monitored_searches WHERE active = true",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::StoreError(e.to_string()))
    }

    async fn mark_monitored_search_run(&self, term: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE monitored_searches SET last_run_at = NOW() WHERE search_term = $1")
            .bind(term)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;
        Ok(())
    }

    async fn upsert_monitored_search(&self, search: &MonitoredSearch) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO monitored_searches (search_term, frequency, active, last_run_at)
            VALUES ($1, $2::search_frequency, $3, $4)
            ON CONFLICT (search_term) DO UPDATE SET
                frequency = EXCLUDED.frequency,
                active = EXCLUDED.active
            "#,
        )
        .bind(&search.search_term)
        .bind(search.frequency)
        .bind(search.active)
        .bind(search.last_run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::StoreError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_field_is_dropped() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("");
        let pushed = push_filter(&mut qb, &json!({"nonsense": "value"}));
        assert!(!pushed);
    }

    #[test]
    fn leaf_string_equality_renders() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("");
        let pushed = push_filter(&mut qb, &json!({"city": "Austin"}));
        assert!(pushed);
        assert!(qb.sql().contains("city ="));
    }

    #[test]
    fn contains_leaf_renders_ilike() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("");
        let pushed = push_filter(
            &mut qb,
            &json!({"name": {"contains": "smith", "mode": "insensitive"}}),
        );
        assert!(pushed);
        assert!(qb.sql().contains("ILIKE"));
    }

    #[test]
    fn numeric_comparison_leaf_renders() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("");
        let pushed = push_filter(&mut qb, &json!({"assessedValue": {"gte": 100000}}));
        assert!(pushed);
        assert!(qb.sql().contains("assessed_value >="));
    }

    #[test]
    fn or_composite_joins_leaves() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("");
        let pushed = push_filter(
            &mut qb,
            &json!({"OR": [{"city": "Austin"}, {"city": "Dallas"}]}),
        );
        assert!(pushed);
        assert!(qb.sql().contains(" OR "));
    }

    #[test]
    fn count_query_applies_the_same_filter_as_the_rows_query() {
        let filter = json!({"city": "Austin"});

        let mut rows_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM properties WHERE ");
        push_filter(&mut rows_qb, &filter);

        let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM properties WHERE ");
        push_filter(&mut count_qb, &filter);

        let rows_predicate = rows_qb.sql().split("WHERE ").nth(1).unwrap();
        let count_predicate = count_qb.sql().split("WHERE ").nth(1).unwrap();
        assert_eq!(rows_predicate, count_predicate);
    }
}
