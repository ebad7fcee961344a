//! Integration tests for `PgStore`'s `MonitoredSearch` operations (C7/§6.3).

mod helpers;

use parcelwatch::models::{Frequency, MonitoredSearch};
use parcelwatch::store::{PgStore, Store};
use sqlx::PgPool;

#[sqlx::test]
async fn upsert_then_find_active_round_trips(pool: PgPool) {
    let store = PgStore::new(pool.clone());

    store
        .upsert_monitored_search(&MonitoredSearch {
            search_term: "smith".to_string(),
            frequency: Frequency::Daily,
            active: true,
            last_run_at: None,
        })
        .await
        .unwrap();

    let active = store.find_active_monitored_searches().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].search_term, "smith");
    assert_eq!(active[0].frequency, Frequency::Daily);
}

#[sqlx::test]
async fn inactive_searches_are_excluded(pool: PgPool) {
    let store = PgStore::new(pool.clone());

    store
        .upsert_monitored_search(&MonitoredSearch {
            search_term: "jones".to_string(),
            frequency: Frequency::Weekly,
            active: false,
            last_run_at: None,
        })
        .await
        .unwrap();

    let active = store.find_active_monitored_searches().await.unwrap();
    assert!(active.is_empty());
}

#[sqlx::test]
async fn mark_monitored_search_run_stamps_last_run_at(pool: PgPool) {
    let store = PgStore::new(pool.clone());

    store
        .upsert_monitored_search(&MonitoredSearch {
            search_term: "doe".to_string(),
            frequency: Frequency::Hourly,
            active: true,
            last_run_at: None,
        })
        .await
        .unwrap();

    store.mark_monitored_search_run("doe").await.unwrap();

    let (last_run_at,): (Option<chrono::DateTime<chrono::Utc>>,) =
        sqlx::query_as("SELECT last_run_at FROM monitored_searches WHERE search_term = 'doe'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(last_run_at.is_some());
}

#[sqlx::test]
async fn upsert_on_conflict_updates_frequency_without_duplicating(pool: PgPool) {
    let store = PgStore::new(pool.clone());

    store
        .upsert_monitored_search(&MonitoredSearch {
            search_term: "smith".to_string(),
            frequency: Frequency::Daily,
            active: true,
            last_run_at: None,
        })
        .await
        .unwrap();
    store
        .upsert_monitored_search(&MonitoredSearch {
            search_term: "smith".to_string(),
            frequency: Frequency::Monthly,
            active: true,
            last_run_at: None,
        })
        .await
        .unwrap();

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM monitored_searches")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);

    let active = store.find_active_monitored_searches().await.unwrap();
    assert_eq!(active[0].frequency, Frequency::Monthly);
}
