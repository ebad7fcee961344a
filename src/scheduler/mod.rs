//! Monitored-search scheduler: periodically re-enqueues scrape jobs for
//! searches the caller has asked to keep fresh on a cadence (C7).

use crate::broker::Broker;
use crate::gate::DedupGate;
use crate::models::Priority;
use crate::services::Service;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scans [`Store::find_active_monitored_searches`] on a fixed tick,
/// re-enqueueing any search whose cadence has elapsed.
pub struct SchedulerService {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
    gate: Arc<DedupGate>,
    tick_interval: Duration,
    year: i32,
    cancel: CancellationToken,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        gate: Arc<DedupGate>,
        tick_interval: Duration,
        year: i32,
    ) -> Self {
        Self {
            store,
            broker,
            gate,
            tick_interval,
            year,
            cancel: CancellationToken::new(),
        }
    }

    /// Scans every active monitored search and enqueues the ones due for a
    /// re-scrape, skipping any the dedup gate or an in-flight job blocks.
    async fn tick(&self) {
        let searches = match self.store.find_active_monitored_searches().await {
            Ok(searches) => searches,
            Err(e) => {
                error!(error = %e, "failed to load monitored searches");
                return;
            }
        };

        let now = Utc::now();
        let mut enqueued = 0usize;
        let mut skipped = 0usize;

        for search in searches {
            let due = match search.last_run_at {
                Some(last_run_at) => now - last_run_at >= search.frequency.as_duration(),
                None => true,
            };
            if !due {
                continue;
            }

            if !self.gate.can_schedule(&search.search_term) {
                skipped += 1;
                continue;
            }

            match self.broker.is_active(&search.search_term).await {
                Ok(true) => {
                    skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, term = search.search_term, "failed to check active jobs");
                    continue;
                }
            }

            match self.broker.enqueue(&search.search_term, self.year, Priority::NORMAL).await {
                Ok(job_id) => {
                    self.gate.record_scheduled(&search.search_term);
                    if let Err(e) = self.store.mark_monitored_search_run(&search.search_term).await {
                        error!(error = %e, term = search.search_term, "failed to stamp last_run_at");
                    }
                    enqueued += 1;
                    debug!(job_id, term = search.search_term, "monitored search enqueued");
                }
                Err(e) => {
                    error!(error = %e, term = search.search_term, "failed to enqueue monitored search");
                }
            }
        }

        if enqueued > 0 || skipped > 0 {
            info!(enqueued, skipped, "monitored search scan complete");
        }
    }
}

#[async_trait::async_trait]
impl Service for SchedulerService {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {
                    self.tick().await;
                }
                _ = self.cancel.cancelled() => {
                    info!("scheduler stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::error::EngineError;
    use crate::models::{Frequency, MonitoredSearch, Property, ScrapeJob};
    use crate::store::{PropertyQuery, Store, UpsertStats};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    struct FakeStore {
        searches: Mutex<Vec<MonitoredSearch>>,
        marked_run: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn upsert_properties(&self, _properties: &[Property]) -> Result<UpsertStats, EngineError> {
            Ok(UpsertStats::default())
        }

        async fn find_properties(&self, _query: &PropertyQuery) -> Result<(Vec<Property>, i64), EngineError> {
            Ok((Vec::new(), 0))
        }

        async fn find_active_monitored_searches(&self) -> Result<Vec<MonitoredSearch>, EngineError> {
            Ok(self.searches.lock().unwrap().clone())
        }

        async fn mark_monitored_search_run(&self, term: &str) -> Result<(), EngineError> {
            self.marked_run.lock().unwrap().push(term.to_string());
            Ok(())
        }

        async fn upsert_monitored_search(&self, _search: &MonitoredSearch) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct FakeBroker {
        enqueued: Mutex<Vec<String>>,
        active_terms: Vec<String>,
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn enqueue(&self, term: &str, _year: i32, _priority: Priority) -> Result<i64, EngineError> {
            self.enqueued.lock().unwrap().push(term.to_string());
            Ok(1)
        }

        async fn claim(&self) -> Result<Option<ScrapeJob>, EngineError> {
            Ok(None)
        }

        async fn set_progress(&self, _id: i64, _progress: i32) -> Result<(), EngineError> {
            Ok(())
        }

        async fn complete(&self, _id: i64, _result_count: i32) -> Result<(), EngineError> {
            Ok(())
        }

        async fn retry_or_fail(
            &self,
            _id: i64,
            _max_attempts: u32,
            _backoff_base: Duration,
            _error: &str,
        ) -> Result<bool, EngineError> {
            Ok(false)
        }

        async fn is_active(&self, term: &str) -> Result<bool, EngineError> {
            Ok(self.active_terms.iter().any(|t| t == term))
        }

        async fn force_unlock_all(&self) -> Result<u64, EngineError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn due_search_is_enqueued_and_stamped() {
        let store = Arc::new(FakeStore {
            searches: Mutex::new(vec![MonitoredSearch {
                search_term: "smith".to_string(),
                frequency: Frequency::Hourly,
                active: true,
                last_run_at: Some(Utc::now() - ChronoDuration::hours(2)),
            }]),
            marked_run: Mutex::new(Vec::new()),
        });
        let broker = Arc::new(FakeBroker {
            enqueued: Mutex::new(Vec::new()),
            active_terms: Vec::new(),
        });
        let gate = Arc::new(DedupGate::new(Duration::from_secs(5), Duration::from_secs(600)));

        let service = SchedulerService::new(store.clone(), broker.clone(), gate, Duration::from_secs(60), 2026);
        service.tick().await;

        assert_eq!(broker.enqueued.lock().unwrap().as_slice(), &["smith".to_string()]);
        assert_eq!(store.marked_run.lock().unwrap().as_slice(), &["smith".to_string()]);
    }

    #[tokio::test]
    async fn search_not_yet_due_is_skipped() {
        let store = Arc::new(FakeStore {
            searches: Mutex::new(vec![MonitoredSearch {
                search_term: "jones".to_string(),
                frequency: Frequency::Daily,
                active: true,
                last_run_at: Some(Utc::now()),
            }]),
            marked_run: Mutex::new(Vec::new()),
        });
        let broker = Arc::new(FakeBroker {
            enqueued: Mutex::new(Vec::new()),
            active_terms: Vec::new(),
        });
        let gate = Arc::new(DedupGate::new(Duration::from_secs(5), Duration::from_secs(600)));

        let service = SchedulerService::new(store, broker.clone(), gate, Duration::from_secs(60), 2026);
        service.tick().await;

        assert!(broker.enqueued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_job_blocks_enqueue() {
        let store = Arc::new(FakeStore {
            searches: Mutex::new(vec![MonitoredSearch {
                search_term: "doe".to_string(),
                frequency: Frequency::Hourly,
                active: true,
                last_run_at: None,
            }]),
            marked_run: Mutex::new(Vec::new()),
        });
        let broker = Arc::new(FakeBroker {
            enqueued: Mutex::new(Vec::new()),
            active_terms: vec!["doe".to_string()],
        });
        let gate = Arc::new(DedupGate::new(Duration::from_secs(5), Duration::from_secs(600)));

        let service = SchedulerService::new(store, broker.clone(), gate, Duration::from_secs(60), 2026);
        service.tick().await;

        assert!(broker.enqueued.lock().unwrap().is_empty());
    }
}
