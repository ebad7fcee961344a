//! Job queue worker pool: claims jobs from the broker and drives them
//! through the fetch -> translate -> upsert pipeline (C4).

use crate::api::ApiClient;
use crate::broker::Broker;
use crate::error::EngineError;
use crate::models::ScrapeJob;
use crate::services::Service;
use crate::store::Store;
use crate::token::TokenManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long an idle worker waits before polling the broker again.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Backoff applied after a broker-level error (not a job failure), to avoid
/// spamming the database when it's unreachable.
const BROKER_ERROR_BACKOFF: Duration = Duration::from_secs(10);

/// One worker instance, polling the broker in its own task.
pub struct Worker {
    id: usize,
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    api_client: Arc<ApiClient>,
    token_manager: Arc<TokenManager>,
    max_attempts: u32,
    backoff_base: Duration,
    job_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        broker: Arc<dyn Broker>,
        store: Arc<dyn Store>,
        api_client: Arc<ApiClient>,
        token_manager: Arc<TokenManager>,
        max_attempts: u32,
        backoff_base: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            id,
            broker,
            store,
            api_client,
            token_manager,
            max_attempts,
            backoff_base,
            job_timeout,
        }
    }

    /// Runs the worker's main loop until `shutdown_rx` fires.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = self.id, "worker started");
        loop {
            tokio::select! {
                claim = self.broker.claim() => {
                    match claim {
                        Ok(Some(job)) => self.handle_job(job).await,
                        Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                        Err(e) => {
                            warn!(worker_id = self.id, error = %e, "failed to claim job");
                            tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(worker_id = self.id, "worker stopping");
                    return;
                }
            }
        }
    }

    async fn handle_job(&self, job: ScrapeJob) {
        let job_id = job.id;
        let search_term = job.search_term.clone();

        let outcome = match tokio::time::timeout(self.job_timeout, self.process_job(&job)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Transport(format!(
                "job exceeded {:?} timeout",
                self.job_timeout
            ))),
        };

        match outcome {
            Ok(result_count) => {
                if let Err(e) = self.broker.complete(job_id, result_count).await {
                    error!(worker_id = self.id, job_id, error = %e, "failed to mark job completed");
                }
                debug!(worker_id = self.id, job_id, search_term, result_count, "job completed");
            }
            Err(e) => self.fail_job(job_id, &search_term, e).await,
        }
    }

    async fn fail_job(&self, job_id: i64, search_term: &str, error: EngineError) {
        if !error.is_retryable() {
            if let Err(e) = self
                .broker
                .retry_or_fail(job_id, 1, self.backoff_base, &error.job_error_string())
                .await
            {
                error!(worker_id = self.id, job_id, error = %e, "failed to record terminal failure");
            }
            warn!(worker_id = self.id, job_id, search_term, error = %error, "job failed validation, not retried");
            return;
        }

        match self
            .broker
            .retry_or_fail(job_id, self.max_attempts, self.backoff_base, &error.job_error_string())
            .await
        {
            Ok(true) => debug!(worker_id = self.id, job_id, search_term, error = %error, "job scheduled for retry"),
            Ok(false) => warn!(worker_id = self.id, job_id, search_term, error = %error, "job terminally failed"),
            Err(store_err) => error!(worker_id = self.id, job_id, error = %store_err, "failed to record job failure"),
        }
    }

    /// Runs the fetch -> map -> upsert pipeline for one claimed job, returning
    /// the number of properties persisted (§4.4 steps 1-7).
    async fn process_job(&self, job: &ScrapeJob) -> Result<i32, EngineError> {
        self.broker.set_progress(job.id, 30).await?;

        let token = match self.token_manager.current_token() {
            Some(token) => token,
            None => self
                .token_manager
                .refresh_now()
                .await
                .map_err(|e| EngineError::NoToken(e.to_string()))?,
        };

        let outcome = match self.api_client.fetch(&token, &job.search_term, job.year).await {
            Err(EngineError::TokenExpired) => {
                warn!(worker_id = self.id, job_id = job.id, "token expired mid-job, refreshing once");
                let refreshed = self
                    .token_manager
                    .refresh_now()
                    .await
                    .map_err(|e| EngineError::NoToken(e.to_string()))?;
                self.api_client.fetch(&refreshed, &job.search_term, job.year).await?
            }
            other => other?,
        };

        if outcome.truncated_warning {
            warn!(
                worker_id = self.id,
                job_id = job.id,
                page_size = outcome.page_size_used,
                "page index safety cap reached, result set may be incomplete"
            );
        }

        self.broker.set_progress(job.id, 70).await?;

        let properties: Vec<_> = outcome
            .results
            .into_iter()
            .map(|raw| raw.into_property(&job.search_term))
            .collect();
        let result_count = properties.len() as i32;

        self.store.upsert_properties(&properties).await?;
        self.broker.set_progress(job.id, 90).await?;

        Ok(result_count)
    }
}

/// Owns the worker pool's lifecycle as a [`Service`], mirroring the
/// originating codebase's scraper service shape: an internal broadcast
/// channel drives cooperative shutdown across N detached worker tasks.
pub struct WorkerPoolService {
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    api_client: Arc<ApiClient>,
    token_manager: Arc<TokenManager>,
    worker_count: usize,
    max_attempts: u32,
    backoff_base: Duration,
    job_timeout: Duration,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl WorkerPoolService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn Store>,
        api_client: Arc<ApiClient>,
        token_manager: Arc<TokenManager>,
        worker_count: usize,
        max_attempts: u32,
        backoff_base: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            store,
            api_client,
            token_manager,
            worker_count,
            max_attempts,
            backoff_base,
            job_timeout,
            worker_handles: Vec::new(),
            shutdown_tx: None,
        }
    }

    /// Recovers jobs left locked by an unclean shutdown, then spawns the
    /// worker pool.
    async fn start(&mut self) {
        match self.broker.force_unlock_all().await {
            Ok(0) => {}
            Ok(count) => warn!(count, "force-unlocked stale jobs from previous run"),
            Err(e) => warn!(error = %e, "failed to force-unlock stale jobs"),
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        for id in 0..self.worker_count {
            let worker = Worker::new(
                id,
                self.broker.clone(),
                self.store.clone(),
                self.api_client.clone(),
                self.token_manager.clone(),
                self.max_attempts,
                self.backoff_base,
                self.job_timeout,
            );
            let shutdown_rx = shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                worker.run(shutdown_rx).await;
            });
            self.worker_handles.push(handle);
        }

        info!(worker_count = self.worker_handles.len(), "worker pool started");
    }
}

#[async_trait::async_trait]
impl Service for WorkerPoolService {
    fn name(&self) -> &'static str {
        "worker_pool"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.start().await;
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        info!("shutting down worker pool");

        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            warn!("no shutdown channel found for worker pool");
            return Err(anyhow::anyhow!("worker pool was never started"));
        };
        let _ = shutdown_tx.send(());

        let handles = std::mem::take(&mut self.worker_handles);
        let results = futures::future::join_all(handles).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed_count = failed, "some workers panicked during shutdown");
            return Err(anyhow::anyhow!("{failed} worker task(s) panicked"));
        }

        info!("all workers shut down gracefully");
        Ok(())
    }
}
