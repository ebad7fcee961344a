//! Token lifecycle manager: acquire, cache, and periodically refresh the
//! upstream bearer token (C2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::services::Service;

/// The "acquire" primitive is a pluggable, object-safe async trait rather
/// than a concrete HTTP call, per Design Note 9: a from-scratch
/// reimplementation should hit a direct authentication endpoint instead of
/// driving a browser. Tests substitute a fake acquirer.
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    async fn acquire(&self) -> anyhow::Result<String>;
}

/// Exchanges credentials for a bearer token against a configured auth
/// endpoint using the shared `reqwest::Client`.
pub struct HttpTokenAcquirer {
    client: reqwest::Client,
    auth_base_url: String,
}

impl HttpTokenAcquirer {
    pub fn new(client: reqwest::Client, auth_base_url: String) -> Self {
        Self {
            client,
            auth_base_url,
        }
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    token: String,
}

#[async_trait]
impl TokenAcquirer for HttpTokenAcquirer {
    async fn acquire(&self) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/token", self.auth_base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("token endpoint returned HTTP {}", response.status().as_u16());
        }

        let parsed: TokenResponse = response.json().await?;
        Ok(parsed.token)
    }
}

struct TokenState {
    token: Option<String>,
    acquired_at: Option<DateTime<Utc>>,
}

/// Health counters exposed for observability (§4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenHealth {
    pub refresh_count: u64,
    pub failure_count: u64,
}

/// Holds one token in process-wide memory, guarded against concurrent
/// access. A refresh failure never clears the prior token ("stale-but-usable"
/// semantics) — callers observe the old token or none, never an error.
pub struct TokenManager {
    acquirer: Arc<dyn TokenAcquirer>,
    state: Mutex<TokenState>,
    /// Serializes `refresh_now` calls so overlapping triggers coalesce onto
    /// one in-flight acquisition instead of racing the upstream endpoint.
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_count: AtomicU64,
    failure_count: AtomicU64,
    last_failure_reason: Mutex<Option<String>>,
}

impl TokenManager {
    pub fn new(acquirer: Arc<dyn TokenAcquirer>) -> Self {
        Self {
            acquirer,
            state: Mutex::new(TokenState {
                token: None,
                acquired_at: None,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_failure_reason: Mutex::new(None),
        }
    }

    /// Returns the current token, if any. Never blocks on network access.
    pub fn current_token(&self) -> Option<String> {
        self.state.lock().unwrap().token.clone()
    }

    /// Performs the acquire procedure and installs the result atomically.
    /// On failure, the prior token (if any) remains current.
    pub async fn refresh_now(&self) -> anyhow::Result<String> {
        let _guard = self.refresh_lock.lock().await;

        match self.acquirer.acquire().await {
            Ok(token) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.token = Some(token.clone());
                    state.acquired_at = Some(Utc::now());
                }
                self.refresh_count.fetch_add(1, Ordering::Relaxed);
                debug!("token refreshed");
                Ok(token)
            }
            Err(e) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                *self.last_failure_reason.lock().unwrap() = Some(e.to_string());
                error!(error = %e, "token refresh failed, keeping stale token");
                Err(e)
            }
        }
    }

    pub fn health(&self) -> TokenHealth {
        TokenHealth {
            refresh_count: self.refresh_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }

    pub fn last_failure_reason(&self) -> Option<String> {
        self.last_failure_reason.lock().unwrap().clone()
    }

    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().acquired_at
    }
}

/// Drives [`TokenManager::refresh_now`] on a jittered interval, participating
/// in the process's graceful-shutdown broadcast as a [`Service`].
pub struct TokenRefreshService {
    manager: Arc<TokenManager>,
    interval: Duration,
    jitter_pct: f64,
    cancel: CancellationToken,
}

impl TokenRefreshService {
    pub fn new(manager: Arc<TokenManager>, interval: Duration, jitter_pct: f64) -> Self {
        Self {
            manager,
            interval,
            jitter_pct,
            cancel: CancellationToken::new(),
        }
    }

    /// Picks the next wake-up delay: `interval * (1 + U(-jitter, +jitter))`.
    fn next_delay(&self) -> Duration {
        let jitter = rand::rng().random_range(-self.jitter_pct..=self.jitter_pct);
        let scaled = self.interval.as_secs_f64() * (1.0 + jitter);
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

#[async_trait]
impl Service for TokenRefreshService {
    fn name(&self) -> &'static str {
        "token_refresh"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        // Prime the cache before serving any requests.
        if let Err(e) = self.manager.refresh_now().await {
            error!(error = %e, "initial token acquisition failed");
        }

        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = self.manager.refresh_now().await {
                        error!(error = %e, "scheduled token refresh failed");
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!("token refresh service stopping");
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
    use std::sync::atomic::AtomicUsize;

    struct FakeAcquirer {
        calls: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl TokenAcquirer for FakeAcquirer {
        async fn acquire(&self) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("simulated failure");
            }
            Ok(format!("token-{n}"))
        }
    }

    #[tokio::test]
    async fn refresh_now_installs_token() {
        let acquirer = Arc::new(FakeAcquirer {
            calls: AtomicUsize::new(0),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = TokenManager::new(acquirer);

        assert_eq!(manager.current_token(), None);
        let token = manager.refresh_now().await.unwrap();
        assert_eq!(token, "token-0");
        assert_eq!(manager.current_token(), Some("token-0".to_string()));
        assert_eq!(manager.health().refresh_count, 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_token() {
        let acquirer = Arc::new(FakeAcquirer {
            calls: AtomicUsize::new(0),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = TokenManager::new(acquirer.clone());

        manager.refresh_now().await.unwrap();
        assert_eq!(manager.current_token(), Some("token-0".to_string()));

        acquirer.fail_next.store(true, Ordering::SeqCst);
        let result = manager.refresh_now().await;
        assert!(result.is_err());

        // Stale-but-usable: the old token is still current.
        assert_eq!(manager.current_token(), Some("token-0".to_string()));
        assert_eq!(manager.health().failure_count, 1);
        assert!(manager.last_failure_reason().is_some());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let manager = Arc::new(TokenManager::new(Arc::new(FakeAcquirer {
            calls: AtomicUsize::new(0),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        })));
        let service = TokenRefreshService::new(manager, Duration::from_secs(270), 0.1);
        for _ in 0..100 {
            let delay = service.next_delay();
            assert!(delay.as_secs_f64() >= 270.0 * 0.9 - 0.01);
            assert!(delay.as_secs_f64() <= 270.0 * 1.1 + 0.01);
        }
    }
}
