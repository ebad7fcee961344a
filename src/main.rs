use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use parcelwatch::api::ApiClient;
use parcelwatch::broker::PgBroker;
use parcelwatch::cli::{Args, ServiceName};
use parcelwatch::config::Config;
use parcelwatch::gate::DedupGate;
use parcelwatch::logging;
use parcelwatch::scheduler::SchedulerService;
use parcelwatch::services::manager::ServiceManager;
use parcelwatch::store::PgStore;
use parcelwatch::token::{HttpTokenAcquirer, TokenManager, TokenRefreshService};
use parcelwatch::worker::WorkerPoolService;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config: Config = figment::Figment::new()
        .merge(figment::providers::Env::raw())
        .extract()
        .expect("Failed to load config");

    logging::setup_logging(&config, args.tracing.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting parcelwatch"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");

    info!(
        workers = config.engine.workers,
        upstream_base_url = config.upstream_base_url,
        shutdown_timeout = format!("{:.2?}", config.shutdown_timeout),
        "configuration loaded"
    );

    let http_client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build shared reqwest client");

    let broker: Arc<dyn parcelwatch::broker::Broker> = Arc::new(PgBroker::new(db_pool.clone()));
    let store: Arc<dyn parcelwatch::store::Store> = Arc::new(PgStore::new(db_pool.clone()));

    let api_client = Arc::new(ApiClient::new(
        config.upstream_base_url.clone(),
        config.engine.page_sizes.clone(),
        config.engine.request_timeout,
    ));

    let token_acquirer = Arc::new(HttpTokenAcquirer::new(http_client.clone(), config.auth_base_url.clone()));
    let token_manager = Arc::new(TokenManager::new(token_acquirer));

    let gate = Arc::new(DedupGate::new(config.engine.min_spacing, config.engine.dedup_ttl));

    let year = config
        .engine
        .year
        .unwrap_or_else(|| chrono::Utc::now().format("%Y").to_string().parse().expect("current year is numeric"));

    let mut service_manager = ServiceManager::new();

    let worker_pool = Box::new(WorkerPoolService::new(
        broker.clone(),
        store.clone(),
        api_client.clone(),
        token_manager.clone(),
        config.engine.workers,
        config.engine.max_attempts,
        config.engine.backoff_base,
        config.engine.job_timeout,
    ));

    let scheduler = Box::new(SchedulerService::new(
        store.clone(),
        broker.clone(),
        gate.clone(),
        config.engine.monitored_scan_interval,
        year,
    ));

    let token_refresh = Box::new(TokenRefreshService::new(
        token_manager.clone(),
        config.engine.token_refresh,
        config.engine.token_jitter_pct,
    ));

    service_manager.register_service(ServiceName::WorkerPool.as_str(), worker_pool);
    service_manager.register_service(ServiceName::Scheduler.as_str(), scheduler);
    service_manager.register_service(ServiceName::TokenRefresh.as_str(), token_refresh);

    service_manager.spawn_all();

    let shutdown_timeout = config.shutdown_timeout;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("received ctrl+c, gracefully shutting down...");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm_stream.recv().await;
        info!("received SIGTERM, gracefully shutting down...");
    };

    #[cfg(not(unix))]
    let sigterm = async {
        std::future::pending::<()>().await;
    };

    let mut exit_code = 0;

    tokio::select! {
        (service_name, result) = service_manager.run() => {
            match result {
                parcelwatch::services::ServiceResult::GracefulShutdown => {
                    info!(service = service_name, "service completed gracefully");
                }
                parcelwatch::services::ServiceResult::NormalCompletion => {
                    warn!(service = service_name, "service completed unexpectedly");
                    exit_code = 1;
                }
                parcelwatch::services::ServiceResult::Error(e) => {
                    error!(service = service_name, error = ?e, "service failed");
                    exit_code = 1;
                }
            }

            match service_manager.shutdown(shutdown_timeout).await {
                Ok(elapsed) => {
                    info!(
                        remaining = format!("{:.2?}", shutdown_timeout.saturating_sub(elapsed)),
                        "graceful shutdown complete"
                    );
                }
                Err(pending_services) => {
                    warn!(
                        pending_count = pending_services.len(),
                        pending_services = ?pending_services,
                        "graceful shutdown elapsed - {} service(s) did not complete",
                        pending_services.len()
                    );
                    exit_code = if exit_code == 0 { 2 } else { exit_code };
                }
            }
        }
        _ = ctrl_c => {
            info!("user requested shutdown via ctrl+c");
            match service_manager.shutdown(shutdown_timeout).await {
                Ok(elapsed) => {
                    info!(
                        remaining = format!("{:.2?}", shutdown_timeout.saturating_sub(elapsed)),
                        "graceful shutdown complete"
                    );
                }
                Err(pending_services) => {
                    warn!(
                        pending_count = pending_services.len(),
                        pending_services = ?pending_services,
                        "graceful shutdown elapsed - {} service(s) did not complete",
                        pending_services.len()
                    );
                    exit_code = 2;
                }
            }
        }
        _ = sigterm => {
            info!("system requested shutdown via SIGTERM");
            match service_manager.shutdown(shutdown_timeout).await {
                Ok(elapsed) => {
                    info!(
                        remaining = format!("{:.2?}", shutdown_timeout.saturating_sub(elapsed)),
                        "graceful shutdown complete"
                    );
                }
                Err(pending_services) => {
                    warn!(
                        pending_count = pending_services.len(),
                        pending_services = ?pending_services,
                        "graceful shutdown elapsed - {} service(s) did not complete",
                        pending_services.len()
                    );
                    exit_code = 2;
                }
            }
        }
    }

    info!(exit_code, "application shutdown complete");
    std::process::exit(exit_code);
}
