use clap::Parser;

/// Property appraisal scraping engine.
///
/// Runs the background services that drive the scrape:
/// - worker_pool: claims and processes scrape jobs
/// - scheduler: re-enqueues monitored searches on a cadence
/// - token_refresh: keeps the upstream bearer token current
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq)]
pub enum ServiceName {
    /// Claims and processes scrape jobs
    WorkerPool,
    /// Re-enqueues monitored searches on a cadence
    Scheduler,
    /// Keeps the upstream bearer token current
    TokenRefresh,
}

impl ServiceName {
    /// Get all available services
    pub fn all() -> Vec<ServiceName> {
        vec![
            ServiceName::WorkerPool,
            ServiceName::Scheduler,
            ServiceName::TokenRefresh,
        ]
    }

    /// Convert to string for service registration
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::WorkerPool => "worker_pool",
            ServiceName::Scheduler => "scheduler",
            ServiceName::TokenRefresh => "token_refresh",
        }
    }
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}
