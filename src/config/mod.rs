//! Configuration for the scraping engine.
//!
//! Loaded via figment (defaults layered under environment variables) with
//! flexible duration parsing that accepts either a bare millisecond integer
//! or a unit-suffixed string such as `"30s"` or `"4m 30s"`.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Top-level configuration for the process.
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Log level for the application.
    ///
    /// This value is used to set the log level for this application's target
    /// specifically, e.g. "debug" expands to "warn,parcelwatch=debug,...".
    /// Defaults to "info" if not specified.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Postgres connection string backing both the store and the broker.
    pub database_url: String,
    /// Graceful shutdown grace period.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
    /// Base URL of the upstream property-appraisal search API.
    pub upstream_base_url: String,
    /// Base URL of the token acquisition endpoint.
    pub auth_base_url: String,
    /// Base URL of the LLM completions endpoint used by the NL translator.
    /// When unset, the translator always takes the fallback path.
    pub llm_base_url: Option<String>,
    /// API key for the LLM endpoint.
    pub llm_api_key: Option<String>,

    /// Engine tuning knobs (C1-C8).
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Tuning knobs for the scraping engine itself, independent of process
/// bootstrap concerns. Field names track the options table in the
/// specification.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// Worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Broker retry count before a job is terminally failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Retry backoff base.
    #[serde(
        default = "default_backoff_base",
        deserialize_with = "deserialize_duration"
    )]
    pub backoff_base: Duration,
    /// Descending page-size ladder attempted by the API client.
    #[serde(default = "default_page_sizes")]
    pub page_sizes: Vec<u32>,
    /// C3 per-term minimum spacing.
    #[serde(
        default = "default_min_spacing",
        deserialize_with = "deserialize_duration"
    )]
    pub min_spacing: Duration,
    /// C3 lazy-eviction TTL for stale dedup entries.
    #[serde(
        default = "default_dedup_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub dedup_ttl: Duration,
    /// C2 auto-refresh interval.
    #[serde(
        default = "default_token_refresh",
        deserialize_with = "deserialize_duration"
    )]
    pub token_refresh: Duration,
    /// C2 jitter fraction applied to the refresh interval.
    #[serde(default = "default_token_jitter_pct")]
    pub token_jitter_pct: f64,
    /// Per-HTTP-request timeout.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    /// Per-job hard timeout.
    #[serde(
        default = "default_job_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub job_timeout: Duration,
    /// Query year for the upstream filter. Defaults to the current year at
    /// startup if left unset by the caller.
    pub year: Option<i32>,
    /// C7 scan tick interval.
    #[serde(
        default = "default_monitored_scan_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub monitored_scan_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            page_sizes: default_page_sizes(),
            min_spacing: default_min_spacing(),
            dedup_ttl: default_dedup_ttl(),
            token_refresh: default_token_refresh(),
            token_jitter_pct: default_token_jitter_pct(),
            request_timeout: default_request_timeout(),
            job_timeout: default_job_timeout(),
            year: None,
            monitored_scan_interval: default_monitored_scan_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(2)
}

fn default_page_sizes() -> Vec<u32> {
    vec![1000, 500, 100, 50]
}

fn default_min_spacing() -> Duration {
    Duration::from_secs(5)
}

fn default_dedup_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_token_refresh() -> Duration {
    Duration::from_secs(270)
}

fn default_token_jitter_pct() -> f64 {
    0.1
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_monitored_scan_interval() -> Duration {
    Duration::from_secs(60)
}

/// Duration parser with milliseconds as the default bare-number unit, since
/// every duration-shaped option in the engine config is named `*Ms`.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::MilliSecond)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and
/// string values.
///
/// - `5000` -> 5 seconds (numbers are milliseconds)
/// - `"30s"` -> 30 seconds
/// - `"4m 30s"` -> 4 minutes 30 seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number of milliseconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "invalid duration '{value}': {e}. Examples: '5000' (5000ms), '30s', '4m 30s'"
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("duration conversion error: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_millis(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("duration cannot be negative"));
            }
            Ok(Duration::from_millis(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
