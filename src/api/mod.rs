//! Paginated, authenticated upstream API client with adaptive page-size
//! fallback and truncation recovery (C1).

mod parse;

pub use parse::{build_error_snippet, parse_json_with_context};

use crate::error::EngineError;
use crate::models::Property;
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Safety cap on the number of pages fetched within a single page-size
/// attempt (§4.1 step 4).
const MAX_PAGE_INDEX: u32 = 100;

/// Outcome of a successful [`ApiClient::fetch`] call.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub total_count: u64,
    pub results: Vec<RawProperty>,
    pub page_size_used: u32,
    /// Set when the page-index safety cap was hit; the call still succeeds
    /// but callers may want to log the shortfall.
    pub truncated_warning: bool,
}

/// The raw upstream record shape before mapping to [`Property`] (§6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct RawProperty {
    pub pid: serde_json::Value,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "propType")]
    pub prop_type: Option<String>,
    pub city: Option<String>,
    #[serde(rename = "streetPrimary")]
    pub street_primary: Option<String>,
    #[serde(rename = "assessedValue")]
    pub assessed_value: Option<i64>,
    #[serde(rename = "appraisedValue")]
    pub appraised_value: Option<i64>,
    #[serde(rename = "geoID")]
    pub geo_id: Option<String>,
    #[serde(rename = "legalDescription")]
    pub legal_description: Option<String>,
}

impl RawProperty {
    /// Maps a raw upstream record to the store's [`Property`] shape.
    /// Missing numeric fields become 0; missing strings become empty;
    /// missing nullable fields become null (§6.1).
    pub fn into_property(self, source_term: &str) -> Property {
        let now = Utc::now();
        Property {
            property_id: match self.pid {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            },
            name: self.display_name.unwrap_or_default(),
            prop_type: self.prop_type.unwrap_or_default(),
            city: self.city,
            property_address: self.street_primary.unwrap_or_default(),
            assessed_value: self.assessed_value.unwrap_or(0),
            appraised_value: self.appraised_value.unwrap_or(0),
            geo_id: self.geo_id,
            description: self.legal_description,
            source_term: source_term.to_string(),
            scraped_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "totalProperty")]
    total_property: TotalProperty,
    #[serde(default)]
    results: Vec<RawProperty>,
}

#[derive(Debug, Deserialize)]
struct TotalProperty {
    #[serde(rename = "propertyCount")]
    property_count: u64,
}

#[derive(Debug, Serialize)]
struct YearFilter<'a> {
    operator: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct TermFilter<'a> {
    operator: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SearchRequestBody<'a> {
    #[serde(rename = "pYear")]
    p_year: YearFilter<'a>,
    #[serde(rename = "fullTextSearch")]
    full_text_search: TermFilter<'a>,
}

/// Authenticated, paginated client for the upstream property search API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    page_sizes: Vec<u32>,
}

impl ApiClient {
    /// Builds the client with explicit connect/read/total timeouts. No
    /// persistent cookie jar is configured since auth is header-based.
    pub fn new(base_url: String, page_sizes: Vec<u32>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url,
            page_sizes,
        }
    }

    /// Fetches every result for `term`/`year`, walking the page-size ladder
    /// on truncation and stopping at the first page size that completes
    /// cleanly (§4.1).
    pub async fn fetch(&self, token: &str, term: &str, year: i32) -> Result<FetchOutcome, EngineError> {
        let year_str = year.to_string();
        let mut last_reason = String::from("no page size attempted");

        'sizes: for &page_size in &self.page_sizes {
            debug!(term, page_size, "attempting page size");
            let mut accumulated: Vec<RawProperty> = Vec::new();
            let mut total_count: u64 = 0;

            for page in 1..=MAX_PAGE_INDEX {
                let body = SearchRequestBody {
                    p_year: YearFilter {
                        operator: "=",
                        value: &year_str,
                    },
                    full_text_search: TermFilter {
                        operator: "match",
                        value: term,
                    },
                };

                let response = self
                    .client
                    .post(format!("{}/searchfulltext", self.base_url))
                    .query(&[("page", page.to_string()), ("pageSize", page_size.to_string())])
                    .header("Authorization", token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| EngineError::Transport(e.to_string()))?;

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED {
                    return Err(EngineError::TokenExpired);
                }
                if status == StatusCode::CONFLICT || status == StatusCode::GATEWAY_TIMEOUT {
                    last_reason = format!("HTTP {} at page size {}", status.as_u16(), page_size);
                    continue 'sizes;
                }
                if !status.is_success() {
                    return Err(EngineError::HttpStatus(status.as_u16()));
                }

                let text = response
                    .text()
                    .await
                    .map_err(|e| EngineError::Transport(e.to_string()))?;

                if is_truncated(&text) {
                    last_reason = format!("truncated body at page {page}, page size {page_size}");
                    continue 'sizes;
                }

                let parsed: SearchResponse = parse_json_with_context(&text)
                    .map_err(|e| EngineError::Transport(e.to_string()))?;

                if page == 1 {
                    total_count = parsed.total_property.property_count;
                }

                let page_len = parsed.results.len();
                accumulated.extend(parsed.results);

                let cumulative = accumulated.len() as u64;
                if (page_len as u32) < page_size || cumulative >= total_count {
                    return Ok(FetchOutcome {
                        total_count,
                        results: accumulated,
                        page_size_used: page_size,
                        truncated_warning: false,
                    });
                }
            }

            // Safety cap hit: not a failure, return what we have with a warning.
            warn!(term, page_size, "page index safety cap reached");
            return Ok(FetchOutcome {
                total_count,
                results: accumulated,
                page_size_used: page_size,
                truncated_warning: true,
            });
        }

        Err(EngineError::AllPageSizesFailed(last_reason))
    }
}

/// A response body is "truncated" when its last non-whitespace character is
/// neither `}` nor `]`.
pub fn is_truncated(body: &str) -> bool {
    match body.trim_end().chars().last() {
        Some('}') | Some(']') => false,
        Some(_) => true,
        None => true,
    }
}
