//! Error taxonomy for the scraping engine (C8).
//!
//! [`EngineError`] classifies every failure the core components (C1-C5) can
//! raise into an [`ErrorKind`] whose `Display` produces the exact
//! uppercase-snake token embedded in a failed job's `error` column. The
//! worker (C4) consults [`EngineError::is_retryable`] rather than matching on
//! variants directly, so the retry policy lives in one place.

use std::fmt;

/// Convenience alias used throughout the engine, mirroring the originating
/// codebase's `crate::error::Result` convention.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The classification table from the specification's error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// C1 observed a 401; the current token is no longer valid.
    TokenExpired,
    /// C1 observed a 5xx, 409, 504, or a transport-level failure.
    TransientUpstream,
    /// C1 exhausted every page size in the ladder without success.
    AllPageSizesFailed,
    /// C2 could not produce a token (no cached token and refresh failed).
    NoToken,
    /// C5 failed to persist a batch.
    StoreError,
    /// The request itself was malformed; never retried.
    ValidationError,
    /// Not a failure: the translator fell back to text search. Carried only
    /// for logging, never surfaced as a job failure.
    TranslatorFallback,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ErrorKind::TokenExpired => "TOKEN_EXPIRED",
            ErrorKind::TransientUpstream => "TRANSIENT_UPSTREAM",
            ErrorKind::AllPageSizesFailed => "ALL_PAGE_SIZES_FAILED",
            ErrorKind::NoToken => "NO_TOKEN",
            ErrorKind::StoreError => "STORE_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::TranslatorFallback => "TRANSLATOR_FALLBACK",
        };
        f.write_str(token)
    }
}

/// A classified engine failure.
///
/// Variants carry enough context for a human-readable `error` string
/// (`kind + short tail of the underlying message`) without forcing every
/// caller to format that string themselves.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("upstream returned 401 (token expired)")]
    TokenExpired,

    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    #[error("all page sizes failed, last reason: {0}")]
    AllPageSizesFailed(String),

    #[error("no token available: {0}")]
    NoToken(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    /// Any non-2xx status the policy table doesn't special-case.
    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),

    /// Network failure or a parse failure not matching the truncation shape.
    #[error("transport error: {0}")]
    Transport(String),
}

impl EngineError {
    /// Classifies this error into the taxonomy's `ErrorKind`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TokenExpired => ErrorKind::TokenExpired,
            EngineError::TransientUpstream(_) => ErrorKind::TransientUpstream,
            EngineError::HttpStatus(_) => ErrorKind::TransientUpstream,
            EngineError::Transport(_) => ErrorKind::TransientUpstream,
            EngineError::AllPageSizesFailed(_) => ErrorKind::AllPageSizesFailed,
            EngineError::NoToken(_) => ErrorKind::NoToken,
            EngineError::StoreError(_) => ErrorKind::StoreError,
            EngineError::ValidationError(_) => ErrorKind::ValidationError,
        }
    }

    /// Whether the broker should retry a job that failed with this error.
    ///
    /// `VALIDATION_ERROR` is the only kind that is never retried; everything
    /// else either gets an inline recovery (`TOKEN_EXPIRED`) or a backoff
    /// retry up to `maxAttempts`.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::ValidationError)
    }

    /// Formats the `error` column value for a failed job: the classified
    /// kind token followed by a short tail of the underlying message.
    pub fn job_error_string(&self) -> String {
        const MAX_TAIL: usize = 200;
        let message = self.to_string();
        let tail: String = message.chars().take(MAX_TAIL).collect();
        format!("{}: {}", self.kind(), tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_matches_taxonomy_tokens() {
        assert_eq!(ErrorKind::TokenExpired.to_string(), "TOKEN_EXPIRED");
        assert_eq!(
            ErrorKind::TransientUpstream.to_string(),
            "TRANSIENT_UPSTREAM"
        );
        assert_eq!(
            ErrorKind::AllPageSizesFailed.to_string(),
            "ALL_PAGE_SIZES_FAILED"
        );
        assert_eq!(ErrorKind::NoToken.to_string(), "NO_TOKEN");
        assert_eq!(ErrorKind::StoreError.to_string(), "STORE_ERROR");
        assert_eq!(ErrorKind::ValidationError.to_string(), "VALIDATION_ERROR");
    }

    #[test]
    fn validation_error_is_not_retryable() {
        let err = EngineError::ValidationError("bad term".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(EngineError::TokenExpired.is_retryable());
        assert!(EngineError::TransientUpstream("boom".into()).is_retryable());
        assert!(EngineError::AllPageSizesFailed("504".into()).is_retryable());
        assert!(EngineError::NoToken("refresh failed".into()).is_retryable());
        assert!(EngineError::StoreError("pool closed".into()).is_retryable());
    }

    #[test]
    fn job_error_string_embeds_kind_token() {
        let err = EngineError::TransientUpstream("connection reset".into());
        let formatted = err.job_error_string();
        assert!(formatted.starts_with("TRANSIENT_UPSTREAM: "));
        assert!(formatted.contains("connection reset"));
    }

    #[test]
    fn http_status_maps_to_transient_upstream() {
        assert_eq!(EngineError::HttpStatus(409).kind(), ErrorKind::TransientUpstream);
        assert_eq!(EngineError::HttpStatus(504).kind(), ErrorKind::TransientUpstream);
    }
}
