//! Failure taxonomy for calls to external services.
//!
//! Every embedding or generation call that fails is reported as a
//! [`ServiceError`] whose [`ErrorKind`] decides what happens next:
//!
//! | Kind | Retried | Meaning |
//! |------|---------|---------|
//! | [`ErrorKind::Quota`] | never | plan or billing limit reached |
//! | [`ErrorKind::RateLimit`] | yes | too many requests, back off |
//! | [`ErrorKind::Transient`] | yes | 5xx, timeout, dropped connection |
//! | [`ErrorKind::Other`] | never | anything else (4xx, bad payload) |
//!
//! Non-service failures (config, index, cache I/O) stay as plain
//! `anyhow::Error`. A `ServiceError` converts into `anyhow::Error` and can
//! be recovered with `downcast_ref::<ServiceError>()`.

use std::fmt;

/// Classification of a failed service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Quota,
    RateLimit,
    Transient,
    Other,
}

impl ErrorKind {
    /// Whether the retry layer should try the call again.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Quota => "quota",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::Transient => "transient",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A classified failure from the embedding or generation service.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{service} failed ({kind}): {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    /// Short label of the call site, e.g. `"embed"` or `"answer"`.
    pub service: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn quota(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, service, message)
    }

    pub fn rate_limit(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, service, message)
    }

    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, service, message)
    }

    pub fn other(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, service, message)
    }

    pub fn is_quota(&self) -> bool {
        self.kind == ErrorKind::Quota
    }
}

/// Find the [`ServiceError`] inside an `anyhow` chain, if there is one.
pub fn service_error(err: &anyhow::Error) -> Option<&ServiceError> {
    err.chain().find_map(|e| e.downcast_ref::<ServiceError>())
}

/// Classify a non-success HTTP response.
///
/// A 429 is a quota failure when the body names the quota or billing
/// condition; otherwise it is an ordinary rate limit.
pub fn classify_status(status: u16, body: &str) -> ErrorKind {
    match status {
        402 => ErrorKind::Quota,
        429 if mentions_quota(body) => ErrorKind::Quota,
        429 => ErrorKind::RateLimit,
        408 => ErrorKind::Transient,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Other,
    }
}

fn mentions_quota(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["insufficient_quota", "billing", "quota"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Classify a transport-level failure: no complete HTTP response was received.
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ErrorKind::Transient
    } else {
        ErrorKind::Other
    }
}
