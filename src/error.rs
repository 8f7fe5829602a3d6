use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ProfileError {
    #[error("invalid event {id}: {reason}")]
    InvalidEvent { id: String, reason: String },

    #[error("degenerate region for {variable} {period}: {reason}")]
    DegenerateRegion {
        variable: String,
        period: String,
        reason: String,
    },

    #[error("invalid variable name: {0}")]
    InvalidVariable(String),

    #[error("invalid fetch mode: {0}")]
    InvalidMode(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read catalog at {0}")]
    CatalogRead(PathBuf),

    #[error("failed to parse catalog: {0}")]
    CatalogParse(String),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),

    #[error("worker pool setup failed: {0}")]
    WorkerPool(String),

    #[error("interrupt handler setup failed: {0}")]
    Interrupt(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("profile for event {event_id} is incomplete: {missing} required file(s) missing")]
    MergeIncomplete { event_id: String, missing: usize },

    #[error("merge failed for event {event_id}: {reason}")]
    MergeFailure { event_id: String, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Classification of a failed fetch. Transient kinds are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum FetchErrorKind {
    Network,
    Timeout,
    Status(u16),
    Payload,
    Io,
    Cancelled,
}

impl FetchErrorKind {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchErrorKind::Network | FetchErrorKind::Timeout => true,
            FetchErrorKind::Status(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            FetchErrorKind::Payload | FetchErrorKind::Io | FetchErrorKind::Cancelled => false,
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Network => write!(f, "network"),
            FetchErrorKind::Timeout => write!(f, "timeout"),
            FetchErrorKind::Status(status) => write!(f, "status {status}"),
            FetchErrorKind::Payload => write!(f, "payload"),
            FetchErrorKind::Io => write!(f, "io"),
            FetchErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FetchErrorKind::Cancelled, "fetch abandoned by cancellation")
    }

    pub fn io(err: std::io::Error) -> Self {
        Self::new(FetchErrorKind::Io, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(FetchErrorKind::Status(503).is_transient());
        assert!(!FetchErrorKind::Status(404).is_transient());
        assert!(!FetchErrorKind::Cancelled.is_transient());
    }

    #[test]
    fn fetch_error_display() {
        let err = FetchError::new(FetchErrorKind::Status(404), "not found");
        assert_eq!(err.to_string(), "status 404: not found");
    }
}
