//! Error taxonomy for provisioning operations.
//!
//! Providers map their failures onto these variants so the retry policy and
//! the orchestrator can decide what is worth another attempt and what is
//! not. Conflicts are normally absorbed by the managers and never reach the
//! caller.

use crate::stage::Stage;

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Bad slug, URL or reference. Nothing was touched.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("could not resolve reference: {0}")]
    AmbiguousReference(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Provider reports an existing resource in the way.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network hiccup, 5xx, 429. Worth retrying.
    #[error("transient error: {0}")]
    Transient(String),

    /// Auth or configuration problem. Retrying will not help.
    #[error("fatal provider error: {0}")]
    Fatal(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("timed out waiting for {host} to become ready (last config: {last})")]
    PromotionTimeout { host: String, last: serde_json::Value },

    #[error("record store error: {0}")]
    Store(String),

    #[error("record {id} is at stage {actual}, expected {expected}")]
    StageConflict {
        id: String,
        expected: Stage,
        actual: Stage,
    },
}

impl ProvisionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Transient(_))
    }

    /// Classify an HTTP failure status from a provider API.
    pub fn from_status(context: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let code = status.as_u16();
        let msg = format!("{context}: status={code} body={}", truncate(body, 300));
        if code == 401 || code == 403 {
            ProvisionError::Fatal(msg)
        } else if code == 409 {
            ProvisionError::Conflict(msg)
        } else if code == 404 {
            ProvisionError::NotFound(msg)
        } else if status.is_server_error() || code == 429 || code == 408 {
            ProvisionError::Transient(msg)
        } else {
            ProvisionError::Fatal(msg)
        }
    }
}

impl From<reqwest::Error> for ProvisionError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ProvisionError::from_status("http", status, &e.to_string());
        }
        if e.is_decode() {
            return ProvisionError::Fatal(format!("unexpected response body: {e}"));
        }
        ProvisionError::Transient(e.to_string())
    }
}

impl From<rusqlite::Error> for ProvisionError {
    fn from(e: rusqlite::Error) -> Self {
        ProvisionError::Store(e.to_string())
    }
}

/// Truncate on a char boundary, for notes and log lines.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
