//! Error taxonomy for the ingestion pipeline.
//!
//! Per-item errors are values: the workflow tracker decides whether an error
//! counts as a failure or as a "not ready yet" skip. Only application plumbing
//! (startup, config loading) uses `anyhow`.

use thiserror::Error;

/// Substrings a scanner returns while an asynchronous report is still being built.
const REPORT_PENDING_MARKERS: &[&str] = &[
    "being generated",
    "report is not ready",
    "report generation in progress",
];

#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid configuration for a tool.
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing required credential.
    #[error("missing credential: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Asynchronous remote job still running.
    #[error("not ready yet: {0}")]
    NotReady(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn status(status: reqwest::StatusCode, body: String) -> Self {
        Self::Status {
            status: status.as_u16(),
            body,
        }
    }

    /// Network failures and non-2xx responses.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Http(_) | SyncError::Status { .. })
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, SyncError::NotReady(_))
    }

    /// Translate a remote error whose message says the report is still being
    /// generated into [`SyncError::NotReady`]. Other errors pass through.
    pub fn into_pending_if_generating(self) -> Self {
        if !self.is_transient() {
            return self;
        }

        let message = self.to_string();
        let lowered = message.to_lowercase();
        if REPORT_PENDING_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            SyncError::NotReady(message)
        } else {
            self
        }
    }
}
