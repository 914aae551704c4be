//! Error taxonomy for a reconciliation run.
//!
//! Every variant is terminal for the current run: nothing is retried
//! automatically, and partial progress is reported rather than rolled back.

use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The descriptor references a resolver, field, or placeholder that does
    /// not exist. Should be unreachable if the offline generator validated
    /// its input correctly.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A resolver lookup found no candidate for a user-supplied identifier.
    /// A multi-match lookup degrades to a warning, not this error.
    #[error("{0}")]
    Lookup(String),

    /// The API returned a non-success status. Carries everything needed to
    /// debug the failure without re-issuing the request.
    #[error("Request to {url} failed. Status: {status}. {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// A poll loop exceeded its wall-clock budget.
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// A polled resource or order reached a declared erred terminal state.
    #[error("Remote operation finished in error state '{state}'.{}", .detail.as_deref().map(|d| format!(" {d}")).unwrap_or_default())]
    RemoteErred {
        state: String,
        detail: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
