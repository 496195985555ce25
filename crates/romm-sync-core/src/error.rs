//! Error types for romm-sync-core

use thiserror::Error;

/// Main error type for romm-sync operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request to {url} failed after {attempts} attempt(s): {reason}")]
    TransientNetwork {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("None of the requested platforms exist on the server: {}", .0.join(", "))]
    UnknownPlatforms(Vec<String>),

    #[error("No '{name}' collection found on the server")]
    CollectionNotFound { name: String },

    #[error("{failed} of {total} platform(s) failed to sync")]
    PartialSync { failed: usize, total: usize },

    #[error("Invalid catalog record: {0}")]
    InvalidRecord(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns `true` for errors that must terminate the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_)
                | Self::Config(_)
                | Self::UnknownPlatforms(_)
                | Self::CollectionNotFound { .. }
        )
    }

    /// Returns `true` if the error represents a missing remote resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for romm-sync operations
pub type Result<T> = std::result::Result<T, Error>;
