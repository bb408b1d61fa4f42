//! Error types for the `flaretun` core library.

use thiserror::Error;

/// Result type alias using `flaretun` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `flaretun` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Binary acquisition or privilege failure. Aborts the run.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A create/delete/start/stop request to the host service manager failed.
    #[error("Service manager failed to {op} '{service}': {message}")]
    ServiceManager {
        op: &'static str,
        service: String,
        message: String,
    },

    /// The service status probe itself could not run.
    #[error("Service probe failed: {0}")]
    Probe(String),

    /// No public URL was observed before the deadline.
    #[error("Endpoint discovery failed: {0}")]
    Discovery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::ServiceManager`] for the given operation.
    pub fn service_manager(
        op: &'static str,
        service: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ServiceManager {
            op,
            service: service.into(),
            message: message.into(),
        }
    }

    /// Only setup failures abort the run; everything else degrades to a warning.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup(_))
    }
}
