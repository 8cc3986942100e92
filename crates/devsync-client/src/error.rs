//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure: connection refused, reset, timeout.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Push channel transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A bearer token could not be obtained or refreshed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Backend answered with a 4xx/5xx status.
    #[error("HTTP error ({status}): {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// Resource not found (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource conflict (HTTP 409).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Payload matched neither known workspace shape.
    #[error("Unrecognized workspace format: {0}")]
    UnrecognizedFormat(String),

    /// Workspace was accepted but no status appeared while polling.
    #[error("Workspace {namespace}/{name} accepted, status still pending after {attempts} attempts")]
    CreatePending {
        /// Namespace of the accepted workspace.
        namespace: String,
        /// Name of the accepted workspace.
        name: String,
        /// Number of status polls performed.
        attempts: u32,
    },

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_)) || matches!(self, Error::Http { status: 404, .. })
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_)) || matches!(self, Error::Http { status: 409, .. })
    }

    /// Check if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
            || matches!(self, Error::Http { status, .. } if *status == 401 || *status == 403)
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Http { status, .. } if *status >= 500)
    }

    /// Errors a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::WebSocket(_) | Error::CreatePending { .. }
        ) || self.is_server_error()
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
