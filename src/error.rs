//! Error types for client operations.

use thiserror::Error;

/// Result type for all client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// No active connection was established within the configured timeout
    #[error("connection not established within timeout")]
    ConnectionTimeout,

    /// Operation attempted while the connection is not active.
    /// Surfaced immediately, without retry.
    #[error("connection is not active")]
    ConnectionInactive,

    /// Publish/subscribe/pull failure from the streaming transport
    #[error("transport error: {0}")]
    Transport(String),

    /// Control plane returned a non-2xx response
    #[error("control plane returned {status}: {body}")]
    ControlPlane {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the server
        body: String,
    },

    /// Asynchronous subscription setup failed. Emitted as a consumer
    /// event rather than returned, since no caller is waiting on it.
    #[error("subscription setup failed: {0}")]
    Subscription(String),

    /// Authentication handshake with the control plane failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Received a malformed or unexpected control-plane frame
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// I/O error on the control socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire frame serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request to the control plane failed before a response arrived
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Returns true if this error came from the streaming transport layer
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this error is a synchronous precondition failure
    /// (the connection object must be closed and recreated).
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::ConnectionInactive)
    }

    /// Create a transport error from any displayable source
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Create a subscription-setup error from any displayable source
    pub fn subscription(message: impl std::fmt::Display) -> Self {
        Self::Subscription(message.to_string())
    }
}
