//! Error types for the traceability bus client.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by result handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure opening or driving a single transport link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint URL could not be turned into connection options.
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    /// The endpoint uses a framing this build cannot speak.
    #[error("unsupported transport scheme: {0}")]
    Unsupported(String),
    /// The broker or network rejected the connection.
    #[error("connection refused: {0}")]
    Refused(String),
    /// The link closed before (or while) it was usable.
    #[error("connection closed")]
    Closed,
    /// No CONNACK within the connect timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    /// Local I/O or client-queue failure.
    #[error("transport i/o: {0}")]
    Io(String),
}

/// Errors surfaced to callers of the session and command facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Every candidate endpoint failed.
    #[error("failed to connect with all {attempts} candidate endpoints; last error: {last}")]
    ConnectFailed {
        attempts: usize,
        last: TransportError,
    },
    /// The attempt was cancelled by `disconnect` or `force_reconnect`.
    #[error("connect attempt cancelled")]
    ConnectCancelled,
    /// A command was issued while the session was not ready.
    #[error("not connected to broker")]
    NotConnected,
    /// The command payload could not be encoded as JSON.
    #[error("payload serialization failed: {0}")]
    Serialization(String),
    /// The link refused the publish.
    #[error("publish to {topic} failed: {source}")]
    Publish {
        topic: String,
        source: TransportError,
    },
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

/// Failures contained inside the dispatcher. They are logged and counted,
/// never propagated into the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Inbound payload was not UTF-8 JSON.
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },
    /// A handler returned an error or panicked.
    #[error("handler #{index} for {topic} failed: {reason}")]
    HandlerFailure {
        topic: String,
        index: usize,
        reason: String,
    },
}

/// Errors loading client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid broker url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid broker port {0:?}")]
    Port(String),
    /// MQTT keep-alive must be zero (disabled) or at least one second.
    #[error("keep-alive must be 0 or at least 1s, got {0:?}")]
    KeepAlive(Duration),
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
}
