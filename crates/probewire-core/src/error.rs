use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Transport-level HTTP failure.
///
/// Only failures flagged `transient` (timeouts, refused or reset
/// connections) are eligible for retry by the request engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
    transient: bool,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_transient(&self) -> bool {
        self.transient
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Rejections raised by per-request response validators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response did not contain expected marker '{marker}'")]
    MissingMarker { marker: String },
    #[error("response was empty")]
    EmptyResponse,
    #[error("{0}")]
    Rejected(String),
}

/// Coarse classification of [`ClientError`], used by callers that branch on
/// failure category rather than on the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Authentication,
    Validation,
    Deserialization,
    Server,
    InvalidRequest,
    Cancelled,
    Internal,
}

/// Top-level error type for every engine and streaming operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("response validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not deserialize response: {0}")]
    Deserialization(String),

    #[error("server returned status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error("page {page} failed ({} page(s) abandoned): {source}", abandoned.len())]
    PageFetch {
        page: usize,
        abandoned: Vec<usize>,
        source: Box<ClientError>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Deserialization(_) => ErrorKind::Deserialization,
            Self::Server { .. } => ErrorKind::Server,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::PageFetch { source, .. } => source.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Transport => "client.transport",
            ErrorKind::Authentication => "client.authentication",
            ErrorKind::Validation => "client.validation",
            ErrorKind::Deserialization => "client.deserialization",
            ErrorKind::Server => "client.server",
            ErrorKind::InvalidRequest => "client.invalid_request",
            ErrorKind::Cancelled => "client.cancelled",
            ErrorKind::Internal => "client.internal",
        }
    }

    /// Whether the request engine may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(error) if error.is_transient())
    }

    /// Unwraps page context added by the streamer.
    pub fn root(&self) -> &ClientError {
        match self {
            Self::PageFetch { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        Self::Deserialization(error.to_string())
    }
}
