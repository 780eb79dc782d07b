use crate::config::ValidationError;
use bytes::Bytes;
use hyper::StatusCode;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("No KBase session token")]
    MissingToken,

    #[error("Session token is not a valid header value")]
    InvalidToken,

    #[error("{0} not configured")]
    NotConfigured(&'static str),

    #[error("Authentication failed with status {status}: {message}")]
    AuthRejected { status: StatusCode, message: String },

    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus {
        status: StatusCode,
        url: String,
        body: Bytes,
    },

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Status code of the `{"error": ...}` envelope this error is rendered as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingToken | ProxyError::InvalidToken => StatusCode::UNAUTHORIZED,
            ProxyError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::AuthRejected { status, .. } => *status,
            ProxyError::UpstreamStatus { status, .. } => *status,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_)
            | ProxyError::InvalidUpstreamResponse(_)
            | ProxyError::Config(_)
            | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A backend answered 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProxyError::UpstreamStatus { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}
