//! Error types for HTTP framing.

use hyper::StatusCode;
use thiserror::Error;

/// Errors raised while reading requests or handing back responses.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request body could not be read.
    #[error("malformed request: {message}")]
    Malformed { message: String },

    /// The body exceeded the configured limit.
    #[error("request body exceeds {limit} byte limit")]
    BodyTooLarge { limit: usize },

    /// The response head could not be assembled.
    #[error("invalid response head: {0}")]
    Head(#[from] hyper::http::Error),

    /// The connection is gone, or no request is waiting for a response.
    #[error("client connection closed")]
    Closed,

    /// A writer panicked while holding the response lock.
    #[error("response writer lock poisoned")]
    Poisoned,
}

impl HttpError {
    /// Creates a malformed-request error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Status to answer with when this error ends a request.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Malformed { .. } => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Head(_) | Self::Closed | Self::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
