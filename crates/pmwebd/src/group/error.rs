//! Failures reported by the collection layer.

use hyper::StatusCode;
use thiserror::Error;

/// Terminal failure of a collection call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroupError {
    /// Supplied credentials did not match the session.
    #[error("{message}")]
    PermissionDenied {
        /// Human-readable reason.
        message: String,
    },
    /// The session demands credentials the client did not supply.
    #[error("{message}")]
    AuthenticationRequired {
        /// Human-readable reason.
        message: String,
    },
    /// Any other failure.
    #[error("{}", .message.as_deref().unwrap_or("(none)"))]
    Failed {
        /// Human-readable reason, when one exists.
        message: Option<String>,
    },
}

impl GroupError {
    /// Creates a permission failure.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates an authentication-required failure.
    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::AuthenticationRequired {
            message: message.into(),
        }
    }

    /// Creates a generic failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: Some(message.into()),
        }
    }

    /// Creates a generic failure without a message.
    #[must_use]
    pub const fn unexplained() -> Self {
        Self::Failed { message: None }
    }

    /// HTTP status reported when no earlier status was recorded.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            Self::AuthenticationRequired { .. } => StatusCode::UNAUTHORIZED,
            Self::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message to report to the client, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::PermissionDenied { message } | Self::AuthenticationRequired { message } => {
                Some(message.as_str())
            }
            Self::Failed { message } => message.as_deref(),
        }
    }
}
