//! Session access policy.
//!
//! The collection layer consults the policy once per discovered session,
//! before any output for that session exists, so a rejected session never
//! leaks a partial response.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::group::{GroupError, WebAccess};

/// Credentials supplied by the client through basic authentication.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Supplied username.
    pub username: Option<String>,
    /// Supplied password.
    pub password: Option<String>,
}

impl Credentials {
    /// Builds credentials from a username and password pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Decodes an `Authorization` header using the Basic scheme.
    ///
    /// Returns `None` for other schemes and undecodable payloads.
    #[must_use]
    pub fn from_authorization(value: &str) -> Option<Self> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let (username, password) = match text.split_once(':') {
            Some((username, password)) => (username, Some(password)),
            None => (text.as_str(), None),
        };
        Some(Self {
            username: non_empty(username),
            password: password.and_then(non_empty),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_owned())
}

/// Reasons a session refuses a client.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AccessError {
    /// The session demands credentials and none were supplied.
    #[error("authentication required")]
    Required,
    /// Supplied credentials do not match the session.
    #[error("authentication failed")]
    Failed,
}

impl From<AccessError> for GroupError {
    fn from(error: AccessError) -> Self {
        match error {
            AccessError::Required => Self::authentication_required(error.to_string()),
            AccessError::Failed => Self::permission_denied(error.to_string()),
        }
    }
}

/// Server-wide access policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    require_credentials: bool,
}

impl AccessPolicy {
    /// Creates a policy; `require_credentials` forces authentication for
    /// every session.
    #[must_use]
    pub const fn new(require_credentials: bool) -> Self {
        Self {
            require_credentials,
        }
    }

    /// Checks supplied credentials against a session's access descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Required`] when the session demands
    /// credentials the client did not supply, and [`AccessError::Failed`]
    /// when they do not match.
    pub fn check(
        &self,
        access: &WebAccess,
        supplied: Option<&Credentials>,
    ) -> Result<(), AccessError> {
        if access.username.is_none() && !self.require_credentials {
            return Ok(());
        }
        let username = supplied.and_then(|credentials| credentials.username.as_deref());
        let password = supplied.and_then(|credentials| credentials.password.as_deref());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(AccessError::Required);
        };
        let user_mismatch = access
            .username
            .as_deref()
            .is_some_and(|expected| expected != username);
        let password_mismatch = access
            .password
            .as_deref()
            .is_some_and(|expected| expected != password);
        if user_mismatch || password_mismatch {
            return Err(AccessError::Failed);
        }
        Ok(())
    }
}
