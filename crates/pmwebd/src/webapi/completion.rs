//! Terminal reply for a finished request.
//!
//! Success closes any containers still open, in LIFO order. Failure reports
//! a JSON error body; when output was already streamed, the body follows
//! that partial output on the wire and the committed `200` stands.

use hyper::StatusCode;

use crate::group::GroupError;
use crate::http::ResponseFormat;

use super::baton::{Baton, StreamState};
use super::builder::quote;

/// Terminal reply for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status to report.
    pub status: StatusCode,
    /// Body encoding.
    pub format: ResponseFormat,
    /// Final body bytes.
    pub body: String,
}

impl Reply {
    /// Builds a JSON failure reply.
    pub fn failure(status: StatusCode, message: Option<&str>) -> Self {
        let message = message.map_or_else(|| quote("(none)"), quote);
        Self {
            status,
            format: ResponseFormat::Json,
            body: format!("{{\"success\":false,\"message\":{message}}}\r\n"),
        }
    }
}

/// Maps a collection failure onto an HTTP status.
#[must_use]
pub const fn status_for(error: &GroupError) -> StatusCode {
    error.status()
}

/// Builds the terminal reply and closes the baton's stream.
pub fn complete(baton: &mut Baton, outcome: Result<(), GroupError>) -> Reply {
    let reply = match outcome {
        Ok(()) => {
            let body = if baton.suffix.ever_opened() {
                let mut trailer = baton.suffix.drain();
                trailer.push_str("\r\n");
                trailer
            } else {
                match baton.format {
                    ResponseFormat::Json => "{\"success\":true}\r\n".to_owned(),
                    ResponseFormat::Text => String::new(),
                }
            };
            Reply {
                status: StatusCode::OK,
                format: baton.format,
                body,
            }
        }
        Err(error) => {
            let status = baton.status.unwrap_or_else(|| status_for(&error));
            Reply::failure(status, error.message())
        }
    };
    baton.state = StreamState::Closed;
    reply
}
