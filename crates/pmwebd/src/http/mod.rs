//! HTTP plumbing between `hyper` connections and the control loop.
//!
//! Incoming requests are read into an [`HttpRequest`]; responses leave
//! through a [`ResponseSink`] that either streams fragments as a body of
//! unknown length or answers in one piece.

mod client;
mod errors;
mod format;
mod request;

pub use self::client::{HttpClient, PendingResponse, ResponseBody, ResponseSink};
pub use self::errors::HttpError;
pub use self::format::ResponseFormat;
pub use self::request::{HttpRequest, MAX_BODY_BYTES, MAX_HEAD_BYTES};

const HTTP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::http");
