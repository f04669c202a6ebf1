//! Requests as the control loop sees them.
//!
//! `hyper` owns the wire framing; this module keeps only what the gateway
//! consumes: method, path, query parameters, basic-auth credentials and a
//! bounded body.

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::Method;
use hyper::body::Body;
use hyper::header::AUTHORIZATION;
use hyper::http::request::Parts;
use hyper::{Request, Uri};

use crate::group::Parameters;
use crate::webapi::Credentials;

use super::HttpError;

/// Bound on the request line plus headers, enforced by `hyper`.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Bound on a request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// One request, fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Path component of the request target.
    pub path: String,
    /// Decoded query parameters; the first occurrence of a key wins.
    pub params: Parameters,
    /// Basic-auth credentials, when supplied.
    pub credentials: Option<Credentials>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Reads the body of `request`, up to [`MAX_BODY_BYTES`].
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::BodyTooLarge`] past the limit and
    /// [`HttpError::Malformed`] when the body stream fails.
    pub async fn read<B>(request: Request<B>) -> Result<Self, HttpError>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let collected = Limited::new(body, MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|error| {
                if error.downcast_ref::<LengthLimitError>().is_some() {
                    HttpError::BodyTooLarge {
                        limit: MAX_BODY_BYTES,
                    }
                } else {
                    HttpError::malformed(error.to_string())
                }
            })?;
        Ok(Self::from_parts(&parts, collected.to_bytes().to_vec()))
    }

    /// Builds a request from an already-read head and body.
    #[must_use]
    pub fn from_parts(parts: &Parts, body: Vec<u8>) -> Self {
        let credentials = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(Credentials::from_authorization);
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_owned(),
            params: query_params(&parts.uri),
            credentials,
            body,
        }
    }
}

fn query_params(uri: &Uri) -> Parameters {
    let mut params = Parameters::new();
    let query = uri.query().unwrap_or_default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}
