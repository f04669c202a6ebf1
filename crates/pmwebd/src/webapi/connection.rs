//! Per-connection `hyper` service feeding the control thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::http::{
    HttpClient, HttpError, HttpRequest, MAX_HEAD_BYTES, ResponseBody, ResponseFormat,
    ResponseSink,
};
use crate::transport::{ConnectionHandler, ConnectionStream, ServeFuture};

use super::WEBAPI_TARGET;
use super::control::{ControlEvent, IncomingRequest};

/// Serves HTTP/1 on accepted connections, one request at a time each.
pub struct HttpConnectionHandler {
    events: Sender<ControlEvent>,
    next_connection: AtomicU64,
}

impl HttpConnectionHandler {
    /// Creates a handler forwarding to `events`.
    #[must_use]
    pub const fn new(events: Sender<ControlEvent>) -> Self {
        Self {
            events,
            next_connection: AtomicU64::new(1),
        }
    }

    async fn forward(
        &self,
        connection: u64,
        client: &Arc<HttpClient>,
        request: Request<Incoming>,
    ) -> Response<ResponseBody> {
        let response = match client.expect_response() {
            Ok(response) => response,
            Err(error) => return internal_error(&error),
        };
        let sink: Arc<dyn ResponseSink> = Arc::<HttpClient>::clone(client);
        let event = match HttpRequest::read(request).await {
            Ok(request) => {
                debug!(
                    target: WEBAPI_TARGET,
                    connection,
                    method = %request.method,
                    path = %request.path,
                    "request received"
                );
                ControlEvent::Request(IncomingRequest {
                    connection,
                    sink,
                    request,
                })
            }
            Err(error) => ControlEvent::Rejected {
                connection,
                sink,
                error,
            },
        };
        if self.events.send(event).is_err() {
            return internal_error(&HttpError::Closed);
        }
        response
            .await
            .unwrap_or_else(|_| internal_error(&HttpError::Closed))
    }
}

impl ConnectionHandler for HttpConnectionHandler {
    fn serve(self: Arc<Self>, stream: ConnectionStream) -> ServeFuture {
        Box::pin(async move {
            let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
            let client = Arc::new(HttpClient::new(Handle::current()));
            let service = service_fn(|request| {
                let handler = Arc::clone(&self);
                let client = Arc::clone(&client);
                async move {
                    Ok::<_, HttpError>(handler.forward(connection, &client, request).await)
                }
            });
            if let Err(error) = http1::Builder::new()
                .half_close(true)
                .max_buf_size(MAX_HEAD_BYTES)
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(
                    target: WEBAPI_TARGET,
                    connection,
                    error = %error,
                    "connection ended with error"
                );
            }
            if self.events.send(ControlEvent::Closed(connection)).is_err() {
                debug!(
                    target: WEBAPI_TARGET,
                    connection,
                    "control loop gone before close"
                );
            }
        })
    }
}

fn internal_error(error: &HttpError) -> Response<ResponseBody> {
    warn!(
        target: WEBAPI_TARGET,
        error = %error,
        "request dropped before a reply was produced"
    );
    let mut response = Response::new(Full::new(Bytes::from_static(b"{}\r\n")).boxed_unsync());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(ResponseFormat::Json.content_type()),
    );
    response
}
