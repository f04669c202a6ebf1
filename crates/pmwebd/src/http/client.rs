//! Outbound side of a client connection.
//!
//! Each request on a connection registers a responder before it reaches the
//! control loop. The first fragment of a response commits a `200` head
//! with a streamed body; fragments then travel over a bounded channel that
//! `hyper` drains onto the socket. A failure after that point cannot change
//! the status already sent.
//!
//! No call here touches the socket, so the control thread never waits on a
//! slow peer. Workers streaming into a full channel do wait, which keeps
//! memory use independent of the result size.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Mutex, MutexGuard};

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use super::{HTTP_TARGET, HttpError, ResponseFormat};

/// Fragments buffered between a worker and the socket.
const STREAM_BACKLOG: usize = 32;

/// Body type handed to `hyper`.
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Resolves to the response for one request.
pub type PendingResponse = oneshot::Receiver<Response<ResponseBody>>;

type Frames = mpsc::Sender<Result<Frame<Bytes>, Infallible>>;

/// Destination for one connection's responses, in request order.
pub trait ResponseSink: Send + Sync {
    /// Sends a partial body fragment.
    ///
    /// Called from worker threads; may wait for the peer to catch up.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] when the peer is gone.
    fn transfer(&self, fragment: &str, format: ResponseFormat) -> Result<(), HttpError>;

    /// Ends the oldest unanswered request. Never waits on the peer.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] when the peer is gone.
    fn reply(&self, status: StatusCode, body: &str, format: ResponseFormat)
    -> Result<(), HttpError>;
}

#[derive(Default)]
struct ClientState {
    waiting: VecDeque<oneshot::Sender<Response<ResponseBody>>>,
    stream: Option<Frames>,
}

/// [`ResponseSink`] feeding `hyper` responses for one connection.
pub struct HttpClient {
    runtime: Handle,
    state: Mutex<ClientState>,
}

impl HttpClient {
    /// Creates a client whose trailing writes run on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Registers the next request; its response arrives on the receiver.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Poisoned`] if a writer panicked.
    pub fn expect_response(&self) -> Result<PendingResponse, HttpError> {
        let (responder, response) = oneshot::channel();
        self.lock()?.waiting.push_back(responder);
        Ok(response)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ClientState>, HttpError> {
        self.state.lock().map_err(|_| HttpError::Poisoned)
    }
}

impl ResponseSink for HttpClient {
    fn transfer(&self, fragment: &str, format: ResponseFormat) -> Result<(), HttpError> {
        if fragment.is_empty() {
            return Ok(());
        }
        let frames = {
            let mut state = self.lock()?;
            if let Some(frames) = &state.stream {
                frames.clone()
            } else {
                let responder = state.waiting.pop_front().ok_or(HttpError::Closed)?;
                let (frames, receiver) = mpsc::channel(STREAM_BACKLOG);
                let body = StreamBody::new(ReceiverStream::new(receiver)).boxed_unsync();
                respond(responder, StatusCode::OK, format, body)?;
                state.stream = Some(frames.clone());
                frames
            }
        };
        frames
            .blocking_send(Ok(Frame::data(Bytes::from(fragment.to_owned()))))
            .map_err(|_| HttpError::Closed)
    }

    fn reply(
        &self,
        status: StatusCode,
        body: &str,
        format: ResponseFormat,
    ) -> Result<(), HttpError> {
        let mut state = self.lock()?;
        if let Some(frames) = state.stream.take() {
            if status != StatusCode::OK {
                warn!(
                    target: HTTP_TARGET,
                    status = status.as_u16(),
                    "failure reported after streaming began; status line already sent"
                );
            }
            if !body.is_empty() {
                let trailer = Frame::data(Bytes::from(body.to_owned()));
                // The body ends once this last sender is dropped.
                self.runtime.spawn(async move {
                    frames.send(Ok(trailer)).await.ok();
                });
            }
            return Ok(());
        }
        let responder = state.waiting.pop_front().ok_or(HttpError::Closed)?;
        drop(state);
        let body = Full::new(Bytes::from(body.to_owned())).boxed_unsync();
        respond(responder, status, format, body)
    }
}

fn respond(
    responder: oneshot::Sender<Response<ResponseBody>>,
    status: StatusCode,
    format: ResponseFormat,
    body: ResponseBody,
) -> Result<(), HttpError> {
    let response = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, format.content_type())
        .body(body)?;
    responder.send(response).map_err(|_| HttpError::Closed)
}
