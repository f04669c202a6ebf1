//! Per-request state threaded from classification to completion.
//!
//! A baton is created when a URL is accepted, moves to a worker for the
//! collection call, returns to the control thread for completion and is
//! then dropped. It is never reused across requests.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use hyper::{Method, StatusCode};

use crate::group::Parameters;
use crate::http::{ResponseFormat, ResponseSink};

use super::access::Credentials;
use super::command::{RestCommand, Route};
use super::suffix::SuffixStack;

/// Kind of group the builder is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Values of one metric within a fetch.
    ValueSet,
    /// Instances of one instance domain.
    InDom,
}

/// Position of the streaming builder within the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing emitted yet.
    Idle,
    /// A session is known; no group is open.
    InSession,
    /// Inside the group identified by `id`.
    InGroup {
        /// Group kind.
        kind: GroupKind,
        /// Packed metric or instance-domain identifier.
        id: u32,
    },
    /// Completion ran; no further output is accepted.
    Closed,
}

/// Per-request state.
pub struct Baton {
    pub(super) connection: u64,
    pub(super) client: Weak<dyn ResponseSink>,
    pub(super) command: RestCommand,
    pub(super) method: Method,
    pub(super) compat: bool,
    pub(super) context: Option<String>,
    pub(super) params: Arc<Parameters>,
    pub(super) labels: HashMap<String, String>,
    pub(super) suffix: SuffixStack,
    pub(super) credentials: Option<Credentials>,
    pub(super) times: bool,
    pub(super) timeout: Duration,
    pub(super) status: Option<StatusCode>,
    pub(super) format: ResponseFormat,
    pub(super) numpmids: u32,
    pub(super) numvsets: u32,
    pub(super) numinsts: u32,
    pub(super) numindoms: u32,
    pub(super) state: StreamState,
    pub(super) group_depth: usize,
}

/// Request attributes copied onto a new baton.
pub struct BatonSeed {
    /// Connection the request arrived on.
    pub connection: u64,
    /// Outbound side of that connection.
    pub client: Weak<dyn ResponseSink>,
    /// Request method.
    pub method: Method,
    /// Query parameters, shared with the transport.
    pub params: Arc<Parameters>,
    /// Basic-auth credentials.
    pub credentials: Option<Credentials>,
    /// Budget for the collection call.
    pub timeout: Duration,
}

impl Baton {
    /// Creates a baton for a classified request.
    #[must_use]
    pub fn new(route: Route, seed: BatonSeed) -> Self {
        let format = match route.command {
            RestCommand::Scrape => ResponseFormat::Text,
            _ => ResponseFormat::Json,
        };
        Self {
            connection: seed.connection,
            client: seed.client,
            command: route.command,
            method: seed.method,
            compat: route.compat,
            context: route.context,
            params: seed.params,
            labels: HashMap::new(),
            suffix: SuffixStack::default(),
            credentials: seed.credentials,
            times: false,
            timeout: seed.timeout,
            status: None,
            format,
            numpmids: 0,
            numvsets: 0,
            numinsts: 0,
            numindoms: 0,
            state: StreamState::Idle,
            group_depth: 0,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn connection(&self) -> u64 {
        self.connection
    }

    /// Classified command.
    #[must_use]
    pub const fn command(&self) -> RestCommand {
        self.command
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Whether the compatibility schema was requested.
    #[must_use]
    pub const fn compat(&self) -> bool {
        self.compat
    }

    /// Current session identifier.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Reconciles the session identifier with one reported by an event.
    ///
    /// The first identifier is kept until a different one arrives, which
    /// then replaces it.
    pub fn set_context(&mut self, context: &str) {
        if self.context.as_deref() != Some(context) {
            self.context = Some(context.to_owned());
        }
        if self.state == StreamState::Idle {
            self.state = StreamState::InSession;
        }
    }

    /// Request parameters.
    #[must_use]
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Mutable parameters, detaching from the transport's copy if shared.
    pub fn params_mut(&mut self) -> &mut Parameters {
        Arc::make_mut(&mut self.params)
    }

    /// Whether scrape output carries timestamps.
    #[must_use]
    pub const fn times(&self) -> bool {
        self.times
    }

    /// Sets the scrape timestamp flag.
    pub fn set_times(&mut self, times: bool) {
        self.times = times;
    }

    /// Status recorded during classification or validation.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Records a status to report at completion.
    pub fn record_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Format of the response body so far.
    #[must_use]
    pub const fn format(&self) -> ResponseFormat {
        self.format
    }

    /// Supplied credentials.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Budget for the collection call.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builder position.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Number of containers currently open on the wire.
    #[must_use]
    pub fn open_containers(&self) -> usize {
        self.suffix.depth()
    }

    /// Outbound side of the connection, if it is still alive.
    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn ResponseSink>> {
        self.client.upgrade()
    }

    /// Identifier of the open group of `kind`, if any.
    pub(super) fn active_group(&self, kind: GroupKind) -> Option<u32> {
        match self.state {
            StreamState::InGroup { kind: active, id } if active == kind => Some(id),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(route: Route, params: Arc<Parameters>) -> Self {
        Self::new(
            route,
            BatonSeed {
                connection: 0,
                client: Weak::<crate::http::HttpClient>::new(),
                method: Method::GET,
                params,
                credentials: None,
                timeout: Duration::from_secs(1),
            },
        )
    }
}

impl std::fmt::Debug for Baton {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Baton")
            .field("connection", &self.connection)
            .field("command", &self.command)
            .field("compat", &self.compat)
            .field("context", &self.context)
            .field("status", &self.status)
            .field("state", &self.state)
            .field("open", &self.suffix.depth())
            .finish_non_exhaustive()
    }
}
