//! Control thread owning connection slots and request lifecycles.
//!
//! Connection tasks forward parsed requests here. The control thread
//! classifies and validates them, hands accepted batons to the worker pool
//! and queues the terminal reply once a worker returns the baton. A
//! connection runs at most one request at a time.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use pmweb_config::Config;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::group::{GroupError, WebGroup};
use hyper::StatusCode;

use crate::http::{HttpError, HttpRequest, ResponseSink};

use super::WEBAPI_TARGET;
use super::access::AccessPolicy;
use super::baton::{Baton, BatonSeed};
use super::command::classify;
use super::completion::{self, Reply};
use super::dispatch::{self, PoolError, Task, WorkerPool};
use super::params::{self, PARAMS};

/// Request read from a connection.
pub struct IncomingRequest {
    /// Connection the request arrived on.
    pub connection: u64,
    /// Outbound side of that connection.
    pub sink: Arc<dyn ResponseSink>,
    /// Parsed request.
    pub request: HttpRequest,
}

/// Messages drained by the control thread.
pub enum ControlEvent {
    /// A complete request arrived.
    Request(IncomingRequest),
    /// The framing layer refused a request.
    Rejected {
        /// Connection the request arrived on.
        connection: u64,
        /// Outbound side of that connection.
        sink: Arc<dyn ResponseSink>,
        /// Reason for the refusal.
        error: HttpError,
    },
    /// A worker finished a collection call.
    Completed {
        /// Baton handed back by the worker.
        baton: Box<Baton>,
        /// Outcome of the call.
        outcome: Result<(), GroupError>,
    },
    /// The peer stopped sending.
    Closed(u64),
    /// Stop the control loop.
    Shutdown,
}

/// Tunables for the control loop and worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Worker pool size.
    pub worker_threads: usize,
    /// Bound on queued worker tasks.
    pub worker_queue: usize,
    /// Budget handed to each collection call.
    pub timeout: Duration,
    /// Demand credentials for every session.
    pub require_credentials: bool,
}

impl GatewaySettings {
    /// Reads the settings from resolved configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_threads: config.worker_threads(),
            worker_queue: config.worker_queue(),
            timeout: config.request_timeout(),
            require_credentials: config.require_credentials(),
        }
    }
}

/// Errors raised while starting or stopping the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The worker pool could not start.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The control thread could not be spawned.
    #[error("failed to spawn control thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The control thread panicked.
    #[error("control thread panicked")]
    ThreadPanic,
    /// Workers were still busy when the drain budget ran out.
    #[error("gateway still draining after {budget:?}")]
    DrainTimeout {
        /// Budget that was exceeded.
        budget: Duration,
    },
}

/// Starts the control thread and its worker pool.
///
/// # Errors
///
/// Returns a [`GatewayError`] when a thread cannot be spawned.
pub fn start(
    group: Arc<dyn WebGroup>,
    settings: GatewaySettings,
) -> Result<GatewayHandle, GatewayError> {
    let pool = WorkerPool::new(settings.worker_threads, settings.worker_queue)?;
    let (events, receiver) = crossbeam_channel::unbounded();
    let control = ControlLoop {
        group,
        policy: AccessPolicy::new(settings.require_credentials),
        timeout: settings.timeout,
        pool,
        events: events.clone(),
        slots: HashMap::new(),
    };
    let (stopped_tx, stopped) = crossbeam_channel::bounded::<()>(0);
    let thread = thread::Builder::new()
        .name("pmwebd-control".to_owned())
        .spawn(move || {
            control.run(&receiver);
            drop(stopped_tx);
        })
        .map_err(|source| GatewayError::Spawn { source })?;
    info!(
        target: WEBAPI_TARGET,
        workers = settings.worker_threads,
        queue = settings.worker_queue,
        "gateway control loop started"
    );
    Ok(GatewayHandle {
        events,
        stopped,
        thread: Some(thread),
    })
}

/// Handle to the running control thread.
pub struct GatewayHandle {
    events: Sender<ControlEvent>,
    stopped: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl GatewayHandle {
    /// Sender for connection tasks.
    #[must_use]
    pub fn events(&self) -> Sender<ControlEvent> {
        self.events.clone()
    }

    /// Stops the control loop, then drains and joins the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ThreadPanic`] if the control thread panicked.
    pub fn shutdown(mut self) -> Result<(), GatewayError> {
        // A closed channel means the loop already exited.
        self.events.send(ControlEvent::Shutdown).ok();
        self.join()
    }

    /// Like [`GatewayHandle::shutdown`], but gives up after `budget`.
    ///
    /// Workers still inside a collection call are left to finish on their
    /// own; their replies are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DrainTimeout`] when the budget runs out and
    /// [`GatewayError::ThreadPanic`] if the control thread panicked.
    pub fn shutdown_within(mut self, budget: Duration) -> Result<(), GatewayError> {
        self.events.send(ControlEvent::Shutdown).ok();
        if let Err(RecvTimeoutError::Timeout) = self.stopped.recv_timeout(budget) {
            warn!(
                target: WEBAPI_TARGET,
                budget_ms = budget.as_millis(),
                "abandoning busy workers at shutdown"
            );
            self.thread = None;
            return Err(GatewayError::DrainTimeout { budget });
        }
        self.join()
    }

    fn join(&mut self) -> Result<(), GatewayError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| GatewayError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.events.send(ControlEvent::Shutdown).ok();
        }
    }
}

struct Slot {
    connection: u64,
    sink: Arc<dyn ResponseSink>,
    working: bool,
    closed: bool,
    deferred: Vec<Reply>,
}

impl Slot {
    fn new(connection: u64, sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            connection,
            sink,
            working: false,
            closed: false,
            deferred: Vec::new(),
        }
    }

    /// Queues `reply`, or holds it back until the in-flight response ends.
    fn respond(&mut self, reply: Reply) {
        if self.working {
            self.deferred.push(reply);
            return;
        }
        if let Err(error) = self.sink.reply(reply.status, &reply.body, reply.format) {
            debug!(
                target: WEBAPI_TARGET,
                connection = self.connection,
                error = %error,
                "reply could not be delivered"
            );
        }
    }

    fn finish(&mut self, reply: Reply) {
        self.working = false;
        self.respond(reply);
        for held in mem::take(&mut self.deferred) {
            self.respond(held);
        }
    }
}

struct ControlLoop {
    group: Arc<dyn WebGroup>,
    policy: AccessPolicy,
    timeout: Duration,
    pool: WorkerPool,
    events: Sender<ControlEvent>,
    slots: HashMap<u64, Slot>,
}

impl ControlLoop {
    fn run(mut self, receiver: &Receiver<ControlEvent>) {
        for event in receiver.iter() {
            match event {
                ControlEvent::Request(incoming) => self.on_request(incoming),
                ControlEvent::Rejected {
                    connection,
                    sink,
                    error,
                } => self.on_rejected(connection, sink, &error),
                ControlEvent::Completed { baton, outcome } => self.on_completed(*baton, outcome),
                ControlEvent::Closed(connection) => self.on_closed(connection),
                ControlEvent::Shutdown => break,
            }
        }
        debug!(
            target: WEBAPI_TARGET,
            open = self.slots.len(),
            "control loop stopping"
        );
        self.slots.clear();
        self.pool.shutdown();
        info!(target: WEBAPI_TARGET, "gateway control loop stopped");
    }

    fn on_request(&mut self, incoming: IncomingRequest) {
        let IncomingRequest {
            connection,
            sink,
            request,
        } = incoming;
        let slot = self
            .slots
            .entry(connection)
            .or_insert_with(|| Slot::new(connection, sink));

        let Some(route) = classify(&request.path) else {
            debug!(
                target: WEBAPI_TARGET,
                connection,
                path = %request.path,
                "no REST handler for URL"
            );
            slot.respond(Reply::failure(StatusCode::NOT_FOUND, Some("unknown URL")));
            return;
        };
        if slot.working {
            debug!(
                target: WEBAPI_TARGET,
                connection,
                path = %request.path,
                "request refused while another is in progress"
            );
            slot.respond(Reply::failure(
                StatusCode::CONFLICT,
                Some("request already in progress"),
            ));
            return;
        }

        let HttpRequest {
            method,
            params: query,
            credentials,
            body,
            ..
        } = request;
        let mut baton = Baton::new(
            route,
            BatonSeed {
                connection,
                client: Arc::downgrade(&slot.sink),
                method: method.clone(),
                params: Arc::new(query),
                credentials,
                timeout: self.timeout,
            },
        );
        params::validate(&mut baton, &method, &PARAMS);
        params::apply_body(&mut baton, &method, &body, &PARAMS);
        debug!(
            target: WEBAPI_TARGET,
            connection,
            command = %baton.command(),
            compat = baton.compat(),
            rejected = baton.status().map(|status| status.as_u16()),
            "request classified"
        );

        slot.working = true;
        let group = Arc::clone(&self.group);
        let events = self.events.clone();
        let policy = self.policy;
        let task: Task = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                dispatch::execute(group.as_ref(), &mut baton, policy)
            }))
            .unwrap_or_else(|_| Err(GroupError::failed("collection call panicked")));
            let completed = ControlEvent::Completed {
                baton: Box::new(baton),
                outcome,
            };
            if events.send(completed).is_err() {
                debug!(target: WEBAPI_TARGET, "control loop gone; dropping result");
            }
        });
        if let Err(error) = self.pool.submit(task) {
            warn!(
                target: WEBAPI_TARGET,
                connection,
                error = %error,
                "worker submission refused"
            );
            slot.finish(Reply::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(&error.to_string()),
            ));
        }
    }

    fn on_rejected(&mut self, connection: u64, sink: Arc<dyn ResponseSink>, error: &HttpError) {
        debug!(
            target: WEBAPI_TARGET,
            connection,
            error = %error,
            "malformed request refused"
        );
        self.slots
            .entry(connection)
            .or_insert_with(|| Slot::new(connection, sink))
            .respond(Reply::failure(error.status(), Some(&error.to_string())));
    }

    fn on_completed(&mut self, mut baton: Baton, outcome: Result<(), GroupError>) {
        let connection = baton.connection();
        let command = baton.command();
        let reply = completion::complete(&mut baton, outcome);
        drop(baton);
        debug!(
            target: WEBAPI_TARGET,
            connection,
            command = %command,
            status = reply.status.as_u16(),
            success = reply.status == StatusCode::OK,
            "request completed"
        );

        let Some(slot) = self.slots.get_mut(&connection) else {
            debug!(
                target: WEBAPI_TARGET,
                connection,
                "connection gone; discarding reply"
            );
            return;
        };
        slot.finish(reply);
        if slot.closed {
            self.slots.remove(&connection);
        }
    }

    fn on_closed(&mut self, connection: u64) {
        if let Some(slot) = self.slots.get_mut(&connection)
            && slot.working
        {
            slot.closed = true;
            return;
        }
        self.slots.remove(&connection);
    }
}
