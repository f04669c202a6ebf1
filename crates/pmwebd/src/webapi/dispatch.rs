//! Worker pool and per-command execution.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::group::{GroupError, GroupRequest, WebGroup};

use super::WEBAPI_TARGET;
use super::access::AccessPolicy;
use super::baton::Baton;
use super::builder::StreamingBuilder;
use super::command::RestCommand;

/// Unit of work executed on a pool thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every queue slot is taken.
    #[error("worker queue exhausted")]
    Exhausted,
    /// The pool is shutting down.
    #[error("worker pool stopped")]
    Stopped,
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Fixed-size pool fed by a bounded queue.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers sharing a queue of `queue` slots.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] when a thread cannot be created.
    pub fn new(threads: usize, queue: usize) -> Result<Self, PoolError> {
        let (sender, receiver) = crossbeam_channel::bounded::<Task>(queue);
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("pmwebd-worker-{index}"))
                .spawn(move || {
                    for task in receiver.iter() {
                        task();
                    }
                })
                .map_err(PoolError::Spawn)?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues a task without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when the queue is full and
    /// [`PoolError::Stopped`] after shutdown.
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        let sender = self.sender.as_ref().ok_or(PoolError::Stopped)?;
        sender.try_send(task).map_err(|error| match error {
            TrySendError::Full(_) => PoolError::Exhausted,
            TrySendError::Disconnected(_) => PoolError::Stopped,
        })
    }

    /// Stops accepting work and waits for queued tasks to drain.
    pub fn shutdown(mut self) {
        self.sender = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(target: WEBAPI_TARGET, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender = None;
    }
}

/// Runs the collection call matching the baton's command.
///
/// A request already flagged during validation fails at once without
/// touching the collection layer.
///
/// # Errors
///
/// Returns the failure to report at completion.
pub fn execute(
    group: &dyn WebGroup,
    baton: &mut Baton,
    policy: AccessPolicy,
) -> Result<(), GroupError> {
    let command = baton.command();
    if baton.status().is_some() {
        let message = match command {
            RestCommand::None => "unrecognised REST command",
            _ => "missing required parameters",
        };
        return Err(GroupError::failed(message));
    }

    let params = Arc::clone(&baton.params);
    let context = baton.context.clone();
    let request = GroupRequest {
        context: context.as_deref(),
        params: &params,
        timeout: baton.timeout(),
    };
    debug!(
        target: WEBAPI_TARGET,
        connection = baton.connection(),
        command = %command,
        context = context.as_deref().unwrap_or(""),
        "collection call starting"
    );
    let mut builder = StreamingBuilder::new(baton, policy);
    let outcome = match command {
        RestCommand::Context => group.context(&request, &mut builder),
        RestCommand::Metric => group.metric(&request, &mut builder),
        RestCommand::Fetch => group.fetch(&request, &mut builder),
        RestCommand::InDom => group.indom(&request, &mut builder),
        RestCommand::Profile => group.profile(&request, &mut builder),
        RestCommand::Store => group.store(&request, &mut builder),
        RestCommand::Derive => group.derive(&request, &mut builder),
        RestCommand::Scrape => group.scrape(&request, &mut builder),
        RestCommand::None => Err(GroupError::failed("unrecognised REST command")),
    };
    debug!(
        target: WEBAPI_TARGET,
        command = %command,
        success = outcome.is_ok(),
        "collection call finished"
    );
    outcome
}
