//! Shared configuration for the pmweb gateway.
//!
//! Values are resolved through `ortho_config`, which layers command-line
//! flags over `PMWEB_*` environment variables over a TOML configuration file
//! over the built-in defaults exported from this crate.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SESSION_TIMEOUT_SECS, DEFAULT_TCP_PORT,
    DEFAULT_WORKER_QUEUE, DEFAULT_WORKER_THREADS, default_listen_endpoint, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PMWEB")]
pub struct Config {
    /// Endpoint the HTTP listener binds to.
    #[ortho_config(default = default_listen_endpoint())]
    pub listen: SocketEndpoint,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log records.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Number of worker threads executing collection calls.
    #[ortho_config(default = DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,
    /// Bound on tasks queued for the worker pool.
    #[ortho_config(default = DEFAULT_WORKER_QUEUE)]
    pub worker_queue: usize,
    /// Timeout, in milliseconds, handed to each collection call.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,
    /// Seconds a session may sit unused before it is discarded.
    #[ortho_config(default = DEFAULT_SESSION_TIMEOUT_SECS)]
    pub session_timeout_secs: u64,
    /// Require basic-auth credentials for every session.
    #[ortho_config(default = false)]
    pub require_credentials: bool,
    /// JSON catalogue describing the metric sources served by the gateway.
    pub catalogue_path: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            worker_threads: DEFAULT_WORKER_THREADS,
            worker_queue: DEFAULT_WORKER_QUEUE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            require_credentials: false,
            catalogue_path: None,
        }
    }
}

impl Config {
    /// Endpoint the listener binds to.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Worker pool size, never less than one.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads.max(1)
    }

    /// Worker queue bound, never less than one.
    #[must_use]
    pub fn worker_queue(&self) -> usize {
        self.worker_queue.max(1)
    }

    /// Per-request timeout for collection calls.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Idle lifetime of a session opened by a request.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Whether every session demands credentials.
    #[must_use]
    pub fn require_credentials(&self) -> bool {
        self.require_credentials
    }

    /// Location of the metric catalogue, if configured.
    #[must_use]
    pub fn catalogue_path(&self) -> Option<&Utf8PathBuf> {
        self.catalogue_path.as_ref()
    }
}
