use crate::socket::SocketEndpoint;

/// Port the gateway listens on when no endpoint is configured.
pub const DEFAULT_TCP_PORT: u16 = 44322;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default size of the worker pool.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default bound on queued worker tasks.
pub const DEFAULT_WORKER_QUEUE: usize = 64;

/// Default per-request collection timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default idle lifetime of a catalogue session in seconds.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Loopback TCP endpoint on the conventional gateway port.
pub fn default_listen_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
