//! Listener failures.

use std::io;

use thiserror::Error;

/// Why a listener could not be brought up or wound down.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Host name lookup failed or produced nothing usable.
    #[error("cannot resolve {endpoint}")]
    Unresolved {
        endpoint: String,
        #[source]
        source: Option<io::Error>,
    },
    /// The OS refused the bind.
    #[error("cannot bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// The accepted socket could not be made non-blocking, or the accept
    /// thread could not be spawned.
    #[error("cannot start accepting: {source}")]
    Start {
        #[source]
        source: io::Error,
    },
    /// A Unix socket path was configured on a platform without them.
    #[cfg(not(unix))]
    #[error("{endpoint}: unix sockets are unavailable on this platform")]
    UnsupportedUnix { endpoint: String },
    /// Something already sits at the Unix socket path.
    #[cfg(unix)]
    #[error("socket path {path}: {reason}")]
    Occupied { path: String, reason: Occupant },
    /// The accept loop panicked.
    #[error("accept thread panicked")]
    ThreadPanic,
}

/// What was found at an occupied Unix socket path.
#[cfg(unix)]
#[derive(Debug, Error)]
pub enum Occupant {
    /// Another process answers on the socket.
    #[error("another process is listening")]
    LiveServer,
    /// A regular file or directory.
    #[error("not a socket")]
    NotSocket,
    /// The path could not be inspected, probed or cleared.
    #[error("{0}")]
    Unreadable(#[source] io::Error),
}
