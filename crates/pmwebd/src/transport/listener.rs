//! Accept loop over a bound socket.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use pmweb_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

#[cfg(unix)]
use super::errors::Occupant;

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Socket bound to a configured endpoint, not yet accepting.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// The bound socket once registered with the runtime.
enum AcceptSocket {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl AcceptSocket {
    fn register(listener: ListenerKind) -> io::Result<Self> {
        match listener {
            ListenerKind::Tcp(tcp) => {
                tcp.set_nonblocking(true)?;
                tokio::net::TcpListener::from_std(tcp).map(Self::Tcp)
            }
            #[cfg(unix)]
            ListenerKind::Unix(unix) => {
                unix.set_nonblocking(true)?;
                tokio::net::UnixListener::from_std(unix).map(Self::Unix)
            }
        }
    }

    async fn accept(&self) -> io::Result<ConnectionStream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(ConnectionStream::Tcp(stream))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(ConnectionStream::Unix(stream))
            }
        }
    }
}

impl SocketListener {
    /// Binds `endpoint`, replacing a stale Unix socket file if one is left.
    ///
    /// # Errors
    ///
    /// Returns a [`ListenerError`] when the address cannot be resolved or
    /// bound, or when a live process already serves the Unix socket.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            SocketEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => ListenerKind::Unix(bind_unix(path.as_std_path())?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
        })
    }

    /// Endpoint this listener was bound from.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Bound TCP address, which differs from the endpoint when port 0 was
    /// requested.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        }
    }

    /// Starts accepting on a background runtime.
    ///
    /// Every accepted connection is served as a task on that runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Start`] when the runtime cannot be built,
    /// the socket cannot be registered with it, or the accept thread
    /// cannot be spawned.
    pub fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        let Self { endpoint, listener } = self;
        let registered = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("pmwebd-http")
            .build()
            .and_then(|runtime| {
                let socket = {
                    let _entered = runtime.enter();
                    AcceptSocket::register(listener)?
                };
                Ok((runtime, socket))
            });
        let (runtime, socket) = match registered {
            Ok(started) => started,
            Err(source) => {
                #[cfg(unix)]
                cleanup_unix_socket(&endpoint);
                return Err(ListenerError::Start { source });
            }
        };

        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("pmwebd-accept".to_owned())
            .spawn(move || run_accept_loop(&runtime, &endpoint, &socket, &stop, &handler))
            .map_err(|source| ListenerError::Start { source })?;
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to a running accept loop.
pub struct ListenerHandle {
    shutdown: Arc<Notify>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop. Open connections are dropped once it
    /// exits.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Waits for the accept loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the accept thread panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

fn run_accept_loop(
    runtime: &Runtime,
    endpoint: &SocketEndpoint,
    socket: &AcceptSocket,
    shutdown: &Notify,
    handler: &Arc<dyn ConnectionHandler>,
) {
    info!(
        target: LISTENER_TARGET,
        endpoint = %endpoint,
        "http listener active"
    );
    let accepted = runtime.block_on(async {
        let mut accepted = 0_u64;
        let mut last_error = None::<io::ErrorKind>;
        loop {
            tokio::select! {
                () = shutdown.notified() => break,
                result = socket.accept() => match result {
                    Ok(stream) => {
                        last_error = None;
                        debug!(
                            target: LISTENER_TARGET,
                            peer = %stream.peer(),
                            serial = accepted,
                            "connection accepted"
                        );
                        accepted = accepted.saturating_add(1);
                        tokio::spawn(Arc::clone(handler).serve(stream));
                    }
                    Err(error) => {
                        let kind = error.kind();
                        if last_error != Some(kind) {
                            warn!(
                                target: LISTENER_TARGET,
                                error = %error,
                                "socket accept error"
                            );
                        }
                        last_error = Some(kind);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                },
            }
        }
        accepted
    });

    #[cfg(unix)]
    cleanup_unix_socket(endpoint);
    info!(
        target: LISTENER_TARGET,
        endpoint = %endpoint,
        accepted,
        "http listener stopped"
    );
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let unresolved = |source| ListenerError::Unresolved {
        endpoint: format!("{host}:{port}"),
        source,
    };
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|error| unresolved(Some(error)))?
        .next()
        .ok_or_else(|| unresolved(None))?;
    TcpListener::bind(addr).map_err(|source| ListenerError::Bind {
        endpoint: addr.to_string(),
        source,
    })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    let occupied = |reason| ListenerError::Occupied {
        path: path.display().to_string(),
        reason,
    };
    if path.exists() {
        let metadata =
            fs::symlink_metadata(path).map_err(|error| occupied(Occupant::Unreadable(error)))?;
        if !metadata.file_type().is_socket() {
            return Err(occupied(Occupant::NotSocket));
        }
        match UnixStream::connect(path) {
            Ok(_live) => return Err(occupied(Occupant::LiveServer)),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|error| occupied(Occupant::Unreadable(error)))?;
            }
            Err(error) => return Err(occupied(Occupant::Unreadable(error))),
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::Bind {
        endpoint: path.display().to_string(),
        source,
    })
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}
