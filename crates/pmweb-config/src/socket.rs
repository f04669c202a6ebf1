//! Listener endpoints: `tcp://host[:port]` or `unix:///path/to/socket`.

use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::defaults::DEFAULT_TCP_PORT;

/// Where the gateway accepts HTTP connections.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Filesystem socket, for local proxies.
    Unix { path: Utf8PathBuf },
    /// Network listener.
    Tcp { host: String, port: u16 },
}

impl SocketEndpoint {
    /// Unix socket at `path`.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// TCP listener on `host:port`; port `0` asks the OS for one.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket file path, for Unix endpoints.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        if let Self::Unix { path } = self {
            Some(path)
        } else {
            None
        }
    }

    /// Whether this is a network listener.
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp { .. })
    }

    /// Creates the directory that will hold a Unix socket.
    ///
    /// New directories are private to the owner. TCP endpoints need nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the socket path has no parent
    /// or the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        match self.unix_path() {
            Some(path) => create_socket_directory(socket_directory(path)?),
            None => Ok(()),
        }
    }
}

fn socket_directory(path: &Utf8Path) -> Result<&Utf8Path, SocketPreparationError> {
    path.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .ok_or_else(|| SocketPreparationError::NoParent {
            path: path.to_path_buf(),
        })
}

fn create_socket_directory(directory: &Utf8Path) -> Result<(), SocketPreparationError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
    match builder.create(directory) {
        Err(source) if source.kind() != io::ErrorKind::AlreadyExists => {
            Err(SocketPreparationError::Directory {
                path: directory.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
            Self::Unix { path } => write!(formatter, "unix://{path}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "tcp" => tcp_endpoint(&url, input),
            "unix" => unix_endpoint(&url, input),
            scheme => Err(SocketParseError::Scheme(scheme.to_owned())),
        }
    }
}

fn tcp_endpoint(url: &Url, input: &str) -> Result<SocketEndpoint, SocketParseError> {
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SocketParseError::Host(input.to_owned()))?;
    Ok(SocketEndpoint::tcp(
        host,
        url.port().unwrap_or(DEFAULT_TCP_PORT),
    ))
}

fn unix_endpoint(url: &Url, input: &str) -> Result<SocketEndpoint, SocketParseError> {
    match url.path() {
        "" | "/" => Err(SocketParseError::UnixPath(input.to_owned())),
        path => Ok(SocketEndpoint::unix(path)),
    }
}

/// Reasons an endpoint string is refused.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Only `tcp` and `unix` are served.
    #[error("unsupported listener scheme '{0}'")]
    Scheme(String),
    /// `tcp://` without a host.
    #[error("listener '{0}' names no TCP host")]
    Host(String),
    /// `unix://` without a socket path.
    #[error("listener '{0}' names no socket path")]
    UnixPath(String),
    /// Not a URL at all.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Failures creating the directory for a Unix socket.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path is a bare file name.
    #[error("socket path '{path}' has no parent directory")]
    NoParent { path: Utf8PathBuf },
    /// The directory could not be created.
    #[error("cannot create socket directory '{path}': {source}")]
    Directory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}
