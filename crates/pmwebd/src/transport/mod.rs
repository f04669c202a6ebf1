//! Listening sockets for the HTTP front end.
//!
//! A background runtime accepts TCP or Unix-domain connections and hands
//! each one to a [`ConnectionHandler`] as its own task.

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
#[cfg(unix)]
pub use self::errors::Occupant;
pub use self::handler::{ConnectionHandler, ConnectionStream, ServeFuture};
pub use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
