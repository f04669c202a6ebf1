//! REST gateway exposing a metric collection layer over HTTP.
//!
//! The gateway maps `/pmapi/...` and `/metrics` requests onto the
//! operations of a [`group::WebGroup`] and streams the entities it reports
//! back to the client as JSON or OpenMetrics text. Connections are served
//! by `hyper` on a small async runtime, requests are coordinated by a single
//! control thread and executed on a bounded worker pool, so neither a slow
//! collection call nor a slow reader stalls other connections.
//!
//! The bundled [`catalogue::MetricCatalogue`] answers every operation from
//! an in-memory description of metric sources loaded from JSON.

pub mod catalogue;
pub mod group;
pub mod http;
pub mod webapi;

mod bootstrap;
mod health;
mod process;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{
    ConnectionHandler, ConnectionStream, ListenerError, ListenerHandle, ServeFuture,
    SocketListener,
};

#[cfg(test)]
mod tests;
