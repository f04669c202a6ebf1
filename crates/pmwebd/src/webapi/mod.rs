//! REST servlet for the `/pmapi` and `/metrics` URL spaces.
//!
//! Requests are classified into a [`RestCommand`], validated, run against a
//! [`crate::group::WebGroup`] on the worker pool and streamed back as JSON or
//! OpenMetrics text while the collection call is still producing results.

mod access;
mod baton;
mod builder;
mod command;
mod completion;
mod connection;
mod control;
mod dispatch;
pub mod openmetrics;
mod params;
mod suffix;

pub use self::access::{AccessError, AccessPolicy, Credentials};
pub use self::baton::{Baton, GroupKind, StreamState};
pub use self::builder::{StreamingBuilder, quote};
pub use self::command::{RestCommand, Route, classify};
pub use self::completion::{Reply, status_for};
pub use self::connection::HttpConnectionHandler;
pub use self::control::{
    ControlEvent, GatewayError, GatewayHandle, GatewaySettings, IncomingRequest, start,
};
pub use self::dispatch::{PoolError, WorkerPool};
pub use self::params::{PARAMS, ParamNames};

const WEBAPI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::webapi");
