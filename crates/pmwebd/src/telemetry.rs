//! Log output for the gateway.
//!
//! Records go to stderr through a `tracing` registry. The filter comes from
//! `log_filter`; the record shape from `log_format`.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

use pmweb_config::{Config, LogFormat};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Proof that logging is set up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `log_filter` is not a valid filter expression.
    #[error("invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },
    /// Some other subscriber got there first.
    #[error("cannot install log subscriber")]
    Subscriber(#[source] TryInitError),
}

/// Installs the global subscriber once per process.
///
/// Bootstrap may run several times in one process (tests do); only the
/// first call takes effect.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a foreign
/// subscriber is already registered.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(config))
        .map(|()| TelemetryHandle)
}

fn parse_filter(filter: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter {
        filter: filter.to_owned(),
        reason: error.to_string(),
    })
}

fn install(config: &Config) -> Result<(), TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    let ansi = io::stderr().is_terminal();

    let (json, compact) = match config.log_format() {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(io::stderr);
            (Some(layer), None)
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_thread_names(true)
                .with_ansi(ansi)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(io::stderr);
            (None, Some(layer))
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(compact)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}
