//! Structured health reporting for gateway lifecycle events.

use std::net::SocketAddr;
use std::sync::Arc;

use pmweb_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::catalogue::MetricCatalogue;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the metric catalogue is ready to serve.
    fn catalogue_loaded(&self, catalogue: &MetricCatalogue);

    /// Invoked when the HTTP listener starts accepting.
    fn listener_ready(&self, endpoint: &SocketEndpoint, address: Option<SocketAddr>);

    /// Invoked after the listener and worker pool have drained.
    fn listener_stopped(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn catalogue_loaded(&self, catalogue: &MetricCatalogue) {
        (**self).catalogue_loaded(catalogue);
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint, address: Option<SocketAddr>) {
        (**self).listener_ready(endpoint, address);
    }

    fn listener_stopped(&self) {
        (**self).listener_stopped();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting gateway bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            worker_threads = config.worker_threads(),
            worker_queue = config.worker_queue(),
            require_credentials = config.require_credentials(),
            "gateway bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "gateway bootstrap failed"
        );
    }

    fn catalogue_loaded(&self, catalogue: &MetricCatalogue) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "catalogue_loaded",
            sources = catalogue.source_count(),
            metrics = catalogue.metric_count(),
            "metric catalogue ready"
        );
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint, address: Option<SocketAddr>) {
        match address {
            Some(address) => tracing::info!(
                target: HEALTH_TARGET,
                event = "listener_ready",
                endpoint = %endpoint,
                address = %address,
                "gateway accepting requests"
            ),
            None => tracing::info!(
                target: HEALTH_TARGET,
                event = "listener_ready",
                endpoint = %endpoint,
                "gateway accepting requests"
            ),
        }
    }

    fn listener_stopped(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_stopped",
            "gateway stopped accepting requests"
        );
    }
}
