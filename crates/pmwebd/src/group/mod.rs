//! Boundary with the metric collection layer.
//!
//! A [`WebGroup`] performs one collection operation and reports each
//! discovered entity through a [`GroupCallbacks`] table, in depth-first
//! discovery order: session, then metric or domain, then value or instance.
//! Consumers rely on that ordering; implementations must not interleave
//! groups.

mod error;
mod ids;
mod types;

use std::collections::HashMap;
use std::time::Duration;

pub use self::error::GroupError;
pub use self::ids::{IdParseError, InDomId, NULL_INSTANCE_ID, PmId};
pub use self::types::{
    WebAccess, WebInDom, WebInstance, WebLabelSet, WebMetric, WebResult, WebScrape, WebSource,
    WebValue, WebValueSet,
};

/// Request parameters keyed by name.
pub type Parameters = HashMap<String, String>;

/// Inputs shared by every collection operation.
#[derive(Debug, Clone, Copy)]
pub struct GroupRequest<'a> {
    /// Session identifier, `None` to open a fresh session.
    pub context: Option<&'a str>,
    /// Request parameters.
    pub params: &'a Parameters,
    /// Budget the operation should honour for downstream I/O.
    pub timeout: Duration,
}

/// Receiver for entities discovered by a collection operation.
pub trait GroupCallbacks {
    /// A session was opened or resolved.
    fn on_context(&mut self, context: &str, source: &WebSource);

    /// A metric descriptor was resolved.
    fn on_metric(&mut self, context: &str, metric: &WebMetric);

    /// A fetch started at the given timestamp.
    fn on_fetch(&mut self, context: &str, result: &WebResult);

    /// Values for a metric follow.
    fn on_fetch_values(&mut self, context: &str, valueset: &WebValueSet);

    /// One value within the current value-set.
    fn on_fetch_value(&mut self, context: &str, value: &WebValue);

    /// An instance domain was resolved.
    fn on_indom(&mut self, context: &str, indom: &WebInDom);

    /// One instance within the current domain.
    fn on_instance(&mut self, context: &str, instance: &WebInstance);

    /// One sample ready for exposition.
    fn on_scrape(&mut self, context: &str, scrape: &WebScrape);

    /// Merge label sets into exposition form, writing into `labels.buffer`.
    fn on_scrape_labels(&mut self, context: &str, labels: &mut WebLabelSet);

    /// Access policy, consulted once per session before any output.
    ///
    /// # Errors
    ///
    /// Returns the failure that must terminate the operation.
    fn on_check(&mut self, context: &str, access: &WebAccess) -> Result<(), GroupError>;
}

/// Collection operations exposed over the REST surface.
pub trait WebGroup: Send + Sync {
    /// Opens or describes a session.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn context(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;

    /// Describes metrics.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn metric(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;

    /// Samples metric values.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn fetch(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;

    /// Describes an instance domain and its instances.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn indom(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;

    /// Adjusts the instance profile of a session.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn profile(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;

    /// Stores a value into a metric.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn store(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;

    /// Registers derived metrics.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn derive(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;

    /// Produces exposition samples for every metric.
    ///
    /// # Errors
    ///
    /// Returns the failure reported by the collection layer.
    fn scrape(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError>;
}

impl<T> WebGroup for std::sync::Arc<T>
where
    T: WebGroup + ?Sized,
{
    fn context(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).context(request, callbacks)
    }

    fn metric(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).metric(request, callbacks)
    }

    fn fetch(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).fetch(request, callbacks)
    }

    fn indom(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).indom(request, callbacks)
    }

    fn profile(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).profile(request, callbacks)
    }

    fn store(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).store(request, callbacks)
    }

    fn derive(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).derive(request, callbacks)
    }

    fn scrape(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (**self).scrape(request, callbacks)
    }
}
