//! Entities delivered by the collection layer to the streaming callbacks.
//!
//! Label fields carry pre-serialised JSON object text; value fields carry
//! pre-serialised JSON scalars. Both are emitted without re-encoding.

use super::ids::{InDomId, PmId};

/// Metadata describing the source behind a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSource {
    /// Stable source identifier.
    pub source: String,
    /// Host specification the session was opened against.
    pub hostspec: String,
    /// Source-level label set.
    pub labels: Option<String>,
}

/// Descriptor of one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebMetric {
    /// Dotted metric name.
    pub name: String,
    /// Series identifier for the metric on its source.
    pub series: String,
    /// Packed metric identifier.
    pub pmid: PmId,
    /// Instance domain, [`InDomId::NULL`] for singular metrics.
    pub indom: InDomId,
    /// Value type name, for example `u64` or `double`.
    pub metric_type: String,
    /// Semantics name, for example `counter` or `instant`.
    pub sem: String,
    /// Units description.
    pub units: String,
    /// Merged metric label set.
    pub labels: Option<String>,
    /// One-line help text.
    pub oneline: Option<String>,
    /// Long help text.
    pub helptext: Option<String>,
}

/// Timestamp of a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WebResult {
    /// Whole seconds since the epoch.
    pub seconds: i64,
    /// Nanoseconds within the second.
    pub nanoseconds: i64,
}

/// Start of the values reported for one metric within a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebValueSet {
    /// Metric the following values belong to.
    pub pmid: PmId,
    /// Metric name.
    pub name: String,
}

/// One value within a value-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebValue {
    /// Metric the value belongs to.
    pub pmid: PmId,
    /// Instance identifier, `None` for singular metrics.
    pub instance: Option<u32>,
    /// Pre-serialised JSON scalar.
    pub value: String,
}

/// Descriptor of one instance domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebInDom {
    /// Packed instance-domain identifier.
    pub indom: InDomId,
    /// Domain label set.
    pub labels: Option<String>,
    /// One-line help text.
    pub oneline: Option<String>,
    /// Long help text.
    pub helptext: Option<String>,
}

/// One instance within an instance domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebInstance {
    /// Domain the instance belongs to.
    pub indom: InDomId,
    /// Instance identifier.
    pub instance: u32,
    /// External instance name.
    pub name: String,
    /// Instance label set.
    pub labels: Option<String>,
}

/// One exposition line produced by a scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebScrape {
    /// Sample time, seconds.
    pub seconds: i64,
    /// Sample time, nanoseconds.
    pub nanoseconds: i64,
    /// Metric descriptor; labels are already in exposition form.
    pub metric: WebMetric,
    /// Instance the sample belongs to, if any; labels in exposition form.
    pub instance: Option<WebInstance>,
    /// Sampled value.
    pub value: WebValue,
}

/// Label sets awaiting conversion to exposition form.
///
/// `sets` is ordered from lowest to highest precedence. The callback fills
/// `buffer` with the merged result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebLabelSet {
    /// Label sets in increasing precedence.
    pub sets: Vec<Vec<(String, String)>>,
    /// Merged output.
    pub buffer: String,
}

/// Access descriptor attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebAccess {
    /// Username the session demands.
    pub username: Option<String>,
    /// Password the session demands.
    pub password: Option<String>,
    /// Authentication realm.
    pub realm: Option<String>,
}
