//! Errors raised while loading a metric catalogue.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures loading or validating a catalogue document.
#[derive(Debug, Error)]
pub enum CatalogueError {
    /// The catalogue file could not be read.
    #[error("failed to read catalogue {path}: {source}")]
    Read {
        /// File that failed.
        path: Utf8PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
    /// The document is not valid catalogue JSON.
    #[error("invalid catalogue document: {source}")]
    Parse {
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
    /// Two metrics of one source share a name.
    #[error("metric {name} is defined twice on source {hostspec}")]
    DuplicateMetric {
        /// Source host specification.
        hostspec: String,
        /// Repeated name.
        name: String,
    },
    /// A metric refers to an instance domain the source does not define.
    #[error("metric {metric} refers to undefined instance domain {indom}")]
    UnknownInDom {
        /// Offending metric.
        metric: String,
        /// Missing domain.
        indom: String,
    },
    /// A value's instance disagrees with its metric's instance domain.
    #[error("metric {metric} has a value for instance {instance:?} outside its domain")]
    StrayValue {
        /// Offending metric.
        metric: String,
        /// Instance named by the value.
        instance: Option<u32>,
    },
}
