//! In-process metric catalogue serving the collection operations.
//!
//! Sources, metrics and instance domains are described in JSON and held in
//! memory. Sessions are numbered from one and keep their own instance
//! profiles and derived metrics; stored values are shared by every session
//! on the same source.

mod errors;
mod model;
mod profile;
mod service;
mod session;

pub use self::errors::CatalogueError;
pub use self::model::{
    CatalogueDocument, InDomSpec, InstanceSpec, Labels, MetricSpec, MetricType, SourceSpec,
    ValueSpec,
};
pub use self::profile::InstanceProfile;
pub use self::service::{Clock, MetricCatalogue, system_clock};
pub use self::session::{Derived, Session, parse_definitions};

const CATALOGUE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::catalogue");

/// Catalogue served when no file is configured.
pub(crate) const BUILTIN_CATALOGUE: &str = include_str!("../../data/catalogue.json");
