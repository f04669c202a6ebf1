//! JSON description of the sources a catalogue serves.
//!
//! ```json
//! {"sources": [{
//!   "hostspec": "localhost",
//!   "labels": {"hostname": "box"},
//!   "indoms": [{"indom": "60.2", "instances": [{"id": 0, "name": "cpu0"}]}],
//!   "metrics": [{"name": "kernel.percpu.cpu.user", "pmid": "60.0.0",
//!                "type": "u64", "sem": "counter", "indom": "60.2",
//!                "values": [{"instance": 0, "value": 42}]}]
//! }]}
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;
use serde_json::{Number, Value};

use crate::group::{InDomId, PmId};

use super::CatalogueError;

/// Label name to value.
pub type Labels = BTreeMap<String, String>;

/// Root of a catalogue document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogueDocument {
    /// Sources in selection order; the first is the default.
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

/// One metric source.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Stable identifier; derived from the host specification when absent.
    #[serde(default)]
    pub source: Option<String>,
    /// Host specification clients select the source with.
    pub hostspec: String,
    /// Source-level labels.
    #[serde(default)]
    pub labels: Labels,
    /// Username sessions on this source demand.
    #[serde(default)]
    pub username: Option<String>,
    /// Password sessions on this source demand.
    #[serde(default)]
    pub password: Option<String>,
    /// Authentication realm.
    #[serde(default)]
    pub realm: Option<String>,
    /// Instance domains.
    #[serde(default)]
    pub indoms: Vec<InDomSpec>,
    /// Metrics.
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

/// Value type of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MetricType {
    /// Signed 32-bit.
    #[serde(rename = "32")]
    I32,
    /// Unsigned 32-bit.
    #[serde(rename = "u32")]
    U32,
    /// Signed 64-bit.
    #[serde(rename = "64")]
    I64,
    /// Unsigned 64-bit.
    #[serde(rename = "u64")]
    U64,
    /// Single precision.
    #[serde(rename = "float")]
    Float,
    /// Double precision.
    #[serde(rename = "double")]
    Double,
    /// Text.
    #[serde(rename = "string")]
    String,
}

impl MetricType {
    /// Type name as reported to clients.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::I32 => "32",
            Self::U32 => "u32",
            Self::I64 => "64",
            Self::U64 => "u64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
        }
    }

    /// Parses client-supplied text into a value of this type.
    #[must_use]
    pub fn parse_value(self, text: &str) -> Option<Value> {
        let text = text.trim();
        let number = match self {
            Self::I32 => text.parse::<i32>().ok().map(Number::from),
            Self::U32 => text.parse::<u32>().ok().map(Number::from),
            Self::I64 => text.parse::<i64>().ok().map(Number::from),
            Self::U64 => text.parse::<u64>().ok().map(Number::from),
            Self::Float | Self::Double => text.parse::<f64>().ok().and_then(Number::from_f64),
            Self::String => return Some(Value::from(text)),
        };
        number.map(Value::Number)
    }
}

fn default_sem() -> String {
    "instant".to_owned()
}

fn default_units() -> String {
    "none".to_owned()
}

/// One metric and its current values.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    /// Dotted name.
    pub name: String,
    /// Dotted `domain.cluster.item` identifier.
    pub pmid: PmId,
    /// Value type.
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Semantics name.
    #[serde(default = "default_sem")]
    pub sem: String,
    /// Units description.
    #[serde(default = "default_units")]
    pub units: String,
    /// Instance domain, absent for singular metrics.
    #[serde(default)]
    pub indom: Option<InDomId>,
    /// Metric labels.
    #[serde(default)]
    pub labels: Labels,
    /// One-line help text.
    #[serde(default)]
    pub oneline: Option<String>,
    /// Long help text.
    #[serde(default)]
    pub helptext: Option<String>,
    /// Current values.
    #[serde(default)]
    pub values: Vec<ValueSpec>,
}

/// A current value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueSpec {
    /// Instance, absent for singular metrics.
    #[serde(default)]
    pub instance: Option<u32>,
    /// JSON scalar.
    pub value: Value,
}

/// One instance domain.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InDomSpec {
    /// Dotted `domain.serial` identifier.
    pub indom: InDomId,
    /// Domain labels.
    #[serde(default)]
    pub labels: Labels,
    /// One-line help text.
    #[serde(default)]
    pub oneline: Option<String>,
    /// Long help text.
    #[serde(default)]
    pub helptext: Option<String>,
    /// Members.
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

/// One member of an instance domain.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSpec {
    /// Numeric identifier.
    pub id: u32,
    /// External name.
    pub name: String,
    /// Instance labels.
    #[serde(default)]
    pub labels: Labels,
}

impl CatalogueDocument {
    /// Reads and validates a catalogue file.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogueError`] when the file cannot be read, parsed or
    /// validated.
    pub fn from_path(path: &Utf8Path) -> Result<Self, CatalogueError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogueError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parses and validates catalogue JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogueError`] when the text is not a valid catalogue.
    pub fn from_json(text: &str) -> Result<Self, CatalogueError> {
        let document: Self =
            serde_json::from_str(text).map_err(|source| CatalogueError::Parse { source })?;
        document.validate()?;
        Ok(document)
    }

    fn validate(&self) -> Result<(), CatalogueError> {
        for source in &self.sources {
            source.validate()?;
        }
        Ok(())
    }
}

impl SourceSpec {
    /// Instance domain `indom`, if the source defines it.
    #[must_use]
    pub fn indom(&self, indom: InDomId) -> Option<&InDomSpec> {
        self.indoms.iter().find(|spec| spec.indom == indom)
    }

    /// Metric called `name`.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|metric| metric.name == name)
    }

    fn validate(&self) -> Result<(), CatalogueError> {
        let mut names = HashSet::new();
        for metric in &self.metrics {
            if !names.insert(metric.name.as_str()) {
                return Err(CatalogueError::DuplicateMetric {
                    hostspec: self.hostspec.clone(),
                    name: metric.name.clone(),
                });
            }
            let domain = match metric.indom {
                Some(indom) => Some(self.indom(indom).ok_or_else(|| {
                    CatalogueError::UnknownInDom {
                        metric: metric.name.clone(),
                        indom: indom.to_string(),
                    }
                })?),
                None => None,
            };
            for value in &metric.values {
                let fits = match (domain, value.instance) {
                    (None, None) => true,
                    (Some(domain), Some(instance)) => domain.instance(instance).is_some(),
                    _ => false,
                };
                if !fits {
                    return Err(CatalogueError::StrayValue {
                        metric: metric.name.clone(),
                        instance: value.instance,
                    });
                }
            }
        }
        Ok(())
    }
}

impl InDomSpec {
    /// Member with identifier `id`.
    #[must_use]
    pub fn instance(&self, id: u32) -> Option<&InstanceSpec> {
        self.instances.iter().find(|instance| instance.id == id)
    }

    /// Member called `name`.
    #[must_use]
    pub fn instance_named(&self, name: &str) -> Option<&InstanceSpec> {
        self.instances.iter().find(|instance| instance.name == name)
    }
}
