//! Packed metric and instance-domain identifiers.
//!
//! A metric identifier packs a 9-bit domain, a 12-bit cluster and a 10-bit
//! item; an instance-domain identifier packs a 9-bit domain and a 22-bit
//! serial. Both render as dotted strings in the JSON schema and as raw
//! integers in compatibility mode.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

const DOMAIN_BITS: u32 = 9;
const CLUSTER_BITS: u32 = 12;
const ITEM_BITS: u32 = 10;
const SERIAL_BITS: u32 = 22;

const DOMAIN_MASK: u32 = (1 << DOMAIN_BITS) - 1;
const CLUSTER_MASK: u32 = (1 << CLUSTER_BITS) - 1;
const ITEM_MASK: u32 = (1 << ITEM_BITS) - 1;
const SERIAL_MASK: u32 = (1 << SERIAL_BITS) - 1;

/// Instance identifier reported for values that carry no instance.
pub const NULL_INSTANCE_ID: u32 = u32::MAX;

/// Errors raised when parsing dotted identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdParseError {
    /// The text did not have the expected number of dotted components.
    #[error("identifier '{0}' has the wrong number of components")]
    Components(String),
    /// A component was not a number or exceeded its field width.
    #[error("identifier '{0}' has an out-of-range component")]
    Range(String),
}

/// Packed metric identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct PmId(u32);

impl PmId {
    /// Identifier reserved for "no metric".
    pub const NULL: Self = Self(u32::MAX);

    /// Packs a metric identifier from its components.
    #[must_use]
    pub const fn new(domain: u32, cluster: u32, item: u32) -> Self {
        Self(
            ((domain & DOMAIN_MASK) << (CLUSTER_BITS + ITEM_BITS))
                | ((cluster & CLUSTER_MASK) << ITEM_BITS)
                | (item & ITEM_MASK),
        )
    }

    /// Packed integer form, used by compatibility responses.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the null identifier.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    fn components(self) -> (u32, u32, u32) {
        (
            (self.0 >> (CLUSTER_BITS + ITEM_BITS)) & DOMAIN_MASK,
            (self.0 >> ITEM_BITS) & CLUSTER_MASK,
            self.0 & ITEM_MASK,
        )
    }
}

impl fmt::Display for PmId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return formatter.write_str("PM_ID_NULL");
        }
        let (domain, cluster, item) = self.components();
        write!(formatter, "{domain}.{cluster}.{item}")
    }
}

impl FromStr for PmId {
    type Err = IdParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input == "PM_ID_NULL" {
            return Ok(Self::NULL);
        }
        let parts = dotted(input, 3)?;
        match parts.as_slice() {
            [domain, cluster, item]
                if *domain <= DOMAIN_MASK && *cluster <= CLUSTER_MASK && *item <= ITEM_MASK =>
            {
                Ok(Self::new(*domain, *cluster, *item))
            }
            _ => Err(IdParseError::Range(input.to_owned())),
        }
    }
}

impl TryFrom<String> for PmId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Packed instance-domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct InDomId(u32);

impl InDomId {
    /// Identifier used by metrics without an instance domain.
    pub const NULL: Self = Self(u32::MAX);

    /// Packs an instance-domain identifier.
    #[must_use]
    pub const fn new(domain: u32, serial: u32) -> Self {
        Self(((domain & DOMAIN_MASK) << SERIAL_BITS) | (serial & SERIAL_MASK))
    }

    /// Packed integer form.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether the metric has no instance domain.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for InDomId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for InDomId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return formatter.write_str("PM_INDOM_NULL");
        }
        let domain = (self.0 >> SERIAL_BITS) & DOMAIN_MASK;
        let serial = self.0 & SERIAL_MASK;
        write!(formatter, "{domain}.{serial}")
    }
}

impl FromStr for InDomId {
    type Err = IdParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input == "PM_INDOM_NULL" {
            return Ok(Self::NULL);
        }
        let parts = dotted(input, 2)?;
        match parts.as_slice() {
            [domain, serial] if *domain <= DOMAIN_MASK && *serial <= SERIAL_MASK => {
                Ok(Self::new(*domain, *serial))
            }
            _ => Err(IdParseError::Range(input.to_owned())),
        }
    }
}

impl TryFrom<String> for InDomId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn dotted(input: &str, expected: usize) -> Result<Vec<u32>, IdParseError> {
    let parts = input
        .split('.')
        .map(|part| part.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| IdParseError::Range(input.to_owned()))?;
    if parts.len() != expected {
        return Err(IdParseError::Components(input.to_owned()));
    }
    Ok(parts)
}
