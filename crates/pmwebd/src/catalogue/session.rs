//! Sessions opened against catalogue sources.

use std::collections::HashMap;
use std::time::Instant;

use crate::group::{GroupError, InDomId};

use super::profile::InstanceProfile;

/// Derived metric registered on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derived {
    /// Name clients address it by.
    pub name: String,
    /// Defining expression.
    pub expr: String,
}

/// One client session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Index of the bound source.
    pub source: usize,
    /// Instance profiles keyed by domain.
    pub profiles: HashMap<InDomId, InstanceProfile>,
    /// Derived metrics in registration order.
    pub derived: Vec<Derived>,
    /// When a request last resolved this session.
    pub last_used: Instant,
}

impl Session {
    /// Opens a session on source `source`.
    #[must_use]
    pub fn new(source: usize) -> Self {
        Self {
            source,
            profiles: HashMap::new(),
            derived: Vec::new(),
            last_used: Instant::now(),
        }
    }

    /// Whether instance `id` of `indom` is reported.
    #[must_use]
    pub fn includes(&self, indom: InDomId, id: u32) -> bool {
        self.profiles
            .get(&indom)
            .is_none_or(|profile| profile.includes(id))
    }

    /// Derived metric called `name`.
    #[must_use]
    pub fn derived(&self, name: &str) -> Option<(usize, &Derived)> {
        self.derived
            .iter()
            .enumerate()
            .find(|(_, derived)| derived.name == name)
    }
}

/// Parses `name = expr` definitions, one per line.
///
/// Blank lines and `#` comments are skipped.
///
/// # Errors
///
/// Returns a failure naming the first malformed line.
pub fn parse_definitions(text: &str) -> Result<Vec<Derived>, GroupError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let (name, expr) = line
                .split_once('=')
                .map(|(name, expr)| (name.trim(), expr.trim()))
                .filter(|(name, expr)| !name.is_empty() && !expr.is_empty())
                .ok_or_else(|| {
                    GroupError::failed(format!("invalid derived metric definition: {line}"))
                })?;
            Ok(Derived {
                name: name.to_owned(),
                expr: expr.to_owned(),
            })
        })
        .collect()
}
