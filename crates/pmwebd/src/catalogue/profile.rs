//! Per-session instance profiles.

use std::collections::BTreeSet;

/// Instances of one domain a session reports.
///
/// Sessions start with every instance included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceProfile {
    /// Every instance except those listed.
    AllExcept(BTreeSet<u32>),
    /// Only the listed instances.
    Only(BTreeSet<u32>),
}

impl Default for InstanceProfile {
    fn default() -> Self {
        Self::AllExcept(BTreeSet::new())
    }
}

impl InstanceProfile {
    /// Includes `instances`; an empty list includes every instance.
    pub fn add(&mut self, instances: &[u32]) {
        if instances.is_empty() {
            *self = Self::default();
            return;
        }
        match self {
            Self::AllExcept(excluded) => {
                for id in instances {
                    excluded.remove(id);
                }
            }
            Self::Only(included) => included.extend(instances.iter().copied()),
        }
    }

    /// Excludes `instances`; an empty list excludes every instance.
    pub fn delete(&mut self, instances: &[u32]) {
        if instances.is_empty() {
            *self = Self::Only(BTreeSet::new());
            return;
        }
        match self {
            Self::AllExcept(excluded) => excluded.extend(instances.iter().copied()),
            Self::Only(included) => {
                for id in instances {
                    included.remove(id);
                }
            }
        }
    }

    /// Whether instance `id` is reported.
    #[must_use]
    pub fn includes(&self, id: u32) -> bool {
        match self {
            Self::AllExcept(excluded) => !excluded.contains(&id),
            Self::Only(included) => included.contains(&id),
        }
    }
}
