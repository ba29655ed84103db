//! The `NodeName` identity type.
//!
//! Each name carries the kind of node it identifies (`Gateway`, `HttpListener`)
//! and an instance number that disambiguates several nodes of the same kind.

use std::sync::Arc;

use crate::IdError;

// =============================================================================
// Node Name
// =============================================================================

/// Process-unique identity of a node in a supervision tree.
///
/// Cheap to clone: the kind tag is shared.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeName {
    kind: Arc<str>,
    instance: u64,
}

impl NodeName {
    /// Creates a name from a kind tag and instance id.
    ///
    /// Instance ids start at 1; zero is rejected.
    pub fn new(kind: &str, instance: u64) -> Result<Self, IdError> {
        validate_kind(kind)?;
        if instance == 0 {
            return Err(IdError::InvalidInstance(instance.to_string()));
        }
        Ok(Self {
            kind: Arc::from(kind),
            instance,
        })
    }

    /// Returns the kind tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the instance id.
    #[must_use]
    pub const fn instance(&self) -> u64 {
        self.instance
    }

    /// Parses a name from a string in the format `{kind}_{instance}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some((kind, instance)) = s.rsplit_once('_') else {
            return Err(IdError::MissingSeparator);
        };

        let instance = instance
            .parse::<u64>()
            .map_err(|_| IdError::InvalidInstance(instance.to_string()))?;

        Self::new(kind, instance)
    }
}

/// Kind tags are non-empty and limited to ASCII alphanumerics, `.`, `-` and `_`.
pub(crate) fn validate_kind(kind: &str) -> Result<(), IdError> {
    let valid = !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(IdError::InvalidKind {
            kind: kind.to_string(),
        })
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.kind, self.instance)
    }
}

impl std::str::FromStr for NodeName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for NodeName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for NodeName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
