//! Explicit node name generation.
//!
//! A [`NameGenerator`] hands out instance ids per kind tag. Each generator
//! keeps its own counters, so two independent trees (or two tests) never
//! observe each other's numbering.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::validate_kind;
use crate::{IdError, NodeName};

/// Issues unique [`NodeName`]s, numbering each kind from 1.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counters: Mutex<HashMap<String, u64>>,
}

impl NameGenerator {
    /// Creates a generator with no names issued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next name for `kind`.
    pub fn next(&self, kind: &str) -> Result<NodeName, IdError> {
        validate_kind(kind)?;

        let instance = {
            let mut counters = self.counters.lock();
            let counter = counters.entry(kind.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        NodeName::new(kind, instance)
    }

    /// Returns how many names have been issued for `kind`.
    pub fn issued(&self, kind: &str) -> u64 {
        self.counters.lock().get(kind).copied().unwrap_or(0)
    }
}
