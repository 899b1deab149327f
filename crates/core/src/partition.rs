// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Partition identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a partition within a subscription: `(event_type, partition)`.
///
/// Ordered lexicographically by event type, then partition id, so maps and
/// sets keyed by partition iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventTypePartition {
    pub event_type: String,
    pub partition: String,
}

impl EventTypePartition {
    pub fn new(event_type: impl Into<String>, partition: impl Into<String>) -> Self {
        Self { event_type: event_type.into(), partition: partition.into() }
    }
}

impl fmt::Display for EventTypePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.event_type, self.partition)
    }
}

#[cfg(test)]
#[path = "partition_tests.rs"]
mod tests;
