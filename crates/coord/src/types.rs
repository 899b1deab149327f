// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination-store records: topology, partition assignments, sessions.

use fanout_core::{EventTypePartition, SessionId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a partition-to-session assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionState {
    /// Owned and served by its session.
    Assigned,
    /// Still owned by its session, but marked to be handed off.
    Reassigning,
    /// Not owned by anyone; waiting for a rebalance to pick it up.
    Unassigned,
}

/// One partition assignment record inside the topology node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    #[serde(flatten)]
    pub key: EventTypePartition,
    /// Owning session; `None` iff the record is `Unassigned`.
    pub session: Option<SessionId>,
    pub state: PartitionState,
}

impl Partition {
    pub fn assigned(key: EventTypePartition, session: SessionId) -> Self {
        Self { key, session: Some(session), state: PartitionState::Assigned }
    }

    pub fn reassigning(key: EventTypePartition, session: SessionId) -> Self {
        Self { key, session: Some(session), state: PartitionState::Reassigning }
    }

    pub fn unassigned(key: EventTypePartition) -> Self {
        Self { key, session: None, state: PartitionState::Unassigned }
    }

    /// True when `session` currently holds this partition (assigned or
    /// mid-handoff).
    pub fn is_owned_by(&self, session: &SessionId) -> bool {
        self.session.as_ref() == Some(session) && self.state != PartitionState::Unassigned
    }
}

/// Full assignment snapshot with a monotonic version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub version: u64,
    pub partitions: Vec<Partition>,
}

impl Topology {
    pub fn get(&self, key: &EventTypePartition) -> Option<&Partition> {
        self.partitions.iter().find(|p| &p.key == key)
    }

    /// Records currently held by `session`.
    pub fn owned_by(&self, session: &SessionId) -> Vec<&Partition> {
        self.partitions.iter().filter(|p| p.is_owned_by(session)).collect()
    }
}

/// Session registry record stored under `/sessions/{id}`.
///
/// Mirrors the session's streaming knobs so other cluster members and
/// operational tooling can read them without reaching the session itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub commit_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_limit: Option<usize>,
}

impl Session {
    pub fn new(id: SessionId, commit_timeout_ms: u64) -> Self {
        Self { id, commit_timeout_ms, stream_limit: None }
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
