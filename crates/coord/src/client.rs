// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination-store client interface.
//!
//! The store is a hierarchical node tree with one-shot watches:
//!
//! - `/subscriptions/{id}/topology` — JSON [`crate::types::Topology`]
//! - `/subscriptions/{id}/offsets/{event_type}/{partition}` — offset token
//! - `/subscriptions/{id}/sessions/{session_id}` — JSON session record
//! - `/subscriptions/{id}/lock` — mutual exclusion for read-compute-write
//!
//! Calls are synchronous and may block the session loop; the loop has
//! nothing else to do for its session while a store call is in flight.

use crate::types::{Partition, Session, Topology};
use fanout_core::{EventTypePartition, Offset, SessionId};
use std::sync::Arc;
use thiserror::Error;

/// Callback installed on a watched node.
///
/// Invoked at most once per armed watch, on an unspecified thread.
/// Implementations must only enqueue work, never mutate session state.
pub type WatchHandler = Arc<dyn Fn() + Send + Sync>;

/// Action executed while holding the subscription-global lock.
pub type LockedAction = Box<dyn FnOnce() -> Result<(), CoordinationError> + Send>;

/// Failures surfaced by the coordination store.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("coordination store connection lost: {0}")]
    ConnectionLost(String),

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("watch failed: {0}")]
    WatchFailed(String),

    #[error("failed to close watch: {0}")]
    CloseFailed(String),

    #[error("could not acquire subscription lock: {0}")]
    LockFailed(String),

    #[error("transfer rejected: {0}")]
    TransferFailed(String),
}

/// Watch over the topology node.
pub trait TopologyWatch: Send + Sync {
    /// Return the latest snapshot and atomically re-arm the watch.
    fn get_data(&self) -> Result<Topology, CoordinationError>;

    /// Release the watch. Idempotent.
    fn close(&self) -> Result<(), CoordinationError>;
}

/// Watch over one partition's committed-offset node.
pub trait OffsetWatch: Send + Sync {
    /// Re-arm after a fire; the next change invokes the handler again.
    fn refresh(&self) -> Result<(), CoordinationError>;

    /// Release the watch. Idempotent.
    fn close(&self) -> Result<(), CoordinationError>;
}

/// Watch over a list node (session registry, authorization).
pub trait ListWatch: Send + Sync {
    /// Re-arm after a fire.
    fn refresh(&self) -> Result<(), CoordinationError>;

    /// Release the watch. Idempotent.
    fn close(&self) -> Result<(), CoordinationError>;
}

/// Client for the subscription's coordination store.
pub trait CoordinationClient: Send + Sync {
    /// Create this session's registry node. Idempotent by id.
    fn register_session(&self, session: Session) -> Result<(), CoordinationError>;

    /// Remove this session's registry node. Idempotent.
    fn unregister_session(&self, id: &SessionId) -> Result<(), CoordinationError>;

    fn list_sessions(&self) -> Result<Vec<Session>, CoordinationError>;

    fn list_partitions(&self) -> Result<Vec<Partition>, CoordinationError>;

    fn get_topology(&self) -> Result<Topology, CoordinationError>;

    /// Write a batch of new assignment records, bumping the topology
    /// version once.
    fn update_partitions_configuration(
        &self,
        changes: Vec<Partition>,
    ) -> Result<(), CoordinationError>;

    /// Atomically release `keys` from `from`, handing them to any eligible
    /// session (or parking them unassigned when none exists).
    fn transfer(
        &self,
        from: &SessionId,
        keys: &[EventTypePartition],
    ) -> Result<(), CoordinationError>;

    /// One-shot read of a partition's committed offset.
    fn get_offset(&self, key: &EventTypePartition) -> Result<Offset, CoordinationError>;

    fn subscribe_for_topology_changes(
        &self,
        handler: WatchHandler,
    ) -> Result<Box<dyn TopologyWatch>, CoordinationError>;

    fn subscribe_for_offset_changes(
        &self,
        key: &EventTypePartition,
        handler: WatchHandler,
    ) -> Result<Box<dyn OffsetWatch>, CoordinationError>;

    fn subscribe_for_session_list_changes(
        &self,
        handler: WatchHandler,
    ) -> Result<Box<dyn ListWatch>, CoordinationError>;

    fn subscribe_for_auth_changes(
        &self,
        handler: WatchHandler,
    ) -> Result<Box<dyn ListWatch>, CoordinationError>;

    /// Run `action` while holding the subscription-global lock.
    ///
    /// Any read-compute-write sequence touching the session-to-partition
    /// mapping must go through here.
    fn run_locked(&self, action: LockedAction) -> Result<(), CoordinationError>;
}
