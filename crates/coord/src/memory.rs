// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory coordination store.
//!
//! Complete [`CoordinationClient`] implementation with real one-shot watch
//! semantics: a watch fires its handler at most once per arming and is
//! re-armed by `refresh`/`get_data`. Handlers run on the writer's thread,
//! outside the store lock, and are expected to only enqueue work.
//!
//! The store records every mutating operation (and whether the global lock
//! was held at the time) so tests can assert on ordering and atomicity.
//! Fault injection knobs cover the error paths the session core must
//! survive.

use crate::client::{
    CoordinationClient, CoordinationError, ListWatch, LockedAction, OffsetWatch, TopologyWatch,
    WatchHandler,
};
use crate::types::{Partition, Session, Topology};
use fanout_core::{EventTypePartition, Offset, SessionId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Recorded mutating operation, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    RegisterSession(SessionId),
    UnregisterSession(SessionId),
    UpdatePartitions { count: usize },
    Transfer { from: SessionId, keys: Vec<EventTypePartition>, locked: bool },
}

struct WatchEntry {
    id: u64,
    armed: bool,
    closed: bool,
    handler: WatchHandler,
}

#[derive(Default)]
struct WatchSet {
    entries: Vec<WatchEntry>,
}

impl WatchSet {
    fn add(&mut self, id: u64, handler: WatchHandler) {
        self.entries.push(WatchEntry { id, armed: true, closed: false, handler });
    }

    /// Collect armed handlers and disarm them.
    fn fire(&mut self, out: &mut Vec<WatchHandler>) {
        for entry in &mut self.entries {
            if entry.armed && !entry.closed {
                entry.armed = false;
                out.push(entry.handler.clone());
            }
        }
    }

    fn rearm(&mut self, id: u64) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if !entry.closed => {
                entry.armed = true;
                true
            }
            _ => false,
        }
    }

    fn close(&mut self, id: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.closed = true;
            entry.armed = false;
        }
    }

    fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.closed).count()
    }
}

#[derive(Default)]
struct Faults {
    fail_next_transfer: bool,
    fail_topology_subscribe: bool,
    fail_offset_close: BTreeSet<EventTypePartition>,
}

#[derive(Default)]
struct StoreState {
    topology: Topology,
    sessions: BTreeMap<SessionId, Session>,
    offsets: BTreeMap<EventTypePartition, Offset>,
    topology_watches: WatchSet,
    session_watches: WatchSet,
    auth_watches: WatchSet,
    offset_watches: BTreeMap<EventTypePartition, WatchSet>,
    lock_held: bool,
    history: Vec<StoreOp>,
    offset_reads: BTreeMap<EventTypePartition, u64>,
    faults: Faults,
}

#[derive(Default)]
struct Inner {
    state: Mutex<StoreState>,
    lock: Mutex<()>,
    next_watch_id: AtomicU64,
}

/// Shared in-process coordination store. Cheap to clone; all clones see
/// the same node tree.
#[derive(Clone, Default)]
pub struct MemoryCoordination {
    inner: Arc<Inner>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    fn watch_id(&self) -> u64 {
        self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed)
    }

    fn fire(handlers: Vec<WatchHandler>) {
        for handler in handlers {
            handler();
        }
    }

    /// Write a partition's committed offset, firing its watches.
    pub fn set_offset(&self, key: &EventTypePartition, offset: Offset) {
        let handlers = {
            let mut state = self.inner.state.lock();
            state.offsets.insert(key.clone(), offset);
            let mut handlers = Vec::new();
            if let Some(set) = state.offset_watches.get_mut(key) {
                set.fire(&mut handlers);
            }
            handlers
        };
        Self::fire(handlers);
    }

    /// Signal a change of the subscription's authorization node.
    pub fn touch_auth(&self) {
        let handlers = {
            let mut state = self.inner.state.lock();
            let mut handlers = Vec::new();
            state.auth_watches.fire(&mut handlers);
            handlers
        };
        Self::fire(handlers);
    }

    /// Mutating operations recorded so far, oldest first.
    pub fn history(&self) -> Vec<StoreOp> {
        self.inner.state.lock().history.clone()
    }

    /// Number of `get_offset` reads performed for `key`.
    pub fn offset_reads(&self, key: &EventTypePartition) -> u64 {
        self.inner.state.lock().offset_reads.get(key).copied().unwrap_or(0)
    }

    /// Watches not yet closed, across all node kinds.
    pub fn open_watch_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.topology_watches.open_count()
            + state.session_watches.open_count()
            + state.auth_watches.open_count()
            + state.offset_watches.values().map(WatchSet::open_count).sum::<usize>()
    }

    /// Watches ever subscribed on `key`'s offset node.
    pub fn offset_watch_count(&self, key: &EventTypePartition) -> usize {
        self.inner.state.lock().offset_watches.get(key).map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Watches ever subscribed on the topology node.
    pub fn topology_watch_count(&self) -> usize {
        self.inner.state.lock().topology_watches.entries.len()
    }

    pub fn topology_version(&self) -> u64 {
        self.inner.state.lock().topology.version
    }

    /// Fail the next `transfer` call with `TransferFailed`.
    pub fn fail_next_transfer(&self) {
        self.inner.state.lock().faults.fail_next_transfer = true;
    }

    /// Fail every topology subscription attempt with `WatchFailed`.
    pub fn fail_topology_subscribe(&self) {
        self.inner.state.lock().faults.fail_topology_subscribe = true;
    }

    /// Make `close()` of offset watches on `key` return `CloseFailed`.
    pub fn fail_offset_close(&self, key: &EventTypePartition) {
        self.inner.state.lock().faults.fail_offset_close.insert(key.clone());
    }
}

impl CoordinationClient for MemoryCoordination {
    fn register_session(&self, session: Session) -> Result<(), CoordinationError> {
        let handlers = {
            let mut state = self.inner.state.lock();
            let changed = state.sessions.get(&session.id) != Some(&session);
            let id = session.id.clone();
            state.sessions.insert(id.clone(), session);
            if !changed {
                return Ok(());
            }
            state.history.push(StoreOp::RegisterSession(id));
            let mut handlers = Vec::new();
            state.session_watches.fire(&mut handlers);
            handlers
        };
        Self::fire(handlers);
        Ok(())
    }

    fn unregister_session(&self, id: &SessionId) -> Result<(), CoordinationError> {
        let handlers = {
            let mut state = self.inner.state.lock();
            if state.sessions.remove(id).is_none() {
                return Ok(());
            }
            state.history.push(StoreOp::UnregisterSession(id.clone()));
            let mut handlers = Vec::new();
            state.session_watches.fire(&mut handlers);
            handlers
        };
        Self::fire(handlers);
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<Session>, CoordinationError> {
        Ok(self.inner.state.lock().sessions.values().cloned().collect())
    }

    fn list_partitions(&self) -> Result<Vec<Partition>, CoordinationError> {
        Ok(self.inner.state.lock().topology.partitions.clone())
    }

    fn get_topology(&self) -> Result<Topology, CoordinationError> {
        Ok(self.inner.state.lock().topology.clone())
    }

    fn update_partitions_configuration(
        &self,
        changes: Vec<Partition>,
    ) -> Result<(), CoordinationError> {
        if changes.is_empty() {
            return Ok(());
        }
        let handlers = {
            let mut state = self.inner.state.lock();
            for change in &changes {
                match state.topology.partitions.iter_mut().find(|p| p.key == change.key) {
                    Some(existing) => *existing = change.clone(),
                    None => state.topology.partitions.push(change.clone()),
                }
            }
            state.topology.version += 1;
            debug!(version = state.topology.version, count = changes.len(), "topology updated");
            state.history.push(StoreOp::UpdatePartitions { count: changes.len() });
            let mut handlers = Vec::new();
            state.topology_watches.fire(&mut handlers);
            handlers
        };
        Self::fire(handlers);
        Ok(())
    }

    fn transfer(
        &self,
        from: &SessionId,
        keys: &[EventTypePartition],
    ) -> Result<(), CoordinationError> {
        let handlers = {
            let mut state = self.inner.state.lock();
            if state.faults.fail_next_transfer {
                state.faults.fail_next_transfer = false;
                return Err(CoordinationError::TransferFailed("injected fault".into()));
            }
            let locked = state.lock_held;
            debug!(from = %from, keys = keys.len(), locked, "transfer");
            state.history.push(StoreOp::Transfer {
                from: from.clone(),
                keys: keys.to_vec(),
                locked,
            });
            // Any registered session other than the releasing one is eligible.
            let target = state.sessions.keys().find(|id| *id != from).cloned();
            let mut changed = false;
            for record in &mut state.topology.partitions {
                if keys.contains(&record.key) && record.session.as_ref() == Some(from) {
                    *record = match &target {
                        Some(session) => Partition::assigned(record.key.clone(), session.clone()),
                        None => Partition::unassigned(record.key.clone()),
                    };
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
            state.topology.version += 1;
            let mut handlers = Vec::new();
            state.topology_watches.fire(&mut handlers);
            handlers
        };
        Self::fire(handlers);
        Ok(())
    }

    fn get_offset(&self, key: &EventTypePartition) -> Result<Offset, CoordinationError> {
        let mut state = self.inner.state.lock();
        *state.offset_reads.entry(key.clone()).or_insert(0) += 1;
        Ok(state.offsets.get(key).cloned().unwrap_or_else(Offset::begin))
    }

    fn subscribe_for_topology_changes(
        &self,
        handler: WatchHandler,
    ) -> Result<Box<dyn TopologyWatch>, CoordinationError> {
        let id = self.watch_id();
        {
            let mut state = self.inner.state.lock();
            if state.faults.fail_topology_subscribe {
                return Err(CoordinationError::WatchFailed("injected fault".into()));
            }
            state.topology_watches.add(id, handler);
        }
        Ok(Box::new(MemoryTopologyWatch { store: self.clone(), id }))
    }

    fn subscribe_for_offset_changes(
        &self,
        key: &EventTypePartition,
        handler: WatchHandler,
    ) -> Result<Box<dyn OffsetWatch>, CoordinationError> {
        let id = self.watch_id();
        self.inner.state.lock().offset_watches.entry(key.clone()).or_default().add(id, handler);
        Ok(Box::new(MemoryOffsetWatch { store: self.clone(), key: key.clone(), id }))
    }

    fn subscribe_for_session_list_changes(
        &self,
        handler: WatchHandler,
    ) -> Result<Box<dyn ListWatch>, CoordinationError> {
        let id = self.watch_id();
        self.inner.state.lock().session_watches.add(id, handler);
        Ok(Box::new(MemoryListWatch { store: self.clone(), id, auth: false }))
    }

    fn subscribe_for_auth_changes(
        &self,
        handler: WatchHandler,
    ) -> Result<Box<dyn ListWatch>, CoordinationError> {
        let id = self.watch_id();
        self.inner.state.lock().auth_watches.add(id, handler);
        Ok(Box::new(MemoryListWatch { store: self.clone(), id, auth: true }))
    }

    fn run_locked(&self, action: LockedAction) -> Result<(), CoordinationError> {
        let _guard = self.inner.lock.lock();
        self.inner.state.lock().lock_held = true;
        let result = action();
        self.inner.state.lock().lock_held = false;
        result
    }
}

struct MemoryTopologyWatch {
    store: MemoryCoordination,
    id: u64,
}

impl TopologyWatch for MemoryTopologyWatch {
    fn get_data(&self) -> Result<Topology, CoordinationError> {
        let mut state = self.store.inner.state.lock();
        if !state.topology_watches.rearm(self.id) {
            return Err(CoordinationError::WatchFailed("topology watch closed".into()));
        }
        Ok(state.topology.clone())
    }

    fn close(&self) -> Result<(), CoordinationError> {
        self.store.inner.state.lock().topology_watches.close(self.id);
        Ok(())
    }
}

struct MemoryOffsetWatch {
    store: MemoryCoordination,
    key: EventTypePartition,
    id: u64,
}

impl OffsetWatch for MemoryOffsetWatch {
    fn refresh(&self) -> Result<(), CoordinationError> {
        let mut state = self.store.inner.state.lock();
        let rearmed =
            state.offset_watches.get_mut(&self.key).map(|set| set.rearm(self.id)).unwrap_or(false);
        if !rearmed {
            return Err(CoordinationError::WatchFailed(format!(
                "offset watch for {} closed",
                self.key
            )));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), CoordinationError> {
        let mut state = self.store.inner.state.lock();
        if let Some(set) = state.offset_watches.get_mut(&self.key) {
            set.close(self.id);
        }
        if state.faults.fail_offset_close.contains(&self.key) {
            return Err(CoordinationError::CloseFailed(format!(
                "injected fault for {}",
                self.key
            )));
        }
        Ok(())
    }
}

struct MemoryListWatch {
    store: MemoryCoordination,
    id: u64,
    auth: bool,
}

impl ListWatch for MemoryListWatch {
    fn refresh(&self) -> Result<(), CoordinationError> {
        let mut state = self.store.inner.state.lock();
        let set = if self.auth { &mut state.auth_watches } else { &mut state.session_watches };
        if !set.rearm(self.id) {
            return Err(CoordinationError::WatchFailed("list watch closed".into()));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), CoordinationError> {
        let mut state = self.store.inner.state.lock();
        let set = if self.auth { &mut state.auth_watches } else { &mut state.session_watches };
        set.close(self.id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
