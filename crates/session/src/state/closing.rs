// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closing: deadline-bounded partition handoff.
//!
//! The session is leaving and must release every partition it holds. For
//! partitions whose cursor the client has not committed yet, the session
//! waits — up to the remaining commit timeout — for the client to catch
//! up before releasing them, so no events are lost at the handoff
//! boundary. It reacts live to topology changes (a partition may be
//! taken away or flip to reassigning mid-wait) and to committed-offset
//! changes on the partitions it still watches.
//!
//! Releases are atomic: local bookkeeping moves first, then a single
//! `transfer` of the released keys runs under the subscription-global
//! lock.

use crate::context::SessionContext;
use crate::error::StreamError;
use crate::state::{switch_now, CleanupState, State};
use fanout_coord::{OffsetWatch, PartitionState, TopologyWatch, WatchHandler};
use fanout_core::{Clock, EventTypePartition, SubscriptionCursor};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ClosingState {
    /// Positions streamed but not yet committed, snapshotted from the
    /// preceding streaming state.
    uncommitted: BTreeMap<EventTypePartition, SubscriptionCursor>,
    last_commit_ms: u64,
    /// Offset watches for partitions whose commit we are waiting on.
    /// Invariant: every watched key is also in `uncommitted`.
    listeners: BTreeMap<EventTypePartition, Box<dyn OffsetWatch>>,
    topology: Option<Box<dyn TopologyWatch>>,
}

impl ClosingState {
    pub fn new(
        uncommitted: BTreeMap<EventTypePartition, SubscriptionCursor>,
        last_commit_ms: u64,
    ) -> Self {
        Self { uncommitted, last_commit_ms, listeners: BTreeMap::new(), topology: None }
    }

    /// Time left until the commit timeout, measured from the last commit
    /// the session observed. Zero when already expired.
    fn time_to_wait<C: Clock>(&self, ctx: &SessionContext<C>) -> Duration {
        let elapsed = ctx.clock().epoch_ms().saturating_sub(self.last_commit_ms);
        Duration::from_millis(ctx.params().commit_timeout_ms().saturating_sub(elapsed))
    }

    pub(crate) fn on_enter<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
    ) -> Result<(), StreamError> {
        let time_to_wait = self.time_to_wait(ctx);
        if self.uncommitted.is_empty() || time_to_wait.is_zero() {
            // Nothing to wait for, or the deadline already passed.
            ctx.switch_state(State::Cleanup(CleanupState::clean()));
            return Ok(());
        }

        info!(session_id = %ctx.session_id(), outstanding = self.uncommitted.len(),
            wait_ms = time_to_wait.as_millis() as u64,
            "waiting for outstanding commits before releasing partitions");

        // The deadline fires regardless of commit progress. A timed-out
        // wait is a clean close; cleanup against cleanup is harmless.
        ctx.schedule_task("commit_deadline", time_to_wait, |current, ctx| {
            switch_now(current, ctx, State::Cleanup(CleanupState::clean()))
        });

        let sender = ctx.sender();
        let handler: WatchHandler = Arc::new(move || {
            sender.add_task("topology_changed", topology_changed);
        });
        self.topology = Some(ctx.client().subscribe_for_topology_changes(handler)?);

        self.react_on_topology_change(ctx)
    }

    pub(crate) fn on_topology_changed<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
    ) -> Result<(), StreamError> {
        if self.topology.is_none() {
            return Err(StreamError::Internal(
                "topology change delivered with no active listener".into(),
            ));
        }
        self.react_on_topology_change(ctx)
    }

    /// Re-read the topology and sort this session's records into keys to
    /// release right away and keys to start watching for commits.
    fn react_on_topology_change<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
    ) -> Result<(), StreamError> {
        let snapshot = match self.topology.as_ref() {
            Some(watch) => watch.get_data()?,
            None => {
                return Err(StreamError::Internal(
                    "topology snapshot requested with no active listener".into(),
                ))
            }
        };

        let owned = snapshot.owned_by(ctx.session_id());
        let mut free_right_now = Vec::new();
        let mut add_listeners = Vec::new();
        for record in &owned {
            match record.state {
                PartitionState::Reassigning => {
                    if !self.uncommitted.contains_key(&record.key) {
                        // Nothing outstanding: hand it off immediately.
                        free_right_now.push(record.key.clone());
                    } else if !self.listeners.contains_key(&record.key) {
                        add_listeners.push(record.key.clone());
                    }
                }
                PartitionState::Assigned => {
                    if self.uncommitted.contains_key(&record.key)
                        && !self.listeners.contains_key(&record.key)
                    {
                        add_listeners.push(record.key.clone());
                    }
                }
                PartitionState::Unassigned => {}
            }
        }

        // Keys the store no longer attributes to this session: the claim
        // is already gone, drop them locally without waiting.
        let owned_keys: BTreeSet<&EventTypePartition> = owned.iter().map(|p| &p.key).collect();
        for key in self.uncommitted.keys() {
            if !owned_keys.contains(key) {
                free_right_now.push(key.clone());
            }
        }

        self.free_partitions(ctx, &free_right_now)?;
        for key in add_listeners {
            self.register_listener(ctx, key)?;
        }
        self.try_complete_state(ctx);
        Ok(())
    }

    /// Watch `key`'s committed offset, then process its current value in
    /// case the client is already caught up.
    fn register_listener<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
        key: EventTypePartition,
    ) -> Result<(), StreamError> {
        debug!(session_id = %ctx.session_id(), partition = %key, "watching for commit");
        let sender = ctx.sender();
        let watched = key.clone();
        let handler: WatchHandler = Arc::new(move || {
            let key = watched.clone();
            sender.add_task("offset_changed", move |current, ctx| {
                offset_changed(current, ctx, key)
            });
        });
        let watch = ctx.client().subscribe_for_offset_changes(&key, handler)?;
        self.listeners.insert(key.clone(), watch);
        self.react_on_offset(ctx, &key)
    }

    /// A watched offset node changed. Ignored when the key has already
    /// been freed.
    pub(crate) fn on_offset_changed<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
        key: &EventTypePartition,
    ) -> Result<(), StreamError> {
        let Some(watch) = self.listeners.get(key) else {
            return Ok(());
        };
        watch.refresh()?;
        self.react_on_offset(ctx, key)
    }

    /// Read the committed offset for `key`; release the partition once the
    /// commit is at or past the position streamed to the client.
    fn react_on_offset<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
        key: &EventTypePartition,
    ) -> Result<(), StreamError> {
        let token = ctx.client().get_offset(key)?;
        let committed = ctx.converter().convert(key, token.as_str())?;
        let caught_up = match self.uncommitted.get(key) {
            Some(position) => position.reached_by(&committed)?,
            None => false,
        };
        if caught_up {
            self.free_partitions(ctx, std::slice::from_ref(key))?;
        }
        self.try_complete_state(ctx);
        Ok(())
    }

    /// Once nothing is outstanding, the handoff is complete.
    fn try_complete_state<C: Clock>(&mut self, ctx: &SessionContext<C>) {
        if self.uncommitted.is_empty() {
            ctx.switch_state(State::Cleanup(CleanupState::clean()));
        }
    }

    /// Release `keys`: drop local bookkeeping, close their listeners, then
    /// hand them off atomically under the subscription-global lock.
    ///
    /// A listener that fails to close does not stop the release; the first
    /// such error resurfaces after the transfer so the loop can escalate.
    fn free_partitions<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
        keys: &[EventTypePartition],
    ) -> Result<(), StreamError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut first_close_err = None;
        for key in keys {
            self.uncommitted.remove(key);
            if let Some(watch) = self.listeners.remove(key) {
                if let Err(err) = watch.close() {
                    warn!(session_id = %ctx.session_id(), partition = %key, error = %err,
                        "failed to cancel offset listener");
                    first_close_err.get_or_insert(err);
                }
            }
        }

        info!(session_id = %ctx.session_id(), partitions = ?keys, "releasing partitions");
        let client = ctx.client();
        let inner_client = ctx.client();
        let from = ctx.session_id().clone();
        let released: Vec<EventTypePartition> = keys.to_vec();
        client.run_locked(Box::new(move || inner_client.transfer(&from, &released)))?;

        match first_close_err {
            Some(err) => Err(StreamError::ListenerCancel(err)),
            None => Ok(()),
        }
    }

    pub(crate) fn on_exit<C: Clock>(&mut self, ctx: &SessionContext<C>) {
        let watched: Vec<EventTypePartition> = self.listeners.keys().cloned().collect();
        if let Err(err) = self.free_partitions(ctx, &watched) {
            warn!(session_id = %ctx.session_id(), error = %err,
                "failed to release watched partitions on exit");
        }
        if let Some(watch) = self.topology.take() {
            if let Err(err) = watch.close() {
                warn!(session_id = %ctx.session_id(), error = %err, "failed to close topology listener");
            }
        }
    }

    #[cfg(test)]
    fn watched_keys(&self) -> Vec<EventTypePartition> {
        self.listeners.keys().cloned().collect()
    }

    #[cfg(test)]
    fn outstanding_keys(&self) -> Vec<EventTypePartition> {
        self.uncommitted.keys().cloned().collect()
    }
}

/// Task body for topology fires while closing.
pub(crate) fn topology_changed<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
) -> Result<(), StreamError> {
    match current {
        State::Closing(state) => state.on_topology_changed(ctx),
        _ => Ok(()),
    }
}

/// Task body for committed-offset fires while closing.
pub(crate) fn offset_changed<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
    key: EventTypePartition,
) -> Result<(), StreamError> {
    match current {
        State::Closing(state) => state.on_offset_changed(ctx, &key),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "closing_tests.rs"]
mod tests;
