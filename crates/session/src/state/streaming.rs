// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming: the normal serving state.
//!
//! Tracks which partitions this session holds, the positions already
//! streamed to the client but not yet committed, and the time of the last
//! observed commit. Commits are observed exclusively through the
//! coordination store's per-partition offset nodes. A periodic status
//! task closes the session when the client connection is gone or the
//! commit timeout has elapsed with outstanding cursors.

use crate::context::SessionContext;
use crate::error::StreamError;
use crate::state::{switch_now, ClosingState, State};
use fanout_coord::{OffsetWatch, TopologyWatch, WatchHandler};
use fanout_core::{Clock, EventTypePartition, SubscriptionCursor};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct StreamingState {
    topology: Option<Box<dyn TopologyWatch>>,
    assigned: BTreeSet<EventTypePartition>,
    commit_watches: BTreeMap<EventTypePartition, Box<dyn OffsetWatch>>,
    /// Positions streamed to the client with no commit observed yet.
    uncommitted: BTreeMap<EventTypePartition, SubscriptionCursor>,
    last_commit_ms: u64,
    delivered_events: usize,
}

impl StreamingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_enter<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
    ) -> Result<(), StreamError> {
        self.last_commit_ms = ctx.clock().epoch_ms();

        let sender = ctx.sender();
        let handler: WatchHandler = Arc::new(move || {
            sender.add_task("topology_changed", topology_changed);
        });
        self.topology = Some(ctx.client().subscribe_for_topology_changes(handler)?);
        self.react_on_topology(ctx)?;

        schedule_status_check(ctx);
        Ok(())
    }

    /// Re-read the topology and align the assigned set and commit watches
    /// with it.
    fn react_on_topology<C: Clock>(&mut self, ctx: &SessionContext<C>) -> Result<(), StreamError> {
        let watch = self
            .topology
            .as_ref()
            .ok_or_else(|| StreamError::Internal("topology watch missing in streaming".into()))?;
        let snapshot = watch.get_data()?;
        let mine: BTreeSet<EventTypePartition> =
            snapshot.owned_by(ctx.session_id()).into_iter().map(|p| p.key.clone()).collect();

        let gone: Vec<EventTypePartition> = self.assigned.difference(&mine).cloned().collect();
        for key in gone {
            self.uncommitted.remove(&key);
            if let Some(watch) = self.commit_watches.remove(&key) {
                if let Err(err) = watch.close() {
                    warn!(session_id = %ctx.session_id(), partition = %key, error = %err,
                        "failed to close commit watch");
                }
            }
        }

        let added: Vec<EventTypePartition> = mine.difference(&self.assigned).cloned().collect();
        for key in added {
            self.register_commit_watch(ctx, key)?;
        }
        self.assigned = mine;
        Ok(())
    }

    fn register_commit_watch<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
        key: EventTypePartition,
    ) -> Result<(), StreamError> {
        let sender = ctx.sender();
        let watched = key.clone();
        let handler: WatchHandler = Arc::new(move || {
            let key = watched.clone();
            sender.add_task("commit_observed", move |current, ctx| {
                commit_observed(current, ctx, key)
            });
        });
        let watch = ctx.client().subscribe_for_offset_changes(&key, handler)?;
        self.commit_watches.insert(key, watch);
        Ok(())
    }

    /// Process a committed-offset change for `key`.
    fn on_commit<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
        key: &EventTypePartition,
    ) -> Result<(), StreamError> {
        let Some(watch) = self.commit_watches.get(key) else {
            return Ok(());
        };
        watch.refresh()?;
        let token = ctx.client().get_offset(key)?;
        let committed = ctx.converter().convert(key, token.as_str())?;

        // Any commit is client activity, whether or not it catches up.
        self.last_commit_ms = ctx.clock().epoch_ms();
        let caught_up = match self.uncommitted.get(key) {
            Some(position) => position.reached_by(&committed)?,
            None => false,
        };
        if caught_up {
            self.uncommitted.remove(key);
        }
        Ok(())
    }

    /// Record a batch streamed to the client. Returns true when the stream
    /// limit has been reached.
    fn on_delivered<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
        cursor: SubscriptionCursor,
        events: usize,
    ) -> bool {
        if !self.assigned.contains(&cursor.key) {
            warn!(session_id = %ctx.session_id(), partition = %cursor.key,
                "dropping delivery for partition not assigned here");
            return false;
        }
        self.delivered_events += events;
        self.uncommitted.insert(cursor.key.clone(), cursor);
        match ctx.params().stream_limit {
            Some(limit) => self.delivered_events >= limit,
            None => false,
        }
    }

    fn status<C: Clock>(&self, ctx: &SessionContext<C>) -> Option<&'static str> {
        if !ctx.connection_ready() {
            return Some("client connection lost");
        }
        if !self.uncommitted.is_empty() {
            let idle = ctx.clock().epoch_ms().saturating_sub(self.last_commit_ms);
            if idle >= ctx.params().commit_timeout_ms() {
                return Some("commit timeout reached");
            }
        }
        None
    }

    #[cfg(test)]
    fn assigned_keys(&self) -> Vec<EventTypePartition> {
        self.assigned.iter().cloned().collect()
    }

    #[cfg(test)]
    fn outstanding_keys(&self) -> Vec<EventTypePartition> {
        self.uncommitted.keys().cloned().collect()
    }

    pub(crate) fn on_exit<C: Clock>(&mut self, ctx: &SessionContext<C>) {
        for (key, watch) in std::mem::take(&mut self.commit_watches) {
            if let Err(err) = watch.close() {
                warn!(session_id = %ctx.session_id(), partition = %key, error = %err,
                    "failed to close commit watch");
            }
        }
        if let Some(watch) = self.topology.take() {
            if let Err(err) = watch.close() {
                warn!(session_id = %ctx.session_id(), error = %err, "failed to close topology watch");
            }
        }
    }
}

/// Task body for topology fires while streaming.
pub(crate) fn topology_changed<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
) -> Result<(), StreamError> {
    match current {
        State::Streaming(state) => state.react_on_topology(ctx),
        _ => Ok(()),
    }
}

/// Task body for committed-offset fires while streaming.
pub(crate) fn commit_observed<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
    key: EventTypePartition,
) -> Result<(), StreamError> {
    match current {
        State::Streaming(state) => state.on_commit(ctx, &key),
        _ => Ok(()),
    }
}

/// Task body for [`SessionContext::deliver`]: write the batch, then record
/// the new uncommitted position.
pub(crate) fn deliver<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
    cursor: SubscriptionCursor,
    events: Vec<serde_json::Value>,
) -> Result<(), StreamError> {
    if !matches!(current, State::Streaming(_)) {
        return Ok(());
    }
    if let Err(err) = ctx.sink().write_batch(&cursor, &events) {
        warn!(session_id = %ctx.session_id(), error = %err, "batch write failed");
        ctx.set_connection_ready(false);
        return begin_close(current, ctx, "client connection lost");
    }
    let limit_reached = match current {
        State::Streaming(state) => state.on_delivered(ctx, cursor, events.len()),
        _ => return Ok(()),
    };
    if limit_reached {
        return begin_close(current, ctx, "stream limit reached");
    }
    Ok(())
}

/// Periodic status task: close on a dead connection or an expired commit
/// timeout, otherwise re-schedule itself.
pub(crate) fn status_check<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
) -> Result<(), StreamError> {
    let reason = match current {
        State::Streaming(state) => state.status(ctx),
        _ => return Ok(()),
    };
    match reason {
        Some(reason) => begin_close(current, ctx, reason),
        None => {
            schedule_status_check(ctx);
            Ok(())
        }
    }
}

fn schedule_status_check<C: Clock>(ctx: &SessionContext<C>) {
    ctx.schedule_task("status_check", ctx.params().status_check_interval, status_check);
}

/// Leave streaming for the closing protocol, snapshotting the uncommitted
/// positions and the last commit time at the moment of the switch.
pub(crate) fn begin_close<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
    reason: &str,
) -> Result<(), StreamError> {
    let (uncommitted, last_commit_ms) = match current {
        State::Streaming(state) => {
            info!(session_id = %ctx.session_id(), reason, "leaving streaming");
            (std::mem::take(&mut state.uncommitted), state.last_commit_ms)
        }
        _ => return Ok(()),
    };
    switch_now(current, ctx, State::Closing(ClosingState::new(uncommitted, last_commit_ms)))
}

#[cfg(test)]
#[path = "streaming_tests.rs"]
mod tests;
