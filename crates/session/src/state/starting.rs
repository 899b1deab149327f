// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Starting: register with the cluster and wait for a first assignment.

use crate::context::{auth_changed, session_list_changed, SessionContext};
use crate::error::StreamError;
use crate::state::{switch_now, State, StreamingState};
use fanout_coord::{Session, TopologyWatch, WatchHandler};
use fanout_core::Clock;
use std::sync::Arc;
use tracing::warn;

/// Initial state of every session.
///
/// Registers the session record, installs the session-list watch (whose
/// fires trigger rebalancing) and the authorization watch, then waits on
/// the topology until at least one partition is assigned here.
#[derive(Default)]
pub struct StartingState {
    topology: Option<Box<dyn TopologyWatch>>,
}

impl StartingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_enter<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
    ) -> Result<(), StreamError> {
        let client = ctx.client();

        let mut record =
            Session::new(ctx.session_id().clone(), ctx.params().commit_timeout_ms());
        record.stream_limit = ctx.params().stream_limit;
        client.register_session(record)?;

        let sender = ctx.sender();
        let handler: WatchHandler = Arc::new(move || {
            sender.add_task("session_list_changed", session_list_changed);
        });
        ctx.install_session_list_watch(client.subscribe_for_session_list_changes(handler)?);

        let sender = ctx.sender();
        let handler: WatchHandler = Arc::new(move || {
            sender.add_task("auth_changed", auth_changed);
        });
        ctx.install_auth_watch(client.subscribe_for_auth_changes(handler)?);

        let sender = ctx.sender();
        let handler: WatchHandler = Arc::new(move || {
            sender.add_task("topology_changed", assignment_check);
        });
        self.topology = Some(client.subscribe_for_topology_changes(handler)?);

        // Our own registration may have raced the watch install; rebalance
        // once explicitly so the first assignment cannot be missed.
        ctx.add_task("rebalance", |_current, ctx| ctx.rebalance());

        if self.check_assignment(ctx)? {
            ctx.switch_state(State::Streaming(StreamingState::new()));
        }
        Ok(())
    }

    /// True when the current topology assigns at least one partition here.
    fn check_assignment<C: Clock>(&self, ctx: &SessionContext<C>) -> Result<bool, StreamError> {
        let watch = self
            .topology
            .as_ref()
            .ok_or_else(|| StreamError::Internal("topology watch missing in starting".into()))?;
        let topology = watch.get_data()?;
        Ok(topology.partitions.iter().any(|p| p.is_owned_by(ctx.session_id())))
    }

    pub(crate) fn on_exit<C: Clock>(&mut self, ctx: &SessionContext<C>) {
        if let Some(watch) = self.topology.take() {
            if let Err(err) = watch.close() {
                warn!(session_id = %ctx.session_id(), error = %err, "failed to close topology watch");
            }
        }
    }
}

/// Task body for topology fires while starting.
pub(crate) fn assignment_check<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
) -> Result<(), StreamError> {
    let ready = match current {
        State::Starting(state) => state.check_assignment(ctx)?,
        _ => return Ok(()),
    };
    if ready {
        switch_now(current, ctx, State::Streaming(StreamingState::new()))?;
    }
    Ok(())
}
