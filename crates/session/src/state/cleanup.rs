// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cleanup: terminal teardown, safe to enter from anywhere.
//!
//! Everything here is best-effort: releasing leftover claims,
//! unregistering the session and closing context watches log failures and
//! continue, so entering cleanup can never fail and re-entering it (e.g.
//! from a late deadline fire) is harmless. Exactly one terminal frame is
//! written per stream.

use crate::context::SessionContext;
use crate::error::StreamError;
use crate::state::State;
use fanout_core::{Clock, EventTypePartition};
use tracing::{error, info, warn};

pub struct CleanupState {
    error: Option<StreamError>,
}

impl CleanupState {
    /// Clean close, including commit-timeout handoffs.
    pub fn clean() -> Self {
        Self { error: None }
    }

    /// Close carrying the first fatal error encountered.
    pub fn failed(error: StreamError) -> Self {
        Self { error: Some(error) }
    }

    pub(crate) fn on_enter<C: Clock>(
        &mut self,
        ctx: &SessionContext<C>,
    ) -> Result<(), StreamError> {
        let client = ctx.client();

        // Release anything the store still attributes to this session.
        match client.list_partitions() {
            Ok(partitions) => {
                let leftover: Vec<EventTypePartition> = partitions
                    .iter()
                    .filter(|p| p.is_owned_by(ctx.session_id()))
                    .map(|p| p.key.clone())
                    .collect();
                if !leftover.is_empty() {
                    let inner_client = ctx.client();
                    let from = ctx.session_id().clone();
                    let keys = leftover.clone();
                    if let Err(err) =
                        client.run_locked(Box::new(move || inner_client.transfer(&from, &keys)))
                    {
                        warn!(session_id = %ctx.session_id(), error = %err,
                            "failed to release leftover partitions");
                    }
                }
            }
            Err(err) => {
                warn!(session_id = %ctx.session_id(), error = %err,
                    "could not list partitions during cleanup");
            }
        }

        if let Err(err) = client.unregister_session(ctx.session_id()) {
            warn!(session_id = %ctx.session_id(), error = %err, "failed to unregister session");
        }

        ctx.close_context_watches();

        if ctx.mark_terminal_frame() {
            let written = match &self.error {
                Some(err) => {
                    error!(session_id = %ctx.session_id(), error = %err, "stream closed with error");
                    ctx.sink().write_error(err)
                }
                None => {
                    info!(session_id = %ctx.session_id(), "stream closed cleanly");
                    ctx.sink().write_closed()
                }
            };
            if let Err(err) = written {
                warn!(session_id = %ctx.session_id(), error = %err, "failed to write terminal frame");
            }
        }

        ctx.switch_state(State::Dead);
        Ok(())
    }

    pub(crate) fn on_exit<C: Clock>(&mut self, _ctx: &SessionContext<C>) {}
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;
