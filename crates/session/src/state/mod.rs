// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle states.
//!
//! A closed set of variants with `on_enter`/`on_exit` hooks. The
//! coordinator never looks inside a variant; tasks that belong to one
//! state re-match on the current state when they run and no-op if the
//! session has moved on.
//!
//! `on_exit` never propagates errors: failures are logged and every
//! listener a state created is closed (best-effort) before the next state
//! enters.

pub mod cleanup;
pub mod closing;
pub mod starting;
pub mod streaming;

pub use cleanup::CleanupState;
pub use closing::ClosingState;
pub use starting::StartingState;
pub use streaming::StreamingState;

use crate::context::SessionContext;
use crate::error::StreamError;
use fanout_core::Clock;
use tracing::info;

/// Current lifecycle phase of a session.
pub enum State {
    Starting(StartingState),
    Streaming(StreamingState),
    Closing(ClosingState),
    Cleanup(CleanupState),
    /// Sentinel: the task loop exits once this is current.
    Dead,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Starting(_) => "starting",
            State::Streaming(_) => "streaming",
            State::Closing(_) => "closing",
            State::Cleanup(_) => "cleanup",
            State::Dead => "dead",
        }
    }

    pub(crate) fn enter<C: Clock>(&mut self, ctx: &SessionContext<C>) -> Result<(), StreamError> {
        match self {
            State::Starting(state) => state.on_enter(ctx),
            State::Streaming(state) => state.on_enter(ctx),
            State::Closing(state) => state.on_enter(ctx),
            State::Cleanup(state) => state.on_enter(ctx),
            State::Dead => Ok(()),
        }
    }

    pub(crate) fn exit<C: Clock>(&mut self, ctx: &SessionContext<C>) {
        match self {
            State::Starting(state) => state.on_exit(ctx),
            State::Streaming(state) => state.on_exit(ctx),
            State::Closing(state) => state.on_exit(ctx),
            State::Cleanup(state) => state.on_exit(ctx),
            State::Dead => {}
        }
    }
}

/// Perform a state switch in the running task: old `on_exit` (never
/// fails), swap, new `on_enter`. An `on_enter` error propagates to the
/// loop, which lands the session in Cleanup with that error.
pub(crate) fn switch_now<C: Clock>(
    current: &mut State,
    ctx: &SessionContext<C>,
    next: State,
) -> Result<(), StreamError> {
    info!(session_id = %ctx.session_id(), from = current.name(), to = next.name(), "state switch");
    current.exit(ctx);
    *current = next;
    current.enter(ctx)
}
