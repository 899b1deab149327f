// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session error taxonomy.
//!
//! Every failure inside a task bubbles to the loop's single catch, which
//! switches the session to Cleanup carrying the error. `on_exit` paths log
//! and suppress instead.

use fanout_coord::CoordinationError;
use fanout_core::CursorError;
use thiserror::Error;

/// Fatal failures of a streaming session.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("coordination store failure: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("invalid cursor: {0}")]
    Cursor(#[from] CursorError),

    #[error("failed to cancel offset listener: {0}")]
    ListenerCancel(#[source] CoordinationError),

    #[error("access revoked: {0}")]
    AccessDenied(String),

    #[error("internal error: {0}")]
    Internal(String),
}
