// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorization seam.
//!
//! Validation itself lives outside this crate; the session only re-checks
//! its access when the subscription's authorization node changes and turns
//! a denial into a terminal `AccessDenied` error.

use crate::error::StreamError;
use fanout_core::SessionId;

/// Re-validates that a client may keep streaming its subscription.
pub trait AccessChecker: Send + Sync {
    fn check(&self, session: &SessionId) -> Result<(), StreamError>;
}

/// Checker that accepts everyone. Used when the subscription carries no
/// authorization section.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl AccessChecker for AllowAll {
    fn check(&self, _session: &SessionId) -> Result<(), StreamError> {
        Ok(())
    }
}
