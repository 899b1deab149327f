// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming knobs for one client session.

use std::time::Duration;

/// Session configuration
#[derive(Debug, Clone)]
pub struct StreamParameters {
    /// Maximum time to wait for outstanding commits before forced release.
    pub commit_timeout: Duration,
    /// Close the stream after this many delivered events, if set.
    pub stream_limit: Option<usize>,
    /// Cadence of the streaming status check (client connection, commit
    /// timeout).
    pub status_check_interval: Duration,
}

impl StreamParameters {
    pub fn new(commit_timeout: Duration) -> Self {
        Self { commit_timeout, ..Self::default() }
    }

    pub fn commit_timeout_ms(&self) -> u64 {
        self.commit_timeout.as_millis() as u64
    }
}

impl Default for StreamParameters {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(60),
            stream_limit: None,
            status_check_interval: Duration::from_secs(1),
        }
    }
}
