// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound frames to the connected client.

use crate::error::StreamError;
use fanout_core::SubscriptionCursor;
use thiserror::Error;

/// Sink write failures. A failed batch write means the client connection
/// is gone; the session reacts by closing.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("client connection gone: {0}")]
    ConnectionGone(String),

    #[error("failed to serialize frame: {0}")]
    Serialize(String),
}

/// Where the session writes event batches and its single terminal frame.
///
/// Exactly one terminal frame is written per stream: either
/// `write_closed` (clean end, including commit-timeout handoffs) or
/// `write_error` with the first fatal error encountered.
pub trait StreamSink: Send + Sync {
    /// Deliver a batch of events positioned at `cursor`.
    fn write_batch(
        &self,
        cursor: &SubscriptionCursor,
        events: &[serde_json::Value],
    ) -> Result<(), SinkError>;

    /// Terminal frame: the stream ended cleanly.
    fn write_closed(&self) -> Result<(), SinkError>;

    /// Terminal frame: the stream ended with a fatal error.
    fn write_error(&self, error: &StreamError) -> Result<(), SinkError>;
}
