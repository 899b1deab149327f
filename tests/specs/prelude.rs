// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the workspace specs.

pub use fanout_coord::{CoordinationClient, Partition, PartitionState, Session, StoreOp};
pub use fanout_core::{Clock, EventTypePartition, Offset, SessionId, SubscriptionCursor};
pub use fanout_session::test_support::{cursor, etp, Frame, Harness, RunningSession};
pub use fanout_session::{CleanupState, ClosingState, State};

use std::collections::BTreeMap;

/// Uncommitted-offsets map over `orders` partitions.
pub fn uncommitted(
    entries: &[(&str, &str)],
) -> BTreeMap<EventTypePartition, SubscriptionCursor> {
    entries
        .iter()
        .map(|(partition, offset)| {
            (etp("orders", partition), cursor("orders", partition, offset))
        })
        .collect()
}

/// Poll the session until it reports `want` as its current state.
pub async fn wait_for_state(session: &RunningSession, want: &str) {
    for _ in 0..100 {
        if session.state_name().await == want {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("session never reached state {want}");
}

/// The `Transfer` operations recorded by the store, in order.
pub fn transfers(harness: &Harness) -> Vec<(Vec<EventTypePartition>, bool)> {
    harness
        .store
        .history()
        .into_iter()
        .filter_map(|op| match op {
            StoreOp::Transfer { keys, locked, .. } => Some((keys, locked)),
            _ => None,
        })
        .collect()
}
