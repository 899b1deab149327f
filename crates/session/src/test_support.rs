// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness and doubles for session tests.
//!
//! Drives a real session loop against the in-memory coordination store, a
//! fake clock and a frame-collecting sink. Used by this crate's state
//! tests and by the workspace-level specs.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::access::AccessChecker;
use crate::config::StreamParameters;
use crate::context::{SessionContext, SessionDeps, StreamingContext};
use crate::error::StreamError;
use crate::hooks::ShutdownHooks;
use crate::sink::{SinkError, StreamSink};
use crate::state::State;
use fanout_coord::{CoordinationClient, FairRebalancer, MemoryCoordination, Partition};
use fanout_core::{
    EventTypePartition, FakeClock, Offset, SessionId, SubscriptionCursor, TokenCursorConverter,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn etp(event_type: &str, partition: &str) -> EventTypePartition {
    EventTypePartition::new(event_type, partition)
}

pub fn cursor(event_type: &str, partition: &str, offset: &str) -> SubscriptionCursor {
    SubscriptionCursor::new(etp(event_type, partition), Offset::new(offset))
}

/// One frame observed by the client side of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Batch { cursor: SubscriptionCursor, events: usize },
    Closed,
    Error(String),
}

/// Sink that records every frame; can simulate a dead client connection.
#[derive(Default)]
pub struct CollectingSink {
    frames: Mutex<Vec<Frame>>,
    fail_batches: AtomicBool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Terminal frames (closed or error) observed so far.
    pub fn terminal_frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, Frame::Closed | Frame::Error(_)))
            .cloned()
            .collect()
    }

    /// Make every subsequent batch write fail with `ConnectionGone`.
    pub fn fail_batches(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }
}

impl StreamSink for CollectingSink {
    fn write_batch(
        &self,
        cursor: &SubscriptionCursor,
        events: &[serde_json::Value],
    ) -> Result<(), SinkError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(SinkError::ConnectionGone("simulated".into()));
        }
        self.frames
            .lock()
            .push(Frame::Batch { cursor: cursor.clone(), events: events.len() });
        Ok(())
    }

    fn write_closed(&self) -> Result<(), SinkError> {
        self.frames.lock().push(Frame::Closed);
        Ok(())
    }

    fn write_error(&self, error: &StreamError) -> Result<(), SinkError> {
        self.frames.lock().push(Frame::Error(error.to_string()));
        Ok(())
    }
}

/// Access checker that can be flipped to deny mid-test.
#[derive(Default)]
pub struct StaticAccess {
    denied: AtomicBool,
}

impl StaticAccess {
    pub fn deny(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }
}

impl AccessChecker for StaticAccess {
    fn check(&self, _session: &SessionId) -> Result<(), StreamError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(StreamError::AccessDenied("revoked by operator".into()));
        }
        Ok(())
    }
}

/// Everything needed to run one session in-process.
pub struct Harness {
    pub store: MemoryCoordination,
    pub clock: FakeClock,
    pub sink: Arc<CollectingSink>,
    pub access: Arc<StaticAccess>,
    pub hooks: ShutdownHooks,
    pub params: StreamParameters,
    pub session_id: SessionId,
}

impl Harness {
    pub fn new() -> Self {
        let params = StreamParameters {
            commit_timeout: Duration::from_secs(1),
            stream_limit: None,
            status_check_interval: Duration::from_millis(100),
        };
        Self::with_params(params)
    }

    pub fn with_params(params: StreamParameters) -> Self {
        Self {
            store: MemoryCoordination::new(),
            clock: FakeClock::new(),
            sink: Arc::new(CollectingSink::new()),
            access: Arc::new(StaticAccess::default()),
            hooks: ShutdownHooks::new(),
            params,
            session_id: SessionId::new("s-test"),
        }
    }

    pub fn deps(&self) -> SessionDeps<FakeClock> {
        SessionDeps {
            session_id: self.session_id.clone(),
            params: self.params.clone(),
            client: Arc::new(self.store.clone()),
            converter: Arc::new(TokenCursorConverter),
            sink: Arc::clone(&self.sink) as Arc<dyn StreamSink>,
            rebalancer: Arc::new(FairRebalancer),
            access: Arc::clone(&self.access) as Arc<dyn AccessChecker>,
            clock: self.clock.clone(),
        }
    }

    /// Seed the store's topology with unassigned partition records.
    pub fn seed_partitions(&self, keys: &[EventTypePartition]) {
        let records = keys.iter().map(|k| Partition::unassigned(k.clone())).collect();
        self.store.update_partitions_configuration(records).unwrap();
    }

    /// Full session: shutdown hook + Starting + loop.
    pub fn spawn(&self) -> RunningSession {
        let context = StreamingContext::new(self.deps());
        let handle = context.handle();
        let hooks = self.hooks.clone();
        let join = tokio::spawn(async move { context.stream(&hooks).await });
        RunningSession { handle, join }
    }

    /// Bare loop with no initial state: tests enqueue their own switch.
    pub fn spawn_idle(&self) -> RunningSession {
        let mut context = StreamingContext::new(self.deps());
        let handle = context.handle();
        let join = tokio::spawn(async move { context.run().await });
        RunningSession { handle, join }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// A session loop running on a background tokio task.
pub struct RunningSession {
    pub handle: SessionContext<FakeClock>,
    pub join: JoinHandle<()>,
}

impl RunningSession {
    /// Wait until every task enqueued before this call has run. Returns
    /// false when the loop has already exited.
    pub async fn drain(&self) -> bool {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.handle.add_task("drain_probe", move |_current, _ctx| {
            let _ = tx.send(());
            Ok(())
        });
        rx.await.is_ok()
    }

    /// Name of the state the loop is currently in ("dead" once the loop
    /// has exited).
    pub async fn state_name(&self) -> &'static str {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.handle.add_task("state_probe", move |current, _ctx| {
            let _ = tx.send(current.name());
            Ok(())
        });
        rx.await.unwrap_or("dead")
    }

    /// Switch the session into `state` and wait for the switch to run.
    pub async fn enter(&self, state: State) {
        self.handle.switch_state(state);
        self.drain().await;
    }
}
