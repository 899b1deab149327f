// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session coordinator.
//!
//! [`StreamingContext`] owns the current state and the consumer half of
//! the task queue; [`SessionContext`] is the cheap-clone handle states and
//! callbacks use to reach shared services and to enqueue work. Every
//! mutation of session state happens on the loop; external signals only
//! enqueue tasks.

use crate::access::AccessChecker;
use crate::config::StreamParameters;
use crate::error::StreamError;
use crate::hooks::ShutdownHooks;
use crate::sink::StreamSink;
use crate::state::{switch_now, CleanupState, StartingState, State};
use crate::tasks::{Task, TaskSender};
use fanout_coord::{CoordinationClient, ListWatch, Rebalancer};
use fanout_core::{Clock, CursorConverter, SessionId, SubscriptionCursor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Upper bound on one queue wait. A wake without a task runs nothing and
/// loops again.
const TASK_POLL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Everything a session needs from the outside world.
pub struct SessionDeps<C: Clock> {
    pub session_id: SessionId,
    pub params: StreamParameters,
    pub client: Arc<dyn CoordinationClient>,
    pub converter: Arc<dyn CursorConverter>,
    pub sink: Arc<dyn StreamSink>,
    pub rebalancer: Arc<dyn Rebalancer>,
    pub access: Arc<dyn AccessChecker>,
    pub clock: C,
}

#[derive(Default)]
struct ContextWatches {
    session_list: Option<Box<dyn ListWatch>>,
    auth: Option<Box<dyn ListWatch>>,
}

struct ContextInner<C: Clock> {
    session_id: SessionId,
    params: StreamParameters,
    client: Arc<dyn CoordinationClient>,
    converter: Arc<dyn CursorConverter>,
    sink: Arc<dyn StreamSink>,
    rebalancer: Arc<dyn Rebalancer>,
    access: Arc<dyn AccessChecker>,
    clock: C,
    connection_ready: AtomicBool,
    terminal_frame_sent: AtomicBool,
    watches: Mutex<ContextWatches>,
}

/// Cheap-clone handle to one session's shared services and task queue.
pub struct SessionContext<C: Clock> {
    inner: Arc<ContextInner<C>>,
    tasks: TaskSender<C>,
}

impl<C: Clock> Clone for SessionContext<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), tasks: self.tasks.clone() }
    }
}

impl<C: Clock> SessionContext<C> {
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn params(&self) -> &StreamParameters {
        &self.inner.params
    }

    pub fn client(&self) -> Arc<dyn CoordinationClient> {
        Arc::clone(&self.inner.client)
    }

    pub fn converter(&self) -> &dyn CursorConverter {
        self.inner.converter.as_ref()
    }

    pub fn sink(&self) -> &dyn StreamSink {
        self.inner.sink.as_ref()
    }

    pub fn access(&self) -> &dyn AccessChecker {
        self.inner.access.as_ref()
    }

    pub fn clock(&self) -> &C {
        &self.inner.clock
    }

    pub fn sender(&self) -> TaskSender<C> {
        self.tasks.clone()
    }

    /// Append a task to the session's queue.
    pub fn add_task<F>(&self, name: &'static str, body: F)
    where
        F: FnOnce(&mut State, &SessionContext<C>) -> Result<(), StreamError> + Send + 'static,
    {
        self.tasks.add_task(name, body);
    }

    /// Deliver a task through the queue after at least `delay`.
    pub fn schedule_task<F>(&self, name: &'static str, delay: Duration, body: F)
    where
        F: FnOnce(&mut State, &SessionContext<C>) -> Result<(), StreamError> + Send + 'static,
    {
        self.tasks.schedule_task(name, delay, body);
    }

    /// Enqueue a transition to `next`. The switch runs as its own task:
    /// old state's `on_exit`, then the swap, then the new state's
    /// `on_enter` as the last thing before the task returns.
    pub fn switch_state(&self, next: State) {
        self.add_task("switch_state", move |current, ctx| switch_now(current, ctx, next));
    }

    /// Recompute the partition assignment under the subscription-global
    /// lock. Invoked whenever the session list changes.
    pub fn rebalance(&self) -> Result<(), StreamError> {
        let client = self.client();
        let inner_client = self.client();
        let rebalancer = Arc::clone(&self.inner.rebalancer);
        client.run_locked(Box::new(move || {
            let sessions = inner_client.list_sessions()?;
            let partitions = inner_client.list_partitions()?;
            let changes = rebalancer.rebalance(&sessions, &partitions);
            if changes.is_empty() {
                return Ok(());
            }
            inner_client.update_partitions_configuration(changes)
        }))?;
        Ok(())
    }

    /// Push one batch toward the client. The write and the uncommitted
    /// bookkeeping happen on the loop.
    pub fn deliver(&self, cursor: SubscriptionCursor, events: Vec<serde_json::Value>) {
        self.add_task("deliver", move |current, ctx| {
            crate::state::streaming::deliver(current, ctx, cursor, events)
        });
    }

    /// Ask the session to close gracefully (wait for outstanding commits,
    /// then hand its partitions off).
    pub fn request_close(&self) {
        self.add_task("close_requested", |current, ctx| {
            crate::state::streaming::begin_close(current, ctx, "close requested")
        });
    }

    /// Marks the client connection live or gone. Checked by the streaming
    /// status task.
    pub fn set_connection_ready(&self, ready: bool) {
        self.inner.connection_ready.store(ready, Ordering::SeqCst);
    }

    pub fn connection_ready(&self) -> bool {
        self.inner.connection_ready.load(Ordering::SeqCst)
    }

    /// First caller wins the right to write the terminal frame.
    pub(crate) fn mark_terminal_frame(&self) -> bool {
        !self.inner.terminal_frame_sent.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn install_session_list_watch(&self, watch: Box<dyn ListWatch>) {
        self.inner.watches.lock().session_list = Some(watch);
    }

    pub(crate) fn install_auth_watch(&self, watch: Box<dyn ListWatch>) {
        self.inner.watches.lock().auth = Some(watch);
    }

    pub(crate) fn refresh_session_list_watch(&self) -> Result<(), StreamError> {
        if let Some(watch) = self.inner.watches.lock().session_list.as_ref() {
            watch.refresh()?;
        }
        Ok(())
    }

    pub(crate) fn refresh_auth_watch(&self) -> Result<(), StreamError> {
        if let Some(watch) = self.inner.watches.lock().auth.as_ref() {
            watch.refresh()?;
        }
        Ok(())
    }

    /// Close the session-list and authorization watches. Best-effort.
    pub(crate) fn close_context_watches(&self) {
        let mut watches = self.inner.watches.lock();
        for watch in [watches.session_list.take(), watches.auth.take()].into_iter().flatten() {
            if let Err(err) = watch.close() {
                warn!(session_id = %self.inner.session_id, error = %err, "failed to close context watch");
            }
        }
    }
}

/// Task enqueued when the session registry changes.
pub(crate) fn session_list_changed<C: Clock>(
    _current: &mut State,
    ctx: &SessionContext<C>,
) -> Result<(), StreamError> {
    ctx.refresh_session_list_watch()?;
    ctx.rebalance()
}

/// Task enqueued when the subscription's authorization changes.
pub(crate) fn auth_changed<C: Clock>(
    _current: &mut State,
    ctx: &SessionContext<C>,
) -> Result<(), StreamError> {
    ctx.refresh_auth_watch()?;
    ctx.access().check(ctx.session_id())
}

/// Coordinator for one client stream: owns the current state and drives
/// the task loop until the session is dead.
pub struct StreamingContext<C: Clock> {
    ctx: SessionContext<C>,
    rx: mpsc::UnboundedReceiver<Task<C>>,
    current: State,
}

impl<C: Clock> StreamingContext<C> {
    pub fn new(deps: SessionDeps<C>) -> Self {
        let (tasks, rx) = TaskSender::new(deps.session_id.clone());
        let inner = ContextInner {
            session_id: deps.session_id,
            params: deps.params,
            client: deps.client,
            converter: deps.converter,
            sink: deps.sink,
            rebalancer: deps.rebalancer,
            access: deps.access,
            clock: deps.clock,
            connection_ready: AtomicBool::new(true),
            terminal_frame_sent: AtomicBool::new(false),
            watches: Mutex::new(ContextWatches::default()),
        };
        Self { ctx: SessionContext { inner: Arc::new(inner), tasks }, rx, current: State::Dead }
    }

    pub fn handle(&self) -> SessionContext<C> {
        self.ctx.clone()
    }

    /// Top-level entry: install the shutdown hook, start in Starting, run
    /// the loop until the session is dead.
    pub async fn stream(mut self, hooks: &ShutdownHooks) {
        let handle = self.ctx.clone();
        let _hook_guard = hooks.add_hook(move || {
            handle.add_task("shutdown", |current, ctx| {
                switch_now(current, ctx, State::Cleanup(CleanupState::clean()))
            });
        });
        self.ctx.switch_state(State::Starting(StartingState::new()));
        self.run().await;
    }

    /// Consume the task queue until the current state is Dead.
    ///
    /// Exposed separately from [`Self::stream`] so tests can drive a
    /// session from an arbitrary initial state.
    pub async fn run(&mut self) {
        info!(session_id = %self.ctx.session_id(), "session loop started");
        loop {
            match tokio::time::timeout(TASK_POLL_TIMEOUT, self.rx.recv()).await {
                Err(_elapsed) => continue,
                Ok(None) => break,
                Ok(Some(task)) => {
                    debug!(session_id = %self.ctx.session_id(), task = task.name, "run task");
                    if let Err(err) = (task.body)(&mut self.current, &self.ctx) {
                        self.fail(task.name, err);
                    }
                }
            }
            if matches!(self.current, State::Dead) {
                break;
            }
        }
        info!(session_id = %self.ctx.session_id(), "session loop finished");
    }

    /// Single catch for task failures: log, then switch to Cleanup with
    /// the error. If Cleanup itself is failing, stop the session outright.
    fn fail(&mut self, task: &'static str, err: StreamError) {
        error!(session_id = %self.ctx.session_id(), task, error = %err, "task failed");
        match self.current {
            State::Dead => {}
            State::Cleanup(_) => {
                self.current.exit(&self.ctx);
                self.current = State::Dead;
            }
            _ => {
                if let Err(enter_err) =
                    switch_now(&mut self.current, &self.ctx, State::Cleanup(CleanupState::failed(err)))
                {
                    error!(session_id = %self.ctx.session_id(), error = %enter_err, "cleanup entry failed");
                    self.current.exit(&self.ctx);
                    self.current = State::Dead;
                }
            }
        }
    }
}
