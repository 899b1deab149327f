// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task queue and timer.
//!
//! A bounded-wait, unbounded-capacity FIFO of unit-of-work closures with
//! exactly one consumer: the session's loop. Producers are the loop
//! itself, state callbacks, watch handlers, timer fires and the shutdown
//! hook; none of them touch session state directly, they only enqueue.
//!
//! Scheduled tasks go through a shared tokio timer and are delivered into
//! the same queue, so ordering stays total.

use crate::context::SessionContext;
use crate::error::StreamError;
use crate::state::State;
use fanout_core::{Clock, SessionId};
use std::time::Duration;
use tokio::sync::mpsc;

/// Body of one unit of work: runs on the session loop with exclusive
/// access to the current state.
pub type TaskBody<C> =
    Box<dyn FnOnce(&mut State, &SessionContext<C>) -> Result<(), StreamError> + Send>;

/// A named unit of work delivered through the session's task queue.
pub struct Task<C: Clock> {
    pub(crate) name: &'static str,
    pub(crate) body: TaskBody<C>,
}

/// Producer half of the task queue. Cheap to clone; safe to hand to watch
/// handlers running on unrelated threads.
pub struct TaskSender<C: Clock> {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<Task<C>>,
}

impl<C: Clock> Clone for TaskSender<C> {
    fn clone(&self) -> Self {
        Self { session_id: self.session_id.clone(), tx: self.tx.clone() }
    }
}

impl<C: Clock> TaskSender<C> {
    pub(crate) fn new(
        session_id: SessionId,
    ) -> (Self, mpsc::UnboundedReceiver<Task<C>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session_id, tx }, rx)
    }

    /// Append a task to the queue. Non-blocking; a send after the loop has
    /// exited is silently dropped.
    pub fn add_task<F>(&self, name: &'static str, body: F)
    where
        F: FnOnce(&mut State, &SessionContext<C>) -> Result<(), StreamError> + Send + 'static,
    {
        tracing::trace!(session_id = %self.session_id, task = name, "enqueue");
        let _ = self.tx.send(Task { name, body: Box::new(body) });
    }

    /// Deliver a task through the queue after at least `delay`.
    ///
    /// Must be called from within a tokio runtime (the loop or one of its
    /// tasks).
    pub fn schedule_task<F>(&self, name: &'static str, delay: Duration, body: F)
    where
        F: FnOnce(&mut State, &SessionContext<C>) -> Result<(), StreamError> + Send + 'static,
    {
        tracing::trace!(session_id = %self.session_id, task = name, delay_ms = delay.as_millis() as u64, "schedule");
        let tx = self.tx.clone();
        let task = Task { name, body: Box::new(body) };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(task);
        });
    }
}
