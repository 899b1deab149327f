// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task-queue ordering specs.

use crate::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn tasks_run_in_enqueue_order_one_at_a_time() {
    let harness = Harness::new();
    let session = harness.spawn_idle();

    let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicBool::new(false));
    for i in 0..200 {
        let seen = Arc::clone(&seen);
        let running = Arc::clone(&running);
        session.handle.add_task("probe", move |_current, _ctx| {
            assert!(!running.swap(true, Ordering::SeqCst), "task bodies overlapped");
            seen.lock().unwrap().push(i);
            running.store(false, Ordering::SeqCst);
            Ok(())
        });
    }
    session.drain().await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, (0..200).collect::<Vec<_>>());

    session.handle.switch_state(State::Cleanup(CleanupState::clean()));
    session.join.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn scheduled_tasks_arrive_in_delay_order_behind_immediate_ones() {
    let harness = Harness::new();
    let session = harness.spawn_idle();

    let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let later = Arc::clone(&seen);
    session.handle.schedule_task("later", Duration::from_millis(300), move |_current, _ctx| {
        later.lock().unwrap().push("300ms");
        Ok(())
    });
    let soon = Arc::clone(&seen);
    session.handle.schedule_task("soon", Duration::from_millis(100), move |_current, _ctx| {
        soon.lock().unwrap().push("100ms");
        Ok(())
    });
    let mid = Arc::clone(&seen);
    session.handle.schedule_task("mid", Duration::from_millis(200), move |_current, _ctx| {
        mid.lock().unwrap().push("200ms");
        Ok(())
    });
    let now = Arc::clone(&seen);
    session.handle.add_task("now", move |_current, _ctx| {
        now.lock().unwrap().push("now");
        Ok(())
    });

    tokio::time::sleep(Duration::from_millis(350)).await;
    session.drain().await;
    assert_eq!(*seen.lock().unwrap(), vec!["now", "100ms", "200ms", "300ms"]);

    session.handle.switch_state(State::Cleanup(CleanupState::clean()));
    session.join.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn old_state_exits_before_the_next_state_enters() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness.store.register_session(Session::new(me.clone(), 1_000)).unwrap();
    harness
        .store
        .update_partitions_configuration(vec![Partition::reassigning(etp("orders", "0"), me)])
        .unwrap();

    let session = harness.spawn_idle();
    session.handle.switch_state(State::Closing(ClosingState::new(
        uncommitted(&[("0", "10")]),
        harness.clock.epoch_ms(),
    )));
    session.drain().await;

    // Forcing cleanup makes closing's exit release its watched partitions
    // before cleanup's entry unregisters the session.
    session.handle.switch_state(State::Cleanup(CleanupState::clean()));
    session.join.await.unwrap();

    let history = harness.store.history();
    let release_at = history
        .iter()
        .position(|op| matches!(op, StoreOp::Transfer { .. }))
        .expect("closing must release its partitions");
    let unregister_at = history
        .iter()
        .position(|op| matches!(op, StoreOp::UnregisterSession(_)))
        .expect("cleanup must unregister the session");
    assert!(release_at < unregister_at, "history: {history:?}");
}
