// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Whole-session lifecycle specs: starting → streaming → closing → cleanup.

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn full_lifecycle_with_clean_shutdown() {
    let harness = Harness::new();
    harness.seed_partitions(&[etp("orders", "0"), etp("orders", "1")]);

    let session = harness.spawn();
    wait_for_state(&session, "streaming").await;

    // Registered and holding every seeded partition.
    assert_eq!(harness.store.list_sessions().unwrap().len(), 1);
    let topology = harness.store.get_topology().unwrap();
    assert_eq!(topology.owned_by(&harness.session_id).len(), 2);

    // Serve a batch and observe its commit.
    session.handle.deliver(cursor("orders", "0", "5"), vec![serde_json::json!({"n": 1})]);
    session.drain().await;
    harness.store.set_offset(&etp("orders", "0"), Offset::new("5"));
    session.drain().await;

    // Process shutdown: straight to cleanup, partitions released, session
    // gone, one clean terminal frame.
    harness.hooks.fire();
    session.join.await.unwrap();

    assert_eq!(harness.sink.frames().last(), Some(&Frame::Closed));
    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
    assert!(harness.store.list_sessions().unwrap().is_empty());
    assert_eq!(harness.store.open_watch_count(), 0);
    let topology = harness.store.get_topology().unwrap();
    assert!(topology.owned_by(&harness.session_id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn authorization_revocation_fails_the_stream() {
    let harness = Harness::new();
    harness.seed_partitions(&[etp("orders", "0")]);

    let session = harness.spawn();
    wait_for_state(&session, "streaming").await;

    harness.access.deny();
    harness.store.touch_auth();
    session.join.await.unwrap();

    let frames = harness.sink.terminal_frames();
    assert_eq!(frames.len(), 1);
    assert!(
        matches!(&frames[0], Frame::Error(message) if message.contains("access revoked")),
        "unexpected terminal frame: {frames:?}"
    );
    assert!(harness.store.list_sessions().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn new_session_triggers_rebalance_and_handoff() {
    let harness = Harness::new();
    harness.seed_partitions(&[etp("orders", "0"), etp("orders", "1")]);

    let session = harness.spawn();
    wait_for_state(&session, "streaming").await;

    // A second session joins the registry; its arrival fires the
    // session-list watch and a rebalance runs under the lock.
    harness
        .store
        .register_session(Session::new(SessionId::new("s-2"), 1_000))
        .unwrap();
    session.drain().await;

    let topology = harness.store.get_topology().unwrap();
    let reassigning = topology
        .partitions
        .iter()
        .filter(|p| p.state == PartitionState::Reassigning)
        .count();
    assert_eq!(reassigning, 1, "one partition should be marked for handoff: {topology:?}");

    // Nothing is uncommitted, so closing hands everything over at once.
    session.handle.request_close();
    session.join.await.unwrap();

    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
    let topology = harness.store.get_topology().unwrap();
    assert!(topology.owned_by(&harness.session_id).is_empty());
    assert_eq!(topology.owned_by(&SessionId::new("s-2")).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn store_failure_during_closing_setup_ends_in_error_cleanup() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness
        .store
        .update_partitions_configuration(vec![Partition::reassigning(etp("orders", "0"), me)])
        .unwrap();
    harness.store.fail_topology_subscribe();

    let session = harness.spawn_idle();
    session.handle.switch_state(State::Closing(ClosingState::new(
        uncommitted(&[("0", "10")]),
        harness.clock.epoch_ms(),
    )));
    session.join.await.unwrap();

    let frames = harness.sink.terminal_frames();
    assert_eq!(frames.len(), 1);
    assert!(
        matches!(&frames[0], Frame::Error(message) if message.contains("watch failed")),
        "unexpected terminal frame: {frames:?}"
    );
}
