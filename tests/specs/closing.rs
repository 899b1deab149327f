// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closing protocol specs: deadline-bounded partition handoff.

use crate::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

fn enter_closing_with(
    harness: &Harness,
    entries: &[(&str, &str)],
) -> (RunningSession, u64) {
    let last_commit_ms = harness.clock.epoch_ms();
    let session = harness.spawn_idle();
    session
        .handle
        .switch_state(State::Closing(ClosingState::new(uncommitted(entries), last_commit_ms)));
    (session, last_commit_ms)
}

#[tokio::test(start_paused = true)]
async fn fast_close_with_nothing_outstanding() {
    let harness = Harness::new();
    let session = harness.spawn_idle();

    session
        .handle
        .switch_state(State::Closing(ClosingState::new(BTreeMap::new(), harness.clock.epoch_ms())));
    session.join.await.unwrap();

    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
    // No waiting, no topology subscription.
    assert_eq!(harness.store.topology_watch_count(), 0);
    assert!(transfers(&harness).is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_deadline_releases_immediately() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness
        .store
        .update_partitions_configuration(vec![Partition::reassigning(etp("orders", "a"), me)])
        .unwrap();
    harness.clock.advance(Duration::from_secs(10));

    let session = harness.spawn_idle();
    // The last commit is far past the commit timeout already.
    let stale = harness.clock.epoch_ms() - 5_000;
    session
        .handle
        .switch_state(State::Closing(ClosingState::new(uncommitted(&[("a", "10")]), stale)));
    session.join.await.unwrap();

    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
    // Released by cleanup, under the lock, without ever watching offsets.
    assert_eq!(transfers(&harness), vec![(vec![etp("orders", "a")], true)]);
    assert_eq!(harness.store.offset_watch_count(&etp("orders", "a")), 0);
    assert_eq!(harness.store.topology_watch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn commits_beat_the_deadline() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness
        .store
        .update_partitions_configuration(vec![
            Partition::reassigning(etp("orders", "a"), me.clone()),
            Partition::reassigning(etp("orders", "b"), me),
        ])
        .unwrap();

    let started = tokio::time::Instant::now();
    let (session, _) = enter_closing_with(&harness, &[("a", "10"), ("b", "20")]);
    session.drain().await;

    harness.store.set_offset(&etp("orders", "a"), Offset::new("10"));
    harness.store.set_offset(&etp("orders", "b"), Offset::new("25"));
    session.join.await.unwrap();

    // Both partitions released, each under the lock, before the deadline.
    assert_eq!(
        transfers(&harness),
        vec![(vec![etp("orders", "a")], true), (vec![etp("orders", "b")], true)]
    );
    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
    assert_eq!(harness.store.open_watch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_forces_the_handoff_without_commits() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness
        .store
        .update_partitions_configuration(vec![Partition::reassigning(etp("orders", "a"), me)])
        .unwrap();

    let started = tokio::time::Instant::now();
    let (session, _) = enter_closing_with(&harness, &[("a", "10")]);
    session.join.await.unwrap();

    // The deadline (the 1s commit timeout) fired and forced the release.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1_000), "finished after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "finished after {elapsed:?}");
    // A timed-out handoff is still a clean close.
    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
    assert_eq!(transfers(&harness), vec![(vec![etp("orders", "a")], true)]);
    assert_eq!(harness.store.open_watch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn topology_removal_frees_the_partition_mid_wait() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness
        .store
        .update_partitions_configuration(vec![Partition::reassigning(
            etp("orders", "a"),
            me.clone(),
        )])
        .unwrap();

    let (session, _) = enter_closing_with(&harness, &[("a", "10")]);
    session.drain().await;
    assert_eq!(session.state_name().await, "closing");

    // The store hands the claim to someone else before any commit arrives.
    harness
        .store
        .update_partitions_configuration(vec![Partition::assigned(
            etp("orders", "a"),
            SessionId::new("s-other"),
        )])
        .unwrap();
    session.join.await.unwrap();

    assert_eq!(transfers(&harness), vec![(vec![etp("orders", "a")], true)]);
    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
    assert_eq!(harness.store.open_watch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reassigning_partition_with_no_pending_commit_is_released_at_once() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness
        .store
        .update_partitions_configuration(vec![
            Partition::reassigning(etp("orders", "a"), me.clone()),
            Partition::reassigning(etp("orders", "b"), me),
        ])
        .unwrap();

    // Only `b` has an outstanding cursor.
    let (session, _) = enter_closing_with(&harness, &[("b", "20")]);
    session.drain().await;

    assert_eq!(transfers(&harness), vec![(vec![etp("orders", "a")], true)]);
    assert_eq!(harness.store.offset_watch_count(&etp("orders", "a")), 0);
    assert_eq!(session.state_name().await, "closing");

    harness.store.set_offset(&etp("orders", "b"), Offset::new("20"));
    session.join.await.unwrap();
    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
}

#[tokio::test(start_paused = true)]
async fn listener_close_failure_still_transfers_then_fails_the_stream() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    let key = etp("orders", "d");
    harness
        .store
        .update_partitions_configuration(vec![Partition::reassigning(key.clone(), me)])
        .unwrap();
    harness.store.fail_offset_close(&key);

    let (session, _) = enter_closing_with(&harness, &[("d", "10")]);
    session.drain().await;

    harness.store.set_offset(&key, Offset::new("10"));
    session.join.await.unwrap();

    // The release still happened, under the lock.
    assert_eq!(transfers(&harness), vec![(vec![key], true)]);
    // The cancel failure became the stream's terminal error.
    let frames = harness.sink.terminal_frames();
    assert_eq!(frames.len(), 1);
    assert!(
        matches!(&frames[0], Frame::Error(message) if message.contains("cancel")),
        "unexpected terminal frame: {frames:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn late_commits_for_freed_partitions_are_ignored() {
    let harness = Harness::new();
    let me = harness.session_id.clone();
    harness
        .store
        .update_partitions_configuration(vec![
            Partition::reassigning(etp("orders", "a"), me.clone()),
            Partition::reassigning(etp("orders", "b"), me),
        ])
        .unwrap();

    let (session, _) = enter_closing_with(&harness, &[("a", "10"), ("b", "20")]);
    session.drain().await;

    harness.store.set_offset(&etp("orders", "a"), Offset::new("10"));
    session.drain().await;
    let reads_before = harness.store.offset_reads(&etp("orders", "a"));

    // Another write to the freed partition's offset node: its watch is
    // closed, nothing fires, nothing is read.
    harness.store.set_offset(&etp("orders", "a"), Offset::new("11"));
    session.drain().await;
    assert_eq!(harness.store.offset_reads(&etp("orders", "a")), reads_before);
    assert_eq!(session.state_name().await, "closing");

    harness.store.set_offset(&etp("orders", "b"), Offset::new("20"));
    session.join.await.unwrap();
    assert_eq!(harness.sink.terminal_frames(), vec![Frame::Closed]);
}
