// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fanout_core::EventTypePartition;

fn etp(partition: &str) -> EventTypePartition {
    EventTypePartition::new("orders", partition)
}

fn session(id: &str) -> Session {
    Session::new(SessionId::new(id), 60_000)
}

#[test]
fn grants_unassigned_partitions_evenly() {
    let sessions = vec![session("s-1"), session("s-2")];
    let current = vec![
        Partition::unassigned(etp("0")),
        Partition::unassigned(etp("1")),
        Partition::unassigned(etp("2")),
        Partition::unassigned(etp("3")),
    ];

    let changes = FairRebalancer.rebalance(&sessions, &current);

    assert_eq!(changes.len(), 4);
    let owned_by = |id: &str| {
        changes.iter().filter(|p| p.session.as_ref() == Some(&SessionId::new(id))).count()
    };
    assert_eq!(owned_by("s-1"), 2);
    assert_eq!(owned_by("s-2"), 2);
    assert!(changes.iter().all(|p| p.state == PartitionState::Assigned));
}

#[test]
fn takes_from_live_sessions_via_reassigning() {
    let sessions = vec![session("s-1"), session("s-2")];
    // s-1 currently holds everything.
    let me = SessionId::new("s-1");
    let current = vec![
        Partition::assigned(etp("0"), me.clone()),
        Partition::assigned(etp("1"), me.clone()),
        Partition::assigned(etp("2"), me.clone()),
        Partition::assigned(etp("3"), me.clone()),
    ];

    let changes = FairRebalancer.rebalance(&sessions, &current);

    // Two records flip to REASSIGNING, still owned by s-1.
    assert_eq!(changes.len(), 2);
    for change in &changes {
        assert_eq!(change.state, PartitionState::Reassigning);
        assert_eq!(change.session, Some(me.clone()));
    }
}

#[test]
fn reclaims_partitions_of_departed_sessions() {
    let sessions = vec![session("s-2")];
    let dead = SessionId::new("s-1");
    let current = vec![
        Partition::assigned(etp("0"), dead.clone()),
        Partition::reassigning(etp("1"), dead),
    ];

    let changes = FairRebalancer.rebalance(&sessions, &current);

    assert_eq!(changes.len(), 2);
    for change in &changes {
        assert_eq!(change.session, Some(SessionId::new("s-2")));
        assert_eq!(change.state, PartitionState::Assigned);
    }
}

#[test]
fn balanced_topology_yields_empty_changeset() {
    let sessions = vec![session("s-1"), session("s-2")];
    let current = vec![
        Partition::assigned(etp("0"), SessionId::new("s-1")),
        Partition::assigned(etp("1"), SessionId::new("s-2")),
    ];
    assert!(FairRebalancer.rebalance(&sessions, &current).is_empty());
}

#[test]
fn no_sessions_or_partitions_is_a_noop() {
    assert!(FairRebalancer.rebalance(&[], &[Partition::unassigned(etp("0"))]).is_empty());
    assert!(FairRebalancer.rebalance(&[session("s-1")], &[]).is_empty());
}

#[test]
fn uneven_split_gives_earlier_sessions_the_remainder() {
    let sessions = vec![session("s-1"), session("s-2")];
    let current = vec![
        Partition::unassigned(etp("0")),
        Partition::unassigned(etp("1")),
        Partition::unassigned(etp("2")),
    ];

    let changes = FairRebalancer.rebalance(&sessions, &current);

    let owned_by = |id: &str| {
        changes.iter().filter(|p| p.session.as_ref() == Some(&SessionId::new(id))).count()
    };
    assert_eq!(owned_by("s-1"), 2);
    assert_eq!(owned_by("s-2"), 1);
}
