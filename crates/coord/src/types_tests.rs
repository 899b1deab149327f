// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn etp(partition: &str) -> EventTypePartition {
    EventTypePartition::new("orders", partition)
}

#[test]
fn ownership_includes_reassigning_records() {
    let me = SessionId::new("s-1");
    let other = SessionId::new("s-2");
    assert!(Partition::assigned(etp("0"), me.clone()).is_owned_by(&me));
    assert!(Partition::reassigning(etp("1"), me.clone()).is_owned_by(&me));
    assert!(!Partition::assigned(etp("2"), other).is_owned_by(&me));
    assert!(!Partition::unassigned(etp("3")).is_owned_by(&me));
}

#[test]
fn topology_filters_owned_records() {
    let me = SessionId::new("s-1");
    let topology = Topology {
        version: 3,
        partitions: vec![
            Partition::assigned(etp("0"), me.clone()),
            Partition::reassigning(etp("1"), me.clone()),
            Partition::assigned(etp("2"), SessionId::new("s-2")),
            Partition::unassigned(etp("3")),
        ],
    };
    let owned = topology.owned_by(&me);
    assert_eq!(owned.len(), 2);
    assert!(owned.iter().all(|p| p.is_owned_by(&me)));
    assert_eq!(topology.get(&etp("2")).and_then(|p| p.session.clone()), Some(SessionId::new("s-2")));
}

#[test]
fn partition_wire_format_is_flat() {
    let record = Partition::reassigning(etp("4"), SessionId::new("s-1"));
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["event_type"], "orders");
    assert_eq!(value["partition"], "4");
    assert_eq!(value["session"], "s-1");
    assert_eq!(value["state"], "REASSIGNING");
}

#[test]
fn unassigned_round_trips_without_session() {
    let record = Partition::unassigned(etp("5"));
    let json = serde_json::to_string(&record).unwrap();
    let back: Partition = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}
