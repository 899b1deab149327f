// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Partition rebalancing interface and the fair default.

use crate::types::{Partition, PartitionState, Session};
use fanout_core::SessionId;
use std::collections::BTreeSet;

/// Computes a topology changeset from the current session list and
/// partition records.
///
/// Pure: no store access. Callers invoke it only while holding the
/// subscription-global lock and write the returned records in one batch.
pub trait Rebalancer: Send + Sync {
    /// Returns only the records that must change; empty means the topology
    /// is already balanced.
    fn rebalance(&self, sessions: &[Session], current: &[Partition]) -> Vec<Partition>;
}

/// Splits partitions evenly across sessions ordered by id.
///
/// Partitions nobody holds (unassigned, or owned by a departed session)
/// are granted directly. Taking a partition away from a live session only
/// marks it `Reassigning`; the owner releases it through its closing
/// protocol and the store's `transfer` hands it onward.
#[derive(Debug, Clone, Default)]
pub struct FairRebalancer;

impl Rebalancer for FairRebalancer {
    fn rebalance(&self, sessions: &[Session], current: &[Partition]) -> Vec<Partition> {
        if sessions.is_empty() || current.is_empty() {
            return Vec::new();
        }

        let mut ids: Vec<&SessionId> = sessions.iter().map(|s| &s.id).collect();
        ids.sort();
        ids.dedup();
        let live: BTreeSet<&SessionId> = ids.iter().copied().collect();

        let mut records: Vec<&Partition> = current.iter().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));

        // First `extra` sessions take one more partition than the rest.
        let per = records.len() / ids.len();
        let extra = records.len() % ids.len();
        let mut desired = Vec::with_capacity(records.len());
        for (index, id) in ids.iter().enumerate() {
            let share = per + usize::from(index < extra);
            for _ in 0..share {
                desired.push(*id);
            }
        }

        let mut changes = Vec::new();
        for (record, target) in records.iter().zip(desired) {
            let held_by_live =
                record.state != PartitionState::Unassigned
                    && record.session.as_ref().is_some_and(|s| live.contains(s));
            let next = if held_by_live {
                let owner = match record.session.clone() {
                    Some(owner) => owner,
                    None => continue,
                };
                if &owner == target {
                    Partition::assigned(record.key.clone(), owner)
                } else {
                    Partition::reassigning(record.key.clone(), owner)
                }
            } else {
                Partition::assigned(record.key.clone(), target.clone())
            };
            if &next != *record {
                changes.push(next);
            }
        }
        changes
    }
}

#[cfg(test)]
#[path = "rebalance_tests.rs"]
mod tests;
