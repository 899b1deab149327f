// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fanout-coord: coordination-store surface for the fanout streamer.
//!
//! The session core talks to a hierarchical watched store (topology,
//! per-partition committed offsets, session registry, global lock) through
//! the [`CoordinationClient`] trait. [`MemoryCoordination`] is the complete
//! in-process implementation used by tests and single-node deployments.

pub mod client;
pub mod memory;
pub mod rebalance;
pub mod types;

pub use client::{
    CoordinationClient, CoordinationError, ListWatch, LockedAction, OffsetWatch, TopologyWatch,
    WatchHandler,
};
pub use memory::{MemoryCoordination, StoreOp};
pub use rebalance::{FairRebalancer, Rebalancer};
pub use types::{Partition, PartitionState, Session, Topology};
