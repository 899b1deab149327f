// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cursors: positions within a partition's event sequence.
//!
//! Offsets are opaque tokens with a total order *per partition*; cursors
//! from different partitions are never comparable. The committed offset a
//! client acknowledges is compared against the position the session has
//! streamed to decide whether a partition may be handed off.

use crate::partition::EventTypePartition;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Sentinel token for the position before the first event of a partition.
pub const BEGIN_OFFSET: &str = "BEGIN";

/// Opaque offset token within a single partition.
///
/// `BEGIN` sorts before every other token. Remaining tokens order by length
/// first, then bytewise, which ranks zero-padded and unpadded numeric
/// tokens of a partition's native width correctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(String);

impl Offset {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn begin() -> Self {
        Self(BEGIN_OFFSET.to_string())
    }

    pub fn is_begin(&self) -> bool {
        self.0 == BEGIN_OFFSET
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for Offset {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_begin(), other.is_begin()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0)),
        }
    }
}

impl PartialOrd for Offset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cursor failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("offsets of {a} and {b} are not comparable")]
    KeyMismatch { a: EventTypePartition, b: EventTypePartition },

    #[error("malformed offset token for {key}: {token:?}")]
    MalformedOffset { key: EventTypePartition, token: String },
}

/// A position within one partition's event sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionCursor {
    pub key: EventTypePartition,
    pub offset: Offset,
}

impl SubscriptionCursor {
    pub fn new(key: EventTypePartition, offset: Offset) -> Self {
        Self { key, offset }
    }

    /// Compare positions within the same partition.
    pub fn compare(&self, other: &SubscriptionCursor) -> Result<Ordering, CursorError> {
        if self.key != other.key {
            return Err(CursorError::KeyMismatch { a: self.key.clone(), b: other.key.clone() });
        }
        Ok(self.offset.cmp(&other.offset))
    }

    /// True when `other` has caught up to (or passed) this position.
    pub fn reached_by(&self, other: &SubscriptionCursor) -> Result<bool, CursorError> {
        Ok(matches!(self.compare(other)?, Ordering::Less | Ordering::Equal))
    }
}

impl fmt::Display for SubscriptionCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.offset)
    }
}

/// Converts raw offset tokens read from the coordination store into cursors.
pub trait CursorConverter: Send + Sync {
    fn convert(
        &self,
        key: &EventTypePartition,
        token: &str,
    ) -> Result<SubscriptionCursor, CursorError>;
}

/// Default converter: accepts `BEGIN` and non-empty tokens made of ASCII
/// alphanumerics, `-` and `_`.
#[derive(Debug, Clone, Default)]
pub struct TokenCursorConverter;

impl CursorConverter for TokenCursorConverter {
    fn convert(
        &self,
        key: &EventTypePartition,
        token: &str,
    ) -> Result<SubscriptionCursor, CursorError> {
        if token == BEGIN_OFFSET {
            return Ok(SubscriptionCursor::new(key.clone(), Offset::begin()));
        }
        let well_formed = !token.is_empty()
            && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !well_formed {
            return Err(CursorError::MalformedOffset {
                key: key.clone(),
                token: token.to_string(),
            });
        }
        Ok(SubscriptionCursor::new(key.clone(), Offset::new(token)))
    }
}

#[cfg(test)]
#[path = "cursor_tests.rs"]
mod tests;
