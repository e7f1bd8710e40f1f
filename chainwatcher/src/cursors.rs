// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Guarded advancement rules for the sync cursors.
//!
//! Every cursor moves through these functions, which are pure so both the
//! Postgres store and the in-memory test store share the exact same rules.
//! `force` is used exclusively by the reorg handler and `reset-to-block` to
//! rewind a cursor below its current value.

use crate::error::{WatcherError, WatcherResult};
use crate::types::CursorPair;

/// Advance if `candidate.number > current.number` or `force`. Returns the
/// new value to write, or `None` when the update is stale (a no-op).
pub fn advance_pair(
    current: Option<&CursorPair>,
    candidate: CursorPair,
    force: bool,
) -> Option<CursorPair> {
    match current {
        Some(cur) if !force && candidate.number <= cur.number => None,
        _ => Some(candidate),
    }
}

/// Same monotonic rule for the plain-number state cursors.
pub fn advance_number(current: Option<u64>, candidate: u64, force: bool) -> Option<u64> {
    match current {
        Some(cur) if !force && candidate <= cur => None,
        _ => Some(candidate),
    }
}

/// `latestIndexed` refuses to advance past `chainHead.number` without force.
pub fn check_indexed_within_head(
    candidate: u64,
    chain_head: Option<u64>,
    force: bool,
) -> WatcherResult<()> {
    if force {
        return Ok(());
    }
    if let Some(head) = chain_head {
        if candidate > head {
            return Err(WatcherError::InvariantViolation(format!(
                "latestIndexed {candidate} would pass chainHead {head}"
            )));
        }
    }
    Ok(())
}

/// `latestCanonical` must satisfy `number <= latestIndexed.number`.
pub fn check_canonical_within_indexed(
    candidate: u64,
    latest_indexed: Option<u64>,
) -> WatcherResult<()> {
    match latest_indexed {
        Some(indexed) if candidate <= indexed => Ok(()),
        Some(indexed) => Err(WatcherError::InvariantViolation(format!(
            "latestCanonical {candidate} would pass latestIndexed {indexed}"
        ))),
        None => Err(WatcherError::InvariantViolation(format!(
            "latestCanonical {candidate} set before any block was indexed"
        ))),
    }
}
