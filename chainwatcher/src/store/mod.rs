// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transactional store for blocks, events, contracts, state records and
//! sync cursors.
//!
//! Each composite operation is atomic: the Postgres implementation runs it
//! inside one transaction scope, the in-memory test implementation under one
//! lock. Cursor movement shares the pure guard rules in [`crate::cursors`].

use async_trait::async_trait;

use crate::error::WatcherResult;
use crate::types::{
    BlockHeader, BlockProgress, CursorPair, EventRow, StateKind, StateRecord, StateSyncStatus,
    SyncStatus, WatchedContract,
};

mod pg;

pub use pg::PgStore;

/// A block ready for insertion, together with its parsed events.
#[derive(Debug, Clone)]
pub struct NewBlock {
    pub header: BlockHeader,
    pub events: Vec<NewEvent>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub tx_hash: String,
    pub index: i32,
    pub contract: String,
    pub event_name: String,
    pub event_info: serde_json::Value,
    pub extra_info: serde_json::Value,
    pub proof: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct NewStateRecord {
    pub block_hash: String,
    pub block_number: u64,
    pub contract_address: String,
    pub cid: String,
    pub kind: StateKind,
    pub data: Vec<u8>,
}

/// Everything the processor commits when a block becomes complete, applied
/// in one transaction.
#[derive(Debug, Clone, Default)]
pub struct FinalizeBlock {
    pub block_hash: String,
    /// Staged diffs, init records and cadence checkpoints for this block.
    pub new_records: Vec<NewStateRecord>,
    /// Guarded `latestCanonical` advance, when this block confirms one.
    pub canonical: Option<CursorPair>,
    /// Promote `diff_staged` to `diff` for blocks at or below this height.
    pub promote_through: Option<u64>,
    /// Guarded `StateSyncStatus.latestIndexed` advance.
    pub state_indexed: Option<u64>,
    /// Guarded `StateSyncStatus.latestCheckpoint` advance.
    pub state_checkpoint: Option<u64>,
}

/// Canonical / complete block counts over an inclusive height range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeCounts {
    pub expected: u64,
    pub processed: u64,
}

/// Result of rewinding the store past a reorg ancestor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorgOutcome {
    pub blocks_pruned: usize,
    pub records_deleted: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- blocks ---------------------------------------------------------

    async fn block_by_hash(&self, hash: &str) -> WatcherResult<Option<BlockProgress>>;

    async fn blocks_at_height(
        &self,
        number: u64,
        include_pruned: bool,
    ) -> WatcherResult<Vec<BlockProgress>>;

    /// The non-pruned block at a height, most recently inserted first when
    /// the reorg window briefly holds more than one.
    async fn canonical_block_at_height(&self, number: u64)
        -> WatcherResult<Option<BlockProgress>>;

    /// Insert a block with its events and advance `latestIndexed`, all in
    /// one transaction. Idempotent per block hash.
    async fn save_block_with_events(&self, new_block: NewBlock) -> WatcherResult<BlockProgress>;

    /// Record that the event at `event_index` has been applied. Refuses a
    /// non-monotone index.
    async fn update_block_progress(
        &self,
        block_hash: &str,
        event_index: i32,
    ) -> WatcherResult<BlockProgress>;

    /// Commit block completion: `isComplete`, new state records, cursor
    /// advances and staged-diff promotion.
    async fn finalize_block(&self, args: FinalizeBlock) -> WatcherResult<Vec<StateRecord>>;

    /// Rewind past a reorg ancestor in one transaction: mark blocks strictly
    /// above the ancestor as pruned (surviving branch hashes excepted),
    /// delete derived state above the ancestor, and force-rewind
    /// `latestIndexed` / `latestCanonical`. Also serves `reset-to-block`.
    async fn apply_reorg(
        &self,
        ancestor: CursorPair,
        keep_hashes: &[String],
    ) -> WatcherResult<ReorgOutcome>;

    async fn processed_counts_in_range(&self, from: u64, to: u64) -> WatcherResult<RangeCounts>;

    // -- events ---------------------------------------------------------

    async fn events_after_index(
        &self,
        block_hash: &str,
        after: i32,
    ) -> WatcherResult<Vec<EventRow>>;

    async fn events_in_range(&self, from: u64, to: u64) -> WatcherResult<Vec<EventRow>>;

    // -- contracts ------------------------------------------------------

    async fn contracts(&self) -> WatcherResult<Vec<WatchedContract>>;

    async fn contract_by_address(&self, address: &str)
        -> WatcherResult<Option<WatchedContract>>;

    /// Add-only registration; existing rows are left as-is.
    async fn register_contract(&self, contract: WatchedContract) -> WatcherResult<()>;

    // -- state records --------------------------------------------------

    async fn insert_state_record(&self, record: NewStateRecord) -> WatcherResult<StateRecord>;

    /// The newest record of the given kinds at or below `max_number`,
    /// ordered by block number descending then insertion id descending.
    async fn latest_state_record(
        &self,
        contract: &str,
        kinds: &[StateKind],
        max_number: u64,
    ) -> WatcherResult<Option<StateRecord>>;

    async fn state_record_at(
        &self,
        block_hash: &str,
        contract: &str,
        kind: StateKind,
    ) -> WatcherResult<Option<StateRecord>>;

    async fn state_records_in_range(
        &self,
        contract: &str,
        kinds: &[StateKind],
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<StateRecord>>;

    async fn has_state_in_range(&self, from: u64, to: u64) -> WatcherResult<bool>;

    // -- cursors --------------------------------------------------------

    async fn sync_status(&self) -> WatcherResult<SyncStatus>;

    async fn state_sync_status(&self) -> WatcherResult<StateSyncStatus>;

    async fn update_chain_head(&self, head: CursorPair, force: bool) -> WatcherResult<()>;

    async fn update_state_sync_checkpoint(&self, number: u64, force: bool) -> WatcherResult<()>;
}
