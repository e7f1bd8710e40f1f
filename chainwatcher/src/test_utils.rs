// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory implementations of the capability traits plus a pipeline
//! harness, mirroring the Postgres semantics closely enough for the
//! pipeline tests to exercise real control flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::abi_oracle::RawLogOracle;
use crate::chain_client::ChainClient;
use crate::cursors;
use crate::error::{WatcherError, WatcherResult};
use crate::indexer::BlockIndexer;
use crate::job_queue::{Job, JobOutcome, JobQueue, NewJob, QueueName};
use crate::metrics::WatcherMetrics;
use crate::node::follow_head_once;
use crate::processor::{BlockProcessor, ProcessorConfig};
use crate::reorg::ReorgHandler;
use crate::store::{
    FinalizeBlock, NewBlock, NewStateRecord, RangeCounts, ReorgOutcome, Store,
};
use crate::types::{
    BlockHeader, BlockProgress, CursorPair, EventRow, LogEntry, StateKind, StateRecord,
    StateSyncStatus, StorageSlot, SyncStatus, WatchedContract,
};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemStoreInner {
    /// Insertion-ordered, which doubles as the `created_at` tiebreaker.
    blocks: Vec<BlockProgress>,
    events: Vec<EventRow>,
    next_event_id: i64,
    contracts: Vec<WatchedContract>,
    records: Vec<StateRecord>,
    next_record_id: i64,
    sync: SyncStatus,
    state_sync: StateSyncStatus,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemStoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_state_records(&self) -> Vec<StateRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    pub fn all_blocks(&self) -> Vec<BlockProgress> {
        self.inner.lock().unwrap().blocks.clone()
    }
}

fn advance_indexed_mem(
    sync: &mut SyncStatus,
    candidate: CursorPair,
) -> WatcherResult<()> {
    cursors::check_indexed_within_head(
        candidate.number,
        sync.chain_head.as_ref().map(|c| c.number),
        false,
    )?;
    if let Some(next) = cursors::advance_pair(sync.latest_indexed.as_ref(), candidate, false) {
        sync.latest_indexed = Some(next);
    }
    Ok(())
}

#[async_trait]
impl Store for MemStore {
    async fn block_by_hash(&self, hash: &str) -> WatcherResult<Option<BlockProgress>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.blocks.iter().find(|b| b.block_hash == hash).cloned())
    }

    async fn blocks_at_height(
        &self,
        number: u64,
        include_pruned: bool,
    ) -> WatcherResult<Vec<BlockProgress>> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<BlockProgress> = inner
            .blocks
            .iter()
            .filter(|b| b.block_number == number && (include_pruned || !b.is_pruned))
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }

    async fn canonical_block_at_height(
        &self,
        number: u64,
    ) -> WatcherResult<Option<BlockProgress>> {
        Ok(self.blocks_at_height(number, false).await?.into_iter().next())
    }

    async fn save_block_with_events(&self, new_block: NewBlock) -> WatcherResult<BlockProgress> {
        let mut inner = self.inner.lock().unwrap();
        let header = &new_block.header;

        if let Some(existing) = inner
            .blocks
            .iter()
            .find(|b| b.block_hash == header.hash)
            .cloned()
        {
            if existing.num_events > 0 {
                return Ok(existing);
            }
        }

        let num_events = new_block.events.len() as i32;
        if let Some(slot) = inner
            .blocks
            .iter_mut()
            .find(|b| b.block_hash == header.hash)
        {
            slot.num_events = num_events;
        } else {
            inner.blocks.push(BlockProgress {
                block_hash: header.hash.clone(),
                parent_hash: header.parent_hash.clone(),
                block_number: header.number,
                block_timestamp: header.timestamp,
                num_events,
                num_processed_events: 0,
                last_processed_event_index: -1,
                is_complete: false,
                is_pruned: false,
            });
        }

        for event in &new_block.events {
            let exists = inner
                .events
                .iter()
                .any(|e| e.block_hash == header.hash && e.index == event.index);
            if exists {
                continue;
            }
            let id = inner.next_event_id;
            inner.next_event_id += 1;
            inner.events.push(EventRow {
                id,
                block_hash: header.hash.clone(),
                tx_hash: event.tx_hash.clone(),
                index: event.index,
                contract: event.contract.clone(),
                event_name: event.event_name.clone(),
                event_info: event.event_info.clone(),
                extra_info: event.extra_info.clone(),
                proof: event.proof.clone(),
            });
        }

        let candidate = CursorPair {
            hash: header.hash.clone(),
            number: header.number,
        };
        advance_indexed_mem(&mut inner.sync, candidate.clone())?;
        if inner.sync.initial_indexed.is_none() {
            inner.sync.initial_indexed = Some(candidate);
        }

        Ok(inner
            .blocks
            .iter()
            .find(|b| b.block_hash == header.hash)
            .cloned()
            .expect("block was just inserted"))
    }

    async fn update_block_progress(
        &self,
        block_hash: &str,
        event_index: i32,
    ) -> WatcherResult<BlockProgress> {
        let mut inner = self.inner.lock().unwrap();
        let block = inner
            .blocks
            .iter_mut()
            .find(|b| {
                b.block_hash == block_hash
                    && !b.is_complete
                    && b.last_processed_event_index < event_index
            })
            .ok_or_else(|| {
                WatcherError::InvariantViolation(format!(
                    "event {event_index} applied out of order or on a complete block"
                ))
            })?;
        block.last_processed_event_index = event_index;
        block.num_processed_events += 1;
        Ok(block.clone())
    }

    async fn finalize_block(&self, args: FinalizeBlock) -> WatcherResult<Vec<StateRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let block = inner
            .blocks
            .iter_mut()
            .find(|b| b.block_hash == args.block_hash)
            .ok_or_else(|| {
                WatcherError::InvariantViolation(format!(
                    "finalize of unknown block {}",
                    args.block_hash
                ))
            })?;
        if block.num_processed_events != block.num_events {
            return Err(WatcherError::InvariantViolation(format!(
                "finalize of block {} with {}/{} events processed",
                block.block_hash, block.num_processed_events, block.num_events
            )));
        }
        block.is_complete = true;

        let mut created = Vec::new();
        for record in &args.new_records {
            let exists = inner.records.iter().any(|r| {
                r.block_hash == record.block_hash
                    && r.contract_address == record.contract_address
                    && r.kind == record.kind
            });
            if exists {
                continue;
            }
            let id = inner.next_record_id;
            inner.next_record_id += 1;
            let record = StateRecord {
                id,
                block_hash: record.block_hash.clone(),
                block_number: record.block_number,
                contract_address: record.contract_address.clone(),
                cid: record.cid.clone(),
                kind: record.kind,
                data: record.data.clone(),
            };
            inner.records.push(record.clone());
            created.push(record);
        }

        let block_pair = CursorPair {
            hash: args.block_hash.clone(),
            number: inner
                .blocks
                .iter()
                .find(|b| b.block_hash == args.block_hash)
                .map(|b| b.block_number)
                .unwrap_or_default(),
        };
        advance_indexed_mem(&mut inner.sync, block_pair)?;

        if let Some(canonical) = &args.canonical {
            cursors::check_canonical_within_indexed(
                canonical.number,
                inner.sync.latest_indexed.as_ref().map(|c| c.number),
            )?;
            if let Some(next) = cursors::advance_pair(
                inner.sync.latest_canonical.as_ref(),
                canonical.clone(),
                false,
            ) {
                inner.sync.latest_canonical = Some(next);
            }
        }

        if let Some(through) = args.promote_through {
            for record in &mut inner.records {
                if record.kind == StateKind::DiffStaged && record.block_number <= through {
                    record.kind = StateKind::Diff;
                }
            }
        }

        if let Some(indexed) = args.state_indexed {
            if let Some(next) = cursors::advance_number(
                inner.state_sync.latest_indexed_block_number,
                indexed,
                false,
            ) {
                inner.state_sync.latest_indexed_block_number = Some(next);
            }
        }
        if let Some(checkpoint) = args.state_checkpoint {
            if let Some(next) = cursors::advance_number(
                inner.state_sync.latest_checkpoint_block_number,
                checkpoint,
                false,
            ) {
                inner.state_sync.latest_checkpoint_block_number = Some(next);
            }
        }

        Ok(created)
    }

    async fn apply_reorg(
        &self,
        ancestor: CursorPair,
        keep_hashes: &[String],
    ) -> WatcherResult<ReorgOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let mut blocks_pruned = 0;
        for block in &mut inner.blocks {
            if block.block_number > ancestor.number {
                if keep_hashes.contains(&block.block_hash) {
                    block.is_pruned = false;
                } else if !block.is_pruned {
                    block.is_pruned = true;
                    blocks_pruned += 1;
                }
            }
        }

        let before = inner.records.len();
        inner.records.retain(|r| r.block_number <= ancestor.number);
        let records_deleted = before - inner.records.len();

        if inner
            .sync
            .latest_indexed
            .as_ref()
            .map(|c| c.number > ancestor.number)
            .unwrap_or(false)
        {
            inner.sync.latest_indexed = Some(ancestor.clone());
        }
        if inner
            .sync
            .latest_canonical
            .as_ref()
            .map(|c| c.number > ancestor.number)
            .unwrap_or(false)
        {
            inner.sync.latest_canonical = Some(ancestor.clone());
        }
        if inner
            .state_sync
            .latest_indexed_block_number
            .map(|n| n > ancestor.number)
            .unwrap_or(false)
        {
            inner.state_sync.latest_indexed_block_number = Some(ancestor.number);
        }

        Ok(ReorgOutcome {
            blocks_pruned,
            records_deleted,
        })
    }

    async fn processed_counts_in_range(&self, from: u64, to: u64) -> WatcherResult<RangeCounts> {
        let inner = self.inner.lock().unwrap();
        let in_range = |b: &&BlockProgress| {
            b.block_number >= from && b.block_number <= to && !b.is_pruned
        };
        Ok(RangeCounts {
            expected: inner.blocks.iter().filter(in_range).count() as u64,
            processed: inner
                .blocks
                .iter()
                .filter(in_range)
                .filter(|b| b.is_complete)
                .count() as u64,
        })
    }

    async fn events_after_index(
        &self,
        block_hash: &str,
        after: i32,
    ) -> WatcherResult<Vec<EventRow>> {
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<EventRow> = inner
            .events
            .iter()
            .filter(|e| e.block_hash == block_hash && e.index > after)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.index);
        Ok(events)
    }

    async fn events_in_range(&self, from: u64, to: u64) -> WatcherResult<Vec<EventRow>> {
        let inner = self.inner.lock().unwrap();
        let numbers: HashMap<String, u64> = inner
            .blocks
            .iter()
            .filter(|b| !b.is_pruned)
            .map(|b| (b.block_hash.clone(), b.block_number))
            .collect();
        let mut events: Vec<EventRow> = inner
            .events
            .iter()
            .filter(|e| {
                numbers
                    .get(&e.block_hash)
                    .map(|n| *n >= from && *n <= to)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| (numbers[&e.block_hash], e.index));
        Ok(events)
    }

    async fn contracts(&self) -> WatcherResult<Vec<WatchedContract>> {
        Ok(self.inner.lock().unwrap().contracts.clone())
    }

    async fn contract_by_address(
        &self,
        address: &str,
    ) -> WatcherResult<Option<WatchedContract>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.contracts.iter().find(|c| c.address == address).cloned())
    }

    async fn register_contract(&self, contract: WatchedContract) -> WatcherResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.contracts.iter().any(|c| c.address == contract.address) {
            inner.contracts.push(contract);
        }
        Ok(())
    }

    async fn insert_state_record(&self, record: NewStateRecord) -> WatcherResult<StateRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_record_id;
        inner.next_record_id += 1;
        let record = StateRecord {
            id,
            block_hash: record.block_hash,
            block_number: record.block_number,
            contract_address: record.contract_address,
            cid: record.cid,
            kind: record.kind,
            data: record.data,
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn latest_state_record(
        &self,
        contract: &str,
        kinds: &[StateKind],
        max_number: u64,
    ) -> WatcherResult<Option<StateRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .records
            .iter()
            .filter(|r| {
                r.contract_address == contract
                    && kinds.contains(&r.kind)
                    && r.block_number <= max_number
            })
            .max_by_key(|r| (r.block_number, r.id))
            .cloned())
    }

    async fn state_record_at(
        &self,
        block_hash: &str,
        contract: &str,
        kind: StateKind,
    ) -> WatcherResult<Option<StateRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .records
            .iter()
            .find(|r| {
                r.block_hash == block_hash
                    && r.contract_address == contract
                    && r.kind == kind
            })
            .cloned())
    }

    async fn state_records_in_range(
        &self,
        contract: &str,
        kinds: &[StateKind],
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<StateRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<StateRecord> = inner
            .records
            .iter()
            .filter(|r| {
                r.contract_address == contract
                    && kinds.contains(&r.kind)
                    && r.block_number >= from
                    && r.block_number <= to
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.block_number, r.id));
        Ok(records)
    }

    async fn has_state_in_range(&self, from: u64, to: u64) -> WatcherResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .records
            .iter()
            .any(|r| r.block_number >= from && r.block_number <= to))
    }

    async fn sync_status(&self) -> WatcherResult<SyncStatus> {
        Ok(self.inner.lock().unwrap().sync.clone())
    }

    async fn state_sync_status(&self) -> WatcherResult<StateSyncStatus> {
        Ok(self.inner.lock().unwrap().state_sync.clone())
    }

    async fn update_chain_head(&self, head: CursorPair, force: bool) -> WatcherResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(next) = cursors::advance_pair(inner.sync.chain_head.as_ref(), head, force) {
            inner.sync.chain_head = Some(next);
        }
        Ok(())
    }

    async fn update_state_sync_checkpoint(&self, number: u64, force: bool) -> WatcherResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(next) = cursors::advance_number(
            inner.state_sync.latest_checkpoint_block_number,
            number,
            force,
        ) {
            inner.state_sync.latest_checkpoint_block_number = Some(next);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory job queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemJobStatus {
    Queued,
    Running,
    Done,
    Poisoned,
}

#[derive(Debug, Clone)]
struct MemJob {
    job: Job,
    status: MemJobStatus,
}

#[derive(Default)]
pub struct MemJobQueue {
    inner: Mutex<(Vec<MemJob>, i64)>,
    max_attempts: i32,
}

impl MemJobQueue {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            inner: Mutex::new((Vec::new(), 1)),
            max_attempts,
        }
    }

    pub fn poisoned_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .0
            .iter()
            .filter(|j| j.status == MemJobStatus::Poisoned)
            .count()
    }
}

#[async_trait]
impl JobQueue for MemJobQueue {
    async fn enqueue(&self, queue: QueueName, job: NewJob) -> WatcherResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let pending = inner.0.iter().any(|j| {
            j.job.queue == queue
                && j.job.block_hash == job.block_hash
                && j.status == MemJobStatus::Queued
        });
        if pending {
            return Ok(());
        }
        let id = inner.1;
        inner.1 += 1;
        inner.0.push(MemJob {
            job: Job {
                id,
                queue,
                block_hash: job.block_hash,
                block_number: job.block_number,
                priority: job.priority,
                attempts: 0,
                max_attempts: self.max_attempts,
            },
            status: MemJobStatus::Queued,
        });
        Ok(())
    }

    async fn dequeue(&self, queue: QueueName) -> WatcherResult<Option<Job>> {
        let mut inner = self.inner.lock().unwrap();
        let running: Vec<String> = inner
            .0
            .iter()
            .filter(|j| j.job.queue == queue && j.status == MemJobStatus::Running)
            .map(|j| j.job.block_hash.clone())
            .collect();
        let candidate = inner
            .0
            .iter_mut()
            .filter(|j| {
                j.job.queue == queue
                    && j.status == MemJobStatus::Queued
                    && !running.contains(&j.job.block_hash)
            })
            .min_by_key(|j| (-(j.job.priority as i64), j.job.block_number, j.job.id));
        Ok(candidate.map(|j| {
            j.status = MemJobStatus::Running;
            j.job.attempts += 1;
            j.job.clone()
        }))
    }

    async fn complete(&self, job: &Job) -> WatcherResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(j) = inner.0.iter_mut().find(|j| j.job.id == job.id) {
            j.status = MemJobStatus::Done;
        }
        Ok(())
    }

    async fn fail(&self, job: &Job, _error: &str) -> WatcherResult<JobOutcome> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(j) = inner.0.iter_mut().find(|j| j.job.id == job.id) {
            if j.job.attempts >= j.job.max_attempts {
                j.status = MemJobStatus::Poisoned;
                return Ok(JobOutcome::Poisoned);
            }
            j.status = MemJobStatus::Queued;
        }
        Ok(JobOutcome::Retry {
            delay: std::time::Duration::from_secs(0),
        })
    }

    async fn depth(&self, queue: QueueName) -> WatcherResult<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .0
            .iter()
            .filter(|j| j.job.queue == queue && j.status == MemJobStatus::Queued)
            .count() as u64)
    }
}

// ---------------------------------------------------------------------------
// Mock chain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MockBlock {
    header: BlockHeader,
    logs: Vec<LogEntry>,
}

#[derive(Default)]
struct MockChainInner {
    by_hash: HashMap<String, MockBlock>,
    canonical: HashMap<u64, String>,
    head: u64,
}

/// Scriptable upstream chain. Blocks are added explicitly; the canonical
/// mapping can be rewritten to simulate a reorg.
#[derive(Default)]
pub struct MockChain {
    inner: Mutex<MockChainInner>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block and make it canonical at its height.
    pub fn add_block(
        &self,
        hash: &str,
        parent_hash: &str,
        number: u64,
        logs: Vec<LogEntry>,
    ) -> BlockHeader {
        let header = BlockHeader {
            hash: hash.to_string(),
            parent_hash: parent_hash.to_string(),
            number,
            timestamp: number * 12,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.by_hash.insert(
            hash.to_string(),
            MockBlock {
                header: header.clone(),
                logs,
            },
        );
        inner.canonical.insert(number, hash.to_string());
        if number > inner.head {
            inner.head = number;
        }
        header
    }

    /// One transfer-style log emitted by `contract`.
    pub fn transfer_log(contract: &str, number: u64, log_index: u64) -> LogEntry {
        LogEntry {
            address: contract.to_string(),
            tx_hash: format!("0xtx{number:04}{log_index:02}"),
            log_index,
            topics: vec!["0xddf252ad".to_string()],
            data: format!("{number:08}{log_index:02}").into_bytes(),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_by_hash(&self, hash: &str) -> WatcherResult<Option<BlockHeader>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.by_hash.get(hash).map(|b| b.header.clone()))
    }

    async fn block_by_number(&self, number: u64) -> WatcherResult<Option<BlockHeader>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .canonical
            .get(&number)
            .and_then(|hash| inner.by_hash.get(hash))
            .map(|b| b.header.clone()))
    }

    async fn full_block(&self, hash: &str) -> WatcherResult<Option<crate::types::FullBlock>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.by_hash.get(hash).map(|b| crate::types::FullBlock {
            header: b.header.clone(),
            header_rlp: format!("rlp:{hash}").into_bytes(),
        }))
    }

    async fn logs(&self, block_number: u64, addresses: &[String]) -> WatcherResult<Vec<LogEntry>> {
        let inner = self.inner.lock().unwrap();
        // Future-epoch tolerance: past the head is an empty result.
        if block_number > inner.head {
            return Ok(vec![]);
        }
        Ok(inner
            .canonical
            .get(&block_number)
            .and_then(|hash| inner.by_hash.get(hash))
            .map(|b| {
                b.logs
                    .iter()
                    .filter(|l| addresses.contains(&l.address))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn storage_at(
        &self,
        _block_hash: &str,
        _contract: &str,
        _slot: &str,
    ) -> WatcherResult<StorageSlot> {
        Ok(StorageSlot {
            value: "0x0".to_string(),
            proof: None,
        })
    }

    async fn transaction_receipt(
        &self,
        _tx_hash: &str,
    ) -> WatcherResult<Option<serde_json::Value>> {
        Ok(Some(json!({ "status": "0x1" })))
    }

    async fn latest_block_number(&self) -> WatcherResult<u64> {
        Ok(self.inner.lock().unwrap().head)
    }
}

// ---------------------------------------------------------------------------
// Pipeline harness
// ---------------------------------------------------------------------------

pub const TEST_CONTRACT: &str = "0x00000000000000000000000000000000000000c1";

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub store: Arc<MemStore>,
    pub queue: Arc<MemJobQueue>,
    pub indexer: Arc<BlockIndexer>,
    pub processor: Arc<BlockProcessor>,
    pub metrics: Arc<WatcherMetrics>,
}

impl Harness {
    pub async fn new(config: ProcessorConfig) -> Self {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemStore::new());
        let queue = Arc::new(MemJobQueue::new(3));
        let metrics = Arc::new(WatcherMetrics::new_for_testing());

        let client: Arc<dyn ChainClient> = chain.clone();
        let store_dyn: Arc<dyn Store> = store.clone();
        let queue_dyn: Arc<dyn JobQueue> = queue.clone();

        let indexer = Arc::new(BlockIndexer::new(
            client.clone(),
            store_dyn.clone(),
            queue_dyn.clone(),
            Arc::new(RawLogOracle),
            metrics.clone(),
        ));
        let reorg = Arc::new(ReorgHandler::new(
            client.clone(),
            store_dyn.clone(),
            metrics.clone(),
            config.max_backfill_depth,
        ));
        let processor = Arc::new(BlockProcessor::new(
            client,
            store_dyn,
            queue_dyn,
            indexer.clone(),
            reorg,
            None,
            metrics.clone(),
            config,
        ));

        Self {
            chain,
            store,
            queue,
            indexer,
            processor,
            metrics,
        }
    }

    pub async fn watch_contract(&self, starting_block: u64) {
        self.watch_contract_with(starting_block, true).await;
    }

    pub async fn watch_contract_with(&self, starting_block: u64, checkpoint: bool) {
        self.store
            .register_contract(WatchedContract {
                address: TEST_CONTRACT.to_string(),
                kind: "erc20".to_string(),
                checkpoint,
                starting_block,
            })
            .await
            .unwrap();
    }

    /// One head-follower pass: advance the chain head cursor and enqueue
    /// block jobs up to the mock head.
    pub async fn follow_head(&self) -> WatcherResult<()> {
        let mut next = None;
        follow_head_once(
            &*self.chain,
            &*self.store,
            &*self.queue,
            &self.metrics,
            u64::MAX,
            self.first_watched_block().await,
            &mut next,
        )
        .await
    }

    async fn first_watched_block(&self) -> u64 {
        self.store
            .contracts()
            .await
            .unwrap()
            .iter()
            .map(|c| c.starting_block)
            .min()
            .unwrap_or(0)
    }

    /// Drain both queues to quiescence, routing jobs to the indexer and
    /// processor the way the node's workers do.
    pub async fn drain(&self) -> WatcherResult<()> {
        loop {
            if let Some(job) = self.queue.dequeue(QueueName::Block).await? {
                let result = async {
                    let header = self
                        .chain
                        .block_by_hash(&job.block_hash)
                        .await?
                        .ok_or_else(|| {
                            WatcherError::TransientUpstream(format!(
                                "block {} not available upstream",
                                job.block_hash
                            ))
                        })?;
                    self.indexer.save_block_and_fetch_events(&header).await?;
                    Ok::<(), WatcherError>(())
                }
                .await;
                match result {
                    Ok(()) => self.queue.complete(&job).await?,
                    Err(e) => {
                        self.queue.fail(&job, &e.to_string()).await?;
                        if !e.is_recoverable() {
                            return Err(e);
                        }
                    }
                }
                continue;
            }

            if let Some(job) = self.queue.dequeue(QueueName::Events).await? {
                match self.processor.process(&job.block_hash).await {
                    Ok(()) => self.queue.complete(&job).await?,
                    Err(e) => {
                        self.queue.fail(&job, &e.to_string()).await?;
                        if !e.is_recoverable() {
                            return Err(e);
                        }
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    /// Follow the head and drain until every indexed block is processed.
    pub async fn run_to_quiescence(&self) -> WatcherResult<()> {
        self.follow_head().await?;
        self.drain().await
    }
}

/// A linear chain `start..=end` with one watched-contract event per block.
pub async fn seed_linear_chain(harness: &Harness, start: u64, end: u64) {
    let mut parent = "0xgenesis".to_string();
    for number in start..=end {
        let hash = format!("0xa{number:04}");
        harness.chain.add_block(
            &hash,
            &parent,
            number,
            vec![MockChain::transfer_log(TEST_CONTRACT, number, 0)],
        );
        parent = hash;
    }
}
