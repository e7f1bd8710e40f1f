// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block processor: drives indexed blocks to the complete state.
//!
//! For each block it replays events in ascending log-index order, folds them
//! into a worker-owned state cache, and commits completion together with the
//! block's materialized state records in one transaction. Parent mismatches
//! hand control to the reorg handler and processing restarts.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::chain_client::ChainClient;
use crate::error::{WatcherError, WatcherResult};
use crate::indexer::BlockIndexer;
use crate::job_queue::{JobQueue, NewJob, QueueName};
use crate::metrics::WatcherMetrics;
use crate::reorg::ReorgHandler;
use crate::state::cid::block_cid;
use crate::state::{StateCache, StateMaterializer};
use crate::state_sink::StateSink;
use crate::store::{FinalizeBlock, NewStateRecord, Store};
use crate::types::{BlockProgress, CursorPair, StateKind, StateRecord, WatchedContract};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Blocks at or below `chainHead - prune_depth` are confirmed.
    pub prune_depth: u64,
    /// Automatic checkpoint cadence in blocks; 0 disables it.
    pub checkpoint_interval: u64,
    /// Bound for the iterative parent backfill and ancestor walks.
    pub max_backfill_depth: u64,
}

enum ParentState {
    Ready,
    /// The block was re-enqueued behind its parent; ack the current job.
    Deferred,
}

pub struct BlockProcessor {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    indexer: Arc<BlockIndexer>,
    reorg: Arc<ReorgHandler>,
    materializer: StateMaterializer,
    sink: Option<Arc<dyn StateSink>>,
    metrics: Arc<WatcherMetrics>,
    config: ProcessorConfig,
}

impl BlockProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        indexer: Arc<BlockIndexer>,
        reorg: Arc<ReorgHandler>,
        sink: Option<Arc<dyn StateSink>>,
        metrics: Arc<WatcherMetrics>,
        config: ProcessorConfig,
    ) -> Self {
        let materializer = StateMaterializer::new(store.clone());
        Self {
            client,
            store,
            queue,
            indexer,
            reorg,
            materializer,
            sink,
            metrics,
            config,
        }
    }

    /// Process one dequeued block. Replays are no-ops; orphaned blocks are
    /// dropped silently.
    pub async fn process(&self, block_hash: &str) -> WatcherResult<()> {
        let started = Instant::now();
        loop {
            let block = self
                .store
                .block_by_hash(block_hash)
                .await?
                .ok_or_else(|| {
                    WatcherError::InvariantViolation(format!(
                        "processing job for unknown block {block_hash}"
                    ))
                })?;

            if block.is_complete {
                debug!("Block {} already processed", block.block_number);
                return Ok(());
            }
            if block.is_pruned {
                debug!(
                    "Dropping orphaned block {} ({})",
                    block.block_number, block.block_hash
                );
                return Ok(());
            }

            if let ParentState::Deferred = self.ensure_parent_ready(&block).await? {
                return Ok(());
            }

            if self.detect_fork(&block).await? {
                self.reorg.handle(&block).await?;
                continue;
            }

            let cache = self.apply_events(&block).await?;
            let records = self.finish_block(&block, cache).await?;
            self.push_to_sink(&records).await;

            self.metrics.blocks_processed.inc();
            self.metrics
                .block_processing_latency
                .observe(started.elapsed().as_secs_f64());
            info!(
                "Processed block {} ({}) with {} events, {} state records",
                block.block_number,
                block.block_hash,
                block.num_events,
                records.len()
            );
            return Ok(());
        }
    }

    /// A block is eligible only when its parent is complete. Unknown parents
    /// are indexed (one hop per pass, bounded overall); incomplete parents
    /// defer this block behind them.
    async fn ensure_parent_ready(&self, block: &BlockProgress) -> WatcherResult<ParentState> {
        let sync = self.store.sync_status().await?;
        let root_number = sync.initial_indexed.as_ref().map(|c| c.number);
        // At or below the ingestion root there is no local parent to wait on.
        if block.block_number == 0 || root_number.map(|r| block.block_number <= r).unwrap_or(true)
        {
            return Ok(ParentState::Ready);
        }

        match self.store.block_by_hash(&block.parent_hash).await? {
            Some(parent) if parent.is_complete => Ok(ParentState::Ready),
            Some(parent) => {
                debug!(
                    "Deferring block {} behind incomplete parent {}",
                    block.block_number, parent.block_number
                );
                self.queue
                    .enqueue(
                        QueueName::Events,
                        NewJob::new(parent.block_hash.clone(), parent.block_number),
                    )
                    .await?;
                self.queue
                    .enqueue(
                        QueueName::Events,
                        NewJob::new(block.block_hash.clone(), block.block_number),
                    )
                    .await?;
                Ok(ParentState::Deferred)
            }
            None => {
                // Iterative backfill of the missing ancestor chain, deepest
                // hop bounded.
                let mut missing_hash = block.parent_hash.clone();
                let mut hops = 0u64;
                loop {
                    hops += 1;
                    if hops > self.config.max_backfill_depth {
                        return Err(WatcherError::InvariantViolation(format!(
                            "parent backfill for block {} exceeded depth {}",
                            block.block_number, self.config.max_backfill_depth
                        )));
                    }
                    let header = self
                        .client
                        .block_by_hash(&missing_hash)
                        .await?
                        .ok_or_else(|| {
                            WatcherError::TransientUpstream(format!(
                                "parent {} of block {} not available upstream",
                                missing_hash, block.block_number
                            ))
                        })?;
                    if root_number.map(|r| header.number < r).unwrap_or(false) {
                        return Err(WatcherError::InvariantViolation(format!(
                            "parent backfill for block {} reached below the ingestion root",
                            block.block_number
                        )));
                    }
                    info!(
                        "Backfilling missing parent {} ({})",
                        header.number, header.hash
                    );
                    self.indexer.save_block_and_fetch_events(&header).await?;

                    let at_root = header.number == 0
                        || root_number.map(|r| header.number <= r).unwrap_or(false);
                    if at_root
                        || self
                            .store
                            .block_by_hash(&header.parent_hash)
                            .await?
                            .is_some()
                    {
                        break;
                    }
                    missing_hash = header.parent_hash;
                }
                self.queue
                    .enqueue(
                        QueueName::Events,
                        NewJob::new(block.block_hash.clone(), block.block_number),
                    )
                    .await?;
                Ok(ParentState::Deferred)
            }
        }
    }

    /// Divergence check: a different non-pruned block at this height, or a
    /// canonical block at `number - 1` that is not our parent.
    async fn detect_fork(&self, block: &BlockProgress) -> WatcherResult<bool> {
        let siblings = self.store.blocks_at_height(block.block_number, false).await?;
        if siblings.iter().any(|b| b.block_hash != block.block_hash) {
            return Ok(true);
        }
        if block.block_number == 0 {
            return Ok(false);
        }
        match self
            .store
            .canonical_block_at_height(block.block_number - 1)
            .await?
        {
            Some(tip) => Ok(tip.block_hash != block.parent_hash),
            None => Ok(false),
        }
    }

    /// Replay events in ascending index order. The cache is rebuilt from the
    /// full event list so a resumed run emits the same state bytes as an
    /// uninterrupted one; progress rows only move for unapplied events.
    async fn apply_events(&self, block: &BlockProgress) -> WatcherResult<StateCache> {
        let mut cache = StateCache::new();
        let events = self.store.events_after_index(&block.block_hash, -1).await?;
        let mut last_applied = block.last_processed_event_index;

        for event in &events {
            if event.index > last_applied {
                self.store
                    .update_block_progress(&block.block_hash, event.index)
                    .await?;
                self.metrics.events_processed.inc();
                last_applied = event.index;
            }
            cache.apply_event(event);
        }

        if events.len() as i32 != block.num_events {
            return Err(WatcherError::InvariantViolation(format!(
                "block {} has {} stored events but expected {}",
                block.block_hash,
                events.len(),
                block.num_events
            )));
        }
        Ok(cache)
    }

    async fn finish_block(
        &self,
        block: &BlockProgress,
        cache: StateCache,
    ) -> WatcherResult<Vec<StateRecord>> {
        let full = self
            .client
            .full_block(&block.block_hash)
            .await?
            .ok_or_else(|| {
                WatcherError::TransientUpstream(format!(
                    "header for {} no longer available upstream",
                    block.block_hash
                ))
            })?;
        let bcid = block_cid(&full.header_rlp);
        let header = block.header();
        let contracts = self.store.contracts().await?;

        let mut records: Vec<NewStateRecord> = Vec::new();

        // Init records at each contract's starting block.
        for contract in &contracts {
            if contract.starting_block == block.block_number {
                let state = cache.state_value(&contract.address);
                if let Some(init) = self
                    .materializer
                    .build_init(contract, &header, &bcid, state)
                    .await?
                {
                    records.push(init);
                }
            }
        }

        // Staged diffs for every watched contract whose state changed in
        // this block.
        for address in cache.touched_contracts() {
            let Some(contract) = contracts.iter().find(|c| c.address == address) else {
                continue;
            };
            if block.block_number < contract.starting_block {
                continue;
            }
            let state = cache.state_value(&address);
            let diff = self
                .materializer
                .build_staged_diff(&address, &header, &bcid, state, &records)
                .await?;
            records.push(diff);
        }

        // Automatic checkpoints at the configured cadence. The per-contract
        // `checkpoint` flag gates only this path; on-demand checkpoints and
        // init/diff materialization ignore it.
        let state_sync = self.store.state_sync_status().await?;
        let mut checkpoint_at = None;
        if self.config.checkpoint_interval > 0 {
            let baseline = state_sync
                .latest_checkpoint_block_number
                .or_else(|| contracts.iter().map(|c| c.starting_block).min());
            if let Some(baseline) = baseline {
                if block.block_number >= baseline + self.config.checkpoint_interval {
                    for contract in contracts.iter().filter(|c| c.checkpoint) {
                        if self.has_state(contract, &records, block.block_number).await? {
                            if let Some(checkpoint) = self
                                .materializer
                                .build_checkpoint(contract, &header, &bcid, &records)
                                .await?
                            {
                                records.push(checkpoint);
                                checkpoint_at = Some(block.block_number);
                            }
                        }
                    }
                }
            }
        }

        // Confirm the deepest block buried under the prune depth.
        let sync = self.store.sync_status().await?;
        let head = sync
            .chain_head
            .as_ref()
            .map(|c| c.number)
            .unwrap_or(block.block_number);
        let confirm_to = block.block_number.min(head.saturating_sub(self.config.prune_depth));
        let current_canonical = sync.latest_canonical.as_ref().map(|c| c.number);
        let mut canonical = None;
        let mut promote_through = None;
        if current_canonical.map(|c| confirm_to > c).unwrap_or(true) {
            if let Some(candidate) = self.store.canonical_block_at_height(confirm_to).await? {
                if candidate.is_complete || candidate.block_hash == block.block_hash {
                    canonical = Some(CursorPair {
                        hash: candidate.block_hash,
                        number: candidate.block_number,
                    });
                    promote_through = Some(confirm_to);
                }
            }
        }

        let tracks_state = contracts
            .iter()
            .any(|c| c.starting_block <= block.block_number);

        let created = self
            .store
            .finalize_block(FinalizeBlock {
                block_hash: block.block_hash.clone(),
                new_records: records,
                canonical: canonical.clone(),
                promote_through,
                state_indexed: tracks_state.then_some(block.block_number),
                state_checkpoint: checkpoint_at,
            })
            .await?;

        for record in &created {
            self.metrics
                .state_records_created
                .with_label_values(&[record.kind.as_str()])
                .inc();
        }
        if let Some(canonical) = canonical {
            self.metrics
                .latest_canonical_block
                .set(canonical.number as i64);
        }
        Ok(created)
    }

    /// Whether a contract has any derived state to checkpoint.
    async fn has_state(
        &self,
        contract: &WatchedContract,
        pending: &[NewStateRecord],
        up_to: u64,
    ) -> WatcherResult<bool> {
        if pending.iter().any(|r| r.contract_address == contract.address) {
            return Ok(true);
        }
        Ok(self
            .store
            .latest_state_record(
                &contract.address,
                &[
                    StateKind::Init,
                    StateKind::Diff,
                    StateKind::DiffStaged,
                    StateKind::Checkpoint,
                ],
                up_to,
            )
            .await?
            .is_some())
    }

    async fn push_to_sink(&self, records: &[StateRecord]) {
        let Some(sink) = &self.sink else {
            return;
        };
        for record in records {
            if let Err(e) = sink.push(&record.cid, &record.data).await {
                warn!("State sink push failed for {}: {e}", record.cid);
            }
        }
    }
}
