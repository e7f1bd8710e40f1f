// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Operator surface consumed by the CLI: checkpoint creation, state
//! backfill over a historical range, and administrative reset.

use std::sync::Arc;

use tracing::info;

use crate::chain_client::{normalize_hex, ChainClient};
use crate::error::{WatcherError, WatcherResult};
use crate::indexer::BlockIndexer;
use crate::processor::BlockProcessor;
use crate::state::cid::block_cid;
use crate::state::StateMaterializer;
use crate::store::Store;
use crate::types::{BlockProgress, CursorPair, StateRecord};

/// Create a checkpoint for one contract, at an explicit block hash or at the
/// latest canonical block. Idempotent per (contract, block).
pub async fn create_checkpoint(
    store: Arc<dyn Store>,
    client: Arc<dyn ChainClient>,
    contract_address: &str,
    block_hash: Option<String>,
) -> WatcherResult<StateRecord> {
    let address = normalize_hex(contract_address);
    let contract = store.contract_by_address(&address).await?.ok_or_else(|| {
        WatcherError::InvariantViolation(format!("contract {address} is not watched"))
    })?;

    let block = match block_hash {
        Some(hash) => store.block_by_hash(&hash).await?.ok_or_else(|| {
            WatcherError::InvariantViolation(format!("block {hash} is not indexed"))
        })?,
        None => {
            let sync = store.sync_status().await?;
            let cursor = sync
                .latest_canonical
                .or(sync.latest_indexed)
                .ok_or_else(|| {
                    WatcherError::InvariantViolation(
                        "no indexed blocks to checkpoint against".into(),
                    )
                })?;
            store.block_by_hash(&cursor.hash).await?.ok_or_else(|| {
                WatcherError::InvariantViolation(format!(
                    "cursor block {} is not indexed",
                    cursor.hash
                ))
            })?
        }
    };

    checkpoint_block(&store, &client, &contract.address, &block).await
}

async fn checkpoint_block(
    store: &Arc<dyn Store>,
    client: &Arc<dyn ChainClient>,
    address: &str,
    block: &BlockProgress,
) -> WatcherResult<StateRecord> {
    if block.is_pruned {
        return Err(WatcherError::InvariantViolation(format!(
            "block {} is on a pruned branch",
            block.block_hash
        )));
    }
    if !block.is_complete {
        return Err(WatcherError::InvariantViolation(format!(
            "block {} is not fully processed",
            block.block_hash
        )));
    }
    let contract = store.contract_by_address(address).await?.ok_or_else(|| {
        WatcherError::InvariantViolation(format!("contract {address} is not watched"))
    })?;
    let full = client.full_block(&block.block_hash).await?.ok_or_else(|| {
        WatcherError::TransientUpstream(format!(
            "header for {} not available upstream",
            block.block_hash
        ))
    })?;
    let materializer = StateMaterializer::new(store.clone());
    let record = materializer
        .create_checkpoint(&contract, &block.header(), &block_cid(&full.header_rlp))
        .await?;
    info!(
        "Checkpoint for {} at block {}: cid {}",
        address, block.block_number, record.cid
    );
    Ok(record)
}

/// Index, process and materialize state over a historical block range. Fails
/// if any state record already exists in the range.
pub async fn fill_state(
    store: Arc<dyn Store>,
    client: Arc<dyn ChainClient>,
    indexer: Arc<BlockIndexer>,
    processor: Arc<BlockProcessor>,
    start: u64,
    end: u64,
) -> WatcherResult<()> {
    if start > end {
        return Err(WatcherError::Config(format!(
            "fill-state range {start}..{end} is empty"
        )));
    }
    if store.has_state_in_range(start, end).await? {
        return Err(WatcherError::InvariantViolation(format!(
            "state records already exist in range {start}..{end}"
        )));
    }

    info!("Filling state for blocks {start}..{end}");
    for number in start..=end {
        let block = match store.canonical_block_at_height(number).await? {
            Some(block) => block,
            None => {
                let header = client.block_by_number(number).await?.ok_or_else(|| {
                    WatcherError::TransientUpstream(format!(
                        "block {number} not available upstream"
                    ))
                })?;
                indexer.save_block_and_fetch_events(&header).await?
            }
        };
        if !block.is_complete {
            processor.process(&block.block_hash).await?;
        }
    }

    // Close the range with a checkpoint per checkpoint-enabled contract;
    // the flag gates automatic checkpoints only.
    let tip = store.canonical_block_at_height(end).await?.ok_or_else(|| {
        WatcherError::InvariantViolation(format!("no canonical block at height {end}"))
    })?;
    for contract in store.contracts().await? {
        if !contract.checkpoint || contract.starting_block > end {
            continue;
        }
        checkpoint_block(&store, &client, &contract.address, &tip).await?;
    }

    let counts = store.processed_counts_in_range(start, end).await?;
    info!(
        "fill-state complete: {}/{} blocks processed in range",
        counts.processed, counts.expected
    );
    Ok(())
}

/// Administrative reset: prune everything above the given height, delete the
/// derived state above it, and rewind all cursors onto it.
pub async fn reset_to_block(store: Arc<dyn Store>, number: u64) -> WatcherResult<()> {
    let target = store.canonical_block_at_height(number).await?.ok_or_else(|| {
        WatcherError::InvariantViolation(format!("no canonical block at height {number}"))
    })?;
    let ancestor = CursorPair {
        hash: target.block_hash.clone(),
        number: target.block_number,
    };
    let outcome = store.apply_reorg(ancestor, &[]).await?;

    let state_sync = store.state_sync_status().await?;
    if state_sync
        .latest_checkpoint_block_number
        .map(|n| n > number)
        .unwrap_or(false)
    {
        store.update_state_sync_checkpoint(number, true).await?;
    }

    info!(
        "Reset to block {number}: {} blocks pruned, {} state records deleted",
        outcome.blocks_pruned, outcome.records_deleted
    );
    Ok(())
}
