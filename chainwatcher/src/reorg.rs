// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reorg handling: find the common ancestor, prune the orphaned branch,
//! rewind derived state and cursors.

use std::sync::Arc;

use tracing::{info, warn};

use crate::chain_client::ChainClient;
use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::store::Store;
use crate::types::{BlockProgress, CursorPair};

pub struct ReorgHandler {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    metrics: Arc<WatcherMetrics>,
    max_reorg_depth: u64,
}

impl ReorgHandler {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        metrics: Arc<WatcherMetrics>,
        max_reorg_depth: u64,
    ) -> Self {
        Self {
            client,
            store,
            metrics,
            max_reorg_depth,
        }
    }

    /// Handle a divergence detected while processing `incoming`: walk its
    /// ancestry through the chain client until a locally-known, non-pruned
    /// block is found, then rewind everything above it. Returns the common
    /// ancestor; the caller restarts processing from the new branch.
    pub async fn handle(&self, incoming: &BlockProgress) -> WatcherResult<CursorPair> {
        warn!(
            "Reorg detected at block {} ({}): parent {} does not extend the local chain",
            incoming.block_number, incoming.block_hash, incoming.parent_hash
        );

        let mut surviving = vec![incoming.block_hash.clone()];
        let mut cursor = incoming.parent_hash.clone();
        let mut depth = 0u64;

        let ancestor = loop {
            if depth > self.max_reorg_depth {
                return Err(WatcherError::InvariantViolation(format!(
                    "no common ancestor within {} blocks below {} ({})",
                    self.max_reorg_depth, incoming.block_number, incoming.block_hash
                )));
            }

            if let Some(local) = self.store.block_by_hash(&cursor).await? {
                if !local.is_pruned {
                    break CursorPair {
                        hash: local.block_hash,
                        number: local.block_number,
                    };
                }
            }

            let header = self.client.block_by_hash(&cursor).await?.ok_or_else(|| {
                WatcherError::TransientUpstream(format!(
                    "branch parent {cursor} not available upstream"
                ))
            })?;
            surviving.push(header.hash.clone());
            cursor = header.parent_hash;
            depth += 1;
        };

        // Locally-indexed descendants of the incoming block are part of the
        // new branch and survive the prune as well.
        let mut height = incoming.block_number + 1;
        loop {
            let blocks = self.store.blocks_at_height(height, true).await?;
            if blocks.is_empty() {
                break;
            }
            for block in &blocks {
                if surviving.contains(&block.parent_hash) {
                    surviving.push(block.block_hash.clone());
                }
            }
            height += 1;
        }

        let outcome = self.store.apply_reorg(ancestor.clone(), &surviving).await?;
        self.metrics.reorgs_detected.inc();
        info!(
            "Reorg rewound to ancestor {} ({}): {} blocks pruned, {} state records deleted, {} surviving branch blocks",
            ancestor.number,
            ancestor.hash,
            outcome.blocks_pruned,
            outcome.records_deleted,
            surviving.len()
        );

        Ok(ancestor)
    }
}
