// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block indexer: pulls a block's logs, parses them against the watched
//! contract set, and persists block + events atomically.

use std::sync::Arc;

use tracing::{debug, info};

use crate::abi_oracle::AbiOracle;
use crate::chain_client::{normalize_hex, ChainClient};
use crate::error::WatcherResult;
use crate::job_queue::{JobQueue, NewJob, QueueName};
use crate::metrics::WatcherMetrics;
use crate::store::{NewBlock, NewEvent, Store};
use crate::types::{BlockHeader, BlockProgress};

pub struct BlockIndexer {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    oracle: Arc<dyn AbiOracle>,
    metrics: Arc<WatcherMetrics>,
}

impl BlockIndexer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        oracle: Arc<dyn AbiOracle>,
        metrics: Arc<WatcherMetrics>,
    ) -> Self {
        Self {
            client,
            store,
            queue,
            oracle,
            metrics,
        }
    }

    /// Persist a block with its parsed events and enqueue processing.
    /// Idempotent: a block that is already indexed is returned as-is.
    pub async fn save_block_and_fetch_events(
        &self,
        header: &BlockHeader,
    ) -> WatcherResult<BlockProgress> {
        if let Some(existing) = self.store.block_by_hash(&header.hash).await? {
            if existing.num_events > 0 || existing.is_complete {
                debug!("Block {} already indexed", header);
                self.enqueue_processing(&existing).await?;
                return Ok(existing);
            }
        }

        let contracts = self.store.contracts().await?;
        let addresses: Vec<String> = contracts.iter().map(|c| c.address.clone()).collect();
        let logs = self.client.logs(header.number, &addresses).await?;

        let mut events: Vec<NewEvent> = Vec::with_capacity(logs.len());
        for log in &logs {
            let address = normalize_hex(&log.address);
            // Logs from contracts we do not watch contribute no events.
            let Some(contract) = contracts.iter().find(|c| c.address == address) else {
                continue;
            };
            let Some(parsed) = self.oracle.parse_log(&contract.kind, log) else {
                continue;
            };
            events.push(NewEvent {
                tx_hash: log.tx_hash.clone(),
                index: log.log_index as i32,
                contract: contract.address.clone(),
                event_name: parsed.event_name,
                event_info: parsed.event_info,
                extra_info: parsed.extra_info,
                proof: parsed.proof,
            });
        }

        info!(
            "Indexing block {} with {} events ({} raw logs)",
            header,
            events.len(),
            logs.len()
        );
        let progress = self
            .store
            .save_block_with_events(NewBlock {
                header: header.clone(),
                events,
            })
            .await?;

        self.metrics.blocks_indexed.inc();
        self.metrics
            .latest_indexed_block
            .set(progress.block_number as i64);

        self.enqueue_processing(&progress).await?;
        Ok(progress)
    }

    async fn enqueue_processing(&self, block: &BlockProgress) -> WatcherResult<()> {
        self.queue
            .enqueue(
                QueueName::Events,
                NewJob::new(block.block_hash.clone(), block.block_number),
            )
            .await
    }
}
