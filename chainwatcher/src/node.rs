// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node assembly: wires the capability implementations together and runs
//! the head follower plus the worker pools until shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use chainwatcher_pg_db::{Db, DbArgs};

use crate::abi_oracle::{AbiOracle, RawLogOracle};
use crate::chain_client::{ChainClient, EthChainClient};
use crate::config::WatcherConfig;
use crate::error::{WatcherError, WatcherResult};
use crate::indexer::BlockIndexer;
use crate::job_queue::{spawn_workers, Job, JobHandler, JobQueue, NewJob, PgJobQueue, QueueName};
use crate::metrics::WatcherMetrics;
use crate::processor::{BlockProcessor, ProcessorConfig};
use crate::reorg::ReorgHandler;
use crate::retry_with_max_elapsed_time;
use crate::state_sink::{HttpStateSink, StateSink};
use crate::store::{PgStore, Store};
use crate::types::CursorPair;

/// Everything assembled from a [`WatcherConfig`], shared by the node runner
/// and the operator commands.
pub struct WatcherContext {
    pub config: WatcherConfig,
    pub db: Db,
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn JobQueue>,
    pub client: Arc<dyn ChainClient>,
    pub oracle: Arc<dyn AbiOracle>,
    pub sink: Option<Arc<dyn StateSink>>,
    pub metrics: Arc<WatcherMetrics>,
    pub registry: prometheus::Registry,
}

impl WatcherContext {
    pub async fn build(config: WatcherConfig) -> anyhow::Result<Self> {
        let database_url = Url::parse(&config.database.url)?;
        let db = Db::for_write(database_url, DbArgs::default()).await?;
        db.run_migrations().await?;

        let registry = prometheus::Registry::new();
        let metrics = Arc::new(WatcherMetrics::new(&registry));
        let store: Arc<dyn Store> = Arc::new(PgStore::new(db.clone()));
        let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(
            db.clone(),
            config.sync.job_max_attempts,
            metrics.clone(),
        ));
        let client: Arc<dyn ChainClient> = Arc::new(EthChainClient::new(
            &config.chain.rpc_url,
            config.sync.rpc_cache_capacity,
            metrics.clone(),
        )?);
        let sink = config
            .state_sink
            .as_ref()
            .map(|s| Arc::new(HttpStateSink::new(&s.endpoint)) as Arc<dyn StateSink>);

        for contract in &config.contracts {
            store.register_contract(contract.to_watched()).await?;
        }

        Ok(Self {
            config,
            db,
            store,
            queue,
            client,
            oracle: Arc::new(RawLogOracle),
            sink,
            metrics,
            registry,
        })
    }

    pub fn indexer(&self) -> Arc<BlockIndexer> {
        Arc::new(BlockIndexer::new(
            self.client.clone(),
            self.store.clone(),
            self.queue.clone(),
            self.oracle.clone(),
            self.metrics.clone(),
        ))
    }

    pub fn processor(&self) -> Arc<BlockProcessor> {
        let reorg = Arc::new(ReorgHandler::new(
            self.client.clone(),
            self.store.clone(),
            self.metrics.clone(),
            self.config.sync.max_reorg_depth,
        ));
        Arc::new(BlockProcessor::new(
            self.client.clone(),
            self.store.clone(),
            self.queue.clone(),
            self.indexer(),
            reorg,
            self.sink.clone(),
            self.metrics.clone(),
            ProcessorConfig {
                prune_depth: self.config.sync.prune_depth,
                checkpoint_interval: self.config.sync.checkpoint_interval,
                max_backfill_depth: self.config.sync.max_reorg_depth,
            },
        ))
    }
}

struct BlockJobHandler {
    client: Arc<dyn ChainClient>,
    indexer: Arc<BlockIndexer>,
}

#[async_trait]
impl JobHandler for BlockJobHandler {
    async fn handle(&self, job: &Job) -> WatcherResult<()> {
        let header = self
            .client
            .block_by_hash(&job.block_hash)
            .await?
            .ok_or_else(|| {
                WatcherError::TransientUpstream(format!(
                    "block {} ({}) not available upstream",
                    job.block_number, job.block_hash
                ))
            })?;
        self.indexer.save_block_and_fetch_events(&header).await?;
        Ok(())
    }
}

struct EventsJobHandler {
    processor: Arc<BlockProcessor>,
}

#[async_trait]
impl JobHandler for EventsJobHandler {
    async fn handle(&self, job: &Job) -> WatcherResult<()> {
        self.processor.process(&job.block_hash).await
    }
}

/// Run the watcher until `cancel` fires or a worker hits a fatal invariant
/// violation (which cancels the token itself).
pub async fn run_node(context: &WatcherContext, cancel: CancellationToken) -> anyhow::Result<()> {
    info!(
        "Starting watcher for {} ({} contracts)",
        context.config.chain.chain_name,
        context.config.contracts.len()
    );

    let poll_interval = Duration::from_millis(context.config.sync.poll_interval_ms);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    let block_handler = Arc::new(BlockJobHandler {
        client: context.client.clone(),
        indexer: context.indexer(),
    });
    handles.extend(spawn_workers(
        QueueName::Block,
        context.config.sync.block_workers,
        context.queue.clone(),
        block_handler,
        poll_interval,
        cancel.clone(),
        context.metrics.clone(),
    ));

    let events_handler = Arc::new(EventsJobHandler {
        processor: context.processor(),
    });
    handles.extend(spawn_workers(
        QueueName::Events,
        context.config.sync.events_workers,
        context.queue.clone(),
        events_handler,
        poll_interval,
        cancel.clone(),
        context.metrics.clone(),
    ));

    handles.push(spawn_head_follower(context, poll_interval, cancel.clone()));

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task panicked: {e}");
        }
    }
    info!("Watcher stopped");
    Ok(())
}

/// Poll the upstream head, advance the `chainHead` cursor and enqueue one
/// `block` job per newly discovered block, pausing above the high-water mark.
fn spawn_head_follower(
    context: &WatcherContext,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let client = context.client.clone();
    let store = context.store.clone();
    let queue = context.queue.clone();
    let metrics = context.metrics.clone();
    let high_water = context.config.sync.queue_high_water;
    let first_block = context
        .config
        .contracts
        .iter()
        .map(|c| c.starting_block)
        .min()
        .unwrap_or(0);

    tokio::spawn(async move {
        info!("Starting head follower");
        let mut interval = time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_to_enqueue: Option<u64> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Head follower cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = follow_head_once(
                        &*client,
                        &*store,
                        &*queue,
                        &metrics,
                        high_water,
                        first_block,
                        &mut next_to_enqueue,
                    )
                    .await
                    {
                        warn!("Head follower pass failed: {e}");
                        metrics
                            .upstream_errors
                            .with_label_values(&[e.error_type()])
                            .inc();
                    }
                }
            }
        }
    })
}

pub(crate) async fn follow_head_once(
    client: &dyn ChainClient,
    store: &dyn Store,
    queue: &dyn JobQueue,
    metrics: &WatcherMetrics,
    high_water: u64,
    first_block: u64,
    next_to_enqueue: &mut Option<u64>,
) -> WatcherResult<()> {
    let head_number = match retry_with_max_elapsed_time!(
        client.latest_block_number(),
        Duration::from_secs(60)
    ) {
        Ok(Ok(number)) => number,
        _ => {
            return Err(WatcherError::TransientUpstream(
                "failed to fetch upstream head after retry".into(),
            ))
        }
    };

    let Some(head) = client.block_by_number(head_number).await? else {
        // The head moved between the two calls; next tick will catch up.
        return Ok(());
    };
    store
        .update_chain_head(
            CursorPair {
                hash: head.hash.clone(),
                number: head.number,
            },
            false,
        )
        .await?;
    metrics.chain_head_block.set(head.number as i64);

    let start = match *next_to_enqueue {
        Some(next) => next,
        None => {
            let sync = store.sync_status().await?;
            sync.latest_indexed
                .as_ref()
                .map(|c| c.number + 1)
                .unwrap_or(first_block)
        }
    };

    for number in start..=head.number {
        let depth = queue.depth(QueueName::Block).await?;
        metrics
            .queue_depth
            .with_label_values(&[QueueName::Block.as_str()])
            .set(depth as i64);
        if depth >= high_water {
            debug!("Block queue above high-water mark ({depth}), pausing enqueue");
            break;
        }
        let Some(header) = client.block_by_number(number).await? else {
            break;
        };
        queue
            .enqueue(QueueName::Block, NewJob::new(header.hash, number))
            .await?;
        *next_to_enqueue = Some(number + 1);
    }
    Ok(())
}
