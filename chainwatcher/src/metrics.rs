// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Registry,
};

const LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Clone, Debug)]
pub struct WatcherMetrics {
    pub(crate) blocks_indexed: IntCounter,
    pub(crate) blocks_processed: IntCounter,
    pub(crate) events_processed: IntCounter,
    pub(crate) reorgs_detected: IntCounter,

    pub(crate) chain_head_block: IntGauge,
    pub(crate) latest_indexed_block: IntGauge,
    pub(crate) latest_canonical_block: IntGauge,

    pub(crate) state_records_created: IntCounterVec,

    pub(crate) jobs_enqueued: IntCounterVec,
    pub(crate) jobs_retried: IntCounterVec,
    pub(crate) jobs_poisoned: IntCounterVec,
    pub(crate) queue_depth: IntGaugeVec,

    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_cache_hits: IntCounter,
    pub(crate) rpc_cache_misses: IntCounter,
    pub(crate) upstream_errors: IntCounterVec,

    pub(crate) block_processing_latency: Histogram,
}

impl WatcherMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            blocks_indexed: register_int_counter_with_registry!(
                "watcher_blocks_indexed",
                "Total number of blocks saved with their events",
                registry,
            )
            .unwrap(),
            blocks_processed: register_int_counter_with_registry!(
                "watcher_blocks_processed",
                "Total number of blocks driven to the complete state",
                registry,
            )
            .unwrap(),
            events_processed: register_int_counter_with_registry!(
                "watcher_events_processed",
                "Total number of events applied to derived state",
                registry,
            )
            .unwrap(),
            reorgs_detected: register_int_counter_with_registry!(
                "watcher_reorgs_detected",
                "Total number of chain reorganizations handled",
                registry,
            )
            .unwrap(),
            chain_head_block: register_int_gauge_with_registry!(
                "watcher_chain_head_block",
                "Latest block number observed at the upstream head",
                registry,
            )
            .unwrap(),
            latest_indexed_block: register_int_gauge_with_registry!(
                "watcher_latest_indexed_block",
                "Latest indexed block number",
                registry,
            )
            .unwrap(),
            latest_canonical_block: register_int_gauge_with_registry!(
                "watcher_latest_canonical_block",
                "Latest canonical block number",
                registry,
            )
            .unwrap(),
            state_records_created: register_int_counter_vec_with_registry!(
                "watcher_state_records_created",
                "State records created, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            jobs_enqueued: register_int_counter_vec_with_registry!(
                "watcher_jobs_enqueued",
                "Jobs enqueued, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_retried: register_int_counter_vec_with_registry!(
                "watcher_jobs_retried",
                "Jobs scheduled for retry after a failure, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_poisoned: register_int_counter_vec_with_registry!(
                "watcher_jobs_poisoned",
                "Jobs that exhausted their retry budget, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            queue_depth: register_int_gauge_vec_with_registry!(
                "watcher_queue_depth",
                "Pending job count, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            rpc_queries: register_int_counter_vec_with_registry!(
                "watcher_rpc_queries",
                "Upstream RPC queries, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            rpc_cache_hits: register_int_counter_with_registry!(
                "watcher_rpc_cache_hits",
                "Idempotent RPC reads served from the cache",
                registry,
            )
            .unwrap(),
            rpc_cache_misses: register_int_counter_with_registry!(
                "watcher_rpc_cache_misses",
                "Idempotent RPC reads that went upstream",
                registry,
            )
            .unwrap(),
            upstream_errors: register_int_counter_vec_with_registry!(
                "watcher_upstream_errors",
                "Upstream RPC errors after retry, by type",
                &["type"],
                registry,
            )
            .unwrap(),
            block_processing_latency: register_histogram_with_registry!(
                "watcher_block_processing_latency",
                "Wall time spent processing a block, in seconds",
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
