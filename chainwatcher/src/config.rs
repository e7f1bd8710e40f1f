// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{WatcherError, WatcherResult};
use crate::types::WatchedContract;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    // Rpc url for the upstream fullnode.
    pub rpc_url: String,
    // Chain identifier used in logs and metrics labels.
    #[serde(default = "default_chain_name")]
    pub chain_name: String,
}

fn default_chain_name() -> String {
    "eth".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    /// Blocks at or below `chainHead - prune_depth` are considered final.
    #[serde(default = "default_prune_depth")]
    pub prune_depth: u64,
    /// Maximum reorg depth the ancestor walk will tolerate before giving up.
    #[serde(default = "default_max_reorg_depth")]
    pub max_reorg_depth: u64,
    /// Automatic checkpoint cadence in blocks. 0 disables automatic checkpoints.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Head polling interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Worker count for the `events` queue. Keep at 1 unless sharded by contract.
    #[serde(default = "default_events_workers")]
    pub events_workers: usize,
    /// Worker count for the `block` queue.
    #[serde(default = "default_block_workers")]
    pub block_workers: usize,
    /// Head follower stops enqueueing once queue depth exceeds this.
    #[serde(default = "default_queue_high_water")]
    pub queue_high_water: u64,
    /// Retry budget per job before it is poisoned.
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: i32,
    /// Entry cap for the RPC read cache.
    #[serde(default = "default_rpc_cache_capacity")]
    pub rpc_cache_capacity: usize,
}

fn default_prune_depth() -> u64 {
    16
}

fn default_max_reorg_depth() -> u64 {
    64
}

fn default_checkpoint_interval() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_events_workers() -> usize {
    1
}

fn default_block_workers() -> usize {
    2
}

fn default_queue_high_water() -> u64 {
    256
}

fn default_job_max_attempts() -> i32 {
    3
}

fn default_rpc_cache_capacity() -> usize {
    10_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prune_depth: default_prune_depth(),
            max_reorg_depth: default_max_reorg_depth(),
            checkpoint_interval: default_checkpoint_interval(),
            poll_interval_ms: default_poll_interval_ms(),
            events_workers: default_events_workers(),
            block_workers: default_block_workers(),
            queue_high_water: default_queue_high_water(),
            job_max_attempts: default_job_max_attempts(),
            rpc_cache_capacity: default_rpc_cache_capacity(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractConfig {
    pub address: String,
    pub kind: String,
    /// Include this contract in automatic checkpointing. Init and diff
    /// records are materialized regardless.
    #[serde(default = "default_true")]
    pub checkpoint: bool,
    pub starting_block: u64,
}

fn default_true() -> bool {
    true
}

impl ContractConfig {
    pub fn to_watched(&self) -> WatchedContract {
        WatchedContract {
            address: self.address.to_lowercase(),
            kind: self.kind.clone(),
            checkpoint: self.checkpoint,
            starting_block: self.starting_block,
        }
    }
}

/// Optional push endpoint for content-addressed state blobs.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StateSinkConfig {
    pub endpoint: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherConfig {
    // The port for the metrics server.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    pub chain: ChainConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_sink: Option<StateSinkConfig>,
}

fn default_metrics_port() -> u16 {
    9184
}

impl WatcherConfig {
    pub fn load(path: impl AsRef<Path>) -> WatcherResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| WatcherError::Config(format!("failed to read config: {e}")))?;
        let config: WatcherConfig = serde_yaml::from_str(&contents)
            .map_err(|e| WatcherError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WatcherResult<()> {
        if self.chain.rpc_url.is_empty() {
            return Err(WatcherError::Config("chain.rpc-url must be set".into()));
        }
        if self.contracts.is_empty() {
            return Err(WatcherError::Config(
                "at least one watched contract must be configured".into(),
            ));
        }
        for contract in &self.contracts {
            let stripped = contract.address.trim_start_matches("0x");
            if stripped.len() != 40 || !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(WatcherError::Config(format!(
                    "invalid contract address {}",
                    contract.address
                )));
            }
        }
        if self.sync.max_reorg_depth == 0 {
            return Err(WatcherError::Config("max-reorg-depth must be > 0".into()));
        }
        Ok(())
    }
}
