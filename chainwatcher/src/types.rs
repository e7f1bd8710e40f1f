// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain types shared across the watcher components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimal header of an upstream block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub parent_hash: String,
    pub number: u64,
    pub timestamp: u64,
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.number, truncate_hash(&self.hash))
    }
}

/// A header together with its byte-exact RLP encoding, as used for CID input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullBlock {
    pub header: BlockHeader,
    pub header_rlp: Vec<u8>,
}

/// A raw log fetched from the upstream chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting contract address, hex-normalized.
    pub address: String,
    pub tx_hash: String,
    /// Chain-assigned log index within the block.
    pub log_index: u64,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
}

/// Storage slot value plus an opaque proof blob (absent for adapters
/// without proof support).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSlot {
    pub value: String,
    pub proof: Option<serde_json::Value>,
}

/// Output of the ABI oracle for a single log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub event_name: String,
    pub event_info: serde_json::Value,
    pub extra_info: serde_json::Value,
    pub proof: Option<serde_json::Value>,
}

/// Indexing progress of a block, mirrored from the `blocks` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockProgress {
    pub block_hash: String,
    pub parent_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub num_events: i32,
    pub num_processed_events: i32,
    pub last_processed_event_index: i32,
    pub is_complete: bool,
    pub is_pruned: bool,
}

impl BlockProgress {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            hash: self.block_hash.clone(),
            parent_hash: self.parent_hash.clone(),
            number: self.block_number,
            timestamp: self.block_timestamp,
        }
    }
}

/// An event row as persisted by the indexer. Write-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub id: i64,
    pub block_hash: String,
    pub tx_hash: String,
    pub index: i32,
    pub contract: String,
    pub event_name: String,
    pub event_info: serde_json::Value,
    pub extra_info: serde_json::Value,
    pub proof: Option<serde_json::Value>,
}

/// A contract whose events the watcher tracks. Add-only during operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedContract {
    pub address: String,
    pub kind: String,
    /// Whether automatic checkpoint cadence covers this contract. State
    /// materialization and on-demand checkpoints do not consult it.
    pub checkpoint: bool,
    pub starting_block: u64,
}

/// Closed set of state record kinds. Adding a kind is a compile-time
/// obligation across the materializer, the promoter, and the parenting rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Diff,
    Init,
    DiffStaged,
    Checkpoint,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Diff => "diff",
            StateKind::Init => "init",
            StateKind::DiffStaged => "diff_staged",
            StateKind::Checkpoint => "checkpoint",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "diff" => Some(StateKind::Diff),
            "init" => Some(StateKind::Init),
            "diff_staged" => Some(StateKind::DiffStaged),
            "checkpoint" => Some(StateKind::Checkpoint),
            _ => None,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A materialized state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub id: i64,
    pub block_hash: String,
    pub block_number: u64,
    pub contract_address: String,
    pub cid: String,
    pub kind: StateKind,
    pub data: Vec<u8>,
}

/// (hash, number) pair for a sync cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPair {
    pub hash: String,
    pub number: u64,
}

/// The single-row sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub chain_head: Option<CursorPair>,
    pub latest_indexed: Option<CursorPair>,
    pub latest_canonical: Option<CursorPair>,
    pub initial_indexed: Option<CursorPair>,
}

/// The single-row state sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSyncStatus {
    pub latest_indexed_block_number: Option<u64>,
    pub latest_checkpoint_block_number: Option<u64>,
}

/// Helper to truncate hash for display.
pub fn truncate_hash(hash: &str) -> String {
    if hash.len() > 16 {
        format!("{}...{}", &hash[..8], &hash[hash.len() - 6..])
    } else {
        hash.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_kind_round_trip() {
        for kind in [
            StateKind::Diff,
            StateKind::Init,
            StateKind::DiffStaged,
            StateKind::Checkpoint,
        ] {
            assert_eq!(StateKind::parse_str(kind.as_str()), Some(kind));
        }
        assert_eq!(StateKind::parse_str("bogus"), None);
    }

    #[test]
    fn truncate_hash_shortens_long_hashes() {
        let hash = "0x1234567890abcdef1234567890abcdef12345678";
        let truncated = truncate_hash(hash);
        assert!(truncated.len() < hash.len());
        assert!(truncated.contains("..."));
        assert_eq!(truncate_hash("0x1234"), "0x1234");
    }
}
