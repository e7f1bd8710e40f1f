// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row models for the watcher tables.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::{
    blocks, contracts, events, jobs, state_records, state_sync_status, sync_status,
};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = blocks)]
pub struct StoredBlock {
    pub block_hash: String,
    pub parent_hash: String,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub num_events: i32,
    pub num_processed_events: i32,
    pub last_processed_event_index: i32,
    pub is_complete: bool,
    pub is_pruned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = events)]
pub struct NewStoredEvent {
    pub block_hash: String,
    pub tx_hash: String,
    pub index: i32,
    pub contract: String,
    pub event_name: String,
    pub event_info: serde_json::Value,
    pub extra_info: serde_json::Value,
    pub proof: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = events)]
pub struct StoredEvent {
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

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = contracts)]
pub struct StoredContract {
    pub address: String,
    pub kind: String,
    pub checkpoint: bool,
    pub starting_block: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = state_records)]
pub struct NewStoredStateRecord {
    pub block_hash: String,
    pub block_number: i64,
    pub contract_address: String,
    pub cid: String,
    pub kind: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = state_records)]
pub struct StoredStateRecord {
    pub id: i64,
    pub block_hash: String,
    pub block_number: i64,
    pub contract_address: String,
    pub cid: String,
    pub kind: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = sync_status)]
#[diesel(treat_none_as_null = true)]
pub struct StoredSyncStatus {
    pub id: i32,
    pub chain_head_block_hash: Option<String>,
    pub chain_head_block_number: Option<i64>,
    pub latest_indexed_block_hash: Option<String>,
    pub latest_indexed_block_number: Option<i64>,
    pub latest_canonical_block_hash: Option<String>,
    pub latest_canonical_block_number: Option<i64>,
    pub initial_indexed_block_hash: Option<String>,
    pub initial_indexed_block_number: Option<i64>,
}

#[derive(Debug, Clone, Default, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = state_sync_status)]
#[diesel(treat_none_as_null = true)]
pub struct StoredStateSyncStatus {
    pub id: i32,
    pub latest_indexed_block_number: Option<i64>,
    pub latest_checkpoint_block_number: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
pub struct StoredJob {
    pub id: i64,
    pub queue: String,
    pub block_hash: String,
    pub block_number: i64,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub run_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewStoredJob {
    pub queue: String,
    pub block_hash: String,
    pub block_number: i64,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
}
