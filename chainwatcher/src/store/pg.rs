// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Postgres-backed [`Store`].
//!
//! Every composite operation acquires one pooled connection and runs inside
//! one transaction, so partial writes roll back on any exit path.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use chainwatcher_pg_db::Db;
use chainwatcher_schema::models::{
    NewStoredEvent, NewStoredStateRecord, StoredBlock, StoredContract, StoredEvent,
    StoredStateRecord, StoredStateSyncStatus, StoredSyncStatus,
};
use chainwatcher_schema::schema::{
    blocks, contracts, events, state_records, state_sync_status, sync_status,
};

use crate::cursors;
use crate::error::{WatcherError, WatcherResult};
use crate::store::{FinalizeBlock, NewBlock, NewStateRecord, RangeCounts, ReorgOutcome, Store};
use crate::types::{
    BlockProgress, CursorPair, EventRow, StateKind, StateRecord, StateSyncStatus, SyncStatus,
    WatchedContract,
};

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn to_progress(row: StoredBlock) -> BlockProgress {
    BlockProgress {
        block_hash: row.block_hash,
        parent_hash: row.parent_hash,
        block_number: row.block_number as u64,
        block_timestamp: row.block_timestamp as u64,
        num_events: row.num_events,
        num_processed_events: row.num_processed_events,
        last_processed_event_index: row.last_processed_event_index,
        is_complete: row.is_complete,
        is_pruned: row.is_pruned,
    }
}

fn to_event(row: StoredEvent) -> EventRow {
    EventRow {
        id: row.id,
        block_hash: row.block_hash,
        tx_hash: row.tx_hash,
        index: row.index,
        contract: row.contract,
        event_name: row.event_name,
        event_info: row.event_info,
        extra_info: row.extra_info,
        proof: row.proof,
    }
}

fn to_contract(row: StoredContract) -> WatchedContract {
    WatchedContract {
        address: row.address,
        kind: row.kind,
        checkpoint: row.checkpoint,
        starting_block: row.starting_block as u64,
    }
}

fn to_state_record(row: StoredStateRecord) -> WatcherResult<StateRecord> {
    let kind = StateKind::parse_str(&row.kind).ok_or_else(|| {
        WatcherError::InvariantViolation(format!(
            "unknown state record kind {} (record {})",
            row.kind, row.id
        ))
    })?;
    Ok(StateRecord {
        id: row.id,
        block_hash: row.block_hash,
        block_number: row.block_number as u64,
        contract_address: row.contract_address,
        cid: row.cid,
        kind,
        data: row.data,
    })
}

fn to_new_row(record: &NewStateRecord) -> NewStoredStateRecord {
    NewStoredStateRecord {
        block_hash: record.block_hash.clone(),
        block_number: record.block_number as i64,
        contract_address: record.contract_address.clone(),
        cid: record.cid.clone(),
        kind: record.kind.as_str().to_string(),
        data: record.data.clone(),
    }
}

fn kind_strings(kinds: &[StateKind]) -> Vec<String> {
    kinds.iter().map(|k| k.as_str().to_string()).collect()
}

fn pair(hash: Option<String>, number: Option<i64>) -> Option<CursorPair> {
    match (hash, number) {
        (Some(hash), Some(number)) => Some(CursorPair {
            hash,
            number: number as u64,
        }),
        _ => None,
    }
}

fn to_sync_status(row: StoredSyncStatus) -> SyncStatus {
    SyncStatus {
        chain_head: pair(row.chain_head_block_hash, row.chain_head_block_number),
        latest_indexed: pair(
            row.latest_indexed_block_hash,
            row.latest_indexed_block_number,
        ),
        latest_canonical: pair(
            row.latest_canonical_block_hash,
            row.latest_canonical_block_number,
        ),
        initial_indexed: pair(
            row.initial_indexed_block_hash,
            row.initial_indexed_block_number,
        ),
    }
}

async fn load_sync_row(conn: &mut AsyncPgConnection) -> WatcherResult<StoredSyncStatus> {
    let row = sync_status::table
        .find(1)
        .first::<StoredSyncStatus>(conn)
        .await
        .optional()?;
    match row {
        Some(row) => Ok(row),
        None => {
            let row = StoredSyncStatus {
                id: 1,
                ..Default::default()
            };
            diesel::insert_into(sync_status::table)
                .values(&row)
                .on_conflict(sync_status::id)
                .do_nothing()
                .execute(conn)
                .await?;
            Ok(row)
        }
    }
}

async fn write_sync_row(
    conn: &mut AsyncPgConnection,
    row: &StoredSyncStatus,
) -> WatcherResult<()> {
    diesel::update(sync_status::table.find(1))
        .set(row)
        .execute(conn)
        .await?;
    Ok(())
}

async fn load_state_sync_row(
    conn: &mut AsyncPgConnection,
) -> WatcherResult<StoredStateSyncStatus> {
    let row = state_sync_status::table
        .find(1)
        .first::<StoredStateSyncStatus>(conn)
        .await
        .optional()?;
    match row {
        Some(row) => Ok(row),
        None => {
            let row = StoredStateSyncStatus {
                id: 1,
                ..Default::default()
            };
            diesel::insert_into(state_sync_status::table)
                .values(&row)
                .on_conflict(state_sync_status::id)
                .do_nothing()
                .execute(conn)
                .await?;
            Ok(row)
        }
    }
}

async fn write_state_sync_row(
    conn: &mut AsyncPgConnection,
    row: &StoredStateSyncStatus,
) -> WatcherResult<()> {
    diesel::update(state_sync_status::table.find(1))
        .set(row)
        .execute(conn)
        .await?;
    Ok(())
}

/// Guarded `latestIndexed` advance, shared by block-save and finalize paths.
fn advance_indexed(row: &mut StoredSyncStatus, candidate: &CursorPair) -> WatcherResult<()> {
    cursors::check_indexed_within_head(
        candidate.number,
        row.chain_head_block_number.map(|n| n as u64),
        false,
    )?;
    let current = pair(
        row.latest_indexed_block_hash.clone(),
        row.latest_indexed_block_number,
    );
    if let Some(next) = cursors::advance_pair(current.as_ref(), candidate.clone(), false) {
        row.latest_indexed_block_hash = Some(next.hash);
        row.latest_indexed_block_number = Some(next.number as i64);
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn block_by_hash(&self, hash: &str) -> WatcherResult<Option<BlockProgress>> {
        let mut conn = self.db.connect().await?;
        let row = blocks::table
            .filter(blocks::block_hash.eq(hash))
            .select(StoredBlock::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(to_progress))
    }

    async fn blocks_at_height(
        &self,
        number: u64,
        include_pruned: bool,
    ) -> WatcherResult<Vec<BlockProgress>> {
        let mut conn = self.db.connect().await?;
        let mut query = blocks::table
            .filter(blocks::block_number.eq(number as i64))
            .select(StoredBlock::as_select())
            .into_boxed();
        if !include_pruned {
            query = query.filter(blocks::is_pruned.eq(false));
        }
        let rows = query
            .order(blocks::created_at.desc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(to_progress).collect())
    }

    async fn canonical_block_at_height(
        &self,
        number: u64,
    ) -> WatcherResult<Option<BlockProgress>> {
        Ok(self.blocks_at_height(number, false).await?.into_iter().next())
    }

    async fn save_block_with_events(&self, new_block: NewBlock) -> WatcherResult<BlockProgress> {
        let mut conn = self.db.connect().await?;
        let progress = conn
            .transaction::<BlockProgress, WatcherError, _>(|conn| {
                async move {
                    let conn: &mut AsyncPgConnection = conn;
                    let header = &new_block.header;
                    let existing = blocks::table
                        .filter(blocks::block_hash.eq(&header.hash))
                        .select(StoredBlock::as_select())
                        .first(conn)
                        .await
                        .optional()?;

                    if let Some(existing) = existing {
                        if existing.num_events > 0 {
                            return Ok(to_progress(existing));
                        }
                    }

                    let num_events = new_block.events.len() as i32;
                    let row = StoredBlock {
                        block_hash: header.hash.clone(),
                        parent_hash: header.parent_hash.clone(),
                        block_number: header.number as i64,
                        block_timestamp: header.timestamp as i64,
                        num_events,
                        num_processed_events: 0,
                        last_processed_event_index: -1,
                        is_complete: false,
                        is_pruned: false,
                        created_at: Utc::now(),
                    };
                    diesel::insert_into(blocks::table)
                        .values(&row)
                        .on_conflict(blocks::block_hash)
                        .do_nothing()
                        .execute(conn)
                        .await?;
                    // A pre-existing row with zero events is topped up, not replaced.
                    diesel::update(blocks::table.filter(blocks::block_hash.eq(&header.hash)))
                        .set(blocks::num_events.eq(num_events))
                        .execute(conn)
                        .await?;

                    let event_rows: Vec<NewStoredEvent> = new_block
                        .events
                        .iter()
                        .map(|e| NewStoredEvent {
                            block_hash: header.hash.clone(),
                            tx_hash: e.tx_hash.clone(),
                            index: e.index,
                            contract: e.contract.clone(),
                            event_name: e.event_name.clone(),
                            event_info: e.event_info.clone(),
                            extra_info: e.extra_info.clone(),
                            proof: e.proof.clone(),
                        })
                        .collect();
                    if !event_rows.is_empty() {
                        diesel::insert_into(events::table)
                            .values(&event_rows)
                            .on_conflict((events::block_hash, events::index))
                            .do_nothing()
                            .execute(conn)
                            .await?;
                    }

                    let mut sync = load_sync_row(conn).await?;
                    advance_indexed(
                        &mut sync,
                        &CursorPair {
                            hash: header.hash.clone(),
                            number: header.number,
                        },
                    )?;
                    if sync.initial_indexed_block_hash.is_none() {
                        sync.initial_indexed_block_hash = Some(header.hash.clone());
                        sync.initial_indexed_block_number = Some(header.number as i64);
                    }
                    write_sync_row(conn, &sync).await?;

                    let saved = blocks::table
                        .filter(blocks::block_hash.eq(&header.hash))
                        .select(StoredBlock::as_select())
                        .first(conn)
                        .await?;
                    Ok(to_progress(saved))
                }
                .scope_boxed()
            })
            .await?;
        Ok(progress)
    }

    async fn update_block_progress(
        &self,
        block_hash: &str,
        event_index: i32,
    ) -> WatcherResult<BlockProgress> {
        let block_hash = block_hash.to_string();
        let mut conn = self.db.connect().await?;
        let updated = conn
            .transaction::<Option<StoredBlock>, WatcherError, _>(|conn| {
                async move {
                    let conn: &mut AsyncPgConnection = conn;
                    let row = diesel::update(
                        blocks::table
                            .filter(blocks::block_hash.eq(&block_hash))
                            .filter(blocks::is_complete.eq(false))
                            .filter(blocks::last_processed_event_index.lt(event_index)),
                    )
                    .set((
                        blocks::last_processed_event_index.eq(event_index),
                        blocks::num_processed_events.eq(blocks::num_processed_events + 1),
                    ))
                    .get_result::<StoredBlock>(conn)
                    .await
                    .optional()?;
                    Ok(row)
                }
                .scope_boxed()
            })
            .await?;

        updated.map(to_progress).ok_or_else(|| {
            WatcherError::InvariantViolation(format!(
                "event {event_index} applied out of order or on a complete block"
            ))
        })
    }

    async fn finalize_block(&self, args: FinalizeBlock) -> WatcherResult<Vec<StateRecord>> {
        let mut conn = self.db.connect().await?;
        let created = conn
            .transaction::<Vec<StoredStateRecord>, WatcherError, _>(|conn| {
                async move {
                    let conn: &mut AsyncPgConnection = conn;
                    let block: StoredBlock = blocks::table
                        .filter(blocks::block_hash.eq(&args.block_hash))
                        .select(StoredBlock::as_select())
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?
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

                    diesel::update(blocks::table.filter(blocks::block_hash.eq(&args.block_hash)))
                        .set(blocks::is_complete.eq(true))
                        .execute(conn)
                        .await?;

                    let rows: Vec<NewStoredStateRecord> =
                        args.new_records.iter().map(to_new_row).collect();
                    let created: Vec<StoredStateRecord> = if rows.is_empty() {
                        vec![]
                    } else {
                        diesel::insert_into(state_records::table)
                            .values(&rows)
                            .on_conflict((
                                state_records::block_hash,
                                state_records::contract_address,
                                state_records::kind,
                            ))
                            .do_nothing()
                            .get_results(conn)
                            .await?
                    };

                    let mut sync = load_sync_row(conn).await?;
                    // Re-advances latestIndexed after a reorg rewind.
                    advance_indexed(
                        &mut sync,
                        &CursorPair {
                            hash: block.block_hash.clone(),
                            number: block.block_number as u64,
                        },
                    )?;
                    if let Some(canonical) = &args.canonical {
                        cursors::check_canonical_within_indexed(
                            canonical.number,
                            sync.latest_indexed_block_number.map(|n| n as u64),
                        )?;
                        let current = pair(
                            sync.latest_canonical_block_hash.clone(),
                            sync.latest_canonical_block_number,
                        );
                        if let Some(next) =
                            cursors::advance_pair(current.as_ref(), canonical.clone(), false)
                        {
                            sync.latest_canonical_block_hash = Some(next.hash);
                            sync.latest_canonical_block_number = Some(next.number as i64);
                        }
                    }
                    write_sync_row(conn, &sync).await?;

                    if let Some(through) = args.promote_through {
                        diesel::update(
                            state_records::table
                                .filter(state_records::kind.eq(StateKind::DiffStaged.as_str()))
                                .filter(state_records::block_number.le(through as i64)),
                        )
                        .set(state_records::kind.eq(StateKind::Diff.as_str()))
                        .execute(conn)
                        .await?;
                    }

                    let mut state_sync = load_state_sync_row(conn).await?;
                    if let Some(indexed) = args.state_indexed {
                        if let Some(next) = cursors::advance_number(
                            state_sync.latest_indexed_block_number.map(|n| n as u64),
                            indexed,
                            false,
                        ) {
                            state_sync.latest_indexed_block_number = Some(next as i64);
                        }
                    }
                    if let Some(checkpoint) = args.state_checkpoint {
                        if let Some(next) = cursors::advance_number(
                            state_sync.latest_checkpoint_block_number.map(|n| n as u64),
                            checkpoint,
                            false,
                        ) {
                            state_sync.latest_checkpoint_block_number = Some(next as i64);
                        }
                    }
                    write_state_sync_row(conn, &state_sync).await?;

                    Ok(created)
                }
                .scope_boxed()
            })
            .await?;

        created.into_iter().map(to_state_record).collect()
    }

    async fn apply_reorg(
        &self,
        ancestor: CursorPair,
        keep_hashes: &[String],
    ) -> WatcherResult<ReorgOutcome> {
        let keep = keep_hashes.to_vec();
        let mut conn = self.db.connect().await?;
        let outcome = conn
            .transaction::<ReorgOutcome, WatcherError, _>(|conn| {
                async move {
                    let conn: &mut AsyncPgConnection = conn;
                    let blocks_pruned = diesel::update(
                        blocks::table
                            .filter(blocks::block_number.gt(ancestor.number as i64))
                            .filter(blocks::block_hash.ne_all(&keep))
                            .filter(blocks::is_pruned.eq(false)),
                    )
                    .set(blocks::is_pruned.eq(true))
                    .execute(conn)
                    .await?;

                    // A branch that was orphaned earlier can become canonical
                    // again; its surviving blocks are restored here.
                    if !keep.is_empty() {
                        diesel::update(
                            blocks::table
                                .filter(blocks::block_hash.eq_any(&keep))
                                .filter(blocks::is_pruned.eq(true)),
                        )
                        .set(blocks::is_pruned.eq(false))
                        .execute(conn)
                        .await?;
                    }

                    let records_deleted = diesel::delete(
                        state_records::table
                            .filter(state_records::block_number.gt(ancestor.number as i64)),
                    )
                    .execute(conn)
                    .await?;

                    let mut sync = load_sync_row(conn).await?;
                    let indexed = sync.latest_indexed_block_number.unwrap_or(-1);
                    if indexed > ancestor.number as i64 {
                        sync.latest_indexed_block_hash = Some(ancestor.hash.clone());
                        sync.latest_indexed_block_number = Some(ancestor.number as i64);
                    }
                    let canonical = sync.latest_canonical_block_number.unwrap_or(-1);
                    if canonical > ancestor.number as i64 {
                        sync.latest_canonical_block_hash = Some(ancestor.hash.clone());
                        sync.latest_canonical_block_number = Some(ancestor.number as i64);
                    }
                    write_sync_row(conn, &sync).await?;

                    let mut state_sync = load_state_sync_row(conn).await?;
                    if state_sync.latest_indexed_block_number.unwrap_or(-1)
                        > ancestor.number as i64
                    {
                        state_sync.latest_indexed_block_number = Some(ancestor.number as i64);
                    }
                    write_state_sync_row(conn, &state_sync).await?;

                    Ok(ReorgOutcome {
                        blocks_pruned,
                        records_deleted,
                    })
                }
                .scope_boxed()
            })
            .await?;
        Ok(outcome)
    }

    async fn processed_counts_in_range(&self, from: u64, to: u64) -> WatcherResult<RangeCounts> {
        let mut conn = self.db.connect().await?;
        let expected: i64 = blocks::table
            .filter(blocks::block_number.between(from as i64, to as i64))
            .filter(blocks::is_pruned.eq(false))
            .count()
            .get_result(&mut conn)
            .await?;
        let processed: i64 = blocks::table
            .filter(blocks::block_number.between(from as i64, to as i64))
            .filter(blocks::is_pruned.eq(false))
            .filter(blocks::is_complete.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(RangeCounts {
            expected: expected as u64,
            processed: processed as u64,
        })
    }

    async fn events_after_index(
        &self,
        block_hash: &str,
        after: i32,
    ) -> WatcherResult<Vec<EventRow>> {
        let mut conn = self.db.connect().await?;
        let rows = events::table
            .filter(events::block_hash.eq(block_hash))
            .filter(events::index.gt(after))
            .order(events::index.asc())
            .select(StoredEvent::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(to_event).collect())
    }

    async fn events_in_range(&self, from: u64, to: u64) -> WatcherResult<Vec<EventRow>> {
        let mut conn = self.db.connect().await?;
        let rows = events::table
            .inner_join(blocks::table)
            .filter(blocks::block_number.between(from as i64, to as i64))
            .filter(blocks::is_pruned.eq(false))
            .order((blocks::block_number.asc(), events::index.asc()))
            .select(StoredEvent::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(to_event).collect())
    }

    async fn contracts(&self) -> WatcherResult<Vec<WatchedContract>> {
        let mut conn = self.db.connect().await?;
        let rows = contracts::table
            .select(StoredContract::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(to_contract).collect())
    }

    async fn contract_by_address(
        &self,
        address: &str,
    ) -> WatcherResult<Option<WatchedContract>> {
        let mut conn = self.db.connect().await?;
        let row = contracts::table
            .filter(contracts::address.eq(address))
            .select(StoredContract::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(to_contract))
    }

    async fn register_contract(&self, contract: WatchedContract) -> WatcherResult<()> {
        let mut conn = self.db.connect().await?;
        let row = StoredContract {
            address: contract.address,
            kind: contract.kind,
            checkpoint: contract.checkpoint,
            starting_block: contract.starting_block as i64,
        };
        diesel::insert_into(contracts::table)
            .values(&row)
            .on_conflict(contracts::address)
            .do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_state_record(&self, record: NewStateRecord) -> WatcherResult<StateRecord> {
        let mut conn = self.db.connect().await?;
        let row = diesel::insert_into(state_records::table)
            .values(&to_new_row(&record))
            .get_result::<StoredStateRecord>(&mut conn)
            .await?;
        to_state_record(row)
    }

    async fn latest_state_record(
        &self,
        contract: &str,
        kinds: &[StateKind],
        max_number: u64,
    ) -> WatcherResult<Option<StateRecord>> {
        let mut conn = self.db.connect().await?;
        let row = state_records::table
            .filter(state_records::contract_address.eq(contract))
            .filter(state_records::kind.eq_any(kind_strings(kinds)))
            .filter(state_records::block_number.le(max_number as i64))
            .order((state_records::block_number.desc(), state_records::id.desc()))
            .select(StoredStateRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(to_state_record).transpose()
    }

    async fn state_record_at(
        &self,
        block_hash: &str,
        contract: &str,
        kind: StateKind,
    ) -> WatcherResult<Option<StateRecord>> {
        let mut conn = self.db.connect().await?;
        let row = state_records::table
            .filter(state_records::block_hash.eq(block_hash))
            .filter(state_records::contract_address.eq(contract))
            .filter(state_records::kind.eq(kind.as_str()))
            .select(StoredStateRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(to_state_record).transpose()
    }

    async fn state_records_in_range(
        &self,
        contract: &str,
        kinds: &[StateKind],
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<StateRecord>> {
        let mut conn = self.db.connect().await?;
        let rows = state_records::table
            .filter(state_records::contract_address.eq(contract))
            .filter(state_records::kind.eq_any(kind_strings(kinds)))
            .filter(state_records::block_number.between(from as i64, to as i64))
            .order((state_records::block_number.asc(), state_records::id.asc()))
            .select(StoredStateRecord::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(to_state_record).collect()
    }

    async fn has_state_in_range(&self, from: u64, to: u64) -> WatcherResult<bool> {
        let mut conn = self.db.connect().await?;
        let count: i64 = state_records::table
            .filter(state_records::block_number.between(from as i64, to as i64))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn sync_status(&self) -> WatcherResult<SyncStatus> {
        let mut conn = self.db.connect().await?;
        let row = sync_status::table
            .find(1)
            .first::<StoredSyncStatus>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(to_sync_status).unwrap_or_default())
    }

    async fn state_sync_status(&self) -> WatcherResult<StateSyncStatus> {
        let mut conn = self.db.connect().await?;
        let row = state_sync_status::table
            .find(1)
            .first::<StoredStateSyncStatus>(&mut conn)
            .await
            .optional()?;
        Ok(row
            .map(|row| StateSyncStatus {
                latest_indexed_block_number: row.latest_indexed_block_number.map(|n| n as u64),
                latest_checkpoint_block_number: row
                    .latest_checkpoint_block_number
                    .map(|n| n as u64),
            })
            .unwrap_or_default())
    }

    async fn update_chain_head(&self, head: CursorPair, force: bool) -> WatcherResult<()> {
        let mut conn = self.db.connect().await?;
        conn.transaction::<(), WatcherError, _>(|conn| {
            async move {
                let conn: &mut AsyncPgConnection = conn;
                let mut sync = load_sync_row(conn).await?;
                let current = pair(
                    sync.chain_head_block_hash.clone(),
                    sync.chain_head_block_number,
                );
                if let Some(next) = cursors::advance_pair(current.as_ref(), head, force) {
                    sync.chain_head_block_hash = Some(next.hash);
                    sync.chain_head_block_number = Some(next.number as i64);
                    write_sync_row(conn, &sync).await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    async fn update_state_sync_checkpoint(&self, number: u64, force: bool) -> WatcherResult<()> {
        let mut conn = self.db.connect().await?;
        conn.transaction::<(), WatcherError, _>(|conn| {
            async move {
                let conn: &mut AsyncPgConnection = conn;
                let mut row = load_state_sync_row(conn).await?;
                if let Some(next) = cursors::advance_number(
                    row.latest_checkpoint_block_number.map(|n| n as u64),
                    number,
                    force,
                ) {
                    row.latest_checkpoint_block_number = Some(next as i64);
                    write_state_sync_row(conn, &row).await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}
