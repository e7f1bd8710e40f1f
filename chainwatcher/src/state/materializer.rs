// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Materialization of init / diff / checkpoint records.
//!
//! Records created for a block that is still being finalized are passed in
//! as `same_block`, since they are not yet visible in the store. Within one
//! block, later entries in `same_block` are newer.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{WatcherError, WatcherResult};
use crate::state::cid::{state_cid, EMPTY_PARENT_CID};
use crate::state::{merge_state, StateBlockRef, StateData, StateMeta};
use crate::store::{NewStateRecord, Store};
use crate::types::{BlockHeader, StateKind, StateRecord, WatchedContract};

const DIFF_KINDS: [StateKind; 3] = [StateKind::Init, StateKind::Diff, StateKind::DiffStaged];
const CHECKPOINT_PARENT_KINDS: [StateKind; 4] = [
    StateKind::Init,
    StateKind::Diff,
    StateKind::DiffStaged,
    StateKind::Checkpoint,
];
const BASE_KINDS: [StateKind; 2] = [StateKind::Init, StateKind::Checkpoint];

pub struct StateMaterializer {
    store: Arc<dyn Store>,
}

impl StateMaterializer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn build_record(
        &self,
        kind: StateKind,
        parent_cid: &str,
        contract: &str,
        header: &BlockHeader,
        block_cid: &str,
        state: Value,
    ) -> NewStateRecord {
        let data = StateData {
            meta: StateMeta {
                kind: kind.as_str().to_string(),
                parent: parent_cid.to_string(),
                block: StateBlockRef {
                    cid: block_cid.to_string(),
                    hash: header.hash.clone(),
                    number: header.number,
                },
            },
            state,
        };
        let bytes = data.to_canonical_bytes();
        let cid = state_cid(kind, parent_cid, block_cid, contract, &bytes);
        NewStateRecord {
            block_hash: header.hash.clone(),
            block_number: header.number,
            contract_address: contract.to_string(),
            cid,
            kind,
            data: bytes,
        }
    }

    /// The newest record of the given kinds at or below `max_number`,
    /// considering both the store and the records being created right now.
    async fn newest_of(
        &self,
        contract: &str,
        kinds: &[StateKind],
        max_number: u64,
        same_block: &[NewStateRecord],
    ) -> WatcherResult<Option<(u64, String, Vec<u8>)>> {
        let stored = self
            .store
            .latest_state_record(contract, kinds, max_number)
            .await?;

        let pending = same_block
            .iter()
            .filter(|r| {
                r.contract_address == contract
                    && r.block_number <= max_number
                    && kinds.contains(&r.kind)
            })
            .last();

        Ok(match (stored, pending) {
            // In-flight records are newer than anything stored at the same height.
            (Some(s), Some(p)) if s.block_number > p.block_number => {
                Some((s.block_number, s.cid, s.data))
            }
            (_, Some(p)) => Some((p.block_number, p.cid.clone(), p.data.clone())),
            (Some(s), None) => Some((s.block_number, s.cid, s.data)),
            (None, None) => None,
        })
    }

    /// Build the `init` record for a contract at its starting block. Returns
    /// `None` when one already exists.
    pub async fn build_init(
        &self,
        contract: &WatchedContract,
        header: &BlockHeader,
        block_cid: &str,
        state: Value,
    ) -> WatcherResult<Option<NewStateRecord>> {
        let existing = self
            .store
            .latest_state_record(&contract.address, &[StateKind::Init], u64::MAX)
            .await?;
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(self.build_record(
            StateKind::Init,
            EMPTY_PARENT_CID,
            &contract.address,
            header,
            block_cid,
            state,
        )))
    }

    /// Build a staged diff for a contract whose state changed in this block.
    pub async fn build_staged_diff(
        &self,
        contract: &str,
        header: &BlockHeader,
        block_cid: &str,
        state: Value,
        same_block: &[NewStateRecord],
    ) -> WatcherResult<NewStateRecord> {
        // A checkpoint created in this very block becomes the parent;
        // otherwise the newest diff (or the init) does.
        let parent = match self
            .checkpoint_at(&header.hash, contract, same_block)
            .await?
        {
            Some(cid) => cid,
            None => self
                .newest_of(contract, &DIFF_KINDS, header.number, same_block)
                .await?
                .map(|(_, cid, _)| cid)
                .unwrap_or_else(|| EMPTY_PARENT_CID.to_string()),
        };
        Ok(self.build_record(
            StateKind::DiffStaged,
            &parent,
            contract,
            header,
            block_cid,
            state,
        ))
    }

    /// Build a checkpoint embedding the full aggregated state at `header`.
    /// Checkpoint creation is idempotent per block: returns `None` when one
    /// already exists there.
    pub async fn build_checkpoint(
        &self,
        contract: &WatchedContract,
        header: &BlockHeader,
        block_cid: &str,
        same_block: &[NewStateRecord],
    ) -> WatcherResult<Option<NewStateRecord>> {
        if self
            .checkpoint_at(&header.hash, &contract.address, same_block)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let parent = self
            .newest_of(
                &contract.address,
                &CHECKPOINT_PARENT_KINDS,
                header.number,
                same_block,
            )
            .await?
            .map(|(_, cid, _)| cid)
            .ok_or_else(|| {
                WatcherError::InvariantViolation(format!(
                    "checkpoint requested for {} at block {} with no prior state",
                    contract.address, header.number
                ))
            })?;

        let state = self
            .aggregate_state(&contract.address, header.number, same_block)
            .await?;

        Ok(Some(self.build_record(
            StateKind::Checkpoint,
            &parent,
            &contract.address,
            header,
            block_cid,
            state,
        )))
    }

    /// Create a checkpoint directly in the store (operator path). Returns the
    /// existing record when the block already has one.
    pub async fn create_checkpoint(
        &self,
        contract: &WatchedContract,
        header: &BlockHeader,
        block_cid: &str,
    ) -> WatcherResult<StateRecord> {
        if let Some(existing) = self
            .store
            .state_record_at(&header.hash, &contract.address, StateKind::Checkpoint)
            .await?
        {
            return Ok(existing);
        }
        let record = self
            .build_checkpoint(contract, header, block_cid, &[])
            .await?
            .ok_or_else(|| {
                WatcherError::InvariantViolation(format!(
                    "checkpoint for {} at {} vanished mid-creation",
                    contract.address, header.hash
                ))
            })?;
        let created = self.store.insert_state_record(record).await?;
        self.store
            .update_state_sync_checkpoint(header.number, false)
            .await?;
        Ok(created)
    }

    /// Full aggregated state of a contract at `up_to`: the newest checkpoint
    /// or init at or below it, plus every later diff folded in block order.
    pub async fn aggregate_state(
        &self,
        contract: &str,
        up_to: u64,
        same_block: &[NewStateRecord],
    ) -> WatcherResult<Value> {
        let base = self
            .newest_of(contract, &BASE_KINDS, up_to, same_block)
            .await?;
        let (base_number, mut aggregate) = match base {
            Some((number, _, data)) => {
                let parsed = StateData::from_bytes(&data).ok_or_else(|| {
                    WatcherError::InvariantViolation(format!(
                        "undecodable state payload for {contract} at block {number}"
                    ))
                })?;
                (Some(number), parsed.state)
            }
            None => (None, Value::Object(Default::default())),
        };

        let from = match base_number {
            Some(number) if number >= up_to => return Ok(aggregate),
            Some(number) => number + 1,
            None => 0,
        };

        let diffs = self
            .store
            .state_records_in_range(
                contract,
                &[StateKind::Diff, StateKind::DiffStaged],
                from,
                up_to,
            )
            .await?;
        for record in diffs {
            let parsed = StateData::from_bytes(&record.data).ok_or_else(|| {
                WatcherError::InvariantViolation(format!(
                    "undecodable state payload for {contract} (cid {})",
                    record.cid
                ))
            })?;
            merge_state(&mut aggregate, &parsed.state);
        }

        for record in same_block.iter().filter(|r| {
            r.contract_address == contract
                && matches!(r.kind, StateKind::Diff | StateKind::DiffStaged)
                && r.block_number >= from
                && r.block_number <= up_to
        }) {
            let parsed = StateData::from_bytes(&record.data).ok_or_else(|| {
                WatcherError::InvariantViolation(format!(
                    "undecodable in-flight state payload for {contract}"
                ))
            })?;
            merge_state(&mut aggregate, &parsed.state);
        }

        Ok(aggregate)
    }

    async fn checkpoint_at(
        &self,
        block_hash: &str,
        contract: &str,
        same_block: &[NewStateRecord],
    ) -> WatcherResult<Option<String>> {
        if let Some(record) = same_block.iter().find(|r| {
            r.block_hash == block_hash
                && r.contract_address == contract
                && r.kind == StateKind::Checkpoint
        }) {
            return Ok(Some(record.cid.clone()));
        }
        Ok(self
            .store
            .state_record_at(block_hash, contract, StateKind::Checkpoint)
            .await?
            .map(|r| r.cid))
    }
}
