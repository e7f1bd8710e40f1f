// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Derivation of contract-scoped state from processed events.
//!
//! Each processor worker owns a [`StateCache`] for the block in flight; the
//! cache is flushed to persistence as staged diff records when the block
//! completes. Nothing here holds ambient process-wide state.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::EventRow;

pub mod canonical;
pub mod cid;
mod materializer;

pub use materializer::StateMaterializer;

/// Metadata embedded in every state record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMeta {
    pub kind: String,
    /// CID of the previous record of the same contract in block order.
    pub parent: String,
    pub block: StateBlockRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlockRef {
    pub cid: String,
    pub hash: String,
    pub number: u64,
}

/// The persisted payload of a state record: metadata plus the entity state,
/// serialized canonically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    pub meta: StateMeta,
    pub state: Value,
}

impl StateData {
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let value = json!({ "meta": &self.meta, "state": &self.state });
        canonical::canonical_json_bytes(&value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Per-contract entity state accumulated while a block's events are applied.
/// Owned by a single processor worker; never shared.
#[derive(Debug, Default, Clone)]
pub struct StateCache {
    /// contract -> entity name -> entity id -> attributes
    updates: HashMap<String, BTreeMap<String, BTreeMap<String, Value>>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the cache. The entity is keyed by the oracle's
    /// `id` field, falling back to the transaction hash for events without
    /// an entity identity.
    pub fn apply_event(&mut self, event: &EventRow) {
        let entity_id = event
            .event_info
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| event.tx_hash.clone());

        let entity = self
            .updates
            .entry(event.contract.clone())
            .or_default()
            .entry(event.event_name.clone())
            .or_default()
            .entry(entity_id.clone())
            .or_insert_with(|| json!({ "id": entity_id }));

        if let (Some(target), Some(source)) = (entity.as_object_mut(), event.event_info.as_object())
        {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Contracts with at least one entity change in this block.
    pub fn touched_contracts(&self) -> Vec<String> {
        let mut contracts: Vec<String> = self.updates.keys().cloned().collect();
        contracts.sort();
        contracts
    }

    /// The diff payload for one contract: `{entity: [entities...]}`.
    pub fn state_value(&self, contract: &str) -> Value {
        let Some(entities) = self.updates.get(contract) else {
            return json!({});
        };
        let mut out = serde_json::Map::new();
        for (entity_name, by_id) in entities {
            let items: Vec<Value> = by_id.values().cloned().collect();
            out.insert(entity_name.clone(), Value::Array(items));
        }
        Value::Object(out)
    }
}

/// Merge a diff payload into an aggregate: entities are matched by id and
/// their attributes overwritten, new entities appended.
pub fn merge_state(aggregate: &mut Value, diff: &Value) {
    let Some(diff_map) = diff.as_object() else {
        return;
    };
    if !aggregate.is_object() {
        *aggregate = json!({});
    }
    let aggregate_map = aggregate.as_object_mut().expect("aggregate is an object");

    for (entity_name, diff_entities) in diff_map {
        let slot = aggregate_map
            .entry(entity_name.clone())
            .or_insert_with(|| Value::Array(vec![]));
        let Some(diff_items) = diff_entities.as_array() else {
            continue;
        };
        let Some(items) = slot.as_array_mut() else {
            continue;
        };
        for diff_item in diff_items {
            let id = diff_item.get("id").cloned().unwrap_or(Value::Null);
            match items
                .iter_mut()
                .find(|existing| existing.get("id") == Some(&id))
            {
                Some(existing) => {
                    if let (Some(target), Some(source)) =
                        (existing.as_object_mut(), diff_item.as_object())
                    {
                        for (key, value) in source {
                            target.insert(key.clone(), value.clone());
                        }
                    }
                }
                None => items.push(diff_item.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(contract: &str, name: &str, info: Value) -> EventRow {
        EventRow {
            id: 0,
            block_hash: "0xblock".into(),
            tx_hash: "0xtx".into(),
            index: 0,
            contract: contract.into(),
            event_name: name.into(),
            event_info: info,
            extra_info: json!({}),
            proof: None,
        }
    }

    #[test]
    fn cache_groups_entities_by_contract_and_name() {
        let mut cache = StateCache::new();
        cache.apply_event(&event("0xc1", "Transfer", json!({"id": "t1", "value": 5})));
        cache.apply_event(&event("0xc1", "Transfer", json!({"id": "t2", "value": 7})));
        cache.apply_event(&event("0xc2", "Approval", json!({"id": "a1"})));

        assert_eq!(cache.touched_contracts(), vec!["0xc1", "0xc2"]);
        let state = cache.state_value("0xc1");
        assert_eq!(state["Transfer"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn later_events_overwrite_entity_attributes() {
        let mut cache = StateCache::new();
        cache.apply_event(&event("0xc1", "Transfer", json!({"id": "t1", "value": 5})));
        cache.apply_event(&event("0xc1", "Transfer", json!({"id": "t1", "value": 9})));

        let state = cache.state_value("0xc1");
        let items = state["Transfer"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["value"], 9);
    }

    #[test]
    fn events_without_id_fall_back_to_tx_hash() {
        let mut cache = StateCache::new();
        cache.apply_event(&event("0xc1", "Paused", json!({"flag": true})));
        let state = cache.state_value("0xc1");
        assert_eq!(state["Paused"][0]["id"], "0xtx");
    }

    #[test]
    fn merge_overwrites_matching_ids_and_appends_new() {
        let mut aggregate = json!({"Transfer": [{"id": "t1", "value": 1}]});
        let diff = json!({"Transfer": [
            {"id": "t1", "value": 2},
            {"id": "t2", "value": 3},
        ]});
        merge_state(&mut aggregate, &diff);

        let items = aggregate["Transfer"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["value"], 2);
    }

    #[test]
    fn state_data_round_trips_canonically() {
        let data = StateData {
            meta: StateMeta {
                kind: "diff".into(),
                parent: "abc".into(),
                block: StateBlockRef {
                    cid: "bcid".into(),
                    hash: "0xb".into(),
                    number: 7,
                },
            },
            state: json!({"Transfer": [{"id": "t1"}]}),
        };
        let bytes = data.to_canonical_bytes();
        let parsed = StateData::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, data);
        assert_eq!(parsed.to_canonical_bytes(), bytes);
    }
}
