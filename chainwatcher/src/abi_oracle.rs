// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Log parsing oracle supplied by external code generation.
//!
//! The watcher core never decodes ABI payloads itself. It hands each raw log
//! to the oracle together with the watched contract's kind; unknown kinds
//! return `None` and the log contributes no event.

use serde_json::json;

use crate::types::{LogEntry, ParsedEvent};

pub trait AbiOracle: Send + Sync {
    /// Parse one raw log for a contract of `kind`. `None` skips the log.
    fn parse_log(&self, kind: &str, log: &LogEntry) -> Option<ParsedEvent>;
}

/// Fallback oracle used when no generated bindings are wired in: every log
/// becomes an opaque event keyed by its first topic, with the raw payload
/// carried in `event_info`.
#[derive(Debug, Default)]
pub struct RawLogOracle;

impl AbiOracle for RawLogOracle {
    fn parse_log(&self, _kind: &str, log: &LogEntry) -> Option<ParsedEvent> {
        let event_name = log
            .topics
            .first()
            .cloned()
            .unwrap_or_else(|| "anonymous".to_string());
        Some(ParsedEvent {
            event_name,
            event_info: json!({
                "id": log.address,
                "topics": log.topics,
                "data": format!("0x{}", hex::encode(&log.data)),
            }),
            extra_info: json!({ "logIndex": log.log_index }),
            proof: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(topics: Vec<&str>) -> LogEntry {
        LogEntry {
            address: "0xc0ffee0000000000000000000000000000000000".into(),
            tx_hash: "0xdead".into(),
            log_index: 3,
            topics: topics.into_iter().map(String::from).collect(),
            data: vec![0xab, 0xcd],
        }
    }

    #[test]
    fn raw_oracle_keys_events_by_first_topic() {
        let oracle = RawLogOracle;
        let parsed = oracle.parse_log("erc20", &log(vec!["0xtopic0", "0xtopic1"])).unwrap();
        assert_eq!(parsed.event_name, "0xtopic0");
        assert_eq!(parsed.extra_info["logIndex"], 3);
        assert_eq!(parsed.event_info["data"], "0xabcd");
    }

    #[test]
    fn anonymous_logs_still_parse() {
        let oracle = RawLogOracle;
        let parsed = oracle.parse_log("erc20", &log(vec![])).unwrap();
        assert_eq!(parsed.event_name, "anonymous");
    }
}
