// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Error type for watcher operations.
///
/// Expected-missing entities (a block not yet indexed, a contract we do not
/// watch) are `Ok(None)` at the call site, never an error variant.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatcherError {
    /// Upstream RPC fault that is worth retrying: timeout, connection reset,
    /// rate limit. Future-epoch responses are normalized away before this.
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// Storage fault (connection, serialization, constraint).
    #[error("storage error: {0}")]
    Storage(String),

    /// A state or ordering invariant does not hold. Fatal: the worker loop
    /// logs the offending identifiers and the process exits non-zero.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Control-flow signal: the incoming block does not extend the local
    /// chain. Handled by the reorg handler, never surfaced to the operator.
    #[error("reorg detected at block {number} ({hash})")]
    ReorgDetected { hash: String, number: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl WatcherError {
    /// Whether the worker loop should retry the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WatcherError::TransientUpstream(_) | WatcherError::Storage(_)
        )
    }

    /// Short identifier used as a metrics label.
    pub fn error_type(&self) -> &'static str {
        match self {
            WatcherError::TransientUpstream(_) => "transient_upstream",
            WatcherError::Storage(_) => "storage",
            WatcherError::InvariantViolation(_) => "invariant_violation",
            WatcherError::ReorgDetected { .. } => "reorg_detected",
            WatcherError::Config(_) => "config",
        }
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;

impl From<diesel::result::Error> for WatcherError {
    fn from(e: diesel::result::Error) -> Self {
        WatcherError::Storage(e.to_string())
    }
}

impl From<anyhow::Error> for WatcherError {
    fn from(e: anyhow::Error) -> Self {
        WatcherError::Storage(format!("{e:#}"))
    }
}
