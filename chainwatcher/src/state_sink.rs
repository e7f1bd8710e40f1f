// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Optional push endpoint for content-addressed state blobs.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{WatcherError, WatcherResult};

/// Sink for materialized state records. Implementations must be idempotent
/// under repeated submission of the same CID.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn push(&self, cid: &str, data: &[u8]) -> WatcherResult<()>;
}

/// HTTP sink: PUTs each blob under its CID.
pub struct HttpStateSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpStateSink {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StateSink for HttpStateSink {
    async fn push(&self, cid: &str, data: &[u8]) -> WatcherResult<()> {
        let url = format!("{}/{}", self.endpoint, cid);
        let response = self
            .client
            .put(&url)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| WatcherError::TransientUpstream(format!("state sink push: {e}")))?;
        if !response.status().is_success() {
            return Err(WatcherError::TransientUpstream(format!(
                "state sink push for {cid}: HTTP {}",
                response.status()
            )));
        }
        debug!("Pushed state record {cid} to sink");
        Ok(())
    }
}
