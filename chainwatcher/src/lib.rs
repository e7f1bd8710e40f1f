// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod abi_oracle;
pub mod chain_client;
pub mod config;
pub mod cursors;
pub mod error;
pub mod indexer;
pub mod job_queue;
pub mod metrics;
pub mod node;
pub mod operator;
pub mod processor;
pub mod reorg;
pub mod rpc_cache;
pub mod state;
pub mod state_sink;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod test_utils;

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 30, 60, 120, 120 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::error::{WatcherError, WatcherResult};

    async fn flaky(calls: &AtomicU32, succeed_after: u32) -> WatcherResult<u32> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= succeed_after {
            Ok(n)
        } else {
            Err(WatcherError::TransientUpstream("try again".into()))
        }
    }

    #[tokio::test]
    async fn retry_macro_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result =
            retry_with_max_elapsed_time!(flaky(&calls, 3), Duration::from_secs(30)).unwrap();
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
