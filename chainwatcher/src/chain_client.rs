// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Uniform view over the upstream JSON-RPC chain client.
//!
//! Hash-keyed reads (block by hash, header RLP, storage at a block hash) are
//! idempotent and flow through [`RpcCache`]. Number-keyed reads and receipts
//! go upstream every time, since their answers can change across reorgs.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Block, BlockId, Filter, TxHash, H256, U64};
use ethers::utils::rlp::RlpStream;
use tracing::debug;

use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::rpc_cache::RpcCache;
use crate::types::{BlockHeader, FullBlock, LogEntry, StorageSlot};

/// Capability interface over the upstream chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_by_hash(&self, hash: &str) -> WatcherResult<Option<BlockHeader>>;

    async fn block_by_number(&self, number: u64) -> WatcherResult<Option<BlockHeader>>;

    /// Header plus its byte-exact RLP encoding, used as CID input.
    async fn full_block(&self, hash: &str) -> WatcherResult<Option<FullBlock>>;

    /// Logs for one block, filtered by emitting address.
    async fn logs(&self, block_number: u64, addresses: &[String]) -> WatcherResult<Vec<LogEntry>>;

    /// Storage slot value at a given block, with an opaque proof when the
    /// adapter supports one.
    async fn storage_at(
        &self,
        block_hash: &str,
        contract: &str,
        slot: &str,
    ) -> WatcherResult<StorageSlot>;

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> WatcherResult<Option<serde_json::Value>>;

    async fn latest_block_number(&self) -> WatcherResult<u64>;
}

/// Normalize a hex string to lowercase with a `0x` prefix.
pub fn normalize_hex(input: &str) -> String {
    let stripped = input.trim_start_matches("0x").trim_start_matches("0X");
    format!("0x{}", stripped.to_lowercase())
}

/// Left-pad a storage slot to 32 bytes of hex.
pub fn normalize_slot(slot: &str) -> String {
    let stripped = slot.trim_start_matches("0x").trim_start_matches("0X");
    format!("0x{:0>64}", stripped.to_lowercase())
}

/// Upstream errors for blocks past the produced head are an empty result,
/// not a failure.
fn is_future_epoch_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("future epoch")
        || message.contains("block not found")
        || message.contains("unknown block")
        || message.contains("after latest block")
}

/// Byte-exact RLP encoding of a block header, matching the upstream chain's
/// own encoding (pre- and post-EIP-1559 field counts).
pub fn encode_header_rlp(block: &Block<TxHash>) -> Vec<u8> {
    let field_count = if block.base_fee_per_gas.is_some() {
        16
    } else {
        15
    };
    let mut stream = RlpStream::new();
    stream.begin_list(field_count);
    stream.append(&block.parent_hash);
    stream.append(&block.uncles_hash);
    stream.append(&block.author.unwrap_or_default());
    stream.append(&block.state_root);
    stream.append(&block.transactions_root);
    stream.append(&block.receipts_root);
    stream.append(&block.logs_bloom.unwrap_or_default());
    stream.append(&block.difficulty);
    stream.append(&block.number.unwrap_or_default());
    stream.append(&block.gas_limit);
    stream.append(&block.gas_used);
    stream.append(&block.timestamp);
    stream.append(&block.extra_data.to_vec());
    stream.append(&block.mix_hash.unwrap_or_default());
    stream.append(&block.nonce.unwrap_or_default());
    if let Some(base_fee) = block.base_fee_per_gas {
        stream.append(&base_fee);
    }
    stream.out().to_vec()
}

fn to_header(block: &Block<TxHash>) -> WatcherResult<BlockHeader> {
    let hash = block.hash.ok_or_else(|| {
        WatcherError::TransientUpstream("upstream returned a pending block without a hash".into())
    })?;
    Ok(BlockHeader {
        hash: format!("{hash:?}"),
        parent_hash: format!("{:?}", block.parent_hash),
        number: block
            .number
            .ok_or_else(|| {
                WatcherError::TransientUpstream(
                    "upstream returned a pending block without a number".into(),
                )
            })?
            .as_u64(),
        timestamp: block.timestamp.as_u64(),
    })
}

/// [`ChainClient`] implementation over an `ethers` HTTP provider.
pub struct EthChainClient {
    provider: Provider<Http>,
    cache: RpcCache,
    metrics: Arc<WatcherMetrics>,
}

impl EthChainClient {
    pub fn new(
        rpc_url: &str,
        cache_capacity: usize,
        metrics: Arc<WatcherMetrics>,
    ) -> WatcherResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| WatcherError::Config(format!("invalid rpc url {rpc_url}: {e}")))?;
        Ok(Self {
            provider,
            cache: RpcCache::new(cache_capacity),
            metrics,
        })
    }

    async fn fetch_block(&self, id: BlockId) -> WatcherResult<Option<Block<TxHash>>> {
        self.metrics
            .rpc_queries
            .with_label_values(&["eth_getBlock"])
            .inc();
        match self.provider.get_block(id).await {
            Ok(block) => Ok(block),
            Err(e) if is_future_epoch_error(&e.to_string()) => Ok(None),
            Err(e) => Err(WatcherError::TransientUpstream(e.to_string())),
        }
    }

    async fn cached_block_by_hash(&self, hash: &str) -> WatcherResult<Option<Block<TxHash>>> {
        let hash = normalize_hex(hash);
        let key = RpcCache::key("eth_getBlockByHash", &[&hash]);
        if let Some(value) = self.cache.get(&key).await {
            self.metrics.rpc_cache_hits.inc();
            let block = serde_json::from_value(value)
                .map_err(|e| WatcherError::TransientUpstream(format!("corrupt cache entry: {e}")))?;
            return Ok(Some(block));
        }
        self.metrics.rpc_cache_misses.inc();

        let parsed: H256 = hash
            .parse()
            .map_err(|e| WatcherError::InvariantViolation(format!("bad block hash {hash}: {e}")))?;
        let Some(block) = self.fetch_block(BlockId::Hash(parsed)).await? else {
            return Ok(None);
        };
        let value = serde_json::to_value(&block)
            .map_err(|e| WatcherError::TransientUpstream(e.to_string()))?;
        self.cache.put(key, value).await;
        Ok(Some(block))
    }
}

#[async_trait]
impl ChainClient for EthChainClient {
    async fn block_by_hash(&self, hash: &str) -> WatcherResult<Option<BlockHeader>> {
        match self.cached_block_by_hash(hash).await? {
            Some(block) => Ok(Some(to_header(&block)?)),
            None => Ok(None),
        }
    }

    async fn block_by_number(&self, number: u64) -> WatcherResult<Option<BlockHeader>> {
        let Some(block) = self.fetch_block(BlockId::from(number)).await? else {
            return Ok(None);
        };
        Ok(Some(to_header(&block)?))
    }

    async fn full_block(&self, hash: &str) -> WatcherResult<Option<FullBlock>> {
        let Some(block) = self.cached_block_by_hash(hash).await? else {
            return Ok(None);
        };
        let header = to_header(&block)?;
        let header_rlp = encode_header_rlp(&block);
        Ok(Some(FullBlock { header, header_rlp }))
    }

    async fn logs(&self, block_number: u64, addresses: &[String]) -> WatcherResult<Vec<LogEntry>> {
        let mut parsed_addresses = Vec::with_capacity(addresses.len());
        for address in addresses {
            let address: Address = normalize_hex(address).parse().map_err(|e| {
                WatcherError::InvariantViolation(format!("bad contract address {address}: {e}"))
            })?;
            parsed_addresses.push(address);
        }

        let filter = Filter::new()
            .from_block(U64::from(block_number))
            .to_block(U64::from(block_number))
            .address(parsed_addresses);

        self.metrics
            .rpc_queries
            .with_label_values(&["eth_getLogs"])
            .inc();
        let logs = match self.provider.get_logs(&filter).await {
            Ok(logs) => logs,
            Err(e) if is_future_epoch_error(&e.to_string()) => {
                debug!(block_number, "Logs requested past the upstream head");
                return Ok(vec![]);
            }
            Err(e) => return Err(WatcherError::TransientUpstream(e.to_string())),
        };

        Ok(logs
            .into_iter()
            .map(|log| LogEntry {
                address: format!("{:?}", log.address),
                tx_hash: format!("{:?}", log.transaction_hash.unwrap_or_default()),
                log_index: log.log_index.unwrap_or_default().as_u64(),
                topics: log.topics.iter().map(|t| format!("{t:?}")).collect(),
                data: log.data.to_vec(),
            })
            .collect())
    }

    async fn storage_at(
        &self,
        block_hash: &str,
        contract: &str,
        slot: &str,
    ) -> WatcherResult<StorageSlot> {
        let block_hash = normalize_hex(block_hash);
        let contract = normalize_hex(contract);
        let slot = normalize_slot(slot);

        let key = RpcCache::key("eth_getStorageAt", &[&block_hash, &contract, &slot]);
        if let Some(cached) = self.cache.get(&key).await {
            self.metrics.rpc_cache_hits.inc();
            let (value, proof): (String, Option<serde_json::Value>) =
                serde_json::from_value(cached).map_err(|e| {
                    WatcherError::TransientUpstream(format!("corrupt cache entry: {e}"))
                })?;
            return Ok(StorageSlot { value, proof });
        }
        self.metrics.rpc_cache_misses.inc();

        let address: Address = contract.parse().map_err(|e| {
            WatcherError::InvariantViolation(format!("bad contract address {contract}: {e}"))
        })?;
        let slot_word: H256 = slot
            .parse()
            .map_err(|e| WatcherError::InvariantViolation(format!("bad storage slot {slot}: {e}")))?;
        let block: H256 = block_hash.parse().map_err(|e| {
            WatcherError::InvariantViolation(format!("bad block hash {block_hash}: {e}"))
        })?;

        self.metrics
            .rpc_queries
            .with_label_values(&["eth_getStorageAt"])
            .inc();
        let value = self
            .provider
            .get_storage_at(address, slot_word, Some(BlockId::Hash(block)))
            .await
            .map_err(|e| WatcherError::TransientUpstream(e.to_string()))?;

        // Proofs are best-effort: not every upstream serves eth_getProof.
        let proof = match self
            .provider
            .get_proof(address, vec![slot_word], Some(BlockId::Hash(block)))
            .await
        {
            Ok(proof) => serde_json::to_value(proof).ok(),
            Err(e) => {
                debug!(error = %e, "eth_getProof unavailable, storing storage value without proof");
                None
            }
        };

        let result = StorageSlot {
            value: format!("{value:?}"),
            proof,
        };
        if let Ok(cached) = serde_json::to_value((&result.value, &result.proof)) {
            self.cache.put(key, cached).await;
        }
        Ok(result)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> WatcherResult<Option<serde_json::Value>> {
        let parsed: H256 = normalize_hex(tx_hash).parse().map_err(|e| {
            WatcherError::InvariantViolation(format!("bad transaction hash {tx_hash}: {e}"))
        })?;
        self.metrics
            .rpc_queries
            .with_label_values(&["eth_getTransactionReceipt"])
            .inc();
        let receipt = self
            .provider
            .get_transaction_receipt(parsed)
            .await
            .map_err(|e| WatcherError::TransientUpstream(e.to_string()))?;
        match receipt {
            Some(receipt) => Ok(Some(
                serde_json::to_value(receipt)
                    .map_err(|e| WatcherError::TransientUpstream(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn latest_block_number(&self) -> WatcherResult<u64> {
        self.metrics
            .rpc_queries
            .with_label_values(&["eth_blockNumber"])
            .inc();
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| WatcherError::TransientUpstream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_hex_lowercases_and_prefixes() {
        assert_eq!(normalize_hex("0xABCdef"), "0xabcdef");
        assert_eq!(normalize_hex("ABCdef"), "0xabcdef");
    }

    #[test]
    fn normalize_slot_left_pads_to_32_bytes() {
        let slot = normalize_slot("0x1");
        assert_eq!(slot.len(), 66);
        assert!(slot.ends_with('1'));
        assert!(slot.starts_with("0x0000"));

        let full = normalize_slot(&format!("0x{}", "a".repeat(64)));
        assert_eq!(full, format!("0x{}", "a".repeat(64)));
    }

    #[test]
    fn future_epoch_errors_are_recognized() {
        assert!(is_future_epoch_error("requested epoch is a future epoch"));
        assert!(is_future_epoch_error("header for Unknown Block"));
        assert!(!is_future_epoch_error("connection refused"));
    }

    #[test]
    fn header_rlp_grows_with_base_fee() {
        let mut block: Block<TxHash> = Block::default();
        block.hash = Some(H256::zero());
        block.number = Some(U64::from(100u64));

        let legacy = encode_header_rlp(&block);
        block.base_fee_per_gas = Some(1_000_000_000u64.into());
        let london = encode_header_rlp(&block);

        assert_ne!(legacy, london);
        assert!(london.len() > legacy.len());
    }

    #[test]
    fn header_rlp_is_deterministic() {
        let mut block: Block<TxHash> = Block::default();
        block.number = Some(U64::from(7u64));
        assert_eq!(encode_header_rlp(&block), encode_header_rlp(&block));
    }
}
