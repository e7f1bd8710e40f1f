// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Content identifiers for blocks and state records.
//!
//! A CID is the lowercase hex SHA-256 of the record's canonicalized
//! contents. Inputs are length-delimited so field boundaries cannot collide.

use sha2::{Digest, Sha256};

use crate::types::StateKind;

/// Parent sentinel for `init` records.
pub const EMPTY_PARENT_CID: &str = "";

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// CID of a block, computed over its byte-exact header RLP.
pub fn block_cid(header_rlp: &[u8]) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, header_rlp);
    hex::encode(hasher.finalize())
}

/// CID of a state record over `(kind, parentCID, blockCID, contractAddress,
/// canonicalized data)`.
pub fn state_cid(
    kind: StateKind,
    parent_cid: &str,
    block_cid: &str,
    contract_address: &str,
    canonical_data: &[u8],
) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, kind.as_str().as_bytes());
    feed(&mut hasher, parent_cid.as_bytes());
    feed(&mut hasher, block_cid.as_bytes());
    feed(&mut hasher, contract_address.as_bytes());
    feed(&mut hasher, canonical_data);
    hex::encode(hasher.finalize())
}
