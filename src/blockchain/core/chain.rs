use crate::crypto::{iso_timestamp, now_millis, sha256_hex, sign_block};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::merkle::compute_merkle_root;

/// `previous_hash` of the block at index 0.
pub const GENESIS_PREVIOUS_HASH: &str = "0000000000000000";

/// The five fields a block hash commits to.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHashInput<'a> {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub merkle_root: &'a str,
    pub previous_hash: &'a str,
    pub transaction_count: u64,
}

/// A block hash together with the exact string it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDigest {
    pub hash: String,
    pub preimage: String,
}

/// Hash of `index + timestamp + merkle_root + previous_hash + transaction_count`,
/// concatenated without separators. The timestamp is ISO-8601 with milliseconds.
pub fn compute_block_hash(input: &BlockHashInput<'_>) -> BlockDigest {
    let preimage = format!(
        "{}{}{}{}{}",
        input.index,
        iso_timestamp(&input.timestamp),
        input.merkle_root,
        input.previous_hash,
        input.transaction_count
    );
    BlockDigest {
        hash: sha256_hex(&preimage),
        preimage,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub merkle_root: String,
    pub previous_hash: String,
    pub block_hash: String,
    /// Exact pre-image of `block_hash`, kept so anyone can re-verify it.
    pub block_hash_input: String,
    pub validator_signature: Option<String>,
    pub transaction_count: u64,
}

impl Block {
    /// Build the next block over `tx_ids`, chained onto `previous` (or the genesis sentinel).
    pub fn seal<S: AsRef<str>>(previous: Option<&Block>, tx_ids: &[S], validator_id: &str) -> Self {
        let (index, previous_hash) = match previous {
            Some(last) => (last.index + 1, last.block_hash.clone()),
            None => (0, GENESIS_PREVIOUS_HASH.to_string()),
        };
        let timestamp = now_millis();
        let merkle_root = compute_merkle_root(tx_ids);
        let transaction_count = tx_ids.len() as u64;

        let digest = compute_block_hash(&BlockHashInput {
            index,
            timestamp,
            merkle_root: &merkle_root,
            previous_hash: &previous_hash,
            transaction_count,
        });
        let validator_signature = Some(sign_block(&digest.hash, validator_id));

        Block {
            id: uuid::Uuid::new_v4().to_string(),
            index,
            timestamp,
            merkle_root,
            previous_hash,
            block_hash: digest.hash,
            block_hash_input: digest.preimage,
            validator_signature,
            transaction_count,
        }
    }

    pub fn hash_input(&self) -> BlockHashInput<'_> {
        BlockHashInput {
            index: self.index,
            timestamp: self.timestamp,
            merkle_root: &self.merkle_root,
            previous_hash: &self.previous_hash,
            transaction_count: self.transaction_count,
        }
    }

    /// Recompute the digest from the stored fields.
    pub fn recompute(&self) -> BlockDigest {
        compute_block_hash(&self.hash_input())
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}
