use chrono::SubsecRound;

use crate::crypto::sha256_hex;
use crate::error::LedgerError;

use super::chain::{Block, GENESIS_PREVIOUS_HASH};
use super::merkle::compute_merkle_root;

/// Check that `block` directly extends `previous` (or starts the chain when `previous` is `None`).
pub fn validate_link(previous: Option<&Block>, block: &Block) -> Result<(), LedgerError> {
    match previous {
        None => {
            if block.index != 0 {
                return Err(LedgerError::InvalidBlockLinkage(format!(
                    "Chain is empty; expected index 0, but got {}.",
                    block.index
                )));
            }
            if block.previous_hash != GENESIS_PREVIOUS_HASH {
                return Err(LedgerError::InvalidBlockLinkage(format!(
                    "Genesis block must reference {}, but references {}.",
                    GENESIS_PREVIOUS_HASH, block.previous_hash
                )));
            }
        }
        Some(last) => {
            if block.index != last.index + 1 {
                return Err(LedgerError::InvalidBlockLinkage(format!(
                    "Invalid block index. Expected {}, but got {}.",
                    last.index + 1,
                    block.index
                )));
            }
            if block.previous_hash != last.block_hash {
                return Err(LedgerError::InvalidBlockLinkage(format!(
                    "Invalid previous block hash at index {}. Expected {}, but got {}.",
                    block.index, last.block_hash, block.previous_hash
                )));
            }
        }
    }
    Ok(())
}

/// Check that the stored pre-image matches the block's fields and digests to its hash.
pub fn verify_block_hash(block: &Block) -> Result<(), LedgerError> {
    // The pre-image only carries milliseconds, so finer precision would escape the hash.
    if block.timestamp != block.timestamp.trunc_subsecs(3) {
        return Err(LedgerError::BlockHashMismatch(format!(
            "Block {} timestamp {} is more precise than its hashed form.",
            block.index,
            block.timestamp.to_rfc3339()
        )));
    }
    let recomputed = block.recompute();
    if recomputed.preimage != block.block_hash_input {
        return Err(LedgerError::BlockHashMismatch(format!(
            "Block {} pre-image does not match its fields. Expected {}, but got {}.",
            block.index, recomputed.preimage, block.block_hash_input
        )));
    }
    let digest = sha256_hex(&block.block_hash_input);
    if digest != block.block_hash {
        return Err(LedgerError::BlockHashMismatch(format!(
            "Block {} hash mismatch. Expected {}, but got {}.",
            block.index, digest, block.block_hash
        )));
    }
    Ok(())
}

/// Check the block's count and Merkle root against its member transaction ids, in sealing order.
pub fn verify_block_contents<S: AsRef<str>>(block: &Block, tx_ids: &[S]) -> Result<(), LedgerError> {
    if block.transaction_count == 0 {
        return Err(LedgerError::InvalidBlock(format!(
            "Block {} contains no transactions.",
            block.index
        )));
    }
    if block.transaction_count != tx_ids.len() as u64 {
        return Err(LedgerError::InvalidBlock(format!(
            "Block {} declares {} transactions, but {} reference it.",
            block.index,
            block.transaction_count,
            tx_ids.len()
        )));
    }
    let expected = compute_merkle_root(tx_ids);
    if expected != block.merkle_root {
        return Err(LedgerError::InvalidMerkleRoot(format!(
            "Merkle root mismatch at block {}. Expected {}, but got {}.",
            block.index, expected, block.merkle_root
        )));
    }
    Ok(())
}

/// Full acceptance check for a block being appended after `previous`.
pub fn validate_block<S: AsRef<str>>(
    previous: Option<&Block>,
    block: &Block,
    tx_ids: &[S],
) -> Result<(), LedgerError> {
    validate_link(previous, block)?;
    verify_block_hash(block)?;
    verify_block_contents(block, tx_ids)
}

/// Linkage and hash checks over a whole chain ordered by index.
pub fn validate_chain(blocks: &[Block]) -> Result<(), LedgerError> {
    let mut previous = None;
    for block in blocks {
        validate_link(previous, block)?;
        verify_block_hash(block)?;
        previous = Some(block);
    }
    Ok(())
}
