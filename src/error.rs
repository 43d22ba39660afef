//! Error types for the blue carbon ledger

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid block linkage: {0}")]
    InvalidBlockLinkage(String),
    #[error("Invalid Merkle root: {0}")]
    InvalidMerkleRoot(String),
    #[error("Block hash mismatch: {0}")]
    BlockHashMismatch(String),
    #[error("Transaction already assigned: {0}")]
    TransactionAlreadyAssigned(String),
    #[error("Block already exists: {0}")]
    BlockAlreadyExists(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl LedgerError {
    /// True for the errors raised when a block does not extend or reproduce the chain.
    pub fn is_chain_violation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidBlock(_)
                | LedgerError::InvalidBlockLinkage(_)
                | LedgerError::InvalidMerkleRoot(_)
                | LedgerError::BlockHashMismatch(_)
        )
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LedgerError>;
