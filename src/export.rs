//! Read-side views of the ledger: full exports, verification reports and certificates

use crate::blockchain::Block;
use crate::error::LedgerError;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A block together with its member transactions in sealing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockExport {
    #[serde(flatten)]
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integrity {
    Verified,
    Broken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerExport {
    pub exported_at: DateTime<Utc>,
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub blocks: Vec<BlockExport>,
    pub integrity: Integrity,
}

impl LedgerExport {
    pub fn to_json_pretty(&self) -> Result<String, LedgerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Outcome of re-verifying every stored block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub ok: bool,
    pub blocks_checked: usize,
    pub pending_transactions: usize,
    pub errors: Vec<String>,
}

/// Proof of issuance for a project's credits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCertificate {
    pub certificate_id: String,
    pub project_id: String,
    pub recipient: String,
    pub credits: f64,
    pub transaction_id: String,
    /// `None` while the issuance is still waiting for a block.
    pub block_hash: Option<String>,
    pub block_index: Option<u64>,
    pub issued_at: DateTime<Utc>,
}
