/// Transaction types for the blue carbon ledger
use crate::crypto::{new_proof_hash, new_transaction_id, now_millis};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender tag of every credit issuance.
pub const SYSTEM_SENDER: &str = "system";

/// A verifier's approval of a restoration project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEvent {
    pub project_id: String,
    pub user_id: String,
    pub credit_amount: f64,
    #[serde(default)]
    pub proof_reference: Option<String>,
    #[serde(default)]
    pub verifier_id: Option<String>,
}

impl ApprovalEvent {
    pub fn new(project_id: impl Into<String>, user_id: impl Into<String>, credit_amount: f64) -> Self {
        ApprovalEvent {
            project_id: project_id.into(),
            user_id: user_id.into(),
            credit_amount,
            proof_reference: None,
            verifier_id: None,
        }
    }

    pub fn with_proof(mut self, reference: impl Into<String>) -> Self {
        self.proof_reference = Some(reference.into());
        self
    }

    pub fn with_verifier(mut self, verifier_id: impl Into<String>) -> Self {
        self.verifier_id = Some(verifier_id.into());
        self
    }
}

/// A credit issuance recorded on the ledger.
///
/// Everything is fixed at creation except `block_id`, which moves from `None`
/// to the sealing block exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Storage record id.
    pub id: String,
    /// Salted SHA-256 identifier; the Merkle leaf.
    pub tx_id: String,
    pub from: String,
    pub to: String,
    pub credits: f64,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub proof_hash: String,
    pub block_id: Option<String>,
}

impl Transaction {
    /// Build the pending issuance for an approval. Validation runs before any hashing.
    pub fn from_approval(event: &ApprovalEvent) -> Result<Self, LedgerError> {
        event.validate()?;

        let timestamp = now_millis();
        let tx_id = new_transaction_id(
            &event.project_id,
            &event.user_id,
            event.credit_amount,
            &timestamp,
        );
        let proof_hash = new_proof_hash(event.proof_reference.as_deref().unwrap_or(""));

        Ok(Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            tx_id,
            from: SYSTEM_SENDER.to_string(),
            to: event.user_id.clone(),
            credits: event.credit_amount,
            project_id: event.project_id.clone(),
            timestamp,
            proof_hash,
            block_id: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.block_id.is_none()
    }
}
