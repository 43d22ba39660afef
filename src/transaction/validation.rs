/// Validation logic for transactions separated from type definitions
use chrono::SubsecRound;

use crate::error::LedgerError;
use crate::transaction::types::{ApprovalEvent, Transaction};

fn validate_credits(credits: f64) -> Result<(), LedgerError> {
    if !credits.is_finite() || credits <= 0.0 {
        return Err(LedgerError::InvalidTransaction(format!(
            "Credit amount must be a positive number, got {}",
            credits
        )));
    }
    Ok(())
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

impl ApprovalEvent {
    /// Reject approvals that cannot produce a meaningful issuance.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.project_id.trim().is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "Project id is required".to_string(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "Recipient user id is required".to_string(),
            ));
        }
        validate_credits(self.credit_amount)
    }
}

impl Transaction {
    /// Structural checks applied to stored and imported transactions.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !is_sha256_hex(&self.tx_id) {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction id {} is not a SHA-256 hex digest",
                self.tx_id
            )));
        }
        if !is_sha256_hex(&self.proof_hash) {
            return Err(LedgerError::InvalidTransaction(format!(
                "Proof hash of {} is not a SHA-256 hex digest",
                self.tx_id
            )));
        }
        if self.project_id.trim().is_empty() || self.to.trim().is_empty() {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction {} is missing its project or recipient",
                self.tx_id
            )));
        }
        if self.timestamp != self.timestamp.trunc_subsecs(3) {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction {} timestamp has sub-millisecond precision",
                self.tx_id
            )));
        }
        validate_credits(self.credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_credits() {
        for credits in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let event = ApprovalEvent::new("p", "u", credits);
            assert!(event.validate().is_err(), "accepted {}", credits);
        }
    }

    #[test]
    fn test_rejects_missing_ids() {
        assert!(ApprovalEvent::new("", "u", 1.0).validate().is_err());
        assert!(ApprovalEvent::new("p", "  ", 1.0).validate().is_err());
        assert!(ApprovalEvent::new("p", "u", 0.5).validate().is_ok());
    }

    #[test]
    fn test_rejects_malformed_tx_id() {
        let mut tx = Transaction::from_approval(&ApprovalEvent::new("p", "u", 3.0)).unwrap();
        assert!(tx.validate().is_ok());
        tx.tx_id = "not-a-digest".to_string();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_rejects_sub_millisecond_timestamp() {
        let mut tx = Transaction::from_approval(&ApprovalEvent::new("p", "u", 3.0)).unwrap();
        tx.timestamp = tx.timestamp + chrono::Duration::nanoseconds(1);
        assert!(matches!(tx.validate(), Err(LedgerError::InvalidTransaction(_))));
    }
}
