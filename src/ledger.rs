//! The ledger service: turns project approvals into chained blocks
//!
//! Every approval appends one transaction and then seals *all* pending
//! transactions into a single new block. There is no size limit, batching
//! window or minimum batch, so under steady load each approval produces its
//! own one-transaction block.
//!
//! Sealing (read pending, build block, persist, assign) runs under one lock per
//! `Ledger`, so two approvals can never race for the same pending set or the
//! same previous hash. Assignment is derived from the stored `block_id` field
//! alone: if a block write fails, its transactions simply stay pending and the
//! next pass picks them up.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::blockchain::{validate_block, validate_link, verify_block_contents, verify_block_hash, Block};
use crate::config::Config;
use crate::crypto::now_millis;
use crate::error::LedgerError;
use crate::export::{BlockExport, ChainReport, CreditCertificate, Integrity, LedgerExport};
use crate::persistence::{open_persistence, InMemoryPersistence, Persistence};
use crate::transaction::{ApprovalEvent, Transaction};

pub const DEFAULT_VALIDATOR: &str = "system";

/// Result of recording one approval.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    /// The new transaction as stored after sealing.
    pub transaction: Transaction,
    /// The block sealed by this approval.
    pub block: Option<Block>,
}

pub struct Ledger {
    persistence: Box<dyn Persistence>,
    default_validator: String,
    seal_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(persistence: Box<dyn Persistence>) -> Self {
        Self {
            persistence,
            default_validator: DEFAULT_VALIDATOR.to_string(),
            seal_lock: Mutex::new(()),
        }
    }

    /// Create a new `Ledger` using an in-memory persistence backend.
    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryPersistence::new()))
    }

    /// Open the backend selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self, LedgerError> {
        let persistence = open_persistence(&config.storage)?;
        Ok(Self::new(persistence).with_default_validator(&config.ledger.default_validator))
    }

    pub fn with_default_validator(mut self, validator_id: &str) -> Self {
        self.default_validator = validator_id.to_string();
        self
    }

    pub fn default_validator(&self) -> &str {
        &self.default_validator
    }

    /// Record the credit issuance for an approved project and seal everything pending.
    ///
    /// Invalid events are rejected before anything is hashed or stored. If the
    /// block write fails the error is returned, but the new transaction stays
    /// recorded as pending and is sealed by the next pass.
    pub fn record_approval(&self, event: &ApprovalEvent) -> Result<ApprovalOutcome, LedgerError> {
        let transaction = Transaction::from_approval(event)?;
        let validator = event
            .verifier_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(self.default_validator.as_str());

        let _guard = self.seal_lock.lock();
        self.persistence.insert_transaction(&transaction)?;
        debug!(
            "Recorded transaction {} for project {} ({} credits)",
            transaction.tx_id, transaction.project_id, transaction.credits
        );

        let block = self.seal_pending_locked(validator)?;
        let transaction = self
            .persistence
            .transaction_by_tx_id(&transaction.tx_id)?
            .unwrap_or(transaction);

        Ok(ApprovalOutcome { transaction, block })
    }

    /// Seal all pending transactions into one new block, if there are any.
    pub fn seal_pending(&self, validator_id: &str) -> Result<Option<Block>, LedgerError> {
        let _guard = self.seal_lock.lock();
        self.seal_pending_locked(validator_id)
    }

    fn seal_pending_locked(&self, validator_id: &str) -> Result<Option<Block>, LedgerError> {
        let pending = self.persistence.pending_transactions()?;
        if pending.is_empty() {
            return Ok(None);
        }

        let previous = self.persistence.last_block()?;
        let tx_ids: Vec<&str> = pending.iter().map(|tx| tx.tx_id.as_str()).collect();
        let block = Block::seal(previous.as_ref(), &tx_ids, validator_id);
        let members: Vec<String> = pending.iter().map(|tx| tx.id.clone()).collect();

        self.persistence.commit_block(&block, &members)?;
        info!(
            "Sealed block {} ({}) with {} transaction(s)",
            block.index, block.block_hash, block.transaction_count
        );
        Ok(Some(block))
    }

    /// Append an externally produced block after checking it against the current tip.
    ///
    /// Any gap, linkage break, pre-image or digest mismatch, Merkle mismatch or
    /// count mismatch rejects the block. Nothing is stored in that case.
    pub fn import_block(&self, block: Block, transactions: Vec<Transaction>) -> Result<(), LedgerError> {
        let _guard = self.seal_lock.lock();

        for tx in &transactions {
            tx.validate()?;
            if let Some(owner) = &tx.block_id {
                if owner != &block.id {
                    return Err(LedgerError::InvalidBlock(format!(
                        "Transaction {} claims block {}, not {}",
                        tx.tx_id, owner, block.id
                    )));
                }
            }
        }

        let previous = self.persistence.last_block()?;
        let tx_ids: Vec<&str> = transactions.iter().map(|tx| tx.tx_id.as_str()).collect();
        if let Err(e) = validate_block(previous.as_ref(), &block, &tx_ids) {
            warn!("Rejected imported block {}: {}", block.index, e);
            return Err(e);
        }

        self.persistence.import_block(&block, &transactions)?;
        info!(
            "Imported block {} ({}) with {} transaction(s)",
            block.index, block.block_hash, block.transaction_count
        );
        Ok(())
    }

    /// Import every block of an export in order. Stops at the first rejected block.
    pub fn import(&self, export: &LedgerExport) -> Result<usize, LedgerError> {
        for entry in &export.blocks {
            self.import_block(entry.block.clone(), entry.transactions.clone())?;
        }
        Ok(export.blocks.len())
    }

    /// Re-verify every stored block and collect every problem found.
    ///
    /// Runs under the seal lock so blocks and transactions come from the same state.
    pub fn verify_chain(&self) -> Result<ChainReport, LedgerError> {
        let _guard = self.seal_lock.lock();
        let blocks = self.persistence.all_blocks()?;
        let transactions = self.persistence.all_transactions()?;
        Ok(verify_snapshot(&blocks, &transactions))
    }

    /// Every block with its transactions, plus an integrity verdict over that same snapshot.
    pub fn export(&self) -> Result<LedgerExport, LedgerError> {
        let (blocks, transactions) = {
            let _guard = self.seal_lock.lock();
            (
                self.persistence.all_blocks()?,
                self.persistence.all_transactions()?,
            )
        };
        let report = verify_snapshot(&blocks, &transactions);

        let entries = blocks
            .into_iter()
            .map(|block| {
                let members = transactions
                    .iter()
                    .filter(|tx| tx.block_id.as_deref() == Some(block.id.as_str()))
                    .cloned()
                    .collect();
                BlockExport {
                    block,
                    transactions: members,
                }
            })
            .collect::<Vec<_>>();

        Ok(LedgerExport {
            exported_at: now_millis(),
            total_blocks: entries.len(),
            total_transactions: transactions.len(),
            blocks: entries,
            integrity: if report.ok {
                Integrity::Verified
            } else {
                Integrity::Broken
            },
        })
    }

    /// Issuance certificate for a project, or `None` if the project has no transaction.
    pub fn certificate(&self, project_id: &str) -> Result<Option<CreditCertificate>, LedgerError> {
        let Some(tx) = self
            .persistence
            .transactions_for_project(project_id)?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let block = match tx.block_id.as_deref() {
            Some(block_id) => self.persistence.block_by_id(block_id)?,
            None => None,
        };

        Ok(Some(CreditCertificate {
            certificate_id: format!("BC-{}", project_id),
            project_id: project_id.to_string(),
            recipient: tx.to,
            credits: tx.credits,
            transaction_id: tx.tx_id,
            block_hash: block.as_ref().map(|b| b.block_hash.clone()),
            block_index: block.as_ref().map(|b| b.index),
            issued_at: now_millis(),
        }))
    }

    /// All blocks ordered by index ascending.
    pub fn blocks(&self) -> Result<Vec<Block>, LedgerError> {
        self.persistence.all_blocks()
    }

    pub fn last_block(&self) -> Result<Option<Block>, LedgerError> {
        self.persistence.last_block()
    }

    pub fn block_by_index(&self, index: u64) -> Result<Option<Block>, LedgerError> {
        self.persistence.block_by_index(index)
    }

    pub fn block_by_hash(&self, block_hash: &str) -> Result<Option<Block>, LedgerError> {
        self.persistence.block_by_hash(block_hash)
    }

    pub fn block_transactions(&self, block_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        self.persistence.transactions_by_block(block_id)
    }

    pub fn pending_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.persistence.pending_transactions()
    }

    pub fn transaction_by_tx_id(&self, tx_id: &str) -> Result<Option<Transaction>, LedgerError> {
        self.persistence.transaction_by_tx_id(tx_id)
    }

    pub fn transactions_for_recipient(&self, user_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        self.persistence.transactions_for_recipient(user_id)
    }
}

fn verify_snapshot(blocks: &[Block], transactions: &[Transaction]) -> ChainReport {
    let mut errors = Vec::new();

    let mut previous: Option<&Block> = None;
    for block in blocks {
        if let Err(e) = validate_link(previous, block) {
            errors.push(e.to_string());
        }
        if let Err(e) = verify_block_hash(block) {
            errors.push(e.to_string());
        }
        let member_ids: Vec<&str> = transactions
            .iter()
            .filter(|tx| tx.block_id.as_deref() == Some(block.id.as_str()))
            .map(|tx| tx.tx_id.as_str())
            .collect();
        if let Err(e) = verify_block_contents(block, &member_ids) {
            errors.push(e.to_string());
        }
        previous = Some(block);
    }

    let known: HashSet<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
    for tx in transactions {
        if let Some(owner) = tx.block_id.as_deref() {
            if !known.contains(owner) {
                errors.push(format!(
                    "Transaction {} references unknown block {}",
                    tx.tx_id, owner
                ));
            }
        }
    }

    if !errors.is_empty() {
        warn!("Chain verification found {} problem(s)", errors.len());
    }

    ChainReport {
        ok: errors.is_empty(),
        blocks_checked: blocks.len(),
        pending_transactions: transactions.iter().filter(|tx| tx.is_pending()).count(),
        errors,
    }
}
