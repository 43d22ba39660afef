//! Storage layer for the ledger: an in-memory backend and a SQLite database

use crate::blockchain::Block;
use crate::config::{StorageBackend, StorageConfig};
use crate::crypto::{iso_timestamp, parse_iso_timestamp};
use crate::error::LedgerError;
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Abstraction for persistence backends.
///
/// Both tables are append-only. The one permitted mutation, assigning a
/// transaction to a block, happens only inside [`Persistence::commit_block`],
/// which must insert the block and assign its members as one atomic unit.
pub trait Persistence: Send + Sync {
    fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError>;

    /// Every transaction in insertion order.
    fn all_transactions(&self) -> Result<Vec<Transaction>, LedgerError>;

    /// Every block ordered by index ascending.
    fn all_blocks(&self) -> Result<Vec<Block>, LedgerError>;

    /// Insert `block` and assign the transactions with record ids `members` to it.
    ///
    /// Fails without writing anything if the block collides with a stored one or
    /// any member is missing or already assigned.
    fn commit_block(&self, block: &Block, members: &[String]) -> Result<(), LedgerError>;

    /// Insert an externally produced block together with its transactions.
    fn import_block(&self, block: &Block, transactions: &[Transaction]) -> Result<(), LedgerError>;

    /// Unassigned transactions in insertion order.
    fn pending_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .all_transactions()?
            .into_iter()
            .filter(|tx| tx.is_pending())
            .collect())
    }

    fn transaction_by_tx_id(&self, tx_id: &str) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.all_transactions()?.into_iter().find(|tx| tx.tx_id == tx_id))
    }

    /// Members of a block in sealing order.
    fn transactions_by_block(&self, block_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .all_transactions()?
            .into_iter()
            .filter(|tx| tx.block_id.as_deref() == Some(block_id))
            .collect())
    }

    fn transactions_for_recipient(&self, user_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .all_transactions()?
            .into_iter()
            .filter(|tx| tx.to == user_id)
            .collect())
    }

    fn transactions_for_project(&self, project_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .all_transactions()?
            .into_iter()
            .filter(|tx| tx.project_id == project_id)
            .collect())
    }

    fn last_block(&self) -> Result<Option<Block>, LedgerError> {
        Ok(self.all_blocks()?.pop())
    }

    fn block_by_id(&self, id: &str) -> Result<Option<Block>, LedgerError> {
        Ok(self.all_blocks()?.into_iter().find(|b| b.id == id))
    }

    fn block_by_index(&self, index: u64) -> Result<Option<Block>, LedgerError> {
        Ok(self.all_blocks()?.into_iter().find(|b| b.index == index))
    }

    fn block_by_hash(&self, block_hash: &str) -> Result<Option<Block>, LedgerError> {
        Ok(self.all_blocks()?.into_iter().find(|b| b.block_hash == block_hash))
    }
}

/// Pick the backend named in the configuration. Called once at process start.
pub fn open_persistence(config: &StorageConfig) -> Result<Box<dyn Persistence>, LedgerError> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory ledger storage");
            Ok(Box::new(InMemoryPersistence::new()))
        }
        StorageBackend::Sqlite => match Database::open(&config.path) {
            Ok(db) => {
                info!("Using SQLite ledger storage at {}", config.path);
                Ok(Box::new(db))
            }
            Err(e) if config.fallback_to_memory => {
                warn!(
                    "Failed to open DB at {}: {}. Falling back to in-memory storage.",
                    config.path, e
                );
                Ok(Box::new(InMemoryPersistence::new()))
            }
            Err(e) => Err(e),
        },
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    parse_iso_timestamp(raw).ok_or(rusqlite::Error::InvalidQuery)
}

const TRANSACTION_COLUMNS: &str =
    "id, tx_id, sender, receiver, credits, project_id, timestamp, proof_hash, block_id";

const BLOCK_COLUMNS: &str = "id, idx, timestamp, merkle_root, previous_hash, block_hash, \
     block_hash_input, validator_signature, transaction_count";

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let timestamp: String = row.get(6)?;
    Ok(Transaction {
        id: row.get(0)?,
        tx_id: row.get(1)?,
        from: row.get(2)?,
        to: row.get(3)?,
        credits: row.get(4)?,
        project_id: row.get(5)?,
        timestamp: parse_timestamp(&timestamp)?,
        proof_hash: row.get(7)?,
        block_id: row.get(8)?,
    })
}

fn row_to_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    let index: i64 = row.get(1)?;
    let timestamp: String = row.get(2)?;
    let transaction_count: i64 = row.get(8)?;
    Ok(Block {
        id: row.get(0)?,
        index: index as u64,
        timestamp: parse_timestamp(&timestamp)?,
        merkle_root: row.get(3)?,
        previous_hash: row.get(4)?,
        block_hash: row.get(5)?,
        block_hash_input: row.get(6)?,
        validator_signature: row.get(7)?,
        transaction_count: transaction_count as u64,
    })
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the ledger database. `":memory:"` gives a private in-process database.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to enable foreign keys: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                id TEXT PRIMARY KEY,
                idx INTEGER NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                merkle_root TEXT NOT NULL,
                previous_hash TEXT NOT NULL UNIQUE,
                block_hash TEXT NOT NULL UNIQUE,
                block_hash_input TEXT NOT NULL,
                validator_signature TEXT,
                transaction_count INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| LedgerError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                tx_id TEXT NOT NULL UNIQUE,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                credits REAL NOT NULL,
                project_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                proof_hash TEXT NOT NULL,
                block_id TEXT REFERENCES blocks(id)
            )",
            [],
        )
        .map_err(|e| {
            LedgerError::DatabaseError(format!("Failed to create transactions table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn query_transactions(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Transaction>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM transactions {} ORDER BY rowid ASC",
            TRANSACTION_COLUMNS, filter
        );
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(args, row_to_transaction)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to query transactions: {}", e)))?;

        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(row.map_err(|e| {
                LedgerError::DatabaseError(format!("Failed to load transaction: {}", e))
            })?);
        }
        Ok(transactions)
    }

    fn query_block(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<Block>, LedgerError> {
        let sql = format!("SELECT {} FROM blocks {}", BLOCK_COLUMNS, filter);
        let conn = self.conn.lock();
        conn.query_row(&sql, args, row_to_block)
            .optional()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to load block: {}", e)))
    }

    fn insert_block_row(conn: &Connection, block: &Block) -> Result<(), LedgerError> {
        conn.execute(
            "INSERT INTO blocks (id, idx, timestamp, merkle_root, previous_hash, block_hash,
                                 block_hash_input, validator_signature, transaction_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                block.id,
                block.index as i64,
                iso_timestamp(&block.timestamp),
                block.merkle_root,
                block.previous_hash,
                block.block_hash,
                block.block_hash_input,
                block.validator_signature,
                block.transaction_count as i64,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                LedgerError::BlockAlreadyExists(format!(
                    "Block {} collides with a stored block: {}",
                    block.index, e
                ))
            } else {
                LedgerError::DatabaseError(format!("Failed to save block: {}", e))
            }
        })?;
        Ok(())
    }

    fn insert_transaction_row(conn: &Connection, tx: &Transaction) -> Result<(), LedgerError> {
        conn.execute(
            "INSERT INTO transactions (id, tx_id, sender, receiver, credits, project_id,
                                       timestamp, proof_hash, block_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                tx.id,
                tx.tx_id,
                tx.from,
                tx.to,
                tx.credits,
                tx.project_id,
                iso_timestamp(&tx.timestamp),
                tx.proof_hash,
                tx.block_id,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                LedgerError::InvalidTransaction(format!(
                    "Transaction {} is already recorded: {}",
                    tx.tx_id, e
                ))
            } else {
                LedgerError::DatabaseError(format!("Failed to save transaction: {}", e))
            }
        })?;
        Ok(())
    }
}

impl Persistence for Database {
    fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        Database::insert_transaction_row(&conn, tx)
    }

    fn all_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.query_transactions("", &[])
    }

    fn all_blocks(&self) -> Result<Vec<Block>, LedgerError> {
        let sql = format!("SELECT {} FROM blocks ORDER BY idx ASC", BLOCK_COLUMNS);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], row_to_block)
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(
                row.map_err(|e| LedgerError::DatabaseError(format!("Failed to load block: {}", e)))?,
            );
        }
        Ok(blocks)
    }

    fn commit_block(&self, block: &Block, members: &[String]) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to start transaction: {}", e)))?;

        Database::insert_block_row(&tx, block)?;

        for member in members {
            let updated = tx
                .execute(
                    "UPDATE transactions SET block_id = ?1 WHERE id = ?2 AND block_id IS NULL",
                    params![block.id, member],
                )
                .map_err(|e| {
                    LedgerError::DatabaseError(format!("Failed to assign transaction: {}", e))
                })?;
            if updated != 1 {
                // Dropping `tx` rolls back the block insert as well.
                return Err(LedgerError::TransactionAlreadyAssigned(format!(
                    "Transaction record {} is missing or already belongs to a block",
                    member
                )));
            }
        }

        tx.commit()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn import_block(&self, block: &Block, transactions: &[Transaction]) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to start transaction: {}", e)))?;

        Database::insert_block_row(&tx, block)?;
        for record in transactions {
            let mut record = record.clone();
            record.block_id = Some(block.id.clone());
            Database::insert_transaction_row(&tx, &record)?;
        }

        tx.commit()
            .map_err(|e| LedgerError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn pending_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.query_transactions("WHERE block_id IS NULL", &[])
    }

    fn transaction_by_tx_id(&self, tx_id: &str) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .query_transactions("WHERE tx_id = ?1", &[&tx_id])?
            .into_iter()
            .next())
    }

    fn transactions_by_block(&self, block_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        self.query_transactions("WHERE block_id = ?1", &[&block_id])
    }

    fn transactions_for_recipient(&self, user_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        self.query_transactions("WHERE receiver = ?1", &[&user_id])
    }

    fn transactions_for_project(&self, project_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        self.query_transactions("WHERE project_id = ?1", &[&project_id])
    }

    fn last_block(&self) -> Result<Option<Block>, LedgerError> {
        self.query_block("ORDER BY idx DESC LIMIT 1", &[])
    }

    fn block_by_id(&self, id: &str) -> Result<Option<Block>, LedgerError> {
        self.query_block("WHERE id = ?1", &[&id])
    }

    fn block_by_index(&self, index: u64) -> Result<Option<Block>, LedgerError> {
        let index = index as i64;
        self.query_block("WHERE idx = ?1", &[&index])
    }

    fn block_by_hash(&self, block_hash: &str) -> Result<Option<Block>, LedgerError> {
        self.query_block("WHERE block_hash = ?1", &[&block_hash])
    }
}

#[derive(Debug, Default)]
struct MemoryLedger {
    transactions: Vec<Transaction>,
    blocks: Vec<Block>,
}

impl MemoryLedger {
    fn check_new_block(&self, block: &Block) -> Result<(), LedgerError> {
        let collision = self.blocks.iter().find(|b| {
            b.id == block.id
                || b.index == block.index
                || b.block_hash == block.block_hash
                || b.previous_hash == block.previous_hash
        });
        match collision {
            Some(existing) => Err(LedgerError::BlockAlreadyExists(format!(
                "Block {} collides with stored block {}",
                block.index, existing.index
            ))),
            None => Ok(()),
        }
    }

    fn check_new_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        if self
            .transactions
            .iter()
            .any(|t| t.id == tx.id || t.tx_id == tx.tx_id)
        {
            return Err(LedgerError::InvalidTransaction(format!(
                "Transaction {} is already recorded",
                tx.tx_id
            )));
        }
        Ok(())
    }

    fn push_block(&mut self, block: &Block) {
        self.blocks.push(block.clone());
        self.blocks.sort_by_key(|b| b.index);
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
///
/// Clones share the same underlying collections.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    inner: Arc<RwLock<MemoryLedger>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut ledger = self.inner.write();
        ledger.check_new_transaction(tx)?;
        ledger.transactions.push(tx.clone());
        Ok(())
    }

    fn all_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.inner.read().transactions.clone())
    }

    fn all_blocks(&self) -> Result<Vec<Block>, LedgerError> {
        Ok(self.inner.read().blocks.clone())
    }

    fn commit_block(&self, block: &Block, members: &[String]) -> Result<(), LedgerError> {
        let mut ledger = self.inner.write();
        ledger.check_new_block(block)?;

        let mut positions = Vec::with_capacity(members.len());
        for member in members {
            match ledger.transactions.iter().position(|t| &t.id == member) {
                Some(pos) if ledger.transactions[pos].is_pending() => positions.push(pos),
                _ => {
                    return Err(LedgerError::TransactionAlreadyAssigned(format!(
                        "Transaction record {} is missing or already belongs to a block",
                        member
                    )))
                }
            }
        }

        ledger.push_block(block);
        for pos in positions {
            ledger.transactions[pos].block_id = Some(block.id.clone());
        }
        Ok(())
    }

    fn import_block(&self, block: &Block, transactions: &[Transaction]) -> Result<(), LedgerError> {
        let mut ledger = self.inner.write();
        ledger.check_new_block(block)?;
        for (i, tx) in transactions.iter().enumerate() {
            ledger.check_new_transaction(tx)?;
            if transactions[..i]
                .iter()
                .any(|t| t.id == tx.id || t.tx_id == tx.tx_id)
            {
                return Err(LedgerError::InvalidTransaction(format!(
                    "Transaction {} appears twice in block {}",
                    tx.tx_id, block.index
                )));
            }
        }

        ledger.push_block(block);
        for tx in transactions {
            let mut record = tx.clone();
            record.block_id = Some(block.id.clone());
            ledger.transactions.push(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::ApprovalEvent;

    fn pending_tx(project: &str) -> Transaction {
        Transaction::from_approval(&ApprovalEvent::new(project, "alice", 12.5)).unwrap()
    }

    fn backends() -> Vec<Box<dyn Persistence>> {
        vec![
            Box::new(InMemoryPersistence::new()),
            Box::new(Database::open(":memory:").unwrap()),
        ]
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().is_autocommit());
    }

    #[test]
    fn test_insert_and_reload_transaction() {
        for store in backends() {
            let tx = pending_tx("project-1");
            store.insert_transaction(&tx).unwrap();

            assert_eq!(store.all_transactions().unwrap(), vec![tx.clone()]);
            assert_eq!(store.pending_transactions().unwrap(), vec![tx.clone()]);
            assert_eq!(store.transaction_by_tx_id(&tx.tx_id).unwrap(), Some(tx.clone()));
            assert_eq!(store.transactions_for_recipient("alice").unwrap().len(), 1);
            assert!(store.transactions_for_recipient("bob").unwrap().is_empty());
            assert_eq!(store.transactions_for_project("project-1").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_duplicate_transaction_rejected() {
        for store in backends() {
            let tx = pending_tx("project-1");
            store.insert_transaction(&tx).unwrap();
            let err = store.insert_transaction(&tx).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidTransaction(_)));
        }
    }

    #[test]
    fn test_commit_block_assigns_members() {
        for store in backends() {
            let a = pending_tx("project-a");
            let b = pending_tx("project-b");
            store.insert_transaction(&a).unwrap();
            store.insert_transaction(&b).unwrap();

            let block = Block::seal(None, &[&a.tx_id, &b.tx_id], "system");
            store
                .commit_block(&block, &[a.id.clone(), b.id.clone()])
                .unwrap();

            assert!(store.pending_transactions().unwrap().is_empty());
            let members = store.transactions_by_block(&block.id).unwrap();
            assert_eq!(members.len(), 2);
            assert_eq!(members[0].tx_id, a.tx_id);
            assert_eq!(members[1].tx_id, b.tx_id);

            assert_eq!(store.last_block().unwrap(), Some(block.clone()));
            assert_eq!(store.block_by_index(0).unwrap(), Some(block.clone()));
            assert_eq!(store.block_by_hash(&block.block_hash).unwrap(), Some(block.clone()));
            assert_eq!(store.block_by_id(&block.id).unwrap(), Some(block.clone()));
            assert_eq!(store.block_by_index(1).unwrap(), None);
        }
    }

    #[test]
    fn test_assignment_is_write_once() {
        for store in backends() {
            let a = pending_tx("project-a");
            store.insert_transaction(&a).unwrap();

            let first = Block::seal(None, &[&a.tx_id], "system");
            store.commit_block(&first, &[a.id.clone()]).unwrap();

            let second = Block::seal(Some(&first), &[&a.tx_id], "system");
            let err = store.commit_block(&second, &[a.id.clone()]).unwrap_err();
            assert!(matches!(err, LedgerError::TransactionAlreadyAssigned(_)));

            // The failed commit leaves neither the block nor a reassignment behind.
            assert_eq!(store.all_blocks().unwrap(), vec![first.clone()]);
            let reloaded = store.transaction_by_tx_id(&a.tx_id).unwrap().unwrap();
            assert_eq!(reloaded.block_id, Some(first.id.clone()));
        }
    }

    #[test]
    fn test_duplicate_index_rejected() {
        for store in backends() {
            let a = pending_tx("project-a");
            let b = pending_tx("project-b");
            store.insert_transaction(&a).unwrap();
            store.insert_transaction(&b).unwrap();

            let first = Block::seal(None, &[&a.tx_id], "system");
            store.commit_block(&first, &[a.id.clone()]).unwrap();

            let rival = Block::seal(None, &[&b.tx_id], "system");
            let err = store.commit_block(&rival, &[b.id.clone()]).unwrap_err();
            assert!(matches!(err, LedgerError::BlockAlreadyExists(_)));
            assert_eq!(store.pending_transactions().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_import_block_stores_members() {
        for store in backends() {
            let a = pending_tx("project-a");
            let block = Block::seal(None, &[&a.tx_id], "system");
            store.import_block(&block, &[a.clone()]).unwrap();

            let members = store.transactions_by_block(&block.id).unwrap();
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].block_id.as_deref(), Some(block.id.as_str()));
            assert!(store.pending_transactions().unwrap().is_empty());
        }
    }

    #[test]
    fn test_factory_selects_backend() {
        let memory = open_persistence(&StorageConfig::default()).unwrap();
        assert!(memory.all_blocks().unwrap().is_empty());

        let sqlite = open_persistence(&StorageConfig {
            backend: StorageBackend::Sqlite,
            path: ":memory:".to_string(),
            fallback_to_memory: false,
        })
        .unwrap();
        assert!(sqlite.all_blocks().unwrap().is_empty());
    }
}
