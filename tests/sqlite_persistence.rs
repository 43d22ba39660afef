//! Integration tests for the SQLite backend and file-based configuration

use std::fs;

use bluecarbon_ledger::blockchain::Block;
use bluecarbon_ledger::config::{load_config, StorageBackend};
use bluecarbon_ledger::crypto::sha256_hex;
use bluecarbon_ledger::export::Integrity;
use bluecarbon_ledger::persistence::{Database, Persistence};
use bluecarbon_ledger::transaction::ApprovalEvent;
use bluecarbon_ledger::{Ledger, LedgerError};
use rusqlite::{params, Connection};
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> String {
    dir.path().join("nested").join("ledger.db").to_string_lossy().into_owned()
}

#[test]
fn test_chain_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);

    let (first_block, tx_id) = {
        let ledger = Ledger::new(Box::new(Database::open(&path)?));
        let outcome = ledger.record_approval(&ApprovalEvent::new("mangrove-1", "alice", 25.0))?;
        ledger.record_approval(&ApprovalEvent::new("seagrass-2", "bob", 5.0))?;
        (outcome.block.expect("sealed"), outcome.transaction.tx_id)
    };

    let ledger = Ledger::new(Box::new(Database::open(&path)?));
    let blocks = ledger.blocks()?;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0], first_block);
    assert_eq!(blocks[1].previous_hash, first_block.block_hash);

    let tx = ledger.transaction_by_tx_id(&tx_id)?.expect("stored");
    assert_eq!(tx.block_id.as_deref(), Some(first_block.id.as_str()));
    assert_eq!(tx.to, "alice");

    // Sealing resumes from the persisted tip.
    let outcome = ledger.record_approval(&ApprovalEvent::new("kelp-3", "carol", 1.5))?;
    assert_eq!(outcome.block.map(|b| b.index), Some(2));
    assert!(ledger.verify_chain()?.ok);
    Ok(())
}

#[test]
fn test_export_from_sqlite_imports_into_memory() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let source = Ledger::new(Box::new(Database::open(&path)?));
    for project in ["a", "b", "c"] {
        source.record_approval(&ApprovalEvent::new(project, "owner", 3.0))?;
    }

    let store = bluecarbon_ledger::persistence::InMemoryPersistence::new();
    let target = Ledger::new(Box::new(store.clone()));
    target.import(&source.export()?)?;
    assert_eq!(target.blocks()?, source.blocks()?);
    assert_eq!(
        store.all_transactions()?,
        Database::open(&path)?.all_transactions()?
    );
    Ok(())
}

#[test]
fn test_sqlite_rejects_second_assignment() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let ledger = Ledger::new(Box::new(Database::open(&path)?));
    let outcome = ledger.record_approval(&ApprovalEvent::new("mangrove-1", "alice", 2.0))?;
    let block = outcome.block.expect("sealed");

    // Recommitting an already-assigned member under a new block must roll back.
    let rogue = Block::seal(Some(&block), &[outcome.transaction.tx_id.as_str()], "rogue");
    let err = Database::open(&path)?
        .commit_block(&rogue, &[outcome.transaction.id.clone()])
        .unwrap_err();
    assert!(matches!(err, LedgerError::TransactionAlreadyAssigned(_)));
    assert_eq!(ledger.blocks()?.len(), 1);
    Ok(())
}

#[test]
fn test_edited_rows_are_reported_broken() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let ledger = Ledger::new(Box::new(Database::open(&path)?));
    for project in ["mangrove-1", "seagrass-2", "saltmarsh-3"] {
        ledger.record_approval(&ApprovalEvent::new(project, "owner", 4.0))?;
    }
    assert!(ledger.verify_chain()?.ok);

    let conn = Connection::open(&path)?;
    conn.execute(
        "UPDATE blocks SET block_hash = ?1 WHERE idx = 0",
        params![sha256_hex("forged")],
    )?;
    conn.execute("UPDATE blocks SET transaction_count = 2 WHERE idx = 2", [])?;

    let report = ledger.verify_chain()?;
    assert!(!report.ok);
    assert_eq!(report.blocks_checked, 3);
    let has = |needle: &str| report.errors.iter().any(|e| e.contains(needle));
    assert!(has("Block 0 hash mismatch"), "{:?}", report.errors);
    assert!(has("Invalid previous block hash at index 1"), "{:?}", report.errors);
    assert!(has("Block 2 pre-image does not match"), "{:?}", report.errors);
    assert!(has("Block 2 declares 2 transactions, but 1 reference it"), "{:?}", report.errors);

    assert_eq!(ledger.export()?.integrity, Integrity::Broken);
    Ok(())
}

#[test]
fn test_config_file_selects_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let config_path = dir.path().join("config.toml");
    let path = db_path(&dir);
    fs::write(
        &config_path,
        format!(
            "[storage]\nbackend = \"sqlite\"\npath = \"{}\"\n\n[ledger]\ndefault_validator = \"registry\"\n",
            path.replace('\\', "\\\\")
        ),
    )?;

    let config = load_config(&config_path)?;
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    assert_eq!(config.ledger.default_validator, "registry");

    let ledger = Ledger::from_config(&config)?;
    assert_eq!(ledger.default_validator(), "registry");
    ledger.record_approval(&ApprovalEvent::new("mangrove-1", "alice", 9.0))?;
    assert!(std::path::Path::new(&path).exists());
    Ok(())
}
