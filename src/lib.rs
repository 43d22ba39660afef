//! Blue carbon ledger - a hash-chained audit log for restoration credit issuance
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Merkle roots, block hashing and chain validation
//! - [`transaction`] - Credit issuance transactions and approval events
//! - [`ledger`] - Approval recording, block sealing, import and verification
//!
//! ## Cryptography
//! - [`crypto`] - SHA-256 digests, salted identifiers and validator markers
//!
//! ## State Management
//! - [`persistence`] - Storage backends (in-memory and SQLite)
//! - [`export`] - Exports, verification reports and certificates
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`cli`] - CLI utilities
//!
//! A single writer is assumed. Transaction identifiers and proof hashes are
//! salted and cannot be re-derived by third parties; block hashes can, from the
//! stored pre-image.

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod ledger;
pub mod transaction;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod export;
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod cli;
pub mod config;
pub mod error;

pub use error::{LedgerError, Result};
pub use ledger::{ApprovalOutcome, Ledger};
