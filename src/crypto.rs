//! Hashing primitives for the ledger
//!
//! Every digest in the ledger is a lowercase hex SHA-256 string. Transaction
//! identifiers and proof hashes mix in a random salt or the wall clock, so they
//! cannot be re-derived from their inputs later. Only block hashes can be
//! re-verified by a third party (see [`crate::blockchain::compute_block_hash`]).

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy folded into every transaction identifier.
pub const SALT_BYTES: usize = 16;

/// SHA-256 of a UTF-8 string, as lowercase hex.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Recompute `sha256(data)` and compare it against an expected hex digest.
pub fn verify_hash(data: &str, expected_hash: &str) -> bool {
    sha256_hex(data).eq_ignore_ascii_case(expected_hash.trim())
}

/// Current UTC time truncated to millisecond precision.
///
/// Stored timestamps are rendered with milliseconds, so anything that ends up in
/// a record is truncated up front to keep reloaded records identical.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// ISO-8601 rendering used in identifiers and block pre-images,
/// e.g. `2024-01-01T00:00:00.000Z`.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp previously produced by [`iso_timestamp`].
pub fn parse_iso_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn random_salt() -> String {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Salted transaction identifier over project, recipient, credit amount and time.
pub fn new_transaction_id(
    project_id: &str,
    user_id: &str,
    credits: f64,
    timestamp: &DateTime<Utc>,
) -> String {
    let input = format!(
        "{}{}{}{}{}",
        project_id,
        user_id,
        credits,
        iso_timestamp(timestamp),
        random_salt()
    );
    sha256_hex(&input)
}

/// Digest of a proof document reference concatenated with the current epoch millis.
pub fn new_proof_hash(reference: &str) -> String {
    sha256_hex(&format!("{}{}", reference, Utc::now().timestamp_millis()))
}

/// Advisory validator marker over a block hash.
///
/// The wall clock is part of the input, so the marker records that a validator
/// saw the block but can never be checked afterwards.
pub fn sign_block(block_hash: &str, validator_id: &str) -> String {
    sha256_hex(&format!(
        "{}{}{}",
        block_hash,
        validator_id,
        Utc::now().timestamp_millis()
    ))
}
