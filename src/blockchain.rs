// Thin re-export module: implementation lives in `blockchain/core.rs`, split
// into Merkle computation, block chaining and chain validation.

pub mod core;
pub use self::core::*;
