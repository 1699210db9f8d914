//! Durable completion ledger: marker keys, the file-backed store, and the
//! atomic write primitive both rely on.

pub mod atomic;
pub mod keys;
pub mod store;

pub use keys::MarkerKey;
pub use store::{CompletionLedger, LedgerError};
