//! Ledger module containing idempotent transaction ingestion

pub mod ingestion;

pub use ingestion::*;
