//! Reconciliation orchestrator for bank feeds and Stripe charges
//!
//! Drives a batch through normalization, ingestion, candidate selection,
//! scoring and review, and posts approved matches to the billing system.

pub mod engine;
pub mod report;

pub use engine::*;
pub use report::*;
