//! # Payment Reconciliation Core
//!
//! Matches incoming money (Open Banking bank feeds and Stripe charges) to
//! outstanding invoices of a billing system, with operator review before any
//! payment is posted.
//!
//! ## Features
//!
//! - **Normalization**: GoCardless and Stripe payloads mapped to one canonical transaction in minor units
//! - **Idempotent ingestion**: `(tenant, source, external id)` deduplication safe under overlapping polls and webhooks
//! - **Candidate selection**: tenant, currency, status and amount tolerance filters
//! - **Confidence scoring**: weighted amount, reference, client name and date signals with reasons
//! - **Review state machine**: pending, approved, rejected, ignored and applied, never double-applied
//! - **Storage abstraction**: trait-based stores with in-memory implementations for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use payment_recon_core::{normalize, ConfidenceScorer, Invoice, RawPayload, ReconciliationConfig};
//! use serde_json::json;
//!
//! let payload = RawPayload::stripe(
//!     "tenant-1",
//!     "acct_1",
//!     json!({
//!         "id": "ch_1",
//!         "object": "charge",
//!         "amount": 15000,
//!         "currency": "gbp",
//!         "created": 1741392000,
//!         "metadata": { "invoice_id": "42" }
//!     }),
//! );
//! let transaction = normalize(&payload)?;
//!
//! let invoice = Invoice::new(
//!     42,
//!     "tenant-1".to_string(),
//!     "Acme Ltd".to_string(),
//!     15_000,
//!     "GBP".to_string(),
//!     NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
//! );
//! let scorer = ConfidenceScorer::from_config(&ReconciliationConfig::default());
//! let candidate = scorer.score(&transaction, &invoice);
//! assert!(candidate.confidence >= 0.9);
//! # Ok::<(), payment_recon_core::ReconError>(())
//! ```

pub mod config;
pub mod ledger;
pub mod matching;
pub mod normalizer;
pub mod reconciliation;
pub mod review;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use matching::*;
pub use normalizer::{normalize, ProviderPayload, RawPayload};
pub use reconciliation::*;
pub use review::*;
pub use traits::*;
pub use types::*;
