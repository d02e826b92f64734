//! Traits for storage abstraction and external collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::normalizer::RawPayload;
use crate::types::*;

/// Storage abstraction for the ingestion ledger
///
/// Implementations must enforce uniqueness of
/// `(tenant_id, source_type, external_id)`. A SQL backend maps this to a
/// unique constraint with `ON CONFLICT DO NOTHING`; the in-memory backend
/// checks and inserts under one write lock.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert the transaction unless its deduplication key is already stored
    ///
    /// Returns `Duplicate` with the stored row when the key exists. A backend
    /// that loses a concurrent insert race may instead return
    /// `ReconError::Conflict`; the ledger resolves that to a duplicate.
    async fn insert_if_absent(&self, transaction: &Transaction) -> ReconResult<IngestOutcome>;

    /// Get a transaction by internal ID
    async fn get_transaction(&self, transaction_id: Uuid) -> ReconResult<Option<Transaction>>;

    /// Look up a transaction by its deduplication key
    async fn find_by_external_id(
        &self,
        tenant_id: &str,
        source_type: SourceType,
        external_id: &str,
    ) -> ReconResult<Option<Transaction>>;

    /// List every transaction of a tenant, oldest first
    async fn list_transactions(&self, tenant_id: &str) -> ReconResult<Vec<Transaction>>;
}

/// Storage abstraction for match suggestions
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Persist a new pending suggestion
    ///
    /// Must fail with `InvariantViolation` when the transaction already has an
    /// applied suggestion, and with `ActiveSuggestionExists` when it has a
    /// pending or approved one.
    async fn insert_suggestion(&self, suggestion: &MatchSuggestion) -> ReconResult<()>;

    /// Get a suggestion by ID
    async fn get_suggestion(&self, suggestion_id: Uuid) -> ReconResult<Option<MatchSuggestion>>;

    /// All suggestions ever made for a transaction, oldest first
    async fn suggestions_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> ReconResult<Vec<MatchSuggestion>>;

    /// Suggestions of a tenant in the given status, oldest first
    async fn list_by_status(
        &self,
        tenant_id: &str,
        status: SuggestionStatus,
    ) -> ReconResult<Vec<MatchSuggestion>>;

    /// Invoice ids already linked to an applied suggestion
    async fn applied_invoice_ids(&self, tenant_id: &str) -> ReconResult<HashSet<u64>>;

    /// Atomically move a suggestion from `expected` to `change.to`
    ///
    /// Fails with `InvalidTransition` when the current status is not
    /// `expected`. When moving to `Applied` it must fail with
    /// `InvariantViolation` if another suggestion of the same transaction is
    /// already applied, checked in the same atomic step as the write.
    async fn transition(
        &self,
        suggestion_id: Uuid,
        expected: SuggestionStatus,
        change: StatusChange,
    ) -> ReconResult<MatchSuggestion>;

    /// Atomically claim an approved suggestion for one apply attempt
    ///
    /// Fails with `InvalidTransition` unless the suggestion is approved, with
    /// `ApplyInProgress` while another claim is held, and with
    /// `InvariantViolation` when a sibling suggestion is already applied. The
    /// claim is released by `release_apply` or by the transition to `Applied`.
    async fn claim_apply(&self, suggestion_id: Uuid) -> ReconResult<MatchSuggestion>;

    /// Release an apply claim without changing status, recording the failure
    async fn release_apply(
        &self,
        suggestion_id: Uuid,
        reason: Option<String>,
    ) -> ReconResult<MatchSuggestion>;
}

/// Billing system (WHMCS-style) as seen by the reconciliation core
#[async_trait]
pub trait BillingSystem: Send + Sync {
    /// Unpaid and partially paid invoices of a tenant in a currency
    async fn list_unpaid_invoices(
        &self,
        tenant_id: &str,
        currency: &str,
    ) -> ReconResult<Vec<Invoice>>;

    /// Post a payment against an invoice
    ///
    /// A business-level refusal is `Ok(ApplyPaymentResult::Failed)`; transport
    /// failures are `Err`. Both leave the suggestion approved.
    async fn apply_payment(&self, request: &ApplyPaymentRequest)
        -> ReconResult<ApplyPaymentResult>;
}

/// Polling collaborator delivering raw provider payloads
#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Payloads seen since the cursor; windows may overlap previous polls
    async fn fetch_new_transactions(
        &self,
        tenant_id: &str,
        source_type: SourceType,
        since: Option<DateTime<Utc>>,
    ) -> ReconResult<Vec<RawPayload>>;
}

/// Trait for implementing custom transaction validation rules
pub trait TransactionValidator: Send + Sync {
    /// Validate a normalized transaction before it is stored
    fn validate_transaction(&self, transaction: &Transaction) -> ReconResult<()>;
}

/// Default transaction validator with basic rules
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate_transaction(&self, transaction: &Transaction) -> ReconResult<()> {
        if transaction.tenant_id.trim().is_empty() {
            return Err(ReconError::Validation(
                "Tenant ID cannot be empty".to_string(),
            ));
        }

        if transaction.external_id.trim().is_empty() {
            return Err(ReconError::Validation(
                "External ID cannot be empty".to_string(),
            ));
        }

        if transaction.currency.len() != 3 {
            return Err(ReconError::Validation(format!(
                "Currency '{}' is not an ISO 4217 code",
                transaction.currency
            )));
        }

        Ok(())
    }
}
