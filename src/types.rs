//! Core types and data structures for the reconciliation system

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Provider a transaction was sourced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Open Banking feed (GoCardless Bank Account Data)
    Bank,
    /// Stripe charge
    Stripe,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Bank => "bank",
            SourceType::Stripe => "stripe",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical, provider-independent record of money movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal identifier assigned on normalization
    pub id: Uuid,
    /// Provider-scoped unique identifier
    pub external_id: String,
    /// Tenant owning the connection the transaction arrived on
    pub tenant_id: String,
    /// Provider the transaction came from
    pub source_type: SourceType,
    /// Bank account or Stripe account identifier
    pub account_id: String,
    /// Amount in minor units of `currency`; positive for money received
    pub amount: i64,
    /// ISO 4217 currency code, upper-case
    pub currency: String,
    /// Free text description (payer name, provider narrative)
    pub description: String,
    /// Payment reference as entered by the payer; empty when absent
    pub reference: String,
    /// When the money moved
    pub occurred_at: DateTime<Utc>,
    /// When the ledger first stored the transaction
    ///
    /// Only meaningful on stored rows; a freshly normalized transaction carries
    /// a placeholder until `IngestionLedger::ingest` stamps it.
    pub ingested_at: DateTime<Utc>,
}

impl Transaction {
    /// Deduplication key of the ingestion ledger
    pub fn dedup_key(&self) -> (String, SourceType, String) {
        (
            self.tenant_id.clone(),
            self.source_type,
            self.external_id.clone(),
        )
    }

    /// Whether the transaction represents money received
    pub fn is_inflow(&self) -> bool {
        self.amount > 0
    }
}

/// Outcome of an ingestion attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "transaction", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// First sighting; the transaction was stored
    Inserted(Transaction),
    /// Already stored; carries the originally stored row
    Duplicate(Transaction),
}

impl IngestOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            IngestOutcome::Inserted(t) | IngestOutcome::Duplicate(t) => t,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

/// Billing-side invoice state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    /// Whether an invoice in this state can still receive a payment
    pub fn is_payable(&self) -> bool {
        matches!(self, InvoiceStatus::Unpaid | InvoiceStatus::PartiallyPaid)
    }
}

/// Read-only projection of an invoice owned by the billing system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Billing system invoice id
    pub id: u64,
    pub tenant_id: String,
    /// Display number printed on the invoice (e.g. `INV-2025-042`)
    pub invoice_number: Option<String>,
    pub client_name: String,
    /// Invoice total in minor units
    pub total_amount: i64,
    /// Amount already paid in minor units
    pub amount_paid: i64,
    pub currency: String,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
}

impl Invoice {
    /// Create an unpaid invoice
    pub fn new(
        id: u64,
        tenant_id: String,
        client_name: String,
        total_amount: i64,
        currency: String,
        due_date: NaiveDate,
    ) -> Self {
        Self {
            id,
            tenant_id,
            invoice_number: None,
            client_name,
            total_amount,
            amount_paid: 0,
            currency,
            due_date,
            status: InvoiceStatus::Unpaid,
        }
    }

    /// Set the display number
    pub fn with_number(mut self, invoice_number: impl Into<String>) -> Self {
        self.invoice_number = Some(invoice_number.into());
        self
    }

    /// Amount still owed in minor units
    pub fn outstanding(&self) -> i64 {
        self.total_amount - self.amount_paid
    }
}

/// Machine-readable reason a candidate scored the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    AmountExactMatch,
    AmountCloseMatch,
    ReferenceContainsInvoiceId,
    DescriptionContainsClientName,
    DateProximity,
    ManualSelection,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::AmountExactMatch => "amount_exact_match",
            MatchReason::AmountCloseMatch => "amount_close_match",
            MatchReason::ReferenceContainsInvoiceId => "reference_contains_invoice_id",
            MatchReason::DescriptionContainsClientName => "description_contains_client_name",
            MatchReason::DateProximity => "date_proximity",
            MatchReason::ManualSelection => "manual_selection",
        }
    }
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored (transaction, invoice) pair produced by a scoring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub transaction_id: Uuid,
    pub invoice_id: u64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub reasons: Vec<MatchReason>,
    /// Due date of the invoice, kept for tie breaking
    pub invoice_due_date: NaiveDate,
}

impl MatchCandidate {
    pub fn has_reason(&self, reason: MatchReason) -> bool {
        self.reasons.contains(&reason)
    }
}

/// Review lifecycle of a match suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
    Ignored,
    Applied,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Approved => "approved",
            SuggestionStatus::Rejected => "rejected",
            SuggestionStatus::Ignored => "ignored",
            SuggestionStatus::Applied => "applied",
        }
    }

    /// Pending and approved suggestions hold the transaction's matching focus
    pub fn is_active(&self) -> bool {
        matches!(self, SuggestionStatus::Pending | SuggestionStatus::Approved)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SuggestionStatus) -> bool {
        matches!(
            (self, next),
            (
                SuggestionStatus::Pending,
                SuggestionStatus::Approved | SuggestionStatus::Rejected | SuggestionStatus::Ignored
            ) | (SuggestionStatus::Approved, SuggestionStatus::Applied)
        )
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator (or policy) decision on a pending suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Ignore,
}

impl Decision {
    /// Status a pending suggestion moves to under this decision
    pub fn target_status(&self) -> SuggestionStatus {
        match self {
            Decision::Approve => SuggestionStatus::Approved,
            Decision::Reject => SuggestionStatus::Rejected,
            Decision::Ignore => SuggestionStatus::Ignored,
        }
    }
}

/// Persisted proposal linking one transaction to one invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub id: Uuid,
    pub tenant_id: String,
    pub transaction_id: Uuid,
    pub invoice_id: u64,
    pub confidence: f64,
    pub reasons: Vec<MatchReason>,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    /// Failure reported by the most recent apply attempt
    pub last_apply_error: Option<String>,
    /// Set while an apply call to the billing system is outstanding
    #[serde(default)]
    pub apply_in_flight: bool,
}

impl MatchSuggestion {
    /// Create a pending suggestion from a scored candidate
    pub fn pending(tenant_id: String, candidate: MatchCandidate) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            transaction_id: candidate.transaction_id,
            invoice_id: candidate.invoice_id,
            confidence: candidate.confidence,
            reasons: candidate.reasons,
            status: SuggestionStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
            applied_at: None,
            last_apply_error: None,
            apply_in_flight: false,
        }
    }
}

/// Change applied to a suggestion by a compare-and-set store transition
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub to: SuggestionStatus,
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

/// Payment posting request sent to the billing system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPaymentRequest {
    pub tenant_id: String,
    pub invoice_id: u64,
    pub transaction_id: Uuid,
    /// Provider id, recorded by the billing system as the payment's transaction id
    pub external_id: String,
    pub source_type: SourceType,
    pub amount: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Billing system answer to an apply-payment call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyPaymentResult {
    Applied,
    Failed { reason: String },
}

/// Errors that can occur in the reconciliation system
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Storage conflict: {0}")]
    Conflict(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),
    #[error("Suggestion not found: {0}")]
    SuggestionNotFound(Uuid),
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(u64),
    #[error("Invalid transition for suggestion {suggestion_id}: {from} -> {to}")]
    InvalidTransition {
        suggestion_id: Uuid,
        from: SuggestionStatus,
        to: SuggestionStatus,
    },
    #[error("Transaction {transaction_id} already has active suggestion {suggestion_id}")]
    ActiveSuggestionExists {
        transaction_id: Uuid,
        suggestion_id: Uuid,
    },
    #[error("Applying payment to invoice {invoice_id} failed for suggestion {suggestion_id}: {reason}")]
    ApplyPaymentFailed {
        suggestion_id: Uuid,
        invoice_id: u64,
        reason: String,
    },
    #[error("Payment for suggestion {0} is already being applied")]
    ApplyInProgress(Uuid),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Billing system error: {0}")]
    Billing(String),
    #[error("Transaction feed error: {0}")]
    Feed(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;
