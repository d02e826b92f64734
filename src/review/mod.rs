//! Review state machine for match suggestions
//!
//! ```text
//! pending --approve--> approved --apply succeeded--> applied
//!    |--reject--> rejected
//!    `--ignore--> ignored
//! ```
//!
//! Rejected and ignored are terminal for the suggestion, but the transaction
//! may receive a fresh pending suggestion later. Applied is terminal for the
//! transaction: at most one suggestion per transaction ever reaches it.

use chrono::Utc;
use std::collections::HashSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Owner of the match suggestion lifecycle
pub struct ReviewStateMachine<S: SuggestionStore> {
    storage: S,
}

impl<S: SuggestionStore> ReviewStateMachine<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Persist a scored candidate as a new pending suggestion
    pub async fn propose(
        &self,
        tenant_id: &str,
        candidate: MatchCandidate,
    ) -> ReconResult<MatchSuggestion> {
        let suggestion = MatchSuggestion::pending(tenant_id.to_string(), candidate);

        match self.storage.insert_suggestion(&suggestion).await {
            Ok(()) => {
                info!(
                    suggestion_id = %suggestion.id,
                    transaction_id = %suggestion.transaction_id,
                    invoice_id = suggestion.invoice_id,
                    confidence = suggestion.confidence,
                    "match suggested"
                );
                Ok(suggestion)
            }
            Err(e) => Err(log_invariant(e, &suggestion)),
        }
    }

    /// Apply an approve, reject or ignore decision to a pending suggestion
    pub async fn decide(
        &self,
        suggestion_id: Uuid,
        decision: Decision,
        actor: &str,
    ) -> ReconResult<MatchSuggestion> {
        let suggestion = self.get_required(suggestion_id).await?;
        let target = decision.target_status();

        // an applied sibling outranks whatever status this suggestion is in
        if decision == Decision::Approve {
            self.ensure_not_applied_elsewhere(&suggestion).await?;
        }

        if !suggestion.status.can_transition_to(target) {
            return Err(ReconError::InvalidTransition {
                suggestion_id,
                from: suggestion.status,
                to: target,
            });
        }

        let change = StatusChange {
            to: target,
            actor: Some(actor.to_string()),
            at: Utc::now(),
        };
        let updated = self
            .storage
            .transition(suggestion_id, SuggestionStatus::Pending, change)
            .await
            .map_err(|e| log_invariant(e, &suggestion))?;

        info!(
            suggestion_id = %updated.id,
            transaction_id = %updated.transaction_id,
            status = %updated.status,
            actor,
            "suggestion decided"
        );
        Ok(updated)
    }

    /// Commit `approved -> applied` after the billing system confirmed the payment
    pub async fn mark_applied(&self, suggestion_id: Uuid) -> ReconResult<MatchSuggestion> {
        let suggestion = self.get_required(suggestion_id).await?;

        if suggestion.status != SuggestionStatus::Approved {
            return Err(ReconError::InvalidTransition {
                suggestion_id,
                from: suggestion.status,
                to: SuggestionStatus::Applied,
            });
        }

        let change = StatusChange {
            to: SuggestionStatus::Applied,
            actor: None,
            at: Utc::now(),
        };
        let updated = self
            .storage
            .transition(suggestion_id, SuggestionStatus::Approved, change)
            .await
            .map_err(|e| log_invariant(e, &suggestion))?;

        info!(
            suggestion_id = %updated.id,
            transaction_id = %updated.transaction_id,
            invoice_id = updated.invoice_id,
            "payment applied"
        );
        Ok(updated)
    }

    /// Take the exclusive right to post an approved suggestion's payment
    pub async fn claim_apply(&self, suggestion_id: Uuid) -> ReconResult<MatchSuggestion> {
        match self.storage.claim_apply(suggestion_id).await {
            Ok(claimed) => Ok(claimed),
            Err(e @ ReconError::InvariantViolation(_)) => {
                let suggestion = self.get_required(suggestion_id).await?;
                Err(log_invariant(e, &suggestion))
            }
            Err(e) => Err(e),
        }
    }

    /// Drop an apply claim after an attempt that did not post the payment
    pub async fn release_apply(&self, suggestion_id: Uuid) -> ReconResult<MatchSuggestion> {
        self.storage.release_apply(suggestion_id, None).await
    }

    /// Keep an approved suggestion approved and remember why applying failed
    ///
    /// Releases any apply claim held on the suggestion.
    pub async fn record_apply_failure(
        &self,
        suggestion_id: Uuid,
        reason: &str,
    ) -> ReconResult<MatchSuggestion> {
        self.storage
            .release_apply(suggestion_id, Some(reason.to_string()))
            .await
    }

    /// Get a suggestion by ID
    pub async fn get(&self, suggestion_id: Uuid) -> ReconResult<Option<MatchSuggestion>> {
        self.storage.get_suggestion(suggestion_id).await
    }

    /// Get a suggestion by ID, returning an error if not found
    pub async fn get_required(&self, suggestion_id: Uuid) -> ReconResult<MatchSuggestion> {
        self.storage
            .get_suggestion(suggestion_id)
            .await?
            .ok_or(ReconError::SuggestionNotFound(suggestion_id))
    }

    /// Pending suggestions awaiting operator review
    pub async fn list_pending(&self, tenant_id: &str) -> ReconResult<Vec<MatchSuggestion>> {
        self.list_by_status(tenant_id, SuggestionStatus::Pending)
            .await
    }

    pub async fn list_by_status(
        &self,
        tenant_id: &str,
        status: SuggestionStatus,
    ) -> ReconResult<Vec<MatchSuggestion>> {
        self.storage.list_by_status(tenant_id, status).await
    }

    /// Every suggestion ever made for a transaction
    pub async fn for_transaction(&self, transaction_id: Uuid) -> ReconResult<Vec<MatchSuggestion>> {
        self.storage.suggestions_for_transaction(transaction_id).await
    }

    /// Invoices already settled through this core
    pub async fn applied_invoice_ids(&self, tenant_id: &str) -> ReconResult<HashSet<u64>> {
        self.storage.applied_invoice_ids(tenant_id).await
    }

    /// Refuse to act on a suggestion whose transaction was already applied elsewhere
    pub(crate) async fn ensure_not_applied_elsewhere(
        &self,
        suggestion: &MatchSuggestion,
    ) -> ReconResult<()> {
        let siblings = self
            .storage
            .suggestions_for_transaction(suggestion.transaction_id)
            .await?;

        if let Some(applied) = siblings
            .iter()
            .find(|s| s.status == SuggestionStatus::Applied && s.id != suggestion.id)
        {
            let violation = ReconError::InvariantViolation(format!(
                "transaction {} already applied to invoice {} via suggestion {}",
                suggestion.transaction_id, applied.invoice_id, applied.id
            ));
            return Err(log_invariant(violation, suggestion));
        }

        Ok(())
    }
}

/// Log invariant violations with full context and pass every error through
fn log_invariant(err: ReconError, suggestion: &MatchSuggestion) -> ReconError {
    if let ReconError::InvariantViolation(detail) = &err {
        error!(
            suggestion_id = %suggestion.id,
            tenant_id = %suggestion.tenant_id,
            transaction_id = %suggestion.transaction_id,
            invoice_id = suggestion.invoice_id,
            status = %suggestion.status,
            %detail,
            "double-apply attempt refused"
        );
    }
    err
}
