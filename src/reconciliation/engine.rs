//! Batch orchestration: normalize, ingest, match, suggest, apply

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::report::{BatchReport, ItemOutcome};
use crate::config::ReconciliationConfig;
use crate::ledger::IngestionLedger;
use crate::matching::{CandidateSelector, ConfidenceScorer};
use crate::normalizer::{self, RawPayload};
use crate::review::ReviewStateMachine;
use crate::traits::*;
use crate::types::*;

/// Actor recorded on suggestions approved by the auto-approval policy
pub const AUTO_APPROVE_ACTOR: &str = "system:auto-approve";

/// Unpaid invoices per (tenant, currency), valid for one batch
#[derive(Debug, Default)]
struct InvoiceCache {
    entries: HashMap<(String, String), Vec<Invoice>>,
}

impl InvoiceCache {
    async fn get_or_fetch<B: BillingSystem>(
        &mut self,
        billing: &B,
        tenant_id: &str,
        currency: &str,
    ) -> ReconResult<&[Invoice]> {
        let key = (tenant_id.to_string(), currency.to_ascii_uppercase());
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_slice()),
            Entry::Vacant(entry) => {
                let invoices = billing.list_unpaid_invoices(tenant_id, currency).await?;
                debug!(tenant_id, currency, count = invoices.len(), "loaded unpaid invoices");
                Ok(entry.insert(invoices).as_slice())
            }
        }
    }
}

/// Reconciliation engine coordinating ledger, matching, review and billing
///
/// Every payload of a batch is processed independently: a malformed payload
/// or a failing item is reported and the batch moves on.
pub struct ReconciliationEngine<S, B>
where
    S: TransactionStore + SuggestionStore + Clone,
    B: BillingSystem,
{
    config: ReconciliationConfig,
    ledger: IngestionLedger<S>,
    review: ReviewStateMachine<S>,
    selector: CandidateSelector,
    scorer: ConfidenceScorer,
    billing: B,
}

impl<S, B> ReconciliationEngine<S, B>
where
    S: TransactionStore + SuggestionStore + Clone,
    B: BillingSystem,
{
    /// Create a new engine over the given storage and billing system
    pub fn new(storage: S, billing: B, config: ReconciliationConfig) -> ReconResult<Self> {
        let ledger = IngestionLedger::new(storage.clone());
        Self::assemble(ledger, storage, billing, config)
    }

    /// Create a new engine with custom transaction validator
    pub fn with_validator(
        storage: S,
        billing: B,
        config: ReconciliationConfig,
        validator: Box<dyn TransactionValidator>,
    ) -> ReconResult<Self> {
        let ledger = IngestionLedger::with_validator(storage.clone(), validator);
        Self::assemble(ledger, storage, billing, config)
    }

    fn assemble(
        ledger: IngestionLedger<S>,
        storage: S,
        billing: B,
        config: ReconciliationConfig,
    ) -> ReconResult<Self> {
        config.validate()?;
        Ok(Self {
            ledger: ledger.with_conflict_retries(config.ledger_conflict_retries),
            review: ReviewStateMachine::new(storage),
            selector: CandidateSelector::new(config.matching.clone()),
            scorer: ConfidenceScorer::from_config(&config),
            billing,
            config,
        })
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &IngestionLedger<S> {
        &self.ledger
    }

    pub fn review(&self) -> &ReviewStateMachine<S> {
        &self.review
    }

    // Batch entry points

    /// Process a batch of raw payloads end to end
    pub async fn process_batch(&self, payloads: Vec<RawPayload>) -> BatchReport {
        self.process_payloads(payloads, None).await
    }

    /// Fetch new transactions from a feed and process them as one batch
    ///
    /// The report's `next_cursor` is the latest `occurred_at` seen, or
    /// `since` when the feed returned nothing usable.
    pub async fn poll<F>(
        &self,
        feed: &F,
        tenant_id: &str,
        source_type: SourceType,
        since: Option<DateTime<Utc>>,
    ) -> ReconResult<BatchReport>
    where
        F: TransactionFeed + ?Sized,
    {
        let payloads = feed
            .fetch_new_transactions(tenant_id, source_type, since)
            .await?;
        debug!(tenant_id, source = %source_type, count = payloads.len(), "polled feed");

        let mut report = self.process_payloads(payloads, Some(tenant_id)).await;
        if report.next_cursor.is_none() {
            report.next_cursor = since;
        }
        Ok(report)
    }

    /// Process one verified webhook delivery
    pub async fn on_webhook_event(&self, payload: RawPayload) -> BatchReport {
        self.process_payloads(vec![payload], None).await
    }

    async fn process_payloads(
        &self,
        payloads: Vec<RawPayload>,
        expected_tenant: Option<&str>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut cache = InvoiceCache::default();
        let mut earliest_failed = None;

        for payload in &payloads {
            if let Some(occurred_at) = self
                .process_payload(payload, expected_tenant, &mut cache, &mut report)
                .await
            {
                earliest_failed = Some(match earliest_failed {
                    Some(current) if current <= occurred_at => current,
                    _ => occurred_at,
                });
            }
        }
        if let Some(occurred_at) = earliest_failed {
            report.hold_cursor(occurred_at);
        }

        info!(
            total = report.len(),
            suggested = report.suggested(),
            applied = report.applied(),
            unmatched = report.unmatched(),
            duplicates = report.duplicates(),
            malformed = report.malformed(),
            failed = report.failed() + report.apply_failed(),
            "batch processed"
        );
        report
    }

    /// Process one payload into `report`
    ///
    /// Returns the `occurred_at` of a transaction that could not be stored,
    /// so the cursor is held back and the next poll fetches it again.
    async fn process_payload(
        &self,
        payload: &RawPayload,
        expected_tenant: Option<&str>,
        cache: &mut InvoiceCache,
        report: &mut BatchReport,
    ) -> Option<DateTime<Utc>> {
        let hint = payload.external_id_hint();

        if let Some(tenant_id) = expected_tenant {
            if payload.tenant_id != tenant_id {
                warn!(
                    expected = tenant_id,
                    actual = %payload.tenant_id,
                    "feed returned payload of another tenant"
                );
                report.push(
                    hint,
                    ItemOutcome::Malformed {
                        reason: format!("payload belongs to tenant {}", payload.tenant_id),
                    },
                );
                return None;
            }
        }

        let transaction = match normalizer::normalize(payload) {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!(
                    tenant_id = %payload.tenant_id,
                    source = %payload.source_type(),
                    external_id = hint.as_deref().unwrap_or("unknown"),
                    error = %e,
                    "skipping malformed payload"
                );
                report.push(
                    hint,
                    ItemOutcome::Malformed {
                        reason: e.to_string(),
                    },
                );
                return None;
            }
        };

        let occurred_at = transaction.occurred_at;
        let external_id = Some(transaction.external_id.clone());

        let stored = match self.ledger.ingest(transaction).await {
            Ok(IngestOutcome::Duplicate(existing)) => {
                report.advance_cursor(occurred_at);
                report.push(
                    external_id,
                    ItemOutcome::Duplicate {
                        transaction_id: existing.id,
                    },
                );
                return None;
            }
            Ok(IngestOutcome::Inserted(stored)) => stored,
            Err(e @ ReconError::Validation(_)) => {
                warn!(external_id = external_id.as_deref(), error = %e, "transaction rejected");
                report.push(
                    external_id,
                    ItemOutcome::Malformed {
                        reason: e.to_string(),
                    },
                );
                return None;
            }
            Err(e) => {
                error!(
                    external_id = external_id.as_deref(),
                    error = %e,
                    "transaction not stored; cursor held back"
                );
                report.push(
                    external_id,
                    ItemOutcome::Failed {
                        error: e.to_string(),
                    },
                );
                return Some(occurred_at);
            }
        };
        report.advance_cursor(occurred_at);

        let outcome = match self.match_transaction(stored, cache).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(external_id = external_id.as_deref(), error = %e, "item processing failed");
                ItemOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        report.push(external_id, outcome);
        None
    }

    async fn match_transaction(
        &self,
        stored: Transaction,
        cache: &mut InvoiceCache,
    ) -> ReconResult<ItemOutcome> {
        if !stored.is_inflow() {
            debug!(transaction_id = %stored.id, amount = stored.amount, "outflow left unmatched");
            return Ok(ItemOutcome::NotMatchable {
                transaction_id: stored.id,
            });
        }

        let applied = self.review.applied_invoice_ids(&stored.tenant_id).await?;
        let invoices = cache
            .get_or_fetch(&self.billing, &stored.tenant_id, &stored.currency)
            .await?;
        let candidates = self.selector.select(&stored, invoices, &applied);

        let best = match self.scorer.rank(&stored, &candidates).into_iter().next() {
            Some(best) => best,
            None => {
                info!(transaction_id = %stored.id, "no candidate invoices");
                return Ok(ItemOutcome::NoCandidates {
                    transaction_id: stored.id,
                });
            }
        };

        if best.confidence < self.config.min_confidence {
            info!(
                transaction_id = %stored.id,
                best_confidence = best.confidence,
                min_confidence = self.config.min_confidence,
                "best candidate below suggestion floor"
            );
            return Ok(ItemOutcome::BelowThreshold {
                transaction_id: stored.id,
                best_confidence: best.confidence,
            });
        }

        let suggestion = self.review.propose(&stored.tenant_id, best).await?;

        match self.config.auto_approve_threshold {
            Some(threshold) if suggestion.confidence >= threshold => {
                self.auto_approve(suggestion).await
            }
            _ => Ok(ItemOutcome::Suggested {
                transaction_id: suggestion.transaction_id,
                suggestion_id: suggestion.id,
                invoice_id: suggestion.invoice_id,
                confidence: suggestion.confidence,
            }),
        }
    }

    async fn auto_approve(&self, suggestion: MatchSuggestion) -> ReconResult<ItemOutcome> {
        match self
            .decide(suggestion.id, Decision::Approve, AUTO_APPROVE_ACTOR)
            .await
        {
            Ok(applied) => Ok(ItemOutcome::Applied {
                transaction_id: applied.transaction_id,
                suggestion_id: applied.id,
                invoice_id: applied.invoice_id,
            }),
            Err(ReconError::ApplyPaymentFailed { reason, .. }) => Ok(ItemOutcome::ApplyFailed {
                transaction_id: suggestion.transaction_id,
                suggestion_id: suggestion.id,
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    // Matching

    /// Unpaid invoices the transaction could pay, closest amount first
    pub async fn select_candidates(&self, transaction: &Transaction) -> ReconResult<Vec<Invoice>> {
        let applied = self.review.applied_invoice_ids(&transaction.tenant_id).await?;
        let invoices = self
            .billing
            .list_unpaid_invoices(&transaction.tenant_id, &transaction.currency)
            .await?;
        Ok(self.selector.select(transaction, &invoices, &applied))
    }

    /// Scored candidates for a transaction, best first
    pub async fn rank_candidates(
        &self,
        transaction: &Transaction,
    ) -> ReconResult<Vec<MatchCandidate>> {
        let candidates = self.select_candidates(transaction).await?;
        Ok(self.scorer.rank(transaction, &candidates))
    }

    // Review and apply

    /// Record an operator decision; approving immediately applies the payment
    pub async fn decide(
        &self,
        suggestion_id: Uuid,
        decision: Decision,
        actor: &str,
    ) -> ReconResult<MatchSuggestion> {
        let decided = self.review.decide(suggestion_id, decision, actor).await?;
        if decision == Decision::Approve {
            return self.apply_approved(suggestion_id).await;
        }
        Ok(decided)
    }

    /// Post an approved suggestion to the billing system
    ///
    /// The suggestion is claimed in the store before the billing call, so a
    /// concurrent call for the same suggestion fails with `ApplyInProgress`
    /// instead of posting the payment twice. It becomes applied only after the
    /// billing system confirmed the payment. On failure the claim is released,
    /// the suggestion stays approved with the failure recorded and
    /// `ApplyPaymentFailed` is returned; calling this again retries.
    ///
    /// When the payment was posted but the applied state could not be stored,
    /// the claim is kept so no retry can post it again.
    pub async fn apply_approved(&self, suggestion_id: Uuid) -> ReconResult<MatchSuggestion> {
        let suggestion = self.review.claim_apply(suggestion_id).await?;

        let transaction = match self
            .ledger
            .get_transaction_required(suggestion.transaction_id)
            .await
        {
            Ok(transaction) => transaction,
            Err(e) => {
                self.release_claim(suggestion_id).await;
                return Err(e);
            }
        };
        let request = ApplyPaymentRequest {
            tenant_id: suggestion.tenant_id.clone(),
            invoice_id: suggestion.invoice_id,
            transaction_id: transaction.id,
            external_id: transaction.external_id.clone(),
            source_type: transaction.source_type,
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            occurred_at: transaction.occurred_at,
        };

        let reason = match self.billing.apply_payment(&request).await {
            Ok(ApplyPaymentResult::Applied) => {
                return self.review.mark_applied(suggestion_id).await.map_err(|e| {
                    error!(
                        suggestion_id = %suggestion_id,
                        invoice_id = suggestion.invoice_id,
                        external_id = %transaction.external_id,
                        error = %e,
                        "payment posted but applied state not recorded"
                    );
                    e
                });
            }
            Ok(ApplyPaymentResult::Failed { reason }) => reason,
            Err(ReconError::Billing(message)) => message,
            Err(e) => {
                self.release_claim(suggestion_id).await;
                return Err(e);
            }
        };

        warn!(
            suggestion_id = %suggestion_id,
            invoice_id = suggestion.invoice_id,
            %reason,
            "apply payment failed; suggestion left approved"
        );
        self.review
            .record_apply_failure(suggestion_id, &reason)
            .await?;
        Err(ReconError::ApplyPaymentFailed {
            suggestion_id,
            invoice_id: suggestion.invoice_id,
            reason,
        })
    }

    async fn release_claim(&self, suggestion_id: Uuid) {
        if let Err(e) = self.review.release_apply(suggestion_id).await {
            error!(suggestion_id = %suggestion_id, error = %e, "apply claim not released");
        }
    }

    /// Create a pending suggestion for an invoice picked by an operator
    ///
    /// No confidence floor applies, but the invoice must be unpaid and in the
    /// transaction's tenant and currency.
    pub async fn suggest_manually(
        &self,
        transaction_id: Uuid,
        invoice_id: u64,
        actor: &str,
    ) -> ReconResult<MatchSuggestion> {
        let transaction = self.ledger.get_transaction_required(transaction_id).await?;
        if !transaction.is_inflow() {
            return Err(ReconError::Validation(format!(
                "transaction {} is not money received",
                transaction_id
            )));
        }

        let invoice = self
            .billing
            .list_unpaid_invoices(&transaction.tenant_id, &transaction.currency)
            .await?
            .into_iter()
            .find(|invoice| invoice.id == invoice_id && invoice.tenant_id == transaction.tenant_id)
            .ok_or(ReconError::InvoiceNotFound(invoice_id))?;

        let mut candidate = self.scorer.score(&transaction, &invoice);
        candidate.reasons.push(MatchReason::ManualSelection);

        let suggestion = self.review.propose(&transaction.tenant_id, candidate).await?;
        info!(
            suggestion_id = %suggestion.id,
            transaction_id = %transaction_id,
            invoice_id,
            actor,
            "manual match suggested"
        );
        Ok(suggestion)
    }

    // Review queue

    /// Suggestions waiting for an operator decision
    pub async fn list_pending(&self, tenant_id: &str) -> ReconResult<Vec<MatchSuggestion>> {
        self.review.list_pending(tenant_id).await
    }

    /// Approved suggestions whose payment has not been applied yet
    pub async fn list_awaiting_apply(&self, tenant_id: &str) -> ReconResult<Vec<MatchSuggestion>> {
        self.review
            .list_by_status(tenant_id, SuggestionStatus::Approved)
            .await
    }

    /// Money received that has no active or applied suggestion
    pub async fn list_unmatched(&self, tenant_id: &str) -> ReconResult<Vec<Transaction>> {
        let mut unmatched = Vec::new();
        for transaction in self.ledger.list_transactions(tenant_id).await? {
            if !transaction.is_inflow() {
                continue;
            }
            let suggestions = self.review.for_transaction(transaction.id).await?;
            let settled = suggestions
                .iter()
                .any(|s| s.status.is_active() || s.status == SuggestionStatus::Applied);
            if !settled {
                unmatched.push(transaction);
            }
        }
        Ok(unmatched)
    }
}
