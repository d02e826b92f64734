//! Multi-signal confidence scoring

use super::{amount_difference, same_currency, tolerance_for};
use crate::config::{MatchingConfig, ReconciliationConfig, ScoringWeights};
use crate::types::*;

/// Computes match confidence for (transaction, invoice) pairs
///
/// Signals are additive and independently weighted. The amount signal is a
/// precondition: without an exact or close amount match the confidence is
/// zero whatever the other signals say.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    matching: MatchingConfig,
    weights: ScoringWeights,
}

impl ConfidenceScorer {
    pub fn new(matching: MatchingConfig, weights: ScoringWeights) -> Self {
        Self { matching, weights }
    }

    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self::new(config.matching.clone(), config.weights.clone())
    }

    /// Score a single pair
    pub fn score(&self, transaction: &Transaction, invoice: &Invoice) -> MatchCandidate {
        let mut candidate = MatchCandidate {
            transaction_id: transaction.id,
            invoice_id: invoice.id,
            confidence: 0.0,
            reasons: Vec::new(),
            invoice_due_date: invoice.due_date,
        };

        let amount_weight = match self.amount_signal(transaction, invoice) {
            Some(AmountSignal::Exact) => {
                candidate.reasons.push(MatchReason::AmountExactMatch);
                self.weights.exact_amount
            }
            Some(AmountSignal::Close) => {
                candidate.reasons.push(MatchReason::AmountCloseMatch);
                self.weights.close_amount
            }
            None => return candidate,
        };

        let mut total = amount_weight;

        if mentions_invoice(transaction, invoice) {
            candidate.reasons.push(MatchReason::ReferenceContainsInvoiceId);
            total += self.weights.reference_invoice_id;
        }

        if mentions_client(transaction, invoice) {
            candidate
                .reasons
                .push(MatchReason::DescriptionContainsClientName);
            total += self.weights.description_client_name;
        }

        let proximity = self.date_proximity(transaction, invoice);
        if proximity > 0.0 {
            candidate.reasons.push(MatchReason::DateProximity);
            total += proximity;
        }

        candidate.confidence = round_confidence(total);
        candidate
    }

    /// Score every invoice and order the results deterministically
    ///
    /// Highest confidence first, then the most recent due date, then the
    /// lowest invoice id.
    pub fn rank(&self, transaction: &Transaction, invoices: &[Invoice]) -> Vec<MatchCandidate> {
        let mut ranked: Vec<MatchCandidate> = invoices
            .iter()
            .map(|invoice| self.score(transaction, invoice))
            .collect();
        sort_candidates(&mut ranked);
        ranked
    }

    fn amount_signal(&self, transaction: &Transaction, invoice: &Invoice) -> Option<AmountSignal> {
        if !transaction.is_inflow() || !same_currency(transaction, invoice) {
            return None;
        }

        let difference = amount_difference(transaction, invoice);
        if difference <= self.matching.exact_epsilon_minor {
            Some(AmountSignal::Exact)
        } else if difference <= tolerance_for(transaction, &self.matching) {
            Some(AmountSignal::Close)
        } else {
            None
        }
    }

    fn date_proximity(&self, transaction: &Transaction, invoice: &Invoice) -> f64 {
        let window = self.matching.date_window_days;
        if window <= 0 {
            return 0.0;
        }

        let days = (transaction.occurred_at.date_naive() - invoice.due_date)
            .num_days()
            .abs();
        if days >= window {
            return 0.0;
        }

        self.weights.date_proximity * (1.0 - days as f64 / window as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmountSignal {
    Exact,
    Close,
}

/// Order candidates by confidence, due date and invoice id
pub fn sort_candidates(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.invoice_due_date.cmp(&a.invoice_due_date))
            .then_with(|| a.invoice_id.cmp(&b.invoice_id))
    });
}

/// Clamp to [0, 1] and drop floating point noise from summing weights
fn round_confidence(total: f64) -> f64 {
    ((total * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
}

/// Reference or description names the invoice
///
/// The display number matches as a case-insensitive substring. The numeric
/// id matches a whole digit run with leading zeros ignored, so `INV-2025-042`
/// names invoice 42 while `1425` does not.
fn mentions_invoice(transaction: &Transaction, invoice: &Invoice) -> bool {
    let haystacks = [transaction.reference.as_str(), transaction.description.as_str()];

    if let Some(number) = invoice
        .invoice_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        let needle = number.to_lowercase();
        if haystacks
            .iter()
            .any(|hay| hay.to_lowercase().contains(&needle))
        {
            return true;
        }
    }

    let id = invoice.id.to_string();
    haystacks.iter().any(|hay| {
        hay.split(|c: char| !c.is_ascii_digit())
            .filter(|run| !run.is_empty())
            .any(|run| {
                let trimmed = run.trim_start_matches('0');
                let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
                trimmed == id
            })
    })
}

/// Description or reference contains the invoice's client name
fn mentions_client(transaction: &Transaction, invoice: &Invoice) -> bool {
    let name = invoice.client_name.trim().to_lowercase();
    if name.is_empty() {
        return false;
    }

    [transaction.description.as_str(), transaction.reference.as_str()]
        .iter()
        .any(|hay| hay.to_lowercase().contains(&name))
}
