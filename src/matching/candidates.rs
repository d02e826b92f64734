//! Candidate invoice selection

use std::collections::HashSet;

use super::{amount_difference, same_currency, tolerance_for};
use crate::config::MatchingConfig;
use crate::types::*;

/// Narrows the unpaid invoice set to the invoices worth scoring
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    matching: MatchingConfig,
}

impl CandidateSelector {
    pub fn new(matching: MatchingConfig) -> Self {
        Self { matching }
    }

    /// Select the invoices a transaction could plausibly pay
    ///
    /// Keeps same-tenant, same-currency, payable invoices whose outstanding
    /// amount lies within the tolerance band and that are not already linked
    /// to an applied suggestion. Closest amounts come first, then the most
    /// recent due date, then the lowest id; the result is capped at
    /// `max_candidates`. Outflows never have candidates.
    pub fn select(
        &self,
        transaction: &Transaction,
        invoices: &[Invoice],
        applied_invoice_ids: &HashSet<u64>,
    ) -> Vec<Invoice> {
        if !transaction.is_inflow() {
            return Vec::new();
        }

        let tolerance = tolerance_for(transaction, &self.matching);

        let mut eligible: Vec<(i64, &Invoice)> = invoices
            .iter()
            .filter(|invoice| invoice.tenant_id == transaction.tenant_id)
            .filter(|invoice| same_currency(transaction, invoice))
            .filter(|invoice| invoice.status.is_payable())
            .filter(|invoice| !applied_invoice_ids.contains(&invoice.id))
            .map(|invoice| (amount_difference(transaction, invoice), invoice))
            .filter(|(difference, _)| *difference <= tolerance)
            .collect();

        eligible.sort_by(|(da, a), (db, b)| {
            da.cmp(db)
                .then_with(|| b.due_date.cmp(&a.due_date))
                .then_with(|| a.id.cmp(&b.id))
        });

        eligible
            .into_iter()
            .take(self.matching.max_candidates)
            .map(|(_, invoice)| invoice.clone())
            .collect()
    }
}
