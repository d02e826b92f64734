//! Per-batch reconciliation report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a single payload of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Provider payload could not be normalized; skipped
    Malformed { reason: String },
    /// Already ingested earlier; not matched again
    Duplicate { transaction_id: Uuid },
    /// Outflow or reversal; never matched to an invoice
    NotMatchable { transaction_id: Uuid },
    /// No unpaid invoice within tolerance
    NoCandidates { transaction_id: Uuid },
    /// Best candidate scored under the suggestion floor
    BelowThreshold {
        transaction_id: Uuid,
        best_confidence: f64,
    },
    /// A pending suggestion awaits review
    Suggested {
        transaction_id: Uuid,
        suggestion_id: Uuid,
        invoice_id: u64,
        confidence: f64,
    },
    /// Auto-approved and posted to the billing system
    Applied {
        transaction_id: Uuid,
        suggestion_id: Uuid,
        invoice_id: u64,
    },
    /// Auto-approved but the billing system refused; left approved for retry
    ApplyFailed {
        transaction_id: Uuid,
        suggestion_id: Uuid,
        reason: String,
    },
    /// Processing of this item aborted on an error
    Failed { error: String },
}

impl ItemOutcome {
    /// Whether the transaction stays in the unmatched queue
    pub fn is_unmatched(&self) -> bool {
        matches!(
            self,
            ItemOutcome::NoCandidates { .. } | ItemOutcome::BelowThreshold { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    /// Provider id when it could be read from the payload
    pub external_id: Option<String>,
    pub outcome: ItemOutcome,
}

/// Outcome of one polling tick or webhook delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
    /// Cursor for the next poll
    ///
    /// Latest `occurred_at` among stored items, held back to the earliest
    /// `occurred_at` of any item the ledger failed to store.
    pub next_cursor: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn malformed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Malformed { .. }))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Duplicate { .. }))
    }

    pub fn unmatched(&self) -> usize {
        self.count(ItemOutcome::is_unmatched)
    }

    pub fn suggested(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Suggested { .. }))
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Applied { .. }))
    }

    pub fn apply_failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::ApplyFailed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// Outcomes in payload order
    pub fn outcomes(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().map(|item| &item.outcome)
    }

    pub(crate) fn push(&mut self, external_id: Option<String>, outcome: ItemOutcome) {
        self.items.push(ItemReport {
            external_id,
            outcome,
        });
    }

    pub(crate) fn advance_cursor(&mut self, occurred_at: DateTime<Utc>) {
        if self.next_cursor.is_none_or(|cursor| occurred_at > cursor) {
            self.next_cursor = Some(occurred_at);
        }
    }

    /// Cap the cursor so the next poll fetches `occurred_at` again
    pub(crate) fn hold_cursor(&mut self, occurred_at: DateTime<Utc>) {
        if self.next_cursor.is_none_or(|cursor| occurred_at < cursor) {
            self.next_cursor = Some(occurred_at);
        }
    }

    fn count(&self, predicate: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.outcomes().filter(|&o| predicate(o)).count()
    }
}
