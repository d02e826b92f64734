//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

type DedupKey = (String, SourceType, String);

#[derive(Debug, Default)]
struct TransactionTable {
    rows: Vec<Transaction>,
    by_id: HashMap<Uuid, usize>,
    by_key: HashMap<DedupKey, usize>,
}

#[derive(Debug, Default)]
struct SuggestionTable {
    rows: Vec<MatchSuggestion>,
    by_id: HashMap<Uuid, usize>,
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same tables. Each table sits behind one lock, so
/// insert-if-absent and the applied uniqueness check are atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    transactions: Arc<RwLock<TransactionTable>>,
    suggestions: Arc<RwLock<SuggestionTable>>,
    failing_inserts: Arc<RwLock<Vec<String>>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> ReconResult<()> {
        *write(&self.transactions)? = TransactionTable::default();
        *write(&self.suggestions)? = SuggestionTable::default();
        Ok(())
    }

    /// Number of stored transactions across all tenants
    pub fn transaction_count(&self) -> ReconResult<usize> {
        Ok(read(&self.transactions)?.rows.len())
    }

    /// Number of stored suggestions across all tenants
    pub fn suggestion_count(&self) -> ReconResult<usize> {
        Ok(read(&self.suggestions)?.rows.len())
    }

    /// Make the next insert of `external_id` fail with a storage error
    pub fn fail_next_insert(&self, external_id: impl Into<String>) -> ReconResult<()> {
        write(&self.failing_inserts)?.push(external_id.into());
        Ok(())
    }

    /// Store a suggestion skipping the active-suggestion check, to stage races
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&self, suggestion: MatchSuggestion) -> ReconResult<()> {
        let mut table = write(&self.suggestions)?;
        let idx = table.rows.len();
        table.by_id.insert(suggestion.id, idx);
        table.rows.push(suggestion);
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> ReconResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| ReconError::Storage("storage lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> ReconResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| ReconError::Storage("storage lock poisoned".to_string()))
}

#[async_trait]
impl TransactionStore for MemoryStorage {
    async fn insert_if_absent(&self, transaction: &Transaction) -> ReconResult<IngestOutcome> {
        {
            let mut failing = write(&self.failing_inserts)?;
            if let Some(pos) = failing.iter().position(|id| *id == transaction.external_id) {
                failing.remove(pos);
                return Err(ReconError::Storage(format!(
                    "insert of {} failed",
                    transaction.external_id
                )));
            }
        }

        let mut table = write(&self.transactions)?;

        if let Some(&idx) = table.by_key.get(&transaction.dedup_key()) {
            return Ok(IngestOutcome::Duplicate(table.rows[idx].clone()));
        }

        if table.by_id.contains_key(&transaction.id) {
            return Err(ReconError::Conflict(format!(
                "transaction id {} already used",
                transaction.id
            )));
        }

        let idx = table.rows.len();
        table.rows.push(transaction.clone());
        table.by_id.insert(transaction.id, idx);
        table.by_key.insert(transaction.dedup_key(), idx);
        Ok(IngestOutcome::Inserted(transaction.clone()))
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> ReconResult<Option<Transaction>> {
        let table = read(&self.transactions)?;
        Ok(table
            .by_id
            .get(&transaction_id)
            .map(|&idx| table.rows[idx].clone()))
    }

    async fn find_by_external_id(
        &self,
        tenant_id: &str,
        source_type: SourceType,
        external_id: &str,
    ) -> ReconResult<Option<Transaction>> {
        let table = read(&self.transactions)?;
        let key = (tenant_id.to_string(), source_type, external_id.to_string());
        Ok(table.by_key.get(&key).map(|&idx| table.rows[idx].clone()))
    }

    async fn list_transactions(&self, tenant_id: &str) -> ReconResult<Vec<Transaction>> {
        let table = read(&self.transactions)?;
        Ok(table
            .rows
            .iter()
            .filter(|txn| txn.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SuggestionStore for MemoryStorage {
    async fn insert_suggestion(&self, suggestion: &MatchSuggestion) -> ReconResult<()> {
        let mut table = write(&self.suggestions)?;

        for existing in table
            .rows
            .iter()
            .filter(|s| s.transaction_id == suggestion.transaction_id)
        {
            if existing.status == SuggestionStatus::Applied {
                return Err(ReconError::InvariantViolation(format!(
                    "transaction {} already applied to invoice {} via suggestion {}",
                    existing.transaction_id, existing.invoice_id, existing.id
                )));
            }
            if existing.status.is_active() {
                return Err(ReconError::ActiveSuggestionExists {
                    transaction_id: existing.transaction_id,
                    suggestion_id: existing.id,
                });
            }
        }

        if table.by_id.contains_key(&suggestion.id) {
            return Err(ReconError::Conflict(format!(
                "suggestion id {} already used",
                suggestion.id
            )));
        }

        let idx = table.rows.len();
        table.rows.push(suggestion.clone());
        table.by_id.insert(suggestion.id, idx);
        Ok(())
    }

    async fn get_suggestion(&self, suggestion_id: Uuid) -> ReconResult<Option<MatchSuggestion>> {
        let table = read(&self.suggestions)?;
        Ok(table
            .by_id
            .get(&suggestion_id)
            .map(|&idx| table.rows[idx].clone()))
    }

    async fn suggestions_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> ReconResult<Vec<MatchSuggestion>> {
        let table = read(&self.suggestions)?;
        Ok(table
            .rows
            .iter()
            .filter(|s| s.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn list_by_status(
        &self,
        tenant_id: &str,
        status: SuggestionStatus,
    ) -> ReconResult<Vec<MatchSuggestion>> {
        let table = read(&self.suggestions)?;
        Ok(table
            .rows
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.status == status)
            .cloned()
            .collect())
    }

    async fn applied_invoice_ids(&self, tenant_id: &str) -> ReconResult<HashSet<u64>> {
        let table = read(&self.suggestions)?;
        Ok(table
            .rows
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.status == SuggestionStatus::Applied)
            .map(|s| s.invoice_id)
            .collect())
    }

    async fn transition(
        &self,
        suggestion_id: Uuid,
        expected: SuggestionStatus,
        change: StatusChange,
    ) -> ReconResult<MatchSuggestion> {
        let mut table = write(&self.suggestions)?;
        let idx = *table
            .by_id
            .get(&suggestion_id)
            .ok_or(ReconError::SuggestionNotFound(suggestion_id))?;

        let current = table.rows[idx].status;
        if current != expected || !current.can_transition_to(change.to) {
            return Err(ReconError::InvalidTransition {
                suggestion_id,
                from: current,
                to: change.to,
            });
        }

        if change.to == SuggestionStatus::Applied {
            let transaction_id = table.rows[idx].transaction_id;
            if let Some(other) = table.rows.iter().find(|s| {
                s.transaction_id == transaction_id
                    && s.status == SuggestionStatus::Applied
                    && s.id != suggestion_id
            }) {
                return Err(ReconError::InvariantViolation(format!(
                    "transaction {} already applied to invoice {} via suggestion {}",
                    transaction_id, other.invoice_id, other.id
                )));
            }
        }

        let row = &mut table.rows[idx];
        row.status = change.to;
        if change.to == SuggestionStatus::Applied {
            row.applied_at = Some(change.at);
            row.last_apply_error = None;
            row.apply_in_flight = false;
        } else {
            row.decided_at = Some(change.at);
            row.decided_by = change.actor;
        }
        Ok(row.clone())
    }

    async fn claim_apply(&self, suggestion_id: Uuid) -> ReconResult<MatchSuggestion> {
        let mut table = write(&self.suggestions)?;
        let idx = *table
            .by_id
            .get(&suggestion_id)
            .ok_or(ReconError::SuggestionNotFound(suggestion_id))?;

        let current = &table.rows[idx];
        if current.status != SuggestionStatus::Approved {
            return Err(ReconError::InvalidTransition {
                suggestion_id,
                from: current.status,
                to: SuggestionStatus::Applied,
            });
        }
        if current.apply_in_flight {
            return Err(ReconError::ApplyInProgress(suggestion_id));
        }

        let transaction_id = current.transaction_id;
        if let Some(other) = table
            .rows
            .iter()
            .find(|s| s.transaction_id == transaction_id && s.status == SuggestionStatus::Applied)
        {
            return Err(ReconError::InvariantViolation(format!(
                "transaction {} already applied to invoice {} via suggestion {}",
                transaction_id, other.invoice_id, other.id
            )));
        }

        let row = &mut table.rows[idx];
        row.apply_in_flight = true;
        Ok(row.clone())
    }

    async fn release_apply(
        &self,
        suggestion_id: Uuid,
        reason: Option<String>,
    ) -> ReconResult<MatchSuggestion> {
        let mut table = write(&self.suggestions)?;
        let idx = *table
            .by_id
            .get(&suggestion_id)
            .ok_or(ReconError::SuggestionNotFound(suggestion_id))?;

        let row = &mut table.rows[idx];
        row.apply_in_flight = false;
        if reason.is_some() {
            row.last_apply_error = reason;
        }
        Ok(row.clone())
    }
}
