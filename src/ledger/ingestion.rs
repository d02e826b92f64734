//! Idempotent, append-only transaction ingestion

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::normalizer::{self, RawPayload};
use crate::traits::*;
use crate::types::*;

/// Ingestion ledger deduplicating transactions per tenant
///
/// The `(tenant_id, source_type, external_id)` key is the only
/// deduplication mechanism. Stored rows are never updated: a provider resend
/// with cosmetic changes returns the original row as a duplicate.
pub struct IngestionLedger<S: TransactionStore> {
    storage: S,
    validator: Box<dyn TransactionValidator>,
    conflict_retries: u32,
}

impl<S: TransactionStore> IngestionLedger<S> {
    /// Create a new ingestion ledger
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultTransactionValidator),
            conflict_retries: 3,
        }
    }

    /// Create a new ingestion ledger with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn TransactionValidator>) -> Self {
        Self {
            storage,
            validator,
            conflict_retries: 3,
        }
    }

    /// Set how often an unresolved insert conflict is retried
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Store a normalized transaction unless it was seen before
    ///
    /// `ingested_at` is stamped here, replacing whatever the caller set.
    pub async fn ingest(&self, mut transaction: Transaction) -> ReconResult<IngestOutcome> {
        self.validator.validate_transaction(&transaction)?;
        transaction.ingested_at = Utc::now();

        let mut retries = 0;
        loop {
            match self.storage.insert_if_absent(&transaction).await {
                Ok(outcome) => {
                    debug!(
                        tenant_id = %transaction.tenant_id,
                        source = %transaction.source_type,
                        external_id = %transaction.external_id,
                        duplicate = outcome.is_duplicate(),
                        "ingested transaction"
                    );
                    return Ok(outcome);
                }
                Err(ReconError::Conflict(detail)) => {
                    if let Some(existing) = self
                        .storage
                        .find_by_external_id(
                            &transaction.tenant_id,
                            transaction.source_type,
                            &transaction.external_id,
                        )
                        .await?
                    {
                        debug!(
                            external_id = %transaction.external_id,
                            "concurrent insert resolved as duplicate"
                        );
                        return Ok(IngestOutcome::Duplicate(existing));
                    }

                    if retries >= self.conflict_retries {
                        return Err(ReconError::Storage(format!(
                            "insert of {} {} unresolved after {} retries: {}",
                            transaction.source_type, transaction.external_id, retries, detail
                        )));
                    }
                    retries += 1;
                    warn!(
                        external_id = %transaction.external_id,
                        retries,
                        %detail,
                        "insert conflict without visible row, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Normalize a raw payload and ingest it
    pub async fn ingest_payload(&self, payload: &RawPayload) -> ReconResult<IngestOutcome> {
        let transaction = normalizer::normalize(payload)?;
        self.ingest(transaction).await
    }

    /// Get a transaction by ID
    pub async fn get_transaction(&self, transaction_id: Uuid) -> ReconResult<Option<Transaction>> {
        self.storage.get_transaction(transaction_id).await
    }

    /// Get a transaction by ID, returning an error if not found
    pub async fn get_transaction_required(&self, transaction_id: Uuid) -> ReconResult<Transaction> {
        self.storage
            .get_transaction(transaction_id)
            .await?
            .ok_or(ReconError::TransactionNotFound(transaction_id))
    }

    /// Look up a transaction by its deduplication key
    pub async fn find(
        &self,
        tenant_id: &str,
        source_type: SourceType,
        external_id: &str,
    ) -> ReconResult<Option<Transaction>> {
        self.storage
            .find_by_external_id(tenant_id, source_type, external_id)
            .await
    }

    /// List every transaction of a tenant
    pub async fn list_transactions(&self, tenant_id: &str) -> ReconResult<Vec<Transaction>> {
        self.storage.list_transactions(tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use crate::utils::validation::StrictTransactionValidator;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn payload(external_id: &str, amount: &str) -> RawPayload {
        RawPayload::bank(
            "tenant-a",
            "acc-1",
            json!({
                "transactionId": external_id,
                "bookingDate": "2025-03-10",
                "transactionAmount": { "amount": amount, "currency": "GBP" },
                "remittanceInformationUnstructured": "INV-2025-042"
            }),
        )
    }

    /// Store whose first inserts lose a race against another writer
    struct RacingStore {
        inner: MemoryStorage,
        conflicts_left: AtomicUsize,
        winner_visible: bool,
    }

    #[async_trait]
    impl TransactionStore for RacingStore {
        async fn insert_if_absent(&self, transaction: &Transaction) -> ReconResult<IngestOutcome> {
            if self.conflicts_left.load(Ordering::SeqCst) > 0 {
                self.conflicts_left.fetch_sub(1, Ordering::SeqCst);
                if self.winner_visible {
                    let mut winner = transaction.clone();
                    winner.id = Uuid::new_v4();
                    self.inner.insert_if_absent(&winner).await?;
                }
                return Err(ReconError::Conflict("unique violation".to_string()));
            }
            self.inner.insert_if_absent(transaction).await
        }

        async fn get_transaction(&self, id: Uuid) -> ReconResult<Option<Transaction>> {
            self.inner.get_transaction(id).await
        }

        async fn find_by_external_id(
            &self,
            tenant_id: &str,
            source_type: SourceType,
            external_id: &str,
        ) -> ReconResult<Option<Transaction>> {
            self.inner
                .find_by_external_id(tenant_id, source_type, external_id)
                .await
        }

        async fn list_transactions(&self, tenant_id: &str) -> ReconResult<Vec<Transaction>> {
            self.inner.list_transactions(tenant_id).await
        }
    }

    #[tokio::test]
    async fn test_ingest_twice_is_duplicate() {
        let storage = MemoryStorage::new();
        let ledger = IngestionLedger::new(storage.clone());

        let first = ledger.ingest_payload(&payload("gc-1", "150.00")).await.unwrap();
        let second = ledger.ingest_payload(&payload("gc-1", "150.00")).await.unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.transaction().id, second.transaction().id);
        assert_eq!(storage.transaction_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_stamps_ingested_at() {
        let ledger = IngestionLedger::new(MemoryStorage::new());
        let mut transaction = normalizer::normalize(&payload("gc-1", "150.00")).unwrap();
        transaction.ingested_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

        let before = Utc::now();
        let stored = ledger.ingest(transaction).await.unwrap();
        assert!(stored.transaction().ingested_at >= before);

        let found = ledger
            .find("tenant-a", SourceType::Bank, "gc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.ingested_at, stored.transaction().ingested_at);
    }

    #[tokio::test]
    async fn test_resend_never_overwrites_financial_fields() {
        let ledger = IngestionLedger::new(MemoryStorage::new());

        ledger.ingest_payload(&payload("gc-1", "150.00")).await.unwrap();
        let resend = ledger.ingest_payload(&payload("gc-1", "999.00")).await.unwrap();

        assert!(resend.is_duplicate());
        assert_eq!(resend.transaction().amount, 15_000);
    }

    #[tokio::test]
    async fn test_conflict_resolves_to_duplicate() {
        let store = RacingStore {
            inner: MemoryStorage::new(),
            conflicts_left: AtomicUsize::new(1),
            winner_visible: true,
        };
        let ledger = IngestionLedger::new(store);

        let outcome = ledger.ingest_payload(&payload("gc-1", "150.00")).await.unwrap();
        assert!(outcome.is_duplicate());
    }

    #[tokio::test]
    async fn test_conflict_retries_then_inserts() {
        let store = RacingStore {
            inner: MemoryStorage::new(),
            conflicts_left: AtomicUsize::new(2),
            winner_visible: false,
        };
        let ledger = IngestionLedger::new(store);

        let outcome = ledger.ingest_payload(&payload("gc-1", "150.00")).await.unwrap();
        assert!(!outcome.is_duplicate());
    }

    #[tokio::test]
    async fn test_conflict_retries_exhausted() {
        let store = RacingStore {
            inner: MemoryStorage::new(),
            conflicts_left: AtomicUsize::new(10),
            winner_visible: false,
        };
        let ledger = IngestionLedger::new(store).with_conflict_retries(2);

        let result = ledger.ingest_payload(&payload("gc-1", "150.00")).await;
        assert!(matches!(result, Err(ReconError::Storage(_))));
    }

    #[tokio::test]
    async fn test_concurrent_ingest_stores_one_row() {
        let storage = MemoryStorage::new();
        let ledger = Arc::new(IngestionLedger::new(storage.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.ingest_payload(&payload("gc-race", "10.00")).await
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if !handle.await.unwrap().unwrap().is_duplicate() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(storage.transaction_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validator_rejects_before_storage() {
        let storage = MemoryStorage::new();
        let ledger = IngestionLedger::with_validator(
            storage.clone(),
            Box::new(StrictTransactionValidator),
        );

        let result = ledger.ingest_payload(&payload("gc-0", "0.00")).await;
        assert!(matches!(result, Err(ReconError::Validation(_))));
        assert_eq!(storage.transaction_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_operations() {
        let ledger = IngestionLedger::new(MemoryStorage::new());
        let stored = ledger
            .ingest_payload(&payload("gc-1", "1.00"))
            .await
            .unwrap()
            .transaction()
            .clone();

        let found = ledger
            .find("tenant-a", SourceType::Bank, "gc-1")
            .await
            .unwrap();
        assert_eq!(found, Some(stored.clone()));
        assert!(ledger
            .find("tenant-b", SourceType::Bank, "gc-1")
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            ledger.get_transaction_required(Uuid::new_v4()).await,
            Err(ReconError::TransactionNotFound(_))
        ));
        assert_eq!(ledger.list_transactions("tenant-a").await.unwrap().len(), 1);
    }
}
