//! Integration tests for payment-recon-core

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use payment_recon_core::{
    utils::{MemoryBilling, MemoryFeed, MemoryStorage},
    ApplyPaymentRequest, ApplyPaymentResult, BillingSystem, Decision, Invoice, InvoiceStatus,
    ItemOutcome, MatchReason, RawPayload, ReconError, ReconResult, ReconciliationConfig,
    ReconciliationEngine, SourceType, SuggestionStatus, TransactionFeed, AUTO_APPROVE_ACTOR,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type Engine = ReconciliationEngine<MemoryStorage, MemoryBilling>;

fn invoice_42(tenant_id: &str) -> Invoice {
    Invoice::new(
        42,
        tenant_id.to_string(),
        "Acme Ltd".to_string(),
        15_000,
        "GBP".to_string(),
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
    )
    .with_number("INV-2025-042")
}

fn bank_payload(
    tenant_id: &str,
    external_id: &str,
    amount: &str,
    reference: &str,
    booking_date: &str,
) -> RawPayload {
    RawPayload::bank(
        tenant_id,
        "acc-main",
        json!({
            "transactionId": external_id,
            "bookingDate": booking_date,
            "transactionAmount": { "amount": amount, "currency": "GBP" },
            "remittanceInformationUnstructured": reference
        }),
    )
}

fn scenario_a_payload(external_id: &str) -> RawPayload {
    bank_payload(
        "tenant-a",
        external_id,
        "150.00",
        "INV-2025-042 payment",
        "2025-03-08",
    )
}

fn scenario_b_payload() -> RawPayload {
    bank_payload(
        "tenant-a",
        "gc-149",
        "149.50",
        "March services",
        "2025-01-01",
    )
}

fn setup(config: ReconciliationConfig) -> (Engine, MemoryStorage, MemoryBilling) {
    let storage = MemoryStorage::new();
    let billing = MemoryBilling::new();
    billing.add_invoice(invoice_42("tenant-a")).unwrap();
    let engine = ReconciliationEngine::new(storage.clone(), billing.clone(), config).unwrap();
    (engine, storage, billing)
}

fn suggested_id(outcome: &ItemOutcome) -> Uuid {
    match outcome {
        ItemOutcome::Suggested { suggestion_id, .. } => *suggestion_id,
        other => panic!("expected a suggestion, got {:?}", other),
    }
}

fn day(date: &str) -> DateTime<Utc> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
}

#[tokio::test]
async fn test_exact_amount_and_reference_suggested() {
    let (engine, _, _) = setup(ReconciliationConfig::default());

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    assert_eq!(report.suggested(), 1);

    let pending = engine.list_pending("tenant-a").await.unwrap();
    assert_eq!(pending.len(), 1);
    let suggestion = &pending[0];
    assert_eq!(suggestion.id, suggested_id(&report.items[0].outcome));
    assert_eq!(suggestion.invoice_id, 42);
    assert!(suggestion.confidence >= 0.9);
    assert!(suggestion.reasons.contains(&MatchReason::AmountExactMatch));
    assert!(suggestion
        .reasons
        .contains(&MatchReason::ReferenceContainsInvoiceId));
    assert!(suggestion.reasons.contains(&MatchReason::DateProximity));
}

#[tokio::test]
async fn test_close_amount_only_stays_unmatched() {
    let (engine, storage, _) = setup(ReconciliationConfig::default());

    let report = engine.process_batch(vec![scenario_b_payload()]).await;
    match &report.items[0].outcome {
        ItemOutcome::BelowThreshold {
            best_confidence, ..
        } => assert!((best_confidence - 0.4).abs() < 1e-9),
        other => panic!("expected below threshold, got {:?}", other),
    }

    assert!(engine.list_pending("tenant-a").await.unwrap().is_empty());
    assert_eq!(storage.suggestion_count().unwrap(), 0);

    let unmatched = engine.list_unmatched("tenant-a").await.unwrap();
    assert_eq!(unmatched.len(), 1);

    let ranked = engine.rank_candidates(&unmatched[0]).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].reasons, vec![MatchReason::AmountCloseMatch]);
}

#[tokio::test]
async fn test_webhook_then_poll_stores_one_row() {
    let (engine, storage, _) = setup(ReconciliationConfig::default());
    let feed = MemoryFeed::new();
    feed.push(day("2025-03-08"), scenario_a_payload("gc-1"))
        .unwrap();

    let pushed = engine.on_webhook_event(scenario_a_payload("gc-1")).await;
    assert_eq!(pushed.suggested(), 1);

    let polled = engine
        .poll(&feed, "tenant-a", SourceType::Bank, None)
        .await
        .unwrap();
    assert_eq!(polled.duplicates(), 1);
    assert_eq!(polled.suggested(), 0);

    assert_eq!(storage.transaction_count().unwrap(), 1);
    assert_eq!(storage.suggestion_count().unwrap(), 1);
}

#[tokio::test]
async fn test_approve_applies_and_blocks_second_apply() {
    let (engine, _, billing) = setup(ReconciliationConfig::default());
    billing
        .add_invoice(
            Invoice::new(
                43,
                "tenant-a".to_string(),
                "Acme Ltd".to_string(),
                15_000,
                "GBP".to_string(),
                NaiveDate::from_ymd_opt(2025, 3, 12).unwrap(),
            )
            .with_number("INV-2025-043"),
        )
        .unwrap();

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    let suggestion_id = suggested_id(&report.items[0].outcome);

    let applied = engine
        .decide(suggestion_id, Decision::Approve, "alice")
        .await
        .unwrap();
    assert_eq!(applied.status, SuggestionStatus::Applied);
    assert_eq!(applied.decided_by.as_deref(), Some("alice"));
    assert!(applied.applied_at.is_some());

    let payments = billing.applied_payments().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].invoice_id, 42);
    assert_eq!(payments[0].amount, 15_000);
    assert_eq!(payments[0].external_id, "gc-1");
    assert_eq!(
        billing.invoice(42).unwrap().unwrap().status,
        InvoiceStatus::Paid
    );

    let again = engine
        .decide(suggestion_id, Decision::Approve, "alice")
        .await;
    assert!(matches!(again, Err(ReconError::InvalidTransition { .. })));

    let second = engine
        .suggest_manually(applied.transaction_id, 43, "bob")
        .await;
    assert!(matches!(second, Err(ReconError::InvariantViolation(_))));
    assert_eq!(billing.applied_payments().unwrap().len(), 1);
}

#[tokio::test]
async fn test_approving_rejected_sibling_of_applied_transaction_refused() {
    let (engine, _, billing) = setup(ReconciliationConfig::default());
    billing
        .add_invoice(Invoice::new(
            43,
            "tenant-a".to_string(),
            "Acme Ltd".to_string(),
            15_000,
            "GBP".to_string(),
            NaiveDate::from_ymd_opt(2025, 3, 12).unwrap(),
        ))
        .unwrap();

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    let first_id = suggested_id(&report.items[0].outcome);
    let rejected = engine
        .decide(first_id, Decision::Reject, "alice")
        .await
        .unwrap();

    let manual = engine
        .suggest_manually(rejected.transaction_id, 43, "bob")
        .await
        .unwrap();
    let applied = engine
        .decide(manual.id, Decision::Approve, "bob")
        .await
        .unwrap();
    assert_eq!(applied.status, SuggestionStatus::Applied);

    let result = engine.decide(first_id, Decision::Approve, "alice").await;
    assert!(matches!(result, Err(ReconError::InvariantViolation(_))));

    let payments = billing.applied_payments().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].invoice_id, 43);
}

#[tokio::test]
async fn test_failed_apply_stays_approved_and_retries() {
    let (engine, _, billing) = setup(ReconciliationConfig::default());
    billing.fail_next_apply("invoice locked by billing run").unwrap();

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    let suggestion_id = suggested_id(&report.items[0].outcome);

    let result = engine
        .decide(suggestion_id, Decision::Approve, "alice")
        .await;
    match result {
        Err(ReconError::ApplyPaymentFailed {
            invoice_id, reason, ..
        }) => {
            assert_eq!(invoice_id, 42);
            assert_eq!(reason, "invoice locked by billing run");
        }
        other => panic!("expected apply failure, got {:?}", other),
    }

    let awaiting = engine.list_awaiting_apply("tenant-a").await.unwrap();
    assert_eq!(awaiting.len(), 1);
    assert_eq!(awaiting[0].status, SuggestionStatus::Approved);
    assert_eq!(
        awaiting[0].last_apply_error.as_deref(),
        Some("invoice locked by billing run")
    );
    assert!(billing.applied_payments().unwrap().is_empty());

    let applied = engine.apply_approved(suggestion_id).await.unwrap();
    assert_eq!(applied.status, SuggestionStatus::Applied);
    assert!(applied.last_apply_error.is_none());
    assert!(engine
        .list_awaiting_apply("tenant-a")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unreachable_billing_reported_as_apply_failure() {
    let (engine, _, billing) = setup(ReconciliationConfig::default());
    billing
        .fail_next_apply_unreachable("connection reset")
        .unwrap();

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    let suggestion_id = suggested_id(&report.items[0].outcome);

    let result = engine
        .decide(suggestion_id, Decision::Approve, "alice")
        .await;
    assert!(matches!(result, Err(ReconError::ApplyPaymentFailed { .. })));

    let suggestion = engine
        .review()
        .get_required(suggestion_id)
        .await
        .unwrap();
    assert_eq!(suggestion.status, SuggestionStatus::Approved);
    assert_eq!(
        suggestion.last_apply_error.as_deref(),
        Some("connection reset")
    );
}

#[tokio::test]
async fn test_reject_frees_transaction_for_manual_match() {
    let (engine, _, _) = setup(ReconciliationConfig::default());

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    let suggestion_id = suggested_id(&report.items[0].outcome);

    let rejected = engine
        .decide(suggestion_id, Decision::Reject, "alice")
        .await
        .unwrap();
    assert_eq!(rejected.status, SuggestionStatus::Rejected);

    let unmatched = engine.list_unmatched("tenant-a").await.unwrap();
    assert_eq!(unmatched.len(), 1);

    let manual = engine
        .suggest_manually(unmatched[0].id, 42, "bob")
        .await
        .unwrap();
    assert_eq!(manual.status, SuggestionStatus::Pending);
    assert!(engine.list_unmatched("tenant-a").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_poll_cursor_advances() {
    let (engine, _, _) = setup(ReconciliationConfig::default());
    let feed = MemoryFeed::new();
    feed.push(
        day("2025-03-05"),
        bank_payload("tenant-a", "gc-1", "12.00", "coffee", "2025-03-05"),
    )
    .unwrap();
    feed.push(
        day("2025-03-08"),
        bank_payload("tenant-a", "gc-2", "150.00", "INV-2025-042", "2025-03-08"),
    )
    .unwrap();

    let first = engine
        .poll(&feed, "tenant-a", SourceType::Bank, None)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first.next_cursor, Some(day("2025-03-08")));

    // inclusive window: the newest row comes back and is deduplicated
    let second = engine
        .poll(&feed, "tenant-a", SourceType::Bank, first.next_cursor)
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second.duplicates(), 1);
    assert_eq!(second.next_cursor, Some(day("2025-03-08")));

    let stripe = engine
        .poll(&feed, "tenant-a", SourceType::Stripe, first.next_cursor)
        .await
        .unwrap();
    assert!(stripe.is_empty());
    assert_eq!(stripe.next_cursor, first.next_cursor);
}

#[tokio::test]
async fn test_unstored_transaction_fetched_again_by_next_poll() {
    let (engine, storage, _) = setup(ReconciliationConfig::default());
    let feed = MemoryFeed::new();
    feed.push(
        day("2025-03-05"),
        bank_payload("tenant-a", "gc-early", "12.00", "coffee", "2025-03-05"),
    )
    .unwrap();
    feed.push(
        day("2025-03-08"),
        bank_payload("tenant-a", "gc-late", "150.00", "INV-2025-042", "2025-03-08"),
    )
    .unwrap();
    storage.fail_next_insert("gc-early").unwrap();

    let first = engine
        .poll(&feed, "tenant-a", SourceType::Bank, None)
        .await
        .unwrap();
    assert_eq!(first.failed(), 1);
    assert_eq!(first.next_cursor, Some(day("2025-03-05")));

    let second = engine
        .poll(&feed, "tenant-a", SourceType::Bank, first.next_cursor)
        .await
        .unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second.failed(), 0);
    assert_eq!(second.duplicates(), 1);
    assert_eq!(second.next_cursor, Some(day("2025-03-08")));
    assert!(engine
        .ledger()
        .find("tenant-a", SourceType::Bank, "gc-early")
        .await
        .unwrap()
        .is_some());
    assert_eq!(storage.transaction_count().unwrap(), 2);
}

#[tokio::test]
async fn test_poll_feed_failure_surfaces() {
    let (engine, _, _) = setup(ReconciliationConfig::default());
    let feed = MemoryFeed::new();
    feed.fail_next("gocardless rate limited").unwrap();

    let result = engine
        .poll(&feed, "tenant-a", SourceType::Bank, None)
        .await;
    assert!(matches!(result, Err(ReconError::Feed(_))));
}

#[tokio::test]
async fn test_manual_suggestion_below_floor() {
    let (engine, _, billing) = setup(ReconciliationConfig::default());

    engine.process_batch(vec![scenario_b_payload()]).await;
    let transaction = engine
        .ledger()
        .find("tenant-a", SourceType::Bank, "gc-149")
        .await
        .unwrap()
        .unwrap();

    let suggestion = engine
        .suggest_manually(transaction.id, 42, "bob")
        .await
        .unwrap();
    assert_eq!(suggestion.status, SuggestionStatus::Pending);
    assert!((suggestion.confidence - 0.4).abs() < 1e-9);
    assert!(suggestion.reasons.contains(&MatchReason::AmountCloseMatch));
    assert!(suggestion.reasons.contains(&MatchReason::ManualSelection));

    let applied = engine
        .decide(suggestion.id, Decision::Approve, "bob")
        .await
        .unwrap();
    assert_eq!(applied.status, SuggestionStatus::Applied);

    let invoice = billing.invoice(42).unwrap().unwrap();
    assert_eq!(invoice.amount_paid, 14_950);
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn test_outflows_never_matched() {
    let (engine, storage, _) = setup(ReconciliationConfig::default());

    let report = engine
        .process_batch(vec![bank_payload(
            "tenant-a",
            "gc-out",
            "-150.00",
            "INV-2025-042 refund",
            "2025-03-08",
        )])
        .await;

    assert!(matches!(
        report.items[0].outcome,
        ItemOutcome::NotMatchable { .. }
    ));
    assert_eq!(storage.transaction_count().unwrap(), 1);
    assert_eq!(storage.suggestion_count().unwrap(), 0);
    assert!(engine.list_unmatched("tenant-a").await.unwrap().is_empty());

    let transaction = engine
        .ledger()
        .find("tenant-a", SourceType::Bank, "gc-out")
        .await
        .unwrap()
        .unwrap();
    assert!(engine
        .select_candidates(&transaction)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        engine.suggest_manually(transaction.id, 42, "bob").await,
        Err(ReconError::Validation(_))
    ));
}

#[tokio::test]
async fn test_auto_approve_applies_high_confidence() {
    let config = ReconciliationConfig::default().with_auto_approve_threshold(0.9);
    let (engine, _, billing) = setup(config);

    let report = engine
        .process_batch(vec![scenario_a_payload("gc-1"), scenario_b_payload()])
        .await;
    assert_eq!(report.applied(), 1);
    assert_eq!(report.unmatched(), 1);

    let suggestion_id = match &report.items[0].outcome {
        ItemOutcome::Applied { suggestion_id, .. } => *suggestion_id,
        other => panic!("expected applied, got {:?}", other),
    };
    let suggestion = engine
        .review()
        .get_required(suggestion_id)
        .await
        .unwrap();
    assert_eq!(suggestion.status, SuggestionStatus::Applied);
    assert_eq!(suggestion.decided_by.as_deref(), Some(AUTO_APPROVE_ACTOR));
    assert_eq!(billing.applied_payments().unwrap().len(), 1);
}

#[tokio::test]
async fn test_auto_approve_apply_failure_reported() {
    let config = ReconciliationConfig::default().with_auto_approve_threshold(0.9);
    let (engine, _, billing) = setup(config);
    billing.fail_next_apply("invoice locked").unwrap();

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    assert_eq!(report.apply_failed(), 1);
    assert_eq!(
        engine.list_awaiting_apply("tenant-a").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_malformed_payload_does_not_abort_batch() {
    let (engine, _, _) = setup(ReconciliationConfig::default());

    let report = engine
        .process_batch(vec![
            RawPayload::bank(
                "tenant-a",
                "acc-main",
                json!({ "transactionId": "gc-bad", "bookingDate": "2025-03-08" }),
            ),
            RawPayload::stripe(
                "tenant-a",
                "acct_1",
                json!({ "id": "ch_1", "object": "charge", "amount": 100, "currency": "usd" }),
            ),
            scenario_a_payload("gc-1"),
        ])
        .await;

    assert_eq!(report.len(), 3);
    assert_eq!(report.malformed(), 2);
    assert_eq!(report.suggested(), 1);
    assert_eq!(report.items[0].external_id.as_deref(), Some("gc-bad"));
    assert_eq!(report.items[1].external_id.as_deref(), Some("ch_1"));
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let storage = MemoryStorage::new();
    let billing = MemoryBilling::new();
    billing.add_invoice(invoice_42("tenant-b")).unwrap();
    let engine =
        ReconciliationEngine::new(storage, billing, ReconciliationConfig::default()).unwrap();

    let report = engine
        .process_batch(vec![
            scenario_a_payload("gc-1"),
            bank_payload(
                "tenant-b",
                "gc-1",
                "150.00",
                "INV-2025-042 payment",
                "2025-03-08",
            ),
        ])
        .await;

    assert!(matches!(
        report.items[0].outcome,
        ItemOutcome::NoCandidates { .. }
    ));
    assert!(matches!(
        report.items[1].outcome,
        ItemOutcome::Suggested { .. }
    ));
    assert!(engine.list_pending("tenant-a").await.unwrap().is_empty());
    assert_eq!(engine.list_pending("tenant-b").await.unwrap().len(), 1);
    assert_eq!(engine.list_unmatched("tenant-a").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_feed_payload_of_other_tenant_refused() {
    let (engine, storage, _) = setup(ReconciliationConfig::default());
    let feed = MemoryFeed::new();
    feed.push(day("2025-03-08"), scenario_a_payload("gc-1"))
        .unwrap();

    // a feed that ignores the tenant filter
    let report = engine
        .poll(&LeakyFeed(feed), "tenant-b", SourceType::Bank, None)
        .await
        .unwrap();
    assert_eq!(report.malformed(), 1);
    assert_eq!(storage.transaction_count().unwrap(), 0);
}

struct LeakyFeed(MemoryFeed);

#[async_trait::async_trait]
impl TransactionFeed for LeakyFeed {
    async fn fetch_new_transactions(
        &self,
        _tenant_id: &str,
        source_type: SourceType,
        since: Option<DateTime<Utc>>,
    ) -> ReconResult<Vec<RawPayload>> {
        self.0
            .fetch_new_transactions("tenant-a", source_type, since)
            .await
    }
}

#[tokio::test]
async fn test_ranking_is_deterministic_and_bounded() {
    let (engine, _, billing) = setup(ReconciliationConfig::default());
    for id in [7, 3, 9] {
        billing
            .add_invoice(Invoice::new(
                id,
                "tenant-a".to_string(),
                "Acme Ltd".to_string(),
                15_000,
                "GBP".to_string(),
                NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            ))
            .unwrap();
    }

    engine.process_batch(vec![scenario_b_payload()]).await;
    let transaction = engine
        .ledger()
        .find("tenant-a", SourceType::Bank, "gc-149")
        .await
        .unwrap()
        .unwrap();

    let first = engine.rank_candidates(&transaction).await.unwrap();
    let second = engine.rank_candidates(&transaction).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.iter().map(|c| c.invoice_id).collect::<Vec<_>>(),
        vec![3, 7, 9, 42]
    );
    assert!(first
        .iter()
        .all(|c| (0.0..=1.0).contains(&c.confidence)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_webhook_and_poll() {
    let (engine, storage, _) = setup(ReconciliationConfig::default());
    let engine = Arc::new(engine);
    let feed = MemoryFeed::new();
    feed.push(day("2025-03-08"), scenario_a_payload("gc-1"))
        .unwrap();

    let webhook = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.on_webhook_event(scenario_a_payload("gc-1")).await })
    };
    let poll = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .poll(&feed, "tenant-a", SourceType::Bank, None)
                .await
                .unwrap()
        })
    };

    let webhook = webhook.await.unwrap();
    let poll = poll.await.unwrap();

    assert_eq!(webhook.duplicates() + poll.duplicates(), 1);
    assert_eq!(webhook.suggested() + poll.suggested(), 1);
    assert_eq!(storage.transaction_count().unwrap(), 1);
    assert_eq!(storage.suggestion_count().unwrap(), 1);
}

/// Billing system that answers apply calls slowly
#[derive(Clone)]
struct SlowBilling(MemoryBilling);

#[async_trait::async_trait]
impl BillingSystem for SlowBilling {
    async fn list_unpaid_invoices(
        &self,
        tenant_id: &str,
        currency: &str,
    ) -> ReconResult<Vec<Invoice>> {
        self.0.list_unpaid_invoices(tenant_id, currency).await
    }

    async fn apply_payment(
        &self,
        request: &ApplyPaymentRequest,
    ) -> ReconResult<ApplyPaymentResult> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.0.apply_payment(request).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_apply_posts_payment_once() {
    let storage = MemoryStorage::new();
    let billing = MemoryBilling::new();
    // stays payable after one 150.00 payment
    billing
        .add_invoice(
            Invoice::new(
                42,
                "tenant-a".to_string(),
                "Acme Ltd".to_string(),
                15_100,
                "GBP".to_string(),
                NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            )
            .with_number("INV-2025-042"),
        )
        .unwrap();
    let engine = ReconciliationEngine::new(
        storage,
        SlowBilling(billing.clone()),
        ReconciliationConfig::default(),
    )
    .unwrap();

    let report = engine.process_batch(vec![scenario_a_payload("gc-1")]).await;
    let transaction = engine
        .ledger()
        .find("tenant-a", SourceType::Bank, "gc-1")
        .await
        .unwrap()
        .unwrap();
    let suggestion_id = match &report.items[0].outcome {
        ItemOutcome::Suggested { suggestion_id, .. } => *suggestion_id,
        _ => {
            engine
                .suggest_manually(transaction.id, 42, "ops")
                .await
                .unwrap()
                .id
        }
    };
    engine
        .review()
        .decide(suggestion_id, Decision::Approve, "alice")
        .await
        .unwrap();

    let engine = Arc::new(engine);
    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.apply_approved(suggestion_id).await })
    };
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.apply_approved(suggestion_id).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(ReconError::ApplyInProgress(_))
            | Err(ReconError::InvalidTransition {
                from: SuggestionStatus::Applied,
                ..
            })
    )));
    assert_eq!(billing.applied_payments().unwrap().len(), 1);

    let stored = engine.review().get_required(suggestion_id).await.unwrap();
    assert_eq!(stored.status, SuggestionStatus::Applied);
    assert!(!stored.apply_in_flight);
}
