//! Reconcile a small mixed batch against an in-memory billing system.
//!
//! ```text
//! RUST_LOG=payment_recon_core=debug cargo run --example reconcile_batch
//! ```

use chrono::NaiveDate;
use payment_recon_core::{
    utils::{format_minor_units, MemoryBilling, MemoryStorage},
    Decision, Invoice, ItemOutcome, RawPayload, ReconResult, ReconciliationConfig,
    ReconciliationEngine,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn sample_invoices(tenant_id: &str) -> Vec<Invoice> {
    let due = |d| NaiveDate::from_ymd_opt(2025, 3, d).unwrap_or_default();
    vec![
        Invoice::new(
            42,
            tenant_id.to_string(),
            "Acme Ltd".to_string(),
            15_000,
            "GBP".to_string(),
            due(10),
        )
        .with_number("INV-2025-042"),
        Invoice::new(
            57,
            tenant_id.to_string(),
            "Globex Corporation".to_string(),
            4_999,
            "USD".to_string(),
            due(14),
        )
        .with_number("INV-2025-057"),
    ]
}

fn sample_batch(tenant_id: &str) -> Vec<RawPayload> {
    vec![
        RawPayload::bank(
            tenant_id,
            "gb-current",
            json!({
                "transactionId": "gc-20250308-001",
                "bookingDate": "2025-03-08",
                "transactionAmount": { "amount": "150.00", "currency": "GBP" },
                "debtorName": "ACME LTD",
                "remittanceInformationUnstructured": "INV-2025-042 payment"
            }),
        ),
        RawPayload::stripe(
            tenant_id,
            "acct_demo",
            json!({
                "object": "event",
                "type": "charge.succeeded",
                "data": { "object": {
                    "id": "ch_3demo",
                    "object": "charge",
                    "amount": 4999,
                    "currency": "usd",
                    "created": 1741910400,
                    "description": "Globex Corporation",
                    "metadata": { "invoice_number": "INV-2025-057" }
                }}
            }),
        ),
        RawPayload::bank(
            tenant_id,
            "gb-current",
            json!({
                "transactionId": "gc-20250309-002",
                "bookingDate": "2025-03-09",
                "transactionAmount": { "amount": "-12.40", "currency": "GBP" },
                "creditorName": "Coffee Shop"
            }),
        ),
        RawPayload::bank(tenant_id, "gb-current", json!({ "bookingDate": "2025-03-09" })),
    ]
}

#[tokio::main]
async fn main() -> ReconResult<()> {
    dotenvy::dotenv().ok();
    init_tracing("info");

    let tenant_id = "demo-tenant";
    let config = ReconciliationConfig::from_env()?;

    let billing = MemoryBilling::new();
    for invoice in sample_invoices(tenant_id) {
        billing.add_invoice(invoice)?;
    }
    let engine = ReconciliationEngine::new(MemoryStorage::new(), billing.clone(), config)?;

    let report = engine.process_batch(sample_batch(tenant_id)).await;
    for item in &report.items {
        println!(
            "{:<20} {:?}",
            item.external_id.as_deref().unwrap_or("-"),
            item.outcome
        );
    }

    for item in &report.items {
        if let ItemOutcome::Suggested { suggestion_id, .. } = item.outcome {
            engine
                .decide(suggestion_id, Decision::Approve, "demo-operator")
                .await?;
        }
    }

    for payment in billing.applied_payments()? {
        println!(
            "applied {} to invoice {} ({})",
            format_minor_units(payment.amount, &payment.currency),
            payment.invoice_id,
            payment.external_id
        );
    }

    Ok(())
}
