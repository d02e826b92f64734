//! Stripe charge mapping

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::{first_present, join_text, CanonicalFields};
use crate::types::*;
use crate::utils::money::normalize_currency;

/// Metadata keys checked, in order, for the payer's invoice reference
const REFERENCE_METADATA_KEYS: [&str; 4] = ["invoice_id", "invoice_number", "invoice", "reference"];

#[derive(Debug, Deserialize)]
struct StripeCharge {
    id: Option<String>,
    object: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    created: Option<i64>,
    description: Option<String>,
    statement_descriptor: Option<String>,
    billing_details: Option<BillingDetails>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct BillingDetails {
    name: Option<String>,
}

/// The charge inside a payload: the payload itself, or `data.object` of an event
pub(crate) fn charge_object(body: &serde_json::Value) -> &serde_json::Value {
    if body.get("object").and_then(|o| o.as_str()) == Some("event") {
        if let Some(inner) = body.get("data").and_then(|d| d.get("object")) {
            return inner;
        }
    }
    body
}

pub(crate) fn extract(body: &serde_json::Value) -> ReconResult<CanonicalFields> {
    if body.get("object").and_then(|o| o.as_str()) == Some("event") {
        let event_type = body.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        if !event_type.starts_with("charge.") {
            return Err(ReconError::MalformedPayload(format!(
                "unsupported stripe event type '{}'",
                event_type
            )));
        }
    }

    let charge = StripeCharge::deserialize(charge_object(body))
        .map_err(|e| ReconError::MalformedPayload(format!("stripe charge: {}", e)))?;

    if let Some(object) = charge.object.as_deref() {
        if object != "charge" {
            return Err(ReconError::MalformedPayload(format!(
                "expected a stripe charge, got '{}'",
                object
            )));
        }
    }

    let external_id = first_present([charge.id.as_deref()])
        .ok_or_else(|| missing("id"))?
        .to_string();
    let amount = charge.amount.ok_or_else(|| missing("amount"))?;
    let currency = charge
        .currency
        .as_deref()
        .ok_or_else(|| missing("currency"))
        .and_then(normalize_currency)?;
    let created = charge.created.ok_or_else(|| missing("created"))?;
    let occurred_at = DateTime::<Utc>::from_timestamp(created, 0).ok_or_else(|| {
        ReconError::MalformedPayload(format!("created timestamp {} is out of range", created))
    })?;

    let metadata = charge.metadata.unwrap_or_default();
    let reference = first_present(
        REFERENCE_METADATA_KEYS
            .iter()
            .map(|key| metadata.get(*key).map(String::as_str))
            .chain([charge.statement_descriptor.as_deref()]),
    )
    .unwrap_or_default()
    .to_string();

    let description = join_text([
        charge.description.as_deref(),
        charge
            .billing_details
            .as_ref()
            .and_then(|b| b.name.as_deref()),
    ]);

    Ok(CanonicalFields {
        external_id,
        amount,
        currency,
        description,
        reference,
        occurred_at,
    })
}

fn missing(field: &str) -> ReconError {
    ReconError::MalformedPayload(format!("stripe charge is missing {}", field))
}
