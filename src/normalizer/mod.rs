//! Conversion of raw provider payloads into canonical transactions
//!
//! Both the polling and the webhook path produce [`RawPayload`] values; this
//! module is the single place provider field names are known.

pub mod bank;
pub mod stripe;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::*;

/// Provider-specific body of a raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "data", rename_all = "snake_case")]
pub enum ProviderPayload {
    /// GoCardless Bank Account Data transaction object
    Bank(serde_json::Value),
    /// Stripe Charge object, or an Event wrapping one
    Stripe(serde_json::Value),
}

impl ProviderPayload {
    pub fn source_type(&self) -> SourceType {
        match self {
            ProviderPayload::Bank(_) => SourceType::Bank,
            ProviderPayload::Stripe(_) => SourceType::Stripe,
        }
    }
}

/// Payload as delivered by a feed or a verified webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub tenant_id: String,
    /// Bank account or Stripe account the payload belongs to
    pub account_id: String,
    pub body: ProviderPayload,
}

impl RawPayload {
    pub fn bank(
        tenant_id: impl Into<String>,
        account_id: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            account_id: account_id.into(),
            body: ProviderPayload::Bank(body),
        }
    }

    pub fn stripe(
        tenant_id: impl Into<String>,
        account_id: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            account_id: account_id.into(),
            body: ProviderPayload::Stripe(body),
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.body.source_type()
    }

    /// Best-effort provider id, available even when normalization fails
    pub fn external_id_hint(&self) -> Option<String> {
        let value = match &self.body {
            ProviderPayload::Bank(v) => v
                .get("transactionId")
                .or_else(|| v.get("internalTransactionId")),
            ProviderPayload::Stripe(v) => stripe::charge_object(v).get("id"),
        };
        value.and_then(|id| id.as_str()).map(str::to_string)
    }
}

/// Provider-independent fields extracted from a payload body
pub(crate) struct CanonicalFields {
    pub external_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub reference: String,
    pub occurred_at: chrono::DateTime<Utc>,
}

/// Normalize a raw payload into a transaction that is not yet persisted
///
/// `ingested_at` is a placeholder set to the normalization time; the ledger
/// overwrites it when the transaction is stored.
pub fn normalize(payload: &RawPayload) -> ReconResult<Transaction> {
    if payload.tenant_id.trim().is_empty() {
        return Err(ReconError::MalformedPayload(
            "payload has no tenant".to_string(),
        ));
    }
    if payload.account_id.trim().is_empty() {
        return Err(ReconError::MalformedPayload(
            "payload has no account".to_string(),
        ));
    }

    let fields = match &payload.body {
        ProviderPayload::Bank(body) => bank::extract(body)?,
        ProviderPayload::Stripe(body) => stripe::extract(body)?,
    };

    Ok(Transaction {
        id: Uuid::new_v4(),
        external_id: fields.external_id,
        tenant_id: payload.tenant_id.clone(),
        source_type: payload.source_type(),
        account_id: payload.account_id.clone(),
        amount: fields.amount,
        currency: fields.currency,
        description: fields.description,
        reference: fields.reference,
        occurred_at: fields.occurred_at,
        ingested_at: Utc::now(),
    })
}

/// Join the non-blank parts with single spaces
pub(crate) fn join_text<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First present, non-blank string
pub(crate) fn first_present<'a>(
    candidates: impl IntoIterator<Item = Option<&'a str>>,
) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
}
