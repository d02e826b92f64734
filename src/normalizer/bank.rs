//! GoCardless Bank Account Data transaction mapping

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::{first_present, join_text, CanonicalFields};
use crate::types::*;
use crate::utils::money::{decimal_to_minor_units, normalize_currency};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankTransaction {
    transaction_id: Option<String>,
    internal_transaction_id: Option<String>,
    booking_date: Option<String>,
    value_date: Option<String>,
    booking_date_time: Option<String>,
    value_date_time: Option<String>,
    transaction_amount: Option<TransactionAmount>,
    remittance_information_structured: Option<String>,
    remittance_information_unstructured: Option<String>,
    remittance_information_unstructured_array: Option<Vec<String>>,
    debtor_name: Option<String>,
    creditor_name: Option<String>,
    additional_information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionAmount {
    amount: Option<serde_json::Value>,
    currency: Option<String>,
}

pub(crate) fn extract(body: &serde_json::Value) -> ReconResult<CanonicalFields> {
    let txn = BankTransaction::deserialize(body)
        .map_err(|e| ReconError::MalformedPayload(format!("bank transaction: {}", e)))?;

    let external_id = first_present([
        txn.transaction_id.as_deref(),
        txn.internal_transaction_id.as_deref(),
    ])
    .ok_or_else(|| missing("transactionId"))?
    .to_string();

    let amount_block = txn
        .transaction_amount
        .as_ref()
        .ok_or_else(|| missing("transactionAmount"))?;
    let currency = amount_block
        .currency
        .as_deref()
        .ok_or_else(|| missing("transactionAmount.currency"))
        .and_then(normalize_currency)?;
    let amount = match amount_block.amount.as_ref() {
        Some(serde_json::Value::String(s)) => decimal_to_minor_units(s, &currency)?,
        Some(serde_json::Value::Number(n)) => decimal_to_minor_units(&n.to_string(), &currency)?,
        Some(other) => {
            return Err(ReconError::MalformedPayload(format!(
                "bank transaction amount has unexpected type: {}",
                other
            )))
        }
        None => return Err(missing("transactionAmount.amount")),
    };

    let occurred_at = occurred_at(&txn)?;

    let joined_array = txn
        .remittance_information_unstructured_array
        .as_ref()
        .map(|lines| join_text(lines.iter().map(|l| Some(l.as_str()))));
    let reference = first_present([
        txn.remittance_information_structured.as_deref(),
        txn.remittance_information_unstructured.as_deref(),
        joined_array.as_deref(),
    ])
    .unwrap_or_default()
    .to_string();

    let mut description = join_text([
        txn.debtor_name.as_deref(),
        txn.creditor_name.as_deref(),
        txn.additional_information.as_deref(),
    ]);
    if description.is_empty() {
        description = reference.clone();
    }

    Ok(CanonicalFields {
        external_id,
        amount,
        currency,
        description,
        reference,
        occurred_at,
    })
}

fn occurred_at(txn: &BankTransaction) -> ReconResult<DateTime<Utc>> {
    if let Some(ts) = first_present([
        txn.booking_date_time.as_deref(),
        txn.value_date_time.as_deref(),
    ]) {
        return DateTime::parse_from_rfc3339(ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ReconError::MalformedPayload(format!("timestamp '{}' is invalid: {}", ts, e))
            });
    }

    let date = first_present([txn.booking_date.as_deref(), txn.value_date.as_deref()])
        .ok_or_else(|| missing("bookingDate"))?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ReconError::MalformedPayload(format!("date '{}' is invalid", date)))
}

fn missing(field: &str) -> ReconError {
    ReconError::MalformedPayload(format!("bank transaction is missing {}", field))
}
