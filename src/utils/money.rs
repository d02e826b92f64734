//! Minor-unit money helpers

use bigdecimal::{BigDecimal, ToPrimitive};
use std::str::FromStr;

use crate::types::*;

/// ISO 4217 minor-unit exponent of a currency
pub fn currency_exponent(currency: &str) -> u32 {
    match currency {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "UYI" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Normalize a currency code to upper-case ISO 4217 form
pub fn normalize_currency(raw: &str) -> ReconResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ReconError::MalformedPayload(format!(
            "'{}' is not an ISO 4217 currency code",
            raw
        )));
    }
    Ok(code)
}

/// Longest amount string accepted before parsing
const MAX_AMOUNT_LEN: usize = 40;

/// Convert a decimal amount string into minor units of `currency`
///
/// Uses exact decimal arithmetic. Only plain notation is accepted: an
/// optional sign, digits and at most one decimal point. Amounts carrying more
/// fractional digits than the currency allows are rejected rather than
/// rounded.
pub fn decimal_to_minor_units(amount: &str, currency: &str) -> ReconResult<i64> {
    let trimmed = amount.trim();
    if trimmed.len() > MAX_AMOUNT_LEN || !is_plain_decimal(trimmed) {
        return Err(ReconError::MalformedPayload(format!(
            "amount '{}' is not a plain decimal of at most {} characters",
            truncate(trimmed, MAX_AMOUNT_LEN),
            MAX_AMOUNT_LEN
        )));
    }

    let value = BigDecimal::from_str(trimmed).map_err(|e| {
        ReconError::MalformedPayload(format!("amount '{}' is not a decimal: {}", amount, e))
    })?;

    let exponent = currency_exponent(currency);
    let scaled = value * BigDecimal::from(10_i64.pow(exponent));

    if scaled.with_scale(0) != scaled {
        return Err(ReconError::MalformedPayload(format!(
            "amount '{}' has more than {} decimal places for {}",
            amount, exponent, currency
        )));
    }

    scaled.to_i64().ok_or_else(|| {
        ReconError::MalformedPayload(format!("amount '{}' is out of range", amount))
    })
}

fn is_plain_decimal(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction = parts.next().unwrap_or("");

    (!whole.is_empty() || !fraction.is_empty())
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Render minor units as a decimal string, e.g. `15000` GBP as `150.00`
pub fn format_minor_units(amount: i64, currency: &str) -> String {
    let exponent = currency_exponent(currency);
    if exponent == 0 {
        return amount.to_string();
    }

    let factor = 10_u64.pow(exponent);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / factor,
        abs % factor,
        width = exponent as usize
    )
}

/// Amount tolerance for `amount`: the larger of a fixed floor and a
/// basis-point share of the absolute amount
pub fn amount_tolerance(amount: i64, tolerance_bps: u32, floor_minor: i64) -> i64 {
    let pct = (i128::from(amount).abs() * i128::from(tolerance_bps)) / 10_000;
    let pct = i64::try_from(pct).unwrap_or(i64::MAX);
    pct.max(floor_minor)
}
