//! Candidate selection and confidence scoring
//!
//! Both stages are pure: they read a transaction and a slice of invoices and
//! never touch storage, so they can run in parallel across a batch.

pub mod candidates;
pub mod scorer;

pub use candidates::*;
pub use scorer::*;

use crate::config::MatchingConfig;
use crate::types::*;
use crate::utils::money::amount_tolerance;

/// Absolute difference between what the invoice still owes and the payment
pub(crate) fn amount_difference(transaction: &Transaction, invoice: &Invoice) -> i64 {
    (i128::from(invoice.outstanding()) - i128::from(transaction.amount))
        .unsigned_abs()
        .try_into()
        .unwrap_or(i64::MAX)
}

/// Tolerance band applicable to a transaction
pub(crate) fn tolerance_for(transaction: &Transaction, matching: &MatchingConfig) -> i64 {
    amount_tolerance(
        transaction.amount,
        matching.tolerance_bps,
        matching.tolerance_floor_minor,
    )
}

/// Whether the invoice and the transaction are in the same currency
pub(crate) fn same_currency(transaction: &Transaction, invoice: &Invoice) -> bool {
    transaction.currency.eq_ignore_ascii_case(&invoice.currency)
}
