//! Validation utilities

use crate::traits::*;
use crate::types::*;

/// Validate that a tenant ID is valid
pub fn validate_tenant_id(tenant_id: &str) -> ReconResult<()> {
    if tenant_id.trim().is_empty() {
        return Err(ReconError::Validation(
            "Tenant ID cannot be empty".to_string(),
        ));
    }

    if tenant_id.len() > 64 {
        return Err(ReconError::Validation(
            "Tenant ID cannot exceed 64 characters".to_string(),
        ));
    }

    // Check for valid characters (alphanumeric, dashes, underscores)
    if !tenant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ReconError::Validation(
            "Tenant ID can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that a provider-scoped external ID is valid
pub fn validate_external_id(external_id: &str) -> ReconResult<()> {
    if external_id.trim().is_empty() {
        return Err(ReconError::Validation(
            "External ID cannot be empty".to_string(),
        ));
    }

    if external_id.len() > 255 {
        return Err(ReconError::Validation(
            "External ID cannot exceed 255 characters".to_string(),
        ));
    }

    if external_id.chars().any(char::is_control) {
        return Err(ReconError::Validation(
            "External ID cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate an upper-case ISO 4217 currency code
pub fn validate_currency(currency: &str) -> ReconResult<()> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ReconError::Validation(format!(
            "Currency '{}' must be a three-letter upper-case ISO 4217 code",
            currency
        )));
    }

    Ok(())
}

/// Validate free text fields stored with a transaction
pub fn validate_text_field(name: &str, value: &str, max_len: usize) -> ReconResult<()> {
    if value.len() > max_len {
        return Err(ReconError::Validation(format!(
            "{} cannot exceed {} characters",
            name, max_len
        )));
    }

    Ok(())
}

/// Strict transaction validator with detailed checks
pub struct StrictTransactionValidator;

impl TransactionValidator for StrictTransactionValidator {
    fn validate_transaction(&self, transaction: &Transaction) -> ReconResult<()> {
        // Basic validation
        DefaultTransactionValidator.validate_transaction(transaction)?;

        validate_tenant_id(&transaction.tenant_id)?;
        validate_external_id(&transaction.external_id)?;
        validate_currency(&transaction.currency)?;
        validate_text_field("Account ID", &transaction.account_id, 128)?;
        validate_text_field("Description", &transaction.description, 1_000)?;
        validate_text_field("Reference", &transaction.reference, 500)?;

        if transaction.amount == 0 {
            return Err(ReconError::Validation(
                "Transaction amount cannot be zero".to_string(),
            ));
        }

        Ok(())
    }
}
