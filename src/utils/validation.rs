//! Validation utilities

use crate::money::Centavos;
use crate::traits::*;
use crate::types::*;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: Centavos) -> BillingResult<()> {
    if !amount.is_positive() {
        Err(BillingError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that an account ID is valid
pub fn validate_account_id(account_id: &str) -> BillingResult<()> {
    if account_id.trim().is_empty() {
        return Err(BillingError::Validation(
            "Account ID cannot be empty".to_string(),
        ));
    }

    if account_id.len() > 50 {
        return Err(BillingError::Validation(
            "Account ID cannot exceed 50 characters".to_string(),
        ));
    }

    // Check for valid characters (alphanumeric, dashes, underscores)
    if !account_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BillingError::Validation(
            "Account ID can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> BillingResult<()> {
    if name.trim().is_empty() {
        return Err(BillingError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(BillingError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate an idempotency key against the configured maximum length
pub fn validate_idempotency_key(key: &str, max_len: usize) -> BillingResult<()> {
    if key.trim().is_empty() {
        return Err(BillingError::Validation(
            "Idempotency key cannot be empty".to_string(),
        ));
    }

    if key.len() > max_len {
        return Err(BillingError::Validation(format!(
            "Idempotency key cannot exceed {} characters",
            max_len
        )));
    }

    if key.chars().any(char::is_control) {
        return Err(BillingError::Validation(
            "Idempotency key cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a new obligation before it is stored
pub fn validate_obligation(obligation: &Obligation) -> BillingResult<()> {
    if obligation.id.trim().is_empty() {
        return Err(BillingError::Validation(
            "Obligation ID cannot be empty".to_string(),
        ));
    }

    obligation.period.validate()?;

    if obligation.base_charge.is_negative() {
        return Err(BillingError::Validation(format!(
            "Obligation {} has a negative base charge",
            obligation.id
        )));
    }

    if let ObligationKind::Utility(reading) = &obligation.kind {
        if reading.current_reading < reading.previous_reading {
            return Err(BillingError::Validation(format!(
                "Meter {} reading went backwards: {} -> {}",
                reading.meter_id, reading.previous_reading, reading.current_reading
            )));
        }
    }

    obligation
        .check_invariants()
        .map_err(|e| BillingError::Validation(e.to_string()))
}

/// Enhanced payment validator with detailed checks
pub struct EnhancedPaymentValidator;

impl PaymentValidator for EnhancedPaymentValidator {
    fn validate_payment(&self, request: &PaymentRequest) -> BillingResult<()> {
        // Basic validation
        DefaultPaymentValidator.validate_payment(request)?;

        // Enhanced validations
        validate_account_id(&request.account_id)?;
        validate_positive_amount(request.amount)?;

        Ok(())
    }

    fn validate_scope(&self, scope: &ScopeFilter) -> BillingResult<()> {
        DefaultPaymentValidator.validate_scope(scope)
    }
}
