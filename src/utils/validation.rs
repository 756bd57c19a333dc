//! Validation utilities

use bigdecimal::{BigDecimal, Zero};

use crate::normalize::normalize_iban;
use crate::traits::*;
use crate::types::*;

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> ReconResult<()> {
    if *amount <= BigDecimal::zero() {
        Err(ReconError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that an upload ID is valid
pub fn validate_upload_id(upload_id: &str) -> ReconResult<()> {
    if upload_id.trim().is_empty() {
        return Err(ReconError::Validation(
            "Upload ID cannot be empty".to_string(),
        ));
    }

    if upload_id.len() > 64 {
        return Err(ReconError::Validation(
            "Upload ID cannot exceed 64 characters".to_string(),
        ));
    }

    // Check for valid characters (alphanumeric, dashes, underscores, dots)
    if !upload_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ReconError::Validation(
            "Upload ID can only contain alphanumeric characters, dashes, underscores, and dots"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate the structure and ISO 13616 checksum of an IBAN
pub fn validate_iban(iban: &str) -> ReconResult<()> {
    let iban = normalize_iban(iban);
    if !(15..=34).contains(&iban.len()) {
        return Err(ReconError::Validation(format!(
            "IBAN '{iban}' must have 15 to 34 characters"
        )));
    }

    let bytes = iban.as_bytes();
    if !bytes[..2].iter().all(u8::is_ascii_uppercase)
        || !bytes[2..4].iter().all(u8::is_ascii_digit)
        || !bytes.iter().all(u8::is_ascii_alphanumeric)
    {
        return Err(ReconError::Validation(format!(
            "IBAN '{iban}' is not well formed"
        )));
    }

    // move the country code and check digits to the end, letters become 10..35
    let mut remainder: u32 = 0;
    for c in iban[4..].chars().chain(iban[..4].chars()) {
        let Some(value) = c.to_digit(36) else {
            return Err(ReconError::Validation(format!(
                "IBAN '{iban}' is not well formed"
            )));
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }

    if remainder != 1 {
        return Err(ReconError::Validation(format!(
            "IBAN '{iban}' has an invalid checksum"
        )));
    }
    Ok(())
}

/// Strict payment validator with detailed checks
pub struct StrictPaymentValidator;

impl PaymentValidator for StrictPaymentValidator {
    fn validate_payment(&self, payment: &PaymentRecord) -> ReconResult<()> {
        // Basic validation
        DefaultPaymentValidator.validate_payment(payment)?;

        if payment.amount.is_zero() {
            return Err(ReconError::Validation(
                "Payment amount cannot be zero".to_string(),
            ));
        }

        if let Some(iban) = &payment.counterpart_iban {
            validate_iban(iban)?;
        }

        if payment.allocated_amount < BigDecimal::zero() {
            return Err(ReconError::Validation(
                "Allocated amount cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_positive_amount() {
        assert!(validate_positive_amount(&BigDecimal::from(1)).is_ok());
        assert!(validate_positive_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_positive_amount(&BigDecimal::from(-5)).is_err());
    }

    #[test]
    fn test_upload_id() {
        assert!(validate_upload_id("bank-2024_03.csv").is_ok());
        assert!(validate_upload_id("  ").is_err());
        assert!(validate_upload_id("a/b").is_err());
        assert!(validate_upload_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_iban_checksum() {
        assert!(validate_iban("DE89 3704 0044 0532 0130 00").is_ok());
        assert!(validate_iban("GB82WEST12345698765432").is_ok());
        assert!(validate_iban("DE89370400440532013001").is_err());
        assert!(validate_iban("DE89").is_err());
        assert!(validate_iban("1234370400440532013000").is_err());
    }

    #[test]
    fn test_strict_validator() {
        let payment = PaymentRecord::new(
            BigDecimal::from(500),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            SourceType::SyncedTransaction,
        );
        let validator = StrictPaymentValidator;
        assert!(validator.validate_payment(&payment).is_ok());

        let bad_iban = payment.clone().with_counterpart_iban("DE00370400440532013000");
        assert!(validator.validate_payment(&bad_iban).is_err());

        let mut zero = payment;
        zero.amount = BigDecimal::zero();
        assert!(validator.validate_payment(&zero).is_err());
    }
}
