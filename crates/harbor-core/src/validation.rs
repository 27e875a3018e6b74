//! # Validation
//!
//! Input checks applied before anything reaches the store or the network.

use crate::error::ValidationError;

/// Maximum length of a module tag.
pub const MAX_MODULE_TAG_LEN: usize = 64;

/// Validates a module tag.
///
/// Tags are free-form labels; only blank and oversized tags are rejected.
pub fn validate_module_tag(tag: &str) -> Result<(), ValidationError> {
    if tag.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "module".to_string(),
        });
    }

    if tag.len() > MAX_MODULE_TAG_LEN {
        return Err(ValidationError::TooLong {
            field: "module".to_string(),
            max: MAX_MODULE_TAG_LEN,
        });
    }

    Ok(())
}

/// Validates that a numeric setting is strictly positive.
pub fn validate_positive(field: &str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tags() {
        assert!(validate_module_tag("mmi").is_ok());
        assert!(validate_module_tag("vessel_certs").is_ok());
        assert!(validate_module_tag("logistics-2").is_ok());
        assert!(validate_module_tag("crew roster").is_ok());
        assert!(validate_module_tag("fleet/certs").is_ok());
    }

    #[test]
    fn test_invalid_tags() {
        assert!(matches!(
            validate_module_tag("  "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_module_tag(&"a".repeat(65)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_numeric_checks() {
        assert!(validate_positive("retry_attempts", 0).is_err());
        assert!(validate_positive("retry_attempts", 3).is_ok());
    }
}
