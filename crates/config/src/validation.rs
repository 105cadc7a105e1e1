use crate::{ConfigError, ConfigResult};
use std::time::Duration;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a timeout is non-zero and at most one hour
    pub fn validate_timeout(timeout: Duration, field_name: &str) -> ConfigResult<()> {
        if timeout.is_zero() {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout > Duration::from_secs(3600) {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600 seconds"
            )));
        }
        Ok(())
    }

    /// Validate that a count is within 1..=max
    pub fn validate_count(count: usize, field_name: &str, max: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate an http(s) URL prefix
    pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "{field_name} must start with http:// or https://"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("x", "f").is_ok());
        assert!(ValidationUtils::validate_not_empty("  ", "f").is_err());
    }

    #[test]
    fn test_validate_timeout() {
        assert!(ValidationUtils::validate_timeout(Duration::from_secs(30), "t").is_ok());
        assert!(ValidationUtils::validate_timeout(Duration::ZERO, "t").is_err());
        assert!(ValidationUtils::validate_timeout(Duration::from_secs(3601), "t").is_err());
    }

    #[test]
    fn test_validate_count_and_url() {
        assert!(ValidationUtils::validate_count(5, "c", 10).is_ok());
        assert!(ValidationUtils::validate_count(0, "c", 10).is_err());
        assert!(ValidationUtils::validate_count(11, "c", 10).is_err());

        assert!(ValidationUtils::validate_url("https://api.example.com/v1", "u").is_ok());
        assert!(ValidationUtils::validate_url("ftp://example.com", "u").is_err());
    }
}
