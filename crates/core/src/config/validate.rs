use regex_lite::Regex;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - All configured patterns compile
/// - Retry policy is bounded and non-shrinking
/// - Timeouts are non-zero
/// - Header placeholder is not blank
///
/// Credentials are checked when the stage that needs them is built, so a
/// normalize-only run does not require platform secrets.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let patterns = [
        ("platform.title_pattern", &config.platform.title_pattern),
        ("platform.target_pattern", &config.platform.target_pattern),
        ("renamer.title_pattern", &config.renamer.title_pattern),
        ("fixer.volume_pattern", &config.fixer.volume_pattern),
    ];
    for (key, pattern) in patterns {
        Regex::new(pattern)
            .map_err(|e| ConfigError::ValidationError(format!("{} is not a valid pattern: {}", key, e)))?;
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }
    if config.retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "retry.backoff_multiplier cannot be below 1.0".to_string(),
        ));
    }

    if config.platform.timeout_secs == 0
        || config.metadata.timeout_secs == 0
        || config.transform.timeout_secs == 0
    {
        return Err(ConfigError::ValidationError(
            "timeouts cannot be 0".to_string(),
        ));
    }

    if config.headers.placeholder.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "headers.placeholder cannot be blank".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_bad_pattern_fails() {
        let mut config = Config::default();
        config.renamer.title_pattern = "(unclosed".to_string();

        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("renamer")));
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_blank_placeholder_fails() {
        let mut config = Config::default();
        config.headers.placeholder = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }
}
