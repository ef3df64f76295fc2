//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, MirukenConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &MirukenConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must keep at least one file",
        ));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "logging filter has an empty module name: {module:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&MirukenConfig::default()).is_ok());
    }

    #[test]
    fn test_file_output_requires_path() {
        let mut config = MirukenConfig::default();
        config.logging.output = LogOutput::File;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "logging.file_path"));
    }

    #[test]
    fn test_max_files_must_be_positive() {
        let mut config = MirukenConfig::default();
        config.logging.max_files = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
