//! Configuration validation utilities.

use tracing_subscriber::filter::Directive;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LoggingConfig, TethConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TethConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validates that every per-target filter forms a valid directive.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (target, level) in &logging.filters {
        if target.trim().is_empty() {
            return Err(ConfigError::validation("Log filter target cannot be empty"));
        }

        if target.contains(char::is_whitespace) || target.contains('=') {
            return Err(ConfigError::InvalidDirective {
                directive: format!("{target}={level}"),
                reason: "targets cannot contain whitespace or `=`".to_string(),
            });
        }

        let directive = format!("{target}={level}");
        if let Err(err) = directive.parse::<Directive>() {
            return Err(ConfigError::InvalidDirective {
                directive,
                reason: err.to_string(),
            });
        }
    }
    Ok(())
}
