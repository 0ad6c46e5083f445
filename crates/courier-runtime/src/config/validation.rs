//! Configuration validation utilities.

use courier_core::Jid;

use super::error::{ConfigError, ConfigResult};
use super::schema::{CourierConfig, LogOutput, LoggingConfig, ServerConfig};
use courier_framework::AppConfig;

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_app_config(&config.app)?;
    validate_server_config(&config.server)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_app_config(app: &AppConfig) -> ConfigResult<()> {
    if app.session_ttl_secs == 0 {
        return Err(ConfigError::validation(
            "Session TTL must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    let Some(jid) = &server.jid else {
        return Ok(());
    };
    let parsed: Jid = jid
        .parse()
        .map_err(|e| ConfigError::invalid_jid(jid, format!("{e}")))?;
    if parsed.node().is_none() {
        return Err(ConfigError::invalid_jid(jid, "an account JID needs a node part"));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (target, level) in &logging.filters {
        if target.trim().is_empty() {
            return Err(ConfigError::validation(format!(
                "Empty logging filter target for level {level}"
            )));
        }
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation("max_files must be at least 1"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogLevel;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&CourierConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = CourierConfig::default();
        config.app.session_ttl_secs = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_jid_shape() {
        let mut config = CourierConfig::default();
        config.server.jid = Some("bot@example.com/courier".into());
        assert!(validate_config(&config).is_ok());

        config.server.jid = Some("example.com".into());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidJid { .. })
        ));

        config.server.jid = Some("".into());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_log_filters_and_file_output() {
        let mut config = CourierConfig::default();
        config.logging.filters.insert(" ".into(), LogLevel::Debug);
        assert!(validate_config(&config).is_err());

        let mut config = CourierConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
