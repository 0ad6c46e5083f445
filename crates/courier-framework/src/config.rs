//! Application settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings read by an [`Application`](crate::Application).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Re-raise unhandled handler errors instead of answering with an
    /// apology message.
    pub debug: bool,
    /// Lifetime of non-permanent sessions, in seconds.
    pub session_ttl_secs: u64,
}

impl AppConfig {
    /// Session lifetime as a duration.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: true,
            session_ttl_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.debug);
        assert_eq!(config.session_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: AppConfig = serde_json::from_str(r#"{"debug": false}"#).unwrap();
        assert!(!config.debug);
        assert_eq!(config.session_ttl_secs, 3600);
    }
}
