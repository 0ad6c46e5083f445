//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables `courier.toml`
//! - `yaml-config`: enables `courier.yaml` / `courier.yml`
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`courier.{profile}.toml`)
//! 3. Main config file (`courier.toml`)
//! 4. Environment variables (`COURIER_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `COURIER_` prefix with `__` as separator:
//!
//! - `COURIER_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `COURIER_SERVER__JID=bot@example.com` → `server.jid = "bot@example.com"`
//! - `COURIER_APP__DEBUG=false` → `app.debug = false`
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./deploy/courier.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::CourierConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "COURIER_";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `prod` and `dev` are accepted as aliases.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `COURIER_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(format!("{ENV_PREFIX}PROFILE"))
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<user config dir>/courier` to search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(config_dir) => self.search_path(config_dir.join("courier")),
            None => self,
        }
    }

    /// Sets a specific configuration file to load instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a configuration programmatically, on top of every other source.
    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<CourierConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: CourierConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            jid = config.server.jid.as_deref().unwrap_or("-"),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(CourierConfig::default()));

        if let Some(path) = self.config_file.clone() {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, &path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["PROFILE"])
                    .split("__"),
            );
        }

        // Programmatic overrides win over files and the environment.
        let overrides = std::mem::take(&mut self.figment);
        Ok(figment.merge(overrides))
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("courier"));
        }
        paths
    }

    /// Tries `search_paths × base_names`; for each candidate the profile
    /// variant is merged first, then the base file. Stops at the first base
    /// file found.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    fn load_config_files(&self, figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        #[allow(unused_mut)]
        let mut figment = figment;
        #[allow(unused_mut)]
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["courier.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["courier.yaml", "courier.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!(paths = ?search_paths, "No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<CourierConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with environment overrides.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<CourierConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogLevel;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("courier-config-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config() {
        let dir = scratch_dir("defaults");
        let config = ConfigLoader::new()
            .search_path(&dir)
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.logging.level.as_str(), "info");
        assert!(config.app.debug);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("prod"), Profile::Production);
        assert_eq!(Profile::parse("Development"), Profile::Development);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".into()));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new()
            .file("/nonexistent/courier.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = scratch_dir("ext");
        let path = dir.join("courier.ini");
        std::fs::write(&path, "debug = 1").unwrap();
        let result = ConfigLoader::new().file(&path).without_env().load();
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_is_overridden_by_main_file() {
        let dir = scratch_dir("profile");
        std::fs::write(
            dir.join("courier.staging.toml"),
            "[logging]\nlevel = \"trace\"\n[app]\nsession_ttl_secs = 60\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("courier.toml"),
            "[logging]\nlevel = \"warn\"\n[server]\njid = \"bot@example.com\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .profile("staging")
            .search_path(&dir)
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.app.session_ttl_secs, 60);
        assert_eq!(config.server.jid.as_deref(), Some("bot@example.com"));
    }

    #[test]
    fn test_programmatic_override_wins() {
        let dir = scratch_dir("merge");
        let mut overrides = CourierConfig::default();
        overrides.app.debug = false;
        let config = ConfigLoader::new()
            .search_path(&dir)
            .without_env()
            .merge(overrides)
            .load()
            .unwrap();
        assert!(!config.app.debug);
    }
}
