//! Configuration for a Courier deployment.
//!
//! Settings are layered with figment (see [`ConfigLoader`]) and checked by
//! [`validate_config`] before the server starts.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, Profile, load_config, load_config_from_file};
pub use schema::{
    CourierConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ServerConfig, SpanEventConfig,
};
pub use validation::validate_config;
