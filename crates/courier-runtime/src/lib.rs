//! # Courier Runtime
//!
//! Everything needed to run a Courier application as a process:
//!
//! - [`Server`]: the XMPPWSGI-style loop turning stanzas into environs and
//!   responses into commands
//! - [`Transport`]: the network side, with an in-memory
//!   [`LoopbackTransport`] and a terminal [`ConsoleTransport`]
//! - [`Capability`]: named server features and the commands they execute,
//!   registered at link time through [`CAPABILITIES`]
//! - layered configuration ([`ConfigLoader`]) and logging setup
//!   ([`logging::init_from_config`])
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_runtime::{ConfigLoader, ConsoleTransport, Server, logging, validate_config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     validate_config(&config)?;
//!     logging::init_from_config(&config.logging);
//!
//!     let app = build_app(config.app.clone())?;
//!     let transport = Arc::new(ConsoleTransport::new("you@localhost/console".parse()?));
//!     Server::new(app, transport, config.server)?.serve_forever().await?;
//!     Ok(())
//! }
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod stanza;
pub mod transport;

pub use capability::{
    CAPABILITIES, Capability, CapabilityEntry, CapabilityRegistry, Delay, Standard, Version,
};
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, CourierConfig, LoggingConfig, ServerConfig,
    validate_config,
};
pub use error::{CapabilityError, ServerError, ServerResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use server::{Server, wait_for_shutdown};
pub use stanza::Stanza;
pub use transport::{ConsoleTransport, LoopbackTransport, SentCommand, Transport};

// Re-exported so downstream crates can contribute to `CAPABILITIES`.
pub use linkme;
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Capability, Server, ServerConfig, Stanza, Transport};
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
