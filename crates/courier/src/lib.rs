//! # Courier
//!
//! A routing microframework for message-oriented chat bots.
//!
//! ## Overview
//!
//! An application maps textual message patterns (and presence events) to
//! handler functions, the way a web framework maps URLs to views. A server
//! feeds it one inbound stanza at a time and executes the commands its
//! handlers answer with.
//!
//! ```text
//! ┌───────────┐ stanza ┌────────┐ environ ┌─────────────┐ response ┌─────────┐
//! │ Transport │───────▶│ Server │────────▶│ Application │─────────▶│ Server  │──▶ commands
//! └───────────┘        └────────┘         └─────────────┘   ▲ ack  └─────────┘
//!                                          routes, hooks,   └──────────┘
//!                                          sessions
//! ```
//!
//! - **core**: environs, JIDs, routing rules and the response stream
//! - **framework**: the application, context stack, handlers and sessions
//! - **runtime**: the server loop, transports, capabilities, config, logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier::prelude::*;
//!
//! async fn ping() -> &'static str {
//!     "pong"
//! }
//!
//! #[derive(serde::Deserialize)]
//! struct Weather {
//!     city: String,
//! }
//!
//! async fn weather(Args(args): Args<Weather>) -> String {
//!     format!("Arr, it be sunny in {}", args.city)
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Application::new("pirate");
//!     app.route("ping", ping)?;
//!     app.route("weather in <string(maxlength=20):city>", weather)?;
//!
//!     let transport = Arc::new(ConsoleTransport::new("you@localhost/console".parse()?));
//!     let config = ServerConfig { jid: Some("pirate@localhost".into()), ..Default::default() };
//!     Server::new(app, transport, config)?.serve_forever().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): `courier.toml` configuration files
//! - `yaml-config`: `courier.yaml` configuration files
//! - `json-log`: JSON log lines

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    // Application and dispatch
    pub use courier_framework::{AppConfig, Application, ContextStack, Reply};

    // Handlers and extractors
    pub use courier_framework::{Args, Body, FromContext, Handler, Request, RequestScope};

    // Sessions
    pub use courier_framework::{MemorySessionInterface, Session, SessionInterface};

    // Events, routing and responses
    pub use courier_core::{
        Ack, Co, Command, Environ, EventKind, IntoResponse, Jid, NotFound, Params, Response,
        Rule,
    };

    // Running an application
    pub use courier_runtime::{
        Capability, ConfigLoader, ConsoleTransport, CourierConfig, LoopbackTransport, Server,
        ServerConfig, Stanza, Transport,
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::prelude::*;

    async fn ping() -> &'static str {
        "pong"
    }

    #[tokio::test]
    async fn test_prelude_is_enough_for_a_bot() {
        let app = Application::new("prelude");
        app.route("ping", ping).unwrap();

        let transport = Arc::new(LoopbackTransport::new());
        let config = ServerConfig {
            jid: Some("bot@example.com".into()),
            ..Default::default()
        };
        let server = Server::new(app, transport.clone(), config).unwrap();
        server.start().unwrap();

        let alice: Jid = "alice@example.com".parse().unwrap();
        server.handle(Stanza::message(alice, "ping")).await.unwrap();
        assert_eq!(transport.sent()[0].body(), Some("pong"));
    }
}
