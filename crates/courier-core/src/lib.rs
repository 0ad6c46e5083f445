//! # Courier Core
//!
//! The protocol-independent building blocks of the Courier framework.
//!
//! This crate knows nothing about applications or transports. It provides
//! the data that flows between them and the routing engine that connects an
//! inbound event to an endpoint.
//!
//! ## Building Blocks
//!
//! - **Event model**: [`Environ`] describes one inbound stanza, [`Jid`]
//!   identifies its sender.
//! - **Routing**: [`Rule`] patterns with typed placeholders, ordered in a
//!   [`RouteMap`] and resolved through a [`MapAdapter`].
//! - **Responses**: [`Response`] turns a handler's return value into a
//!   resumable stream of outbound [`Command`]s.
//!
//! ## Data Flow
//!
//! ```text
//! ┌─────────┐     ┌──────────┐     ┌─────────┐     ┌──────────┐
//! │ Environ │────▶│ RouteMap │────▶│ Handler │────▶│ Response │──▶ commands
//! └─────────┘     └──────────┘     └─────────┘     └──────────┘
//!                  (endpoint,                        ▲   │
//!                   params)                      ack │   ▼
//!                                                  transport
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier_core::{Query, RouteMap, Rule};
//!
//! let map = RouteMap::new();
//! map.add(Rule::new("weather in <string(maxlength=20):city>").endpoint("weather"))?;
//!
//! let (endpoint, params) = map.bind(Query::message("weather in Moscow")).match_endpoint()?;
//! assert_eq!(endpoint, "weather");
//! assert_eq!(params["city"], "Moscow");
//! ```

pub mod environ;
pub mod error;
pub mod jid;
pub mod response;
pub mod routing;

pub use environ::{Environ, EventKind};
pub use error::{BuildError, JidError, NotFound, RoutingError, RoutingResult, ValidationError};
pub use jid::Jid;
pub use response::{Ack, Co, Command, IntoResponse, IntoResponseResult, Response};
pub use routing::{
    Converter, ConverterArgs, ConverterRegistry, MapAdapter, Params, Query, RouteMap, Rule,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::environ::{Environ, EventKind};
    pub use super::error::{BuildError, NotFound};
    pub use super::jid::Jid;
    pub use super::response::{Ack, Co, Command, IntoResponse, Response};
    pub use super::routing::{Params, Query, RouteMap, Rule};
}
