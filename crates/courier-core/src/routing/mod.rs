//! Message routing.
//!
//! Rules are text patterns with typed placeholders. A [`RouteMap`] keeps
//! them in match order; a [`MapAdapter`] resolves one event against the map
//! and builds message text back from an endpoint and its parameters.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::routing::{Query, RouteMap, Rule};
//!
//! let map = RouteMap::new();
//! map.add(Rule::new("ping <user> <int:n> times").endpoint("ping"))?;
//!
//! let adapter = map.bind(Query::message("ping k_bx 3 times"));
//! let (endpoint, params) = adapter.match_endpoint()?;
//! assert_eq!(endpoint, "ping");
//! ```

pub mod converter;
mod map;
mod order;
pub mod parser;
mod rule;

use serde_json::{Map, Value};

use crate::environ::{Environ, EventKind};

pub use converter::{
    AnyConverter, Converter, ConverterArgs, ConverterFactory, ConverterRegistry, DEFAULT_WEIGHT,
    FloatConverter, IntConverter, StringConverter, WordConverter,
};
pub use map::{MapAdapter, RouteMap};
pub use rule::Rule;

/// Parameters captured by a rule, or supplied to build one.
pub type Params = Map<String, Value>;

/// The event facts a rule is matched against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Message text.
    pub message: String,
    /// Stanza class.
    pub event: Option<EventKind>,
    /// Full sender JID.
    pub sender: Option<String>,
    /// Stanza type.
    pub stanza_type: Option<String>,
}

impl Query {
    /// A query carrying only message text.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Extracts the routable facts of an environ.
    pub fn from_environ(environ: &Environ) -> Self {
        Self {
            message: environ.body_or_empty().to_owned(),
            event: environ.event,
            sender: environ.jid.as_ref().map(ToString::to_string),
            stanza_type: environ.stanza_type.clone(),
        }
    }

    pub fn event(mut self, event: EventKind) -> Self {
        self.event = Some(event);
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn stanza_type(mut self, stanza_type: impl Into<String>) -> Self {
        self.stanza_type = Some(stanza_type.into());
        self
    }
}
