//! The inbound event model.
//!
//! An [`Environ`] is the key-value description of one inbound stanza, filled
//! in by the hosting server and its capabilities. The framework only reads
//! it; converting a wire stanza into an environ is the server's job.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::{Environ, EventKind};
//!
//! let environ = Environ::message("alice@example.com/home".parse()?, "ping")
//!     .with_stanza_type("chat");
//! assert_eq!(environ.event, Some(EventKind::Message));
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jid::Jid;

// =============================================================================
// EventKind
// =============================================================================

/// The stanza class of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A `<message/>` stanza.
    Message,
    /// A `<presence/>` stanza.
    Presence,
    /// An `<iq/>` stanza.
    Iq,
}

impl EventKind {
    /// Returns the lowercase stanza name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Presence => "presence",
            Self::Iq => "iq",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "presence" => Ok(Self::Presence),
            "iq" => Ok(Self::Iq),
            other => Err(format!("unknown stanza kind '{other}'")),
        }
    }
}

// =============================================================================
// Environ
// =============================================================================

/// Description of one inbound event.
///
/// Every field is optional; capabilities may add their own entries under
/// [`extra`](Self::extra).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environ {
    /// The application's own JID.
    #[serde(default)]
    pub app_jid: Option<Jid>,
    /// Stream protocol in use (`tls`, `ssl`), if known.
    #[serde(default)]
    pub app_protocol: Option<String>,
    /// Stanza ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Sender JID.
    #[serde(default)]
    pub jid: Option<Jid>,
    /// Message body, status message and the like.
    #[serde(default)]
    pub body: Option<String>,
    /// Raw stanza XML.
    #[serde(default)]
    pub xml: Option<String>,
    /// Stanza class.
    #[serde(default)]
    pub event: Option<EventKind>,
    /// Stanza type: `chat`, `groupchat`, `available`, ...
    #[serde(default)]
    pub stanza_type: Option<String>,
    /// Presence show value: `chat`, `dnd`, `away`, ...
    #[serde(default)]
    pub status: Option<String>,
    /// Presence priority.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Time the stanza was received (UTC).
    #[serde(default)]
    pub timestamp: Option<SystemTime>,
    /// Delivery delay stamp, when the stanza was delayed.
    #[serde(default)]
    pub delay: Option<String>,
    /// Capability-specific entries.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Environ {
    /// Creates an empty environ.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message environ from `from` with the given body.
    pub fn message(from: Jid, body: impl Into<String>) -> Self {
        Self {
            jid: Some(from),
            body: Some(body.into()),
            event: Some(EventKind::Message),
            ..Self::default()
        }
    }

    /// Creates a presence environ from `from`.
    pub fn presence(from: Jid) -> Self {
        Self {
            jid: Some(from),
            event: Some(EventKind::Presence),
            ..Self::default()
        }
    }

    /// Sets the stanza type.
    pub fn with_stanza_type(mut self, stanza_type: impl Into<String>) -> Self {
        self.stanza_type = Some(stanza_type.into());
        self
    }

    /// Sets the application's own JID.
    pub fn with_app_jid(mut self, jid: Jid) -> Self {
        self.app_jid = Some(jid);
        self
    }

    /// Sets the presence status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Returns the body or an empty string.
    pub fn body_or_empty(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Looks up a capability-specific entry.
    pub fn get_extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Stores a capability-specific entry.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }
}
