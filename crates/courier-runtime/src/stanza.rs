//! Inbound stanzas as delivered by a transport.
//!
//! A [`Stanza`] is the transport-neutral form of one received XMPP element.
//! The server never hands it to the application directly; capabilities copy
//! the parts they understand into an [`Environ`](courier_core::Environ).

use serde::{Deserialize, Serialize};

use courier_core::{EventKind, Jid};

/// One received stanza.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stanza {
    /// Stanza class. `None` for elements the transport could not classify.
    pub kind: Option<EventKind>,
    pub id: Option<String>,
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    /// `chat`, `groupchat`, `available`, `get`, ...
    pub stanza_type: Option<String>,
    /// Message body or presence status text.
    pub body: Option<String>,
    /// Presence `<show/>`.
    pub show: Option<String>,
    pub priority: Option<i32>,
    /// Delivery delay stamp (XEP-0203).
    pub delay: Option<String>,
    /// The raw element, when the transport keeps it.
    pub xml: Option<String>,
}

impl Stanza {
    fn of_kind(kind: Option<EventKind>) -> Self {
        Self {
            kind,
            id: None,
            from: None,
            to: None,
            stanza_type: None,
            body: None,
            show: None,
            priority: None,
            delay: None,
            xml: None,
        }
    }

    /// A `chat` message from `from`.
    pub fn message(from: Jid, body: impl Into<String>) -> Self {
        Self {
            from: Some(from),
            body: Some(body.into()),
            stanza_type: Some("chat".to_owned()),
            ..Self::of_kind(Some(EventKind::Message))
        }
    }

    /// An `available` presence from `from`.
    pub fn presence(from: Jid) -> Self {
        Self {
            from: Some(from),
            stanza_type: Some("available".to_owned()),
            ..Self::of_kind(Some(EventKind::Presence))
        }
    }

    /// An iq from `from`.
    pub fn iq(from: Jid, stanza_type: impl Into<String>) -> Self {
        Self {
            from: Some(from),
            stanza_type: Some(stanza_type.into()),
            ..Self::of_kind(Some(EventKind::Iq))
        }
    }

    /// An element of unknown class.
    pub fn unknown() -> Self {
        Self::of_kind(None)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_to(mut self, to: Jid) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_type(mut self, stanza_type: impl Into<String>) -> Self {
        self.stanza_type = Some(stanza_type.into());
        self
    }

    pub fn with_show(mut self, show: impl Into<String>) -> Self {
        self.show = Some(show.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, stamp: impl Into<String>) -> Self {
        self.delay = Some(stamp.into());
        self
    }

    pub fn with_xml(mut self, xml: impl Into<String>) -> Self {
        self.xml = Some(xml.into());
        self
    }
}
