//! Server capabilities.
//!
//! A capability is a named feature of the server. It can contribute entries
//! to every environ the server builds and can provide commands an
//! application's response may issue. The server resolves each command name
//! to the capability that registered it.
//!
//! Built-in capabilities:
//!
//! | name       | provides                                                  |
//! |------------|-----------------------------------------------------------|
//! | `std`      | `message`, `presence`, `iq`; fills the base environ fields |
//! | `XEP-0092` | `version`: answers `{name, version, os}`                  |
//! | `XEP-0203` | copies the stanza's delay stamp into the environ          |
//!
//! `std` wraps the transport and is always registered by the server. The
//! others are contributed to [`CAPABILITIES`] at link time, the same way a
//! downstream crate adds its own:
//!
//! ```rust,ignore
//! use courier_runtime::capability::{CAPABILITIES, CapabilityEntry};
//! use courier_runtime::linkme::distributed_slice;
//!
//! #[distributed_slice(CAPABILITIES)]
//! #[linkme(crate = courier_runtime::linkme)]
//! static MUC: CapabilityEntry = CapabilityEntry::new("XEP-0045", create_muc);
//!
//! fn create_muc() -> Arc<dyn Capability> {
//!     Arc::new(Muc)
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use courier_core::response::{IQ, MESSAGE, PRESENCE};
use courier_core::{Ack, Environ, Jid};

use crate::error::{CapabilityError, ServerError};
use crate::stanza::Stanza;
use crate::transport::Transport;

/// Name of the standard capability.
pub const STD: &str = "std";
/// Name of the software version capability.
pub const VERSION: &str = "XEP-0092";
/// Name of the delayed delivery capability.
pub const DELAY: &str = "XEP-0203";

// =============================================================================
// Capability
// =============================================================================

/// A named server feature.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique capability name.
    fn name(&self) -> &str;

    /// Commands this capability executes.
    fn commands(&self) -> &[&'static str] {
        &[]
    }

    /// Adds this capability's view of `stanza` to `environ`.
    fn update_environ(&self, _environ: &mut Environ, _stanza: &Stanza) {}

    /// Executes `command` for the request described by `environ`.
    async fn execute(
        &self,
        command: &str,
        _environ: &Environ,
        _payload: &Map<String, Value>,
    ) -> anyhow::Result<Ack> {
        Err(ServerError::UnknownCommand(command.to_owned()).into())
    }
}

impl fmt::Debug for dyn Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name())
            .field("commands", &self.commands())
            .finish()
    }
}

// =============================================================================
// Link-time registration
// =============================================================================

/// A capability constructor contributed to [`CAPABILITIES`].
pub struct CapabilityEntry {
    pub name: &'static str,
    pub create: fn() -> Arc<dyn Capability>,
}

impl CapabilityEntry {
    pub const fn new(name: &'static str, create: fn() -> Arc<dyn Capability>) -> Self {
        Self { name, create }
    }
}

/// Capabilities available to every server in the binary.
#[distributed_slice]
pub static CAPABILITIES: [CapabilityEntry];

#[distributed_slice(CAPABILITIES)]
static VERSION_ENTRY: CapabilityEntry = CapabilityEntry::new(VERSION, create_version);

#[distributed_slice(CAPABILITIES)]
static DELAY_ENTRY: CapabilityEntry = CapabilityEntry::new(DELAY, create_delay);

fn create_version() -> Arc<dyn Capability> {
    Arc::new(Version::new())
}

fn create_delay() -> Arc<dyn Capability> {
    Arc::new(Delay)
}

// =============================================================================
// CapabilityRegistry
// =============================================================================

/// The capabilities a server may register, by name.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    known: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every [`CAPABILITIES`] entry.
    ///
    /// When two entries share a name the first one wins.
    pub fn collect_all() -> Self {
        let mut registry = Self::new();
        for entry in CAPABILITIES.iter() {
            if registry.known.contains_key(entry.name) {
                warn!(
                    capability = entry.name,
                    "Multiple capability providers registered, using first"
                );
                continue;
            }
            registry.insert((entry.create)());
        }
        registry
    }

    /// Adds `capability`, replacing a known one with the same name.
    pub fn insert(&mut self, capability: Arc<dyn Capability>) {
        debug!(capability = capability.name(), "Capability available");
        self.known.insert(capability.name().to_owned(), capability);
    }

    /// Looks a capability up by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Capability>, CapabilityError> {
        self.known
            .get(name)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(name.to_owned()))
    }

    /// Known capability names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.known.keys().map(String::as_str)
    }

    /// All known capabilities, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Capability>> {
        self.known.values()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

// =============================================================================
// Standard
// =============================================================================

/// The `std` capability: basic stanza fields and the stanza commands, sent
/// through the transport.
pub struct Standard {
    transport: Arc<dyn Transport>,
}

impl Standard {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Capability for Standard {
    fn name(&self) -> &str {
        STD
    }

    fn commands(&self) -> &[&'static str] {
        &[MESSAGE, PRESENCE, IQ]
    }

    fn update_environ(&self, environ: &mut Environ, stanza: &Stanza) {
        environ.app_protocol = self.transport.protocol();
        environ.id.clone_from(&stanza.id);
        environ.jid.clone_from(&stanza.from);
        environ.body = stanza.body.clone().filter(|body| !body.is_empty());
        environ.xml.clone_from(&stanza.xml);
        environ.stanza_type.clone_from(&stanza.stanza_type);
        environ.status.clone_from(&stanza.show);
        environ.priority = stanza.priority;
    }

    /// Sends the stanza to the payload's `to`, or back to the sender.
    async fn execute(
        &self,
        command: &str,
        environ: &Environ,
        payload: &Map<String, Value>,
    ) -> anyhow::Result<Ack> {
        let to = match payload.get("to").and_then(Value::as_str) {
            Some(to) => Some(to.parse::<Jid>()?),
            None => environ.jid.clone(),
        };
        self.transport.send(command, to.as_ref(), payload).await
    }
}

// =============================================================================
// XEP-0092 / XEP-0203
// =============================================================================

/// Software version (XEP-0092).
pub struct Version {
    software: String,
    version: String,
    os: String,
}

impl Version {
    pub fn new() -> Self {
        Self {
            software: "Courier".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            os: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for Version {
    fn name(&self) -> &str {
        VERSION
    }

    fn commands(&self) -> &[&'static str] {
        &["version"]
    }

    async fn execute(
        &self,
        command: &str,
        _environ: &Environ,
        _payload: &Map<String, Value>,
    ) -> anyhow::Result<Ack> {
        match command {
            "version" => Ok(json!({
                "name": self.software,
                "version": self.version,
                "os": self.os,
            })),
            other => Err(ServerError::UnknownCommand(other.to_owned()).into()),
        }
    }
}

/// Delayed delivery (XEP-0203).
pub struct Delay;

#[async_trait]
impl Capability for Delay {
    fn name(&self) -> &str {
        DELAY
    }

    fn update_environ(&self, environ: &mut Environ, stanza: &Stanza) {
        if stanza.delay.is_some() {
            environ.delay.clone_from(&stanza.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_all_has_builtins() {
        let registry = CapabilityRegistry::collect_all();
        assert!(registry.lookup(VERSION).is_ok());
        assert!(registry.lookup(DELAY).is_ok());
        assert_eq!(
            registry.lookup("XEP-0045").unwrap_err(),
            CapabilityError::NotFound("XEP-0045".into())
        );
    }

    #[tokio::test]
    async fn test_version_answers() {
        let version = Version::new();
        let ack = version
            .execute("version", &Environ::new(), &Map::new())
            .await
            .unwrap();
        assert_eq!(ack["name"], "Courier");
        assert_eq!(ack["version"], env!("CARGO_PKG_VERSION"));
        assert!(ack["os"].as_str().is_some_and(|os| !os.is_empty()));

        let err = version
            .execute("ping", &Environ::new(), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServerError>(),
            Some(ServerError::UnknownCommand(name)) if name == "ping"
        ));
    }

    #[test]
    fn test_delay_copies_stamp() {
        let from: Jid = "alice@example.com".parse().unwrap();
        let mut environ = Environ::new();
        Delay.update_environ(&mut environ, &Stanza::message(from.clone(), "hi"));
        assert_eq!(environ.delay, None);

        let stanza = Stanza::message(from, "hi").with_delay("2002-09-10T23:08:25Z");
        Delay.update_environ(&mut environ, &stanza);
        assert_eq!(environ.delay.as_deref(), Some("2002-09-10T23:08:25Z"));
    }
}
