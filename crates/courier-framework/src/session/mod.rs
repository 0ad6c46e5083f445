//! Per-sender sessions.
//!
//! A [`Session`] is a JSON mapping owned by one sender. It is opened when a
//! request context is pushed and saved by the application after the
//! response hooks ran. Where sessions live is decided by the application's
//! [`SessionInterface`]:
//!
//! - [`NullSessionInterface`] (the default) never stores anything.
//! - [`MemorySessionInterface`] keeps sessions in process memory.
//! - [`KeyValueSessionInterface`] stores them as JSON in a key-value backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_framework::{Application, MemorySessionInterface, RequestScope};
//!
//! let app = Application::new("counter");
//! app.set_session_interface(Arc::new(MemorySessionInterface::new()));
//!
//! async fn count(scope: RequestScope) -> anyhow::Result<String> {
//!     let mut session = scope.session();
//!     let n = session.get_as::<i64>("n").unwrap_or(0) + 1;
//!     session.insert("n", n)?;
//!     Ok(format!("seen you {n} times"))
//! }
//! ```

mod kv;
mod memory;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use courier_core::{Jid, Response};

use crate::app::Application;
use crate::error::SessionError;
use crate::request::Request;

pub use kv::{KeyValueBackend, KeyValueSessionInterface, MemoryBackend};
pub use memory::MemorySessionInterface;

const JID_KEY: &str = "_jid";
const PERMANENT_KEY: &str = "_permanent";

// =============================================================================
// Session
// =============================================================================

/// A modification-tracking mapping owned by one sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(flatten)]
    data: Map<String, Value>,
    #[serde(skip)]
    timestamp: Option<SystemTime>,
    #[serde(skip)]
    modified: bool,
    #[serde(skip)]
    new: bool,
    #[serde(skip)]
    null: bool,
}

impl Session {
    /// A fresh session owned by `jid`.
    pub fn new(jid: &Jid) -> Self {
        let mut session = Self::from_data(Map::new());
        session.data.insert(JID_KEY.to_owned(), Value::String(jid.to_string()));
        session.new = true;
        session.touch();
        session
    }

    /// A session restored from stored data.
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            timestamp: None,
            modified: false,
            new: false,
            null: false,
        }
    }

    /// The placeholder used when no session could be opened. It reads as
    /// empty and rejects every change.
    pub fn null() -> Self {
        Self {
            null: true,
            ..Self::from_data(Map::new())
        }
    }

    fn touch(&mut self) {
        self.modified = true;
        self.timestamp = Some(SystemTime::now());
    }

    fn check_writable(&self) -> Result<(), SessionError> {
        if self.null {
            Err(SessionError::NullSession)
        } else {
            Ok(())
        }
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Looks up a value and deserializes it.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Stores a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, SessionError> {
        self.check_writable()?;
        let previous = self.data.insert(key.into(), value.into());
        self.touch();
        Ok(previous)
    }

    /// Removes a value.
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>, SessionError> {
        self.check_writable()?;
        let previous = self.data.remove(key);
        self.touch();
        Ok(previous)
    }

    /// Removes every value except the owner, so the store can still save
    /// the emptied session. The permanence marker goes too.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.check_writable()?;
        self.data.retain(|key, _| key == JID_KEY);
        self.touch();
        Ok(())
    }

    /// The raw data, including the `_jid` and `_permanent` entries.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The owner of this session.
    pub fn jid(&self) -> Option<Jid> {
        self.data.get(JID_KEY)?.as_str()?.parse().ok()
    }

    /// Changes the owner of this session. Ignored on a null session.
    pub fn set_jid(&mut self, jid: &Jid) {
        if self.null {
            return;
        }
        self.data.insert(JID_KEY.to_owned(), Value::String(jid.to_string()));
        self.touch();
    }

    /// Whether the session outlives the store's TTL.
    pub fn permanent(&self) -> bool {
        self.data
            .get(PERMANENT_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Marks the session permanent or not.
    pub fn set_permanent(&mut self, permanent: bool) -> Result<(), SessionError> {
        self.insert(PERMANENT_KEY, permanent).map(|_| ())
    }

    /// Last time the session was changed.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Overrides the change timestamp. Used by stores restoring sessions.
    pub fn set_timestamp(&mut self, timestamp: Option<SystemTime>) {
        self.timestamp = timestamp;
    }

    /// Whether the session changed since it was opened.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether the session was created for this request.
    pub fn is_new(&self) -> bool {
        self.new
    }

    /// Whether this is the null placeholder.
    pub fn is_null(&self) -> bool {
        self.null
    }
}

// =============================================================================
// SessionInterface
// =============================================================================

/// Pluggable session storage.
#[async_trait]
pub trait SessionInterface: Send + Sync {
    /// Loads or creates the session for `request`. `Ok(None)` makes the
    /// request run with a null session.
    async fn open_session(
        &self,
        app: &Application,
        request: &Request,
    ) -> anyhow::Result<Option<Session>>;

    /// Persists `session` after a request.
    async fn save_session(
        &self,
        app: &Application,
        session: &Session,
        response: &Response,
    ) -> anyhow::Result<()>;

    /// Whether `session` should be considered gone.
    async fn is_session_expired(
        &self,
        _app: &Application,
        _session: &Session,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Creates the placeholder used when no session is available.
    fn make_null_session(&self, _app: &Application) -> Session {
        Session::null()
    }

    /// Whether `session` is a placeholder that must not be saved.
    fn is_null_session(&self, session: &Session) -> bool {
        session.is_null()
    }
}

/// Session interface that never opens a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSessionInterface;

#[async_trait]
impl SessionInterface for NullSessionInterface {
    async fn open_session(
        &self,
        _app: &Application,
        _request: &Request,
    ) -> anyhow::Result<Option<Session>> {
        Ok(None)
    }

    async fn save_session(
        &self,
        _app: &Application,
        _session: &Session,
        _response: &Response,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner() -> Jid {
        "alice@example.com/home".parse().unwrap()
    }

    #[test]
    fn test_new_session() {
        let session = Session::new(&owner());
        assert!(session.is_new());
        assert!(session.is_modified());
        assert!(session.timestamp().is_some());
        assert_eq!(session.jid(), Some(owner()));
        assert!(!session.permanent());
    }

    #[test]
    fn test_mutation_tracking() {
        let mut session = Session::from_data(Map::new());
        assert!(!session.is_modified());
        session.insert("counter", 1).unwrap();
        assert!(session.is_modified());
        assert_eq!(session.get_as::<i64>("counter"), Some(1));
        assert_eq!(session.remove("counter").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_permanent_flag_is_stored_in_data() {
        let mut session = Session::new(&owner());
        session.set_permanent(true).unwrap();
        assert!(session.permanent());
        assert_eq!(session.get("_permanent"), Some(&json!(true)));
    }

    #[test]
    fn test_clear_keeps_the_owner() {
        let mut session = Session::new(&owner());
        session.insert("n", 3).unwrap();
        session.set_permanent(true).unwrap();
        session.clear().unwrap();
        assert_eq!(session.jid(), Some(owner()));
        assert!(!session.permanent());
        assert!(!session.contains_key("n"));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_null_session_rejects_changes() {
        let mut session = Session::null();
        assert_eq!(session.insert("a", 1), Err(SessionError::NullSession));
        assert_eq!(session.clear(), Err(SessionError::NullSession));
        session.set_jid(&owner());
        assert_eq!(session.jid(), None);
        assert!(session.is_empty());
    }

    #[test]
    fn test_serialized_form_is_the_mapping() {
        let mut session = Session::new(&owner());
        session.insert("n", 2).unwrap();
        let text = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&text).unwrap();
        assert_eq!(back.data(), session.data());
        assert!(!back.is_modified());
    }
}
