//! Sessions in a remote key-value store.
//!
//! Sessions are stored as JSON under `{namespace}{jid}`. Permanent sessions
//! are written without expiry; the others expire after the application's
//! session TTL, so a session whose key is gone counts as expired.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error};

use courier_core::{Jid, Response};

use super::{Session, SessionInterface};
use crate::app::Application;
use crate::request::Request;

/// Default key prefix.
pub const DEFAULT_NAMESPACE: &str = "courier:sessions:";

/// The subset of a key-value store the session interface needs.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Reads a key.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    /// Writes a key without expiry.
    async fn set(&self, key: &str, value: String) -> anyhow::Result<()>;
    /// Writes a key that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;
    /// Whether a key exists.
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

/// An in-process [`KeyValueBackend`] honouring expiry.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    /// Removes a key.
    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_owned(), (value, None));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        self.entries
            .lock()
            .insert(key.to_owned(), (value, Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.live(key).is_some())
    }
}

/// Session interface backed by a [`KeyValueBackend`].
#[derive(Debug)]
pub struct KeyValueSessionInterface<B> {
    backend: B,
    namespace: String,
}

impl<B: KeyValueBackend> KeyValueSessionInterface<B> {
    /// Uses `backend` with the default namespace.
    pub fn new(backend: B) -> Self {
        Self::with_namespace(backend, DEFAULT_NAMESPACE)
    }

    /// Uses `backend` with a custom key prefix.
    pub fn with_namespace(backend: B, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Storage key of `jid`'s session.
    pub fn key(&self, jid: &Jid) -> String {
        format!("{}{jid}", self.namespace)
    }
}

#[async_trait]
impl<B: KeyValueBackend> SessionInterface for KeyValueSessionInterface<B> {
    async fn open_session(
        &self,
        _app: &Application,
        request: &Request,
    ) -> anyhow::Result<Option<Session>> {
        let Some(jid) = request.jid() else {
            return Ok(None);
        };
        let Some(raw) = self.backend.get(&self.key(jid)).await? else {
            return Ok(Some(Session::new(jid)));
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                error!(jid = %jid, error = %err, "malformed session loaded");
                Ok(Some(Session::new(jid)))
            }
        }
    }

    async fn save_session(
        &self,
        app: &Application,
        session: &Session,
        _response: &Response,
    ) -> anyhow::Result<()> {
        let Some(jid) = session.jid() else {
            debug!("session has no owner, not saving it");
            return Ok(());
        };
        let key = self.key(&jid);
        let value = serde_json::to_string(session)?;
        if session.permanent() {
            self.backend.set(&key, value).await
        } else {
            self.backend
                .set_ex(&key, value, app.config().session_ttl())
                .await
        }
    }

    async fn is_session_expired(
        &self,
        _app: &Application,
        session: &Session,
    ) -> anyhow::Result<bool> {
        match session.jid() {
            Some(jid) => Ok(!self.backend.exists(&self.key(&jid)).await?),
            None => Ok(true),
        }
    }
}
