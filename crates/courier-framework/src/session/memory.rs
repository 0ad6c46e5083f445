//! In-memory sessions.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use courier_core::{Jid, Response};

use super::{Session, SessionInterface};
use crate::app::Application;
use crate::request::Request;

/// Keeps sessions in process memory, keyed by the sender's full JID.
///
/// Expired sessions are swept on every open and save.
#[derive(Debug, Default)]
pub struct MemorySessionInterface {
    storage: Mutex<HashMap<String, Session>>,
}

impl MemorySessionInterface {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored session of `jid`.
    pub fn get(&self, jid: &Jid) -> Option<Session> {
        self.storage.lock().get(&jid.to_string()).cloned()
    }

    /// Stores `session` under its owner. Sessions without an owner are
    /// skipped.
    pub fn insert(&self, session: Session) {
        match session.jid() {
            Some(jid) => {
                self.storage.lock().insert(jid.to_string(), session);
            }
            None => debug!("session has no owner, not saving it"),
        }
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(session: &Session, ttl: Duration, now: SystemTime) -> bool {
        if session.permanent() {
            return false;
        }
        let Some(timestamp) = session.timestamp() else {
            return false;
        };
        timestamp.checked_add(ttl).is_some_and(|deadline| deadline < now)
    }

    fn cleanup(&self, ttl: Duration) {
        let now = SystemTime::now();
        let mut storage = self.storage.lock();
        let before = storage.len();
        storage.retain(|_, session| !Self::is_expired(session, ttl, now));
        let removed = before - storage.len();
        if removed > 0 {
            debug!(removed, "expired sessions removed");
        }
    }
}

#[async_trait]
impl SessionInterface for MemorySessionInterface {
    async fn open_session(
        &self,
        app: &Application,
        request: &Request,
    ) -> anyhow::Result<Option<Session>> {
        self.cleanup(app.config().session_ttl());
        let Some(jid) = request.jid() else {
            return Ok(None);
        };
        Ok(Some(self.get(jid).unwrap_or_else(|| Session::new(jid))))
    }

    async fn save_session(
        &self,
        app: &Application,
        session: &Session,
        _response: &Response,
    ) -> anyhow::Result<()> {
        self.insert(session.clone());
        self.cleanup(app.config().session_ttl());
        Ok(())
    }

    async fn is_session_expired(
        &self,
        app: &Application,
        session: &Session,
    ) -> anyhow::Result<bool> {
        Ok(Self::is_expired(
            session,
            app.config().session_ttl(),
            SystemTime::now(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Jid {
        "bob@example.com/phone".parse().unwrap()
    }

    #[test]
    fn test_expiry_rules() {
        let ttl = Duration::from_secs(60);
        let now = SystemTime::now();
        let mut session = Session::new(&owner());
        assert!(!MemorySessionInterface::is_expired(&session, ttl, now));

        session.set_timestamp(Some(now - Duration::from_secs(120)));
        assert!(MemorySessionInterface::is_expired(&session, ttl, now));

        session.set_permanent(true).unwrap();
        session.set_timestamp(Some(now - Duration::from_secs(120)));
        assert!(!MemorySessionInterface::is_expired(&session, ttl, now));

        let mut untouched = Session::new(&owner());
        untouched.set_timestamp(None);
        assert!(!MemorySessionInterface::is_expired(&untouched, ttl, now));
    }

    #[test]
    fn test_cleared_session_is_still_stored() {
        let store = MemorySessionInterface::new();
        let mut session = Session::new(&owner());
        session.insert("n", 5).unwrap();
        store.insert(session.clone());

        session.clear().unwrap();
        store.insert(session);
        let stored = store.get(&owner()).unwrap();
        assert!(!stored.contains_key("n"));
        assert_eq!(stored.jid(), Some(owner()));
    }

    #[test]
    fn test_cleanup_sweeps_expired() {
        let store = MemorySessionInterface::new();
        let mut stale = Session::new(&owner());
        stale.set_timestamp(Some(SystemTime::now() - Duration::from_secs(7200)));
        store.insert(stale);
        let fresh_owner: Jid = "carol@example.com".parse().unwrap();
        store.insert(Session::new(&fresh_owner));
        assert_eq!(store.len(), 2);

        store.cleanup(Duration::from_secs(3600));
        assert_eq!(store.len(), 1);
        assert!(store.get(&fresh_owner).is_some());
    }
}
