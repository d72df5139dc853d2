use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Connection identifier assigned by the transport (e.g. a tab id).
pub type ConnId = u64;

/// Display identity a page reports on checkin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub origin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

/// Push callback back into one connection. Implemented by the transport;
/// a failed push means the connection is gone.
pub trait SessionPush: Send + Sync {
    fn push(&self, event: &str, data: &Value) -> Result<(), ()>;
}

struct Session {
    meta: SessionMeta,
    push: Arc<dyn SessionPush>,
}

/// Live page connections, keyed by connection id. Never persisted; a
/// session's origin may or may not be a connected site.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConnId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or refresh) the session for a connection.
    pub fn create_session(&self, conn: ConnId, meta: SessionMeta, push: Arc<dyn SessionPush>) {
        debug!(conn, origin = %meta.origin, "session created");
        self.lock().insert(conn, Session { meta, push });
    }

    pub fn get_session(&self, conn: ConnId) -> Option<SessionMeta> {
        self.lock().get(&conn).map(|s| s.meta.clone())
    }

    pub fn delete_session(&self, conn: ConnId) {
        debug!(conn, "session deleted");
        self.lock().remove(&conn);
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `event` to every live session, optionally filtered by
    /// origin. Sessions whose push fails are evicted.
    pub fn broadcast(&self, event: &str, data: &Value, origin_filter: Option<&str>) {
        let mut sessions = self.lock();
        let dead: Vec<ConnId> = sessions
            .iter()
            .filter(|(_, s)| origin_filter.is_none_or(|o| s.meta.origin == o))
            .filter(|(_, s)| s.push.push(event, data).is_err())
            .map(|(conn, _)| *conn)
            .collect();

        for conn in dead {
            debug!(conn, "evicting dead session");
            sessions.remove(&conn);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnId, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakePush {
        delivered: Mutex<Vec<(String, Value)>>,
        fail: AtomicBool,
    }

    impl FakePush {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn delivered(&self) -> Vec<(String, Value)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl SessionPush for FakePush {
        fn push(&self, event: &str, data: &Value) -> Result<(), ()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(());
            }
            self.delivered
                .lock()
                .unwrap()
                .push((event.to_owned(), data.clone()));
            Ok(())
        }
    }

    fn meta(origin: &str) -> SessionMeta {
        SessionMeta {
            origin: origin.into(),
            name: "Site".into(),
            icon: String::new(),
        }
    }

    #[test]
    fn create_get_delete_cycle() {
        let registry = SessionRegistry::new();
        registry.create_session(1, meta("https://a.example"), FakePush::new());

        assert_eq!(
            registry.get_session(1).unwrap().origin,
            "https://a.example"
        );
        registry.delete_session(1);
        assert!(registry.get_session(1).is_none());
    }

    #[test]
    fn broadcast_reaches_every_session() {
        let registry = SessionRegistry::new();
        let a = FakePush::new();
        let b = FakePush::new();
        registry.create_session(1, meta("https://a.example"), a.clone());
        registry.create_session(2, meta("https://b.example"), b.clone());

        registry.broadcast("networkChanged", &json!("testnet"), None);

        assert_eq!(a.delivered().len(), 1);
        assert_eq!(b.delivered().len(), 1);
        assert_eq!(a.delivered()[0].0, "networkChanged");
    }

    #[test]
    fn origin_filter_limits_delivery() {
        let registry = SessionRegistry::new();
        let a = FakePush::new();
        let b = FakePush::new();
        registry.create_session(1, meta("https://a.example"), a.clone());
        registry.create_session(2, meta("https://b.example"), b.clone());

        registry.broadcast("accountsChanged", &json!(["tb1q"]), Some("https://a.example"));

        assert_eq!(a.delivered().len(), 1);
        assert!(b.delivered().is_empty());
    }

    #[test]
    fn failed_push_evicts_the_session() {
        let registry = SessionRegistry::new();
        let a = FakePush::new();
        let b = FakePush::new();
        b.fail.store(true, Ordering::SeqCst);
        registry.create_session(1, meta("https://a.example"), a);
        registry.create_session(2, meta("https://b.example"), b);

        registry.broadcast("networkChanged", &json!("signet"), None);

        assert_eq!(registry.session_count(), 1);
        assert!(registry.get_session(2).is_none());
    }

    #[test]
    fn checkin_replaces_previous_session() {
        let registry = SessionRegistry::new();
        registry.create_session(7, meta("https://old.example"), FakePush::new());
        registry.create_session(7, meta("https://new.example"), FakePush::new());

        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.get_session(7).unwrap().origin, "https://new.example");
    }
}
