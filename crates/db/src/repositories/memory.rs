use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use salescope_core::clock::{Clock, SystemClock};
use salescope_core::domain::session::{SessionEntry, SessionId};

use super::{PendingEntry, RepositoryError, SessionStore};

struct StoredSession {
    entries: Vec<SessionEntry>,
    expires_at: DateTime<Utc>,
}

/// Process-local session log for tests and single-process deployments.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl, clock }
    }

    pub async fn purge_expired(&self) -> u64 {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        (before - sessions.len()) as u64
    }

    async fn live<T>(
        &self,
        session_id: &SessionId,
        read: impl FnOnce(&StoredSession) -> T,
    ) -> Option<T> {
        let now = self.clock.now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                Some(session) if session.expires_at > now => return Some(read(session)),
                Some(_) => {}
                None => return None,
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions.get(session_id).is_some_and(|session| session.expires_at <= now) {
            sessions.remove(session_id);
        }
        None
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError> {
        Ok(self.live(session_id, |_| ()).await.is_some())
    }

    async fn append_exchange(
        &self,
        session_id: &SessionId,
        entries: Vec<PendingEntry>,
    ) -> Result<(), RepositoryError> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(|| StoredSession { entries: Vec::new(), expires_at: now });
        if session.expires_at <= now {
            session.entries.clear();
        }
        session.entries.extend(entries.into_iter().map(|entry| SessionEntry {
            role: entry.role,
            content: entry.content,
            metadata: entry.metadata,
            created_at: now,
        }));
        session.expires_at = now + self.ttl;
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<SessionEntry>, RepositoryError> {
        Ok(self.live(session_id, |session| session.entries.clone()).await.unwrap_or_default())
    }

    async fn clear(&self, session_id: &SessionId) -> Result<(), RepositoryError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn ttl_remaining(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Duration>, RepositoryError> {
        let now = self.clock.now();
        Ok(self.live(session_id, |session| session.expires_at - now).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use salescope_core::clock::ManualClock;
    use salescope_core::domain::message::{MessageContent, Role};
    use salescope_core::domain::session::SessionId;

    use super::InMemorySessionStore;
    use crate::repositories::{PendingEntry, SessionStore};

    fn store_with_clock() -> (InMemorySessionStore, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).single().expect("timestamp");
        let clock = Arc::new(ManualClock::new(start));
        (InMemorySessionStore::with_clock(Duration::hours(24), clock.clone()), clock)
    }

    fn session(id: &str) -> SessionId {
        SessionId::parse(id).expect("session id")
    }

    #[tokio::test]
    async fn unknown_session_is_empty_not_an_error() {
        let (store, _) = store_with_clock();
        let id = session("never-written");

        assert!(!store.exists(&id).await.expect("exists"));
        assert!(store.list(&id).await.expect("list").is_empty());
        assert_eq!(store.ttl_remaining(&id).await.expect("ttl"), None);
        assert_eq!(store.formatted_history(&id).await.expect("history"), "");
    }

    #[tokio::test]
    async fn append_preserves_order_and_metadata() {
        let (store, _) = store_with_clock();
        let id = session("s-1");

        store.append(&id, Role::User, "Hello".into(), None).await.expect("append user");
        store
            .append(&id, Role::Assistant, "Hi!".into(), Some(json!({ "route": "normal" })))
            .await
            .expect("append assistant");

        let entries = store.list(&id).await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].content, MessageContent::from("Hi!"));
        assert_eq!(entries[1].metadata, Some(json!({ "route": "normal" })));
        assert_eq!(
            store.formatted_history(&id).await.expect("history"),
            "USER: Hello\nASSISTANT: Hi!"
        );
    }

    #[tokio::test]
    async fn exchange_is_written_together_and_refreshes_ttl() {
        let (store, clock) = store_with_clock();
        let id = session("s-exchange");

        store.append(&id, Role::User, "earlier".into(), None).await.expect("append");
        clock.advance(Duration::hours(6));
        store
            .append_exchange(
                &id,
                vec![
                    PendingEntry::new(Role::User, "Hello"),
                    PendingEntry::new(Role::Assistant, "Hi!")
                        .with_metadata(json!({ "route": "normal", "is_error": false })),
                ],
            )
            .await
            .expect("append exchange");
        store.append_exchange(&id, Vec::new()).await.expect("empty exchange");

        let entries = store.list(&id).await.expect("list");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].created_at, entries[2].created_at);
        assert_eq!(entries[2].metadata, Some(json!({ "route": "normal", "is_error": false })));
        assert_eq!(store.ttl_remaining(&id).await.expect("ttl"), Some(Duration::hours(24)));
    }

    #[tokio::test]
    async fn append_resets_ttl_to_full_window() {
        let (store, clock) = store_with_clock();
        let id = session("s-ttl");

        store.append(&id, Role::User, "first".into(), None).await.expect("append");
        clock.advance(Duration::hours(20));
        assert_eq!(store.ttl_remaining(&id).await.expect("ttl"), Some(Duration::hours(4)));

        store.append(&id, Role::Assistant, "second".into(), None).await.expect("append");
        assert_eq!(store.ttl_remaining(&id).await.expect("ttl"), Some(Duration::hours(24)));
    }

    #[tokio::test]
    async fn expired_session_behaves_as_new() {
        let (store, clock) = store_with_clock();
        let id = session("s-expired");

        store.append(&id, Role::User, "old".into(), None).await.expect("append");
        clock.advance(Duration::hours(24));

        assert!(!store.exists(&id).await.expect("exists"));
        store.append(&id, Role::User, "new".into(), None).await.expect("append");
        let entries = store.list(&id).await.expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content.primary_text(), "new");
    }

    #[tokio::test]
    async fn clear_and_purge_remove_sessions() {
        let (store, clock) = store_with_clock();
        let kept = session("kept");
        let cleared = session("cleared");
        let stale = session("stale");

        store.append(&stale, Role::User, "a".into(), None).await.expect("append");
        clock.advance(Duration::hours(23));
        store.append(&kept, Role::User, "b".into(), None).await.expect("append");
        store.append(&cleared, Role::User, "c".into(), None).await.expect("append");

        store.clear(&cleared).await.expect("clear");
        assert!(!store.exists(&cleared).await.expect("exists"));

        clock.advance(Duration::hours(2));
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.exists(&kept).await.expect("exists"));
    }
}
