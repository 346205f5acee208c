//! Session and history storage.
//!
//! Persistence proper lives outside this core; orchestration only needs
//! create/read/update access through the [`SessionStore`] contract.
//! [`InMemoryStore`] is the reference implementation used in-process and in
//! tests.

use dashmap::DashMap;

use troupe_core::agents::{Session, SessionState};
use troupe_core::errors::OrchestratorError;
use troupe_core::history::HistoryItem;
use troupe_core::ids::{InstanceId, SessionId};

/// Abstract repository contract for sessions and per-instance history.
pub trait SessionStore: Send + Sync {
    /// Persist a new session.
    fn insert_session(&self, session: Session);

    /// Fetch a session by ID.
    fn get_session(&self, id: &SessionId) -> Option<Session>;

    /// Update a session's lifecycle state.
    fn set_session_state(&self, id: &SessionId, state: SessionState)
    -> Result<(), OrchestratorError>;

    /// Append an agent instance to a session's ordered agent list.
    fn push_agent(&self, id: &SessionId, instance: InstanceId) -> Result<(), OrchestratorError>;

    /// Refresh a session's `updated_at`.
    fn touch(&self, id: &SessionId);

    /// Sessions owned by a user, newest first.
    fn list_sessions(&self, user_id: &str) -> Vec<Session>;

    /// Append one turn to an instance's conversation history.
    fn append_history(&self, instance: &InstanceId, item: HistoryItem);

    /// An instance's conversation history, oldest first.
    fn history(&self, instance: &InstanceId) -> Vec<HistoryItem>;
}

/// DashMap-backed store for in-process use.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: DashMap<SessionId, Session>,
    history: DashMap<InstanceId, Vec<HistoryItem>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemoryStore {
    fn insert_session(&self, session: Session) {
        let _ = self.sessions.insert(session.id.clone(), session);
    }

    fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    fn set_session_state(
        &self,
        id: &SessionId,
        state: SessionState,
    ) -> Result<(), OrchestratorError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {id}")))?;
        entry.state = state;
        entry.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn push_agent(&self, id: &SessionId, instance: InstanceId) -> Result<(), OrchestratorError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {id}")))?;
        entry.agents.push(instance);
        entry.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn touch(&self, id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.updated_at = chrono::Utc::now();
        }
    }

    fn list_sessions(&self, user_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    fn append_history(&self, instance: &InstanceId, item: HistoryItem) {
        self.history.entry(instance.clone()).or_default().push(item);
    }

    fn history(&self, instance: &InstanceId) -> Vec<HistoryItem> {
        self.history
            .get(instance)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn insert_and_get_session() {
        let store = InMemoryStore::new();
        let session = Session::new("user-1", "team");
        let id = session.id.clone();
        store.insert_session(session);

        let loaded = store.get_session(&id).unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.state, SessionState::Active);
    }

    #[test]
    fn set_state_and_touch() {
        let store = InMemoryStore::new();
        let session = Session::new("user-1", "team");
        let id = session.id.clone();
        let created = session.updated_at;
        store.insert_session(session);

        store.set_session_state(&id, SessionState::Closed).unwrap();
        let loaded = store.get_session(&id).unwrap();
        assert_eq!(loaded.state, SessionState::Closed);
        assert!(loaded.updated_at >= created);
    }

    #[test]
    fn set_state_on_missing_session() {
        let store = InMemoryStore::new();
        let err = store
            .set_session_state(&SessionId::from("nope"), SessionState::Closed)
            .unwrap_err();
        assert_matches!(err, OrchestratorError::NotFound(_));
    }

    #[test]
    fn push_agent_preserves_order() {
        let store = InMemoryStore::new();
        let session = Session::new("user-1", "team");
        let id = session.id.clone();
        store.insert_session(session);

        let a = InstanceId::new();
        let b = InstanceId::new();
        store.push_agent(&id, a.clone()).unwrap();
        store.push_agent(&id, b.clone()).unwrap();

        assert_eq!(store.get_session(&id).unwrap().agents, vec![a, b]);
    }

    #[test]
    fn list_sessions_filters_by_user() {
        let store = InMemoryStore::new();
        store.insert_session(Session::new("alice", "one"));
        store.insert_session(Session::new("alice", "two"));
        store.insert_session(Session::new("bob", "other"));

        assert_eq!(store.list_sessions("alice").len(), 2);
        assert_eq!(store.list_sessions("bob").len(), 1);
        assert!(store.list_sessions("carol").is_empty());
    }

    #[test]
    fn history_appends_in_order() {
        let store = InMemoryStore::new();
        let instance = InstanceId::new();
        assert!(store.history(&instance).is_empty());

        store.append_history(&instance, HistoryItem::user("question"));
        store.append_history(&instance, HistoryItem::assistant("answer"));

        let history = store.history(&instance);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "question");
        assert_eq!(history[1].content, "answer");
    }
}
