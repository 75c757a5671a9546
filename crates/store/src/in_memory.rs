//! In-memory store: useful for testing and ephemeral runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nodu_core::error::StoreError;
use nodu_core::message::{Message, NewUser, Session, SessionId, User, UserCredentials, UserId};
use nodu_core::persona::PersonaId;
use nodu_core::store::{SessionStore, UserStore};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    sessions: Vec<Session>,
    users: Vec<UserCredentials>,
    tokens: HashMap<String, UserId>,
    next_session_id: i64,
    next_user_id: i64,
}

/// A store that keeps everything in process memory.
/// Appends hold the write lock, so concurrent turns never lose a message.
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_active_session(
        &self,
        user_id: UserId,
        persona: PersonaId,
    ) -> Result<Option<Session>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.persona == persona)
            .max_by_key(|s| (s.last_updated, s.id))
            .cloned())
    }

    async fn create_session(
        &self,
        user_id: UserId,
        persona: PersonaId,
    ) -> Result<Session, StoreError> {
        let mut state = self.state.write().await;
        state.next_session_id += 1;
        let session = Session::new(SessionId(state.next_session_id), user_id, persona);
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn append_messages(
        &self,
        session_id: SessionId,
        messages: Vec<Message>,
    ) -> Result<Session, StoreError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        for message in messages {
            session.push(message);
        }
        Ok(session.clone())
    }

    async fn delete_session_if_empty(&self, session_id: SessionId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state
            .sessions
            .retain(|s| s.id != session_id || !s.messages.is_empty());
        Ok(state.sessions.len() < before)
    }

    async fn list_sessions(&self, user_id: UserId) -> Result<Vec<Session>, StoreError> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (b.last_updated, b.id).cmp(&(a.last_updated, a.id)));
        Ok(sessions)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        if state.users.iter().any(|c| c.user.username == user.username) {
            return Err(StoreError::Conflict("username".into()));
        }
        if state.users.iter().any(|c| c.user.email == user.email) {
            return Err(StoreError::Conflict("email".into()));
        }

        state.next_user_id += 1;
        let created = User {
            id: UserId(state.next_user_id),
            username: user.username,
            email: user.email,
            created_at: Utc::now(),
        };
        state.users.push(UserCredentials {
            user: created.clone(),
            password_hash: user.password_hash,
        });
        Ok(created)
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .find(|c| c.user.username == username)
            .cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .find(|c| c.user.id == id)
            .map(|c| c.user.clone()))
    }

    async fn store_token(&self, token_digest: &str, user_id: UserId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .tokens
            .insert(token_digest.to_string(), user_id);
        Ok(())
    }

    async fn user_for_token(&self, token_digest: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.state.read().await.tokens.get(token_digest).copied())
    }

    async fn revoke_token(&self, token_digest: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .write()
            .await
            .tokens
            .remove(token_digest)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{name}@example.com"),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn append_then_get_active() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(UserId(1), PersonaId::Scientific)
            .await
            .unwrap();
        store
            .append_turn(&session, Message::user("2+2?"), Message::assistant("4"))
            .await
            .unwrap();

        let active = store
            .get_active_session(UserId(1), PersonaId::Scientific)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.messages.len(), 2);
        assert!(
            store
                .get_active_session(UserId(1), PersonaId::General)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn most_recently_updated_session_wins() {
        let store = InMemoryStore::new();
        let older = store
            .create_session(UserId(1), PersonaId::General)
            .await
            .unwrap();
        let newer = store
            .create_session(UserId(1), PersonaId::General)
            .await
            .unwrap();

        // Equal timestamps fall back to the higher id.
        let active = store
            .get_active_session(UserId(1), PersonaId::General)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, newer.id);

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.append(&older, Message::user("ripresa")).await.unwrap();
        let active = store
            .get_active_session(UserId(1), PersonaId::General)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, older.id);
    }

    #[tokio::test]
    async fn append_to_missing_session_fails() {
        let store = InMemoryStore::new();
        let err = store
            .append_messages(SessionId(99), vec![Message::user("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_if_empty_removes_fresh_session() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(UserId(1), PersonaId::Humanistic)
            .await
            .unwrap();
        assert!(store.delete_session_if_empty(session.id).await.unwrap());
        assert!(!store.delete_session_if_empty(session.id).await.unwrap());
        assert!(store.list_sessions(UserId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_if_empty_keeps_written_session() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(UserId(1), PersonaId::General)
            .await
            .unwrap();
        store.append(&session, Message::user("Ciao")).await.unwrap();

        assert!(!store.delete_session_if_empty(session.id).await.unwrap());
        assert_eq!(store.list_sessions(UserId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let session = store
            .create_session(UserId(1), PersonaId::General)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_turn(
                        &session,
                        Message::user(format!("q{i}")),
                        Message::assistant(format!("a{i}")),
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored = store
            .get_active_session(UserId(1), PersonaId::General)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.messages.len(), 40);
        for pair in stored.messages.chunks(2) {
            assert_eq!(&pair[0].content[1..], &pair[1].content[1..]);
        }
    }

    #[tokio::test]
    async fn duplicate_username_and_email_conflict() {
        let store = InMemoryStore::new();
        store.create_user(new_user("anna")).await.unwrap();

        let err = store.create_user(new_user("anna")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref c) if c == "username"));

        let mut other = new_user("bianca");
        other.email = "anna@example.com".into();
        let err = store.create_user(other).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref c) if c == "email"));
    }

    #[tokio::test]
    async fn token_lifecycle() {
        let store = InMemoryStore::new();
        let user = store.create_user(new_user("carla")).await.unwrap();
        store.store_token("digest", user.id).await.unwrap();
        assert_eq!(store.user_for_token("digest").await.unwrap(), Some(user.id));
        assert!(store.revoke_token("digest").await.unwrap());
        assert_eq!(store.user_for_token("digest").await.unwrap(), None);
        assert_eq!(
            store.find_user_by_id(user.id).await.unwrap().unwrap().username,
            "carla"
        );
    }
}
