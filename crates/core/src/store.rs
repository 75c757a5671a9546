//! Store traits: persistence of sessions, users and login tokens.
//!
//! Implementations: SQLite (production), in-memory (tests, ephemeral runs).

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{Message, NewUser, Session, SessionId, User, UserCredentials, UserId};
use crate::persona::PersonaId;

/// Persisted ordered log of messages per (user, persona) pair.
///
/// Append is the only mutation of a session's messages. Implementations must
/// serialize concurrent appends to the same session so that no write is lost.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// The active session for a pair: the most recently updated one
    /// (ties broken by the higher id).
    async fn get_active_session(
        &self,
        user_id: UserId,
        persona: PersonaId,
    ) -> Result<Option<Session>, StoreError>;

    /// Create an empty session for a pair.
    async fn create_session(
        &self,
        user_id: UserId,
        persona: PersonaId,
    ) -> Result<Session, StoreError>;

    /// Append messages to a session as one atomic write and return the
    /// session as stored afterwards. Either all messages land or none do.
    async fn append_messages(
        &self,
        session_id: SessionId,
        messages: Vec<Message>,
    ) -> Result<Session, StoreError>;

    /// Delete a session only if it holds no messages. Returns whether a row
    /// was removed; a session another turn has already written to is kept.
    async fn delete_session_if_empty(&self, session_id: SessionId) -> Result<bool, StoreError>;

    /// Every session owned by a user, most recently updated first.
    async fn list_sessions(&self, user_id: UserId) -> Result<Vec<Session>, StoreError>;

    /// Append a single message.
    async fn append(
        &self,
        session: &Session,
        message: Message,
    ) -> Result<Session, StoreError> {
        self.append_messages(session.id, vec![message]).await
    }

    /// Append a user message and its paired reply atomically.
    async fn append_turn(
        &self,
        session: &Session,
        user: Message,
        assistant: Message,
    ) -> Result<Session, StoreError> {
        self.append_messages(session.id, vec![user, assistant]).await
    }
}

/// Users and the login tokens issued to them.
///
/// Tokens are stored as digests; the raw token never reaches the store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with `StoreError::Conflict` naming the column when
    /// the username or email is already taken.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError>;

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn store_token(&self, token_digest: &str, user_id: UserId) -> Result<(), StoreError>;

    async fn user_for_token(&self, token_digest: &str) -> Result<Option<UserId>, StoreError>;

    async fn revoke_token(&self, token_digest: &str) -> Result<bool, StoreError>;
}
