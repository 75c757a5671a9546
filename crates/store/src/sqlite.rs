//! SQLite store.
//!
//! Uses a single SQLite database file with three tables:
//! - `users`: registered accounts with their bcrypt hashes
//! - `chat_sessions`: one row per session, messages kept as a JSON array
//! - `auth_tokens`: digests of issued login tokens
//!
//! Appends run inside a transaction whose first statement is a write, so the
//! connection holds the write lock before it reads the current messages.
//! Two concurrent appends to one session are serialized and both land.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use nodu_core::error::StoreError;
use nodu_core::message::{Message, NewUser, Session, SessionId, User, UserCredentials, UserId};
use nodu_core::persona::PersonaId;
use nodu_core::store::{SessionStore, UserStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// A production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database with the default pool size.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        Self::connect(path, 4).await
    }

    /// Open (or create) a database.
    ///
    /// Accepts a plain file path or a `sqlite:` URL. Missing parent
    /// directories are created.
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        if let Some(parent) = Path::new(options.get_filename()).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT UNIQUE NOT NULL,
                email         TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("users table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                persona       TEXT NOT NULL,
                messages_json TEXT NOT NULL DEFAULT '[]',
                created_at    TEXT NOT NULL,
                last_updated  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_sessions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_owner \
             ON chat_sessions(user_id, persona, last_updated DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("sessions index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_tokens (
                token_digest TEXT PRIMARY KEY,
                user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("auth_tokens table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Parse a `Session` from a SQLite row.
    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let user_id: i64 = row
            .try_get("user_id")
            .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?;
        let persona: String = row
            .try_get("persona")
            .map_err(|e| StoreError::QueryFailed(format!("persona column: {e}")))?;
        let messages_json: String = row
            .try_get("messages_json")
            .map_err(|e| StoreError::QueryFailed(format!("messages_json column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        let last_updated: String = row
            .try_get("last_updated")
            .map_err(|e| StoreError::QueryFailed(format!("last_updated column: {e}")))?;

        let persona = PersonaId::from_str(&persona)
            .map_err(|e| StoreError::Corrupt(format!("session {id}: {e}")))?;
        let messages: Vec<Message> = serde_json::from_str(&messages_json)
            .map_err(|e| StoreError::Corrupt(format!("session {id} messages: {e}")))?;

        Ok(Session {
            id: SessionId(id),
            user_id: UserId(user_id),
            persona,
            messages,
            created_at: parse_timestamp(&created_at),
            last_updated: parse_timestamp(&last_updated),
        })
    }

    fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let username: String = row
            .try_get("username")
            .map_err(|e| StoreError::QueryFailed(format!("username column: {e}")))?;
        let email: String = row
            .try_get("email")
            .map_err(|e| StoreError::QueryFailed(format!("email column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(User {
            id: UserId(id),
            username,
            email,
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Map an insert failure, naming the column on a unique violation.
fn insert_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        let column = db
            .message()
            .rsplit('.')
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string();
        return StoreError::Conflict(column);
    }
    StoreError::QueryFailed(format!("insert failed: {e}"))
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_active_session(
        &self,
        user_id: UserId,
        persona: PersonaId,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM chat_sessions WHERE user_id = ?1 AND persona = ?2 \
             ORDER BY last_updated DESC, id DESC LIMIT 1",
        )
        .bind(user_id.0)
        .bind(persona.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("active session: {e}")))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn create_session(
        &self,
        user_id: UserId,
        persona: PersonaId,
    ) -> Result<Session, StoreError> {
        let mut session = Session::new(SessionId(0), user_id, persona);
        let now = format_timestamp(session.created_at);

        let result = sqlx::query(
            "INSERT INTO chat_sessions (user_id, persona, messages_json, created_at, last_updated) \
             VALUES (?1, ?2, '[]', ?3, ?3)",
        )
        .bind(user_id.0)
        .bind(persona.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;

        session.id = SessionId(result.last_insert_rowid());
        debug!(session_id = %session.id, user_id = %user_id, persona = %persona, "Created session");
        Ok(session)
    }

    async fn append_messages(
        &self,
        session_id: SessionId,
        messages: Vec<Message>,
    ) -> Result<Session, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("begin: {e}")))?;

        // Write first: takes the database write lock before the read below.
        let now = format_timestamp(Utc::now());
        let touched = sqlx::query("UPDATE chat_sessions SET last_updated = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(session_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("lock session: {e}")))?;
        if touched.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }

        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?1")
            .bind(session_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("load session: {e}")))?;
        let mut session = Self::row_to_session(&row)?;
        session.messages.extend(messages);

        let messages_json = serde_json::to_string(&session.messages)
            .map_err(|e| StoreError::Corrupt(format!("serialize messages: {e}")))?;
        sqlx::query("UPDATE chat_sessions SET messages_json = ?1 WHERE id = ?2")
            .bind(&messages_json)
            .bind(session_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("write messages: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("commit: {e}")))?;

        debug!(session_id = %session_id, total = session.messages.len(), "Appended messages");
        Ok(session)
    }

    async fn delete_session_if_empty(&self, session_id: SessionId) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM chat_sessions WHERE id = ?1 AND messages_json = '[]'")
            .bind(session_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("delete session: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self, user_id: UserId) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM chat_sessions WHERE user_id = ?1 ORDER BY last_updated DESC, id DESC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list sessions: {e}")))?;

        rows.iter().map(Self::row_to_session).collect()
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;

        Ok(User {
            id: UserId(result.last_insert_rowid()),
            username: user.username,
            email: user.email,
            created_at,
        })
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("find user: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let password_hash: String = row
            .try_get("password_hash")
            .map_err(|e| StoreError::QueryFailed(format!("password_hash column: {e}")))?;
        Ok(Some(UserCredentials {
            user: Self::row_to_user(&row)?,
            password_hash,
        }))
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("find user: {e}")))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn store_token(&self, token_digest: &str, user_id: UserId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO auth_tokens (token_digest, user_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(token_digest)
        .bind(user_id.0)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;
        Ok(())
    }

    async fn user_for_token(&self, token_digest: &str) -> Result<Option<UserId>, StoreError> {
        let row = sqlx::query("SELECT user_id FROM auth_tokens WHERE token_digest = ?1")
            .bind(token_digest)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("token lookup: {e}")))?;

        row.map(|r| {
            r.try_get::<i64, _>("user_id")
                .map(UserId)
                .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))
        })
        .transpose()
    }

    async fn revoke_token(&self, token_digest: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE token_digest = ?1")
            .bind(token_digest)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("revoke token: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// A single-connection in-memory database; every pooled `:memory:`
    /// connection would otherwise see its own empty database.
    async fn test_store() -> SqliteStore {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        SqliteStore::from_pool(pool).await.unwrap()
    }

    async fn user(store: &SqliteStore, name: &str) -> User {
        store
            .create_user(NewUser {
                username: name.into(),
                email: format!("{name}@example.com"),
                password_hash: "$2b$04$hash".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = test_store().await;
        store.run_migrations().await.unwrap();
        assert_eq!(store.name(), "sqlite");
    }

    #[tokio::test]
    async fn create_append_and_reload() {
        let store = test_store().await;
        let u = user(&store, "luca").await;
        let session = store.create_session(u.id, PersonaId::Scientific).await.unwrap();
        assert!(session.is_empty());

        store
            .append_turn(
                &session,
                Message::user("Cos'è un atomo?"),
                Message::assistant("Un atomo è..."),
            )
            .await
            .unwrap();
        store.append(&session, Message::user("E un elettrone?")).await.unwrap();

        let active = store
            .get_active_session(u.id, PersonaId::Scientific)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, session.id);
        let contents: Vec<&str> = active.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Cos'è un atomo?", "Un atomo è...", "E un elettrone?"]);
        assert!(active.last_updated >= active.created_at);
    }

    #[tokio::test]
    async fn active_session_is_scoped_to_persona() {
        let store = test_store().await;
        let u = user(&store, "giulia").await;
        store.create_session(u.id, PersonaId::Humanistic).await.unwrap();
        assert!(
            store
                .get_active_session(u.id, PersonaId::General)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn most_recent_session_wins() {
        let store = test_store().await;
        let u = user(&store, "paolo").await;
        let first = store.create_session(u.id, PersonaId::General).await.unwrap();
        let second = store.create_session(u.id, PersonaId::General).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.append(&first, Message::user("ciao")).await.unwrap();
        let active = store
            .get_active_session(u.id, PersonaId::General)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, first.id);

        let listed = store.list_sessions(u.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[tokio::test]
    async fn delete_empty_session_and_missing_append() {
        let store = test_store().await;
        let u = user(&store, "sara").await;
        let session = store.create_session(u.id, PersonaId::General).await.unwrap();
        assert!(store.delete_session_if_empty(session.id).await.unwrap());
        assert!(!store.delete_session_if_empty(session.id).await.unwrap());

        let err = store
            .append(&session, Message::user("dopo"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn session_with_messages_is_not_deleted() {
        let store = test_store().await;
        let u = user(&store, "bruno").await;
        let session = store.create_session(u.id, PersonaId::Scientific).await.unwrap();
        store
            .append_turn(&session, Message::user("Ciao"), Message::assistant("Ciao!"))
            .await
            .unwrap();

        assert!(!store.delete_session_if_empty(session.id).await.unwrap());
        let active = store
            .get_active_session(u.id, PersonaId::Scientific)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.messages.len(), 2);
    }

    #[tokio::test]
    async fn legacy_bot_rows_load() {
        let store = test_store().await;
        let u = user(&store, "marco").await;
        let session = store.create_session(u.id, PersonaId::General).await.unwrap();
        sqlx::query("UPDATE chat_sessions SET messages_json = ?1 WHERE id = ?2")
            .bind(
                r#"[{"role":"user","content":"Ciao","timestamp":"2025-03-01T10:00:00.123456"},
                    {"role":"bot","content":"Ciao!","timestamp":"2025-03-01T10:00:01.5"}]"#,
            )
            .bind(session.id.0)
            .execute(&store.pool)
            .await
            .unwrap();

        let active = store
            .get_active_session(u.id, PersonaId::General)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.messages[1].role, nodu_core::Role::Assistant);
    }

    #[tokio::test]
    async fn corrupt_messages_are_reported() {
        let store = test_store().await;
        let u = user(&store, "elena").await;
        let session = store.create_session(u.id, PersonaId::General).await.unwrap();
        sqlx::query("UPDATE chat_sessions SET messages_json = 'not json' WHERE id = ?1")
            .bind(session.id.0)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store
            .get_active_session(u.id, PersonaId::General)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn unique_violations_name_the_column() {
        let store = test_store().await;
        user(&store, "anna").await;

        let err = store
            .create_user(NewUser {
                username: "anna".into(),
                email: "altra@example.com".into(),
                password_hash: "h".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref c) if c == "username"));

        let err = store
            .create_user(NewUser {
                username: "anna2".into(),
                email: "anna@example.com".into(),
                password_hash: "h".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref c) if c == "email"));
    }

    #[tokio::test]
    async fn credentials_and_tokens() {
        let store = test_store().await;
        let u = user(&store, "franco").await;

        let creds = store.find_user_by_username("franco").await.unwrap().unwrap();
        assert_eq!(creds.user.id, u.id);
        assert_eq!(creds.password_hash, "$2b$04$hash");
        assert!(store.find_user_by_username("nessuno").await.unwrap().is_none());

        store.store_token("abc123", u.id).await.unwrap();
        assert_eq!(store.user_for_token("abc123").await.unwrap(), Some(u.id));
        assert!(store.revoke_token("abc123").await.unwrap());
        assert!(store.user_for_token("abc123").await.unwrap().is_none());
        assert_eq!(store.find_user_by_id(u.id).await.unwrap().unwrap().email, "franco@example.com");
    }

    #[tokio::test]
    async fn concurrent_appends_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("nodu.db");
        let store = Arc::new(SqliteStore::new(path.to_str().unwrap()).await.unwrap());
        let u = user(&store, "concorrente").await;
        let session = store.create_session(u.id, PersonaId::General).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
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
            .get_active_session(u.id, PersonaId::General)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.messages.len(), 20);
        for pair in stored.messages.chunks(2) {
            assert_eq!(pair[0].role, nodu_core::Role::User);
            assert_eq!(pair[1].role, nodu_core::Role::Assistant);
            assert_eq!(&pair[0].content[1..], &pair[1].content[1..]);
        }
    }
}
