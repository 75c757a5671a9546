//! Account flows: registration, login, logout, token authentication.

use std::sync::Arc;

use nodu_core::error::{AuthError, StoreError};
use nodu_core::message::{NewUser, User, UserId};
use nodu_core::store::UserStore;
use serde::Deserialize;
use tracing::debug;

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};
use crate::password::{self, DEFAULT_COST};
use crate::token::{digest_token, issue_token};

/// A registration form.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// Result of a successful login. `token` is shown to the client once.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub token: String,
    pub user: User,
}

/// Registration, login and bearer-token checks against a [`UserStore`].
pub struct AuthService {
    users: Arc<dyn UserStore>,
    audit: Arc<AuditLogger>,
    hash_cost: u32,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, audit: Arc<AuditLogger>) -> Self {
        Self {
            users,
            audit,
            hash_cost: DEFAULT_COST,
        }
    }

    /// Override the bcrypt work factor (tests use the minimum).
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Create an account.
    ///
    /// Username and email are trimmed; both are required and unique. The two
    /// password fields must match.
    pub async fn register(&self, form: Registration) -> Result<User, AuthError> {
        let username = form.username.trim().to_string();
        let email = form.email.trim().to_string();

        let validated = if username.is_empty() {
            Err(AuthError::MissingField("username"))
        } else if email.is_empty() {
            Err(AuthError::MissingField("email"))
        } else if form.password.is_empty() {
            Err(AuthError::MissingField("password"))
        } else if form.password != form.confirm_password {
            Err(AuthError::PasswordMismatch)
        } else {
            Ok(())
        };
        if let Err(e) = validated {
            self.audit.log(
                AuditEvent::Register,
                &username,
                AuditOutcome::Failure,
                Some(e.to_string()),
            );
            return Err(e);
        }

        let password_hash = password::hash_password(&form.password, self.hash_cost).await?;
        let created = self
            .users
            .create_user(NewUser {
                username: username.clone(),
                email: email.clone(),
                password_hash,
            })
            .await;

        match created {
            Ok(user) => {
                self.audit
                    .log(AuditEvent::Register, &username, AuditOutcome::Success, None);
                Ok(user)
            }
            Err(StoreError::Conflict(column)) => {
                let err = if column == "email" {
                    AuthError::EmailTaken(email)
                } else {
                    AuthError::UsernameTaken(username.clone())
                };
                self.audit.log(
                    AuditEvent::Register,
                    &username,
                    AuditOutcome::Denied,
                    Some(err.to_string()),
                );
                Err(err)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check credentials and issue a fresh token.
    ///
    /// Unknown users and wrong passwords produce the same error.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginGrant, AuthError> {
        let username = username.trim();
        let credentials = self.users.find_user_by_username(username).await?;

        let Some(credentials) = credentials else {
            self.audit.log(
                AuditEvent::Login,
                username,
                AuditOutcome::Denied,
                Some("unknown user".into()),
            );
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password, &credentials.password_hash).await? {
            self.audit.log(
                AuditEvent::Login,
                username,
                AuditOutcome::Denied,
                Some("bad password".into()),
            );
            return Err(AuthError::InvalidCredentials);
        }

        let issued = issue_token();
        self.users
            .store_token(&issued.digest, credentials.user.id)
            .await?;
        self.audit
            .log(AuditEvent::Login, username, AuditOutcome::Success, None);

        Ok(LoginGrant {
            token: issued.token,
            user: credentials.user,
        })
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthorized);
        }
        let user = self.users.user_for_token(&digest_token(token)).await?;
        debug!(found = user.is_some(), "Token lookup");
        user.ok_or(AuthError::Unauthorized)
    }

    /// Revoke a token. Returns whether it was live.
    pub async fn logout(&self, token: &str) -> Result<bool, AuthError> {
        let revoked = self.users.revoke_token(&digest_token(token)).await?;
        let outcome = if revoked {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        self.audit.log(AuditEvent::Logout, "token", outcome, None);
        Ok(revoked)
    }

    /// Record a rejected call to a protected path.
    pub fn record_unauthorized(&self, path: &str) {
        self.audit.log(
            AuditEvent::Unauthorized { path: path.into() },
            "anonymous",
            AuditOutcome::Denied,
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodu_store::InMemoryStore;

    fn service() -> AuthService {
        AuthService::new(Arc::new(InMemoryStore::new()), Arc::new(AuditLogger::new()))
            .with_hash_cost(4)
    }

    fn form(username: &str, email: &str, password: &str, confirm: &str) -> Registration {
        Registration {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            confirm_password: confirm.into(),
        }
    }

    #[tokio::test]
    async fn register_login_authenticate_logout() {
        let auth = service();
        let user = auth
            .register(form(" giulia ", "giulia@example.com", "pw12345", "pw12345"))
            .await
            .unwrap();
        assert_eq!(user.username, "giulia");

        let grant = auth.login("giulia", "pw12345").await.unwrap();
        assert_eq!(grant.user.id, user.id);
        assert_eq!(auth.authenticate(&grant.token).await.unwrap(), user.id);

        assert!(auth.logout(&grant.token).await.unwrap());
        assert!(matches!(
            auth.authenticate(&grant.token).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn mismatched_passwords_rejected() {
        let auth = service();
        let err = auth
            .register(form("luca", "luca@example.com", "uno", "due"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PasswordMismatch));
        assert_eq!(auth.audit().entries_by_outcome(&AuditOutcome::Failure).len(), 1);
    }

    #[tokio::test]
    async fn missing_email_rejected() {
        let auth = service();
        let err = auth.register(form("luca", "  ", "pw", "pw")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingField("email")));
    }

    #[tokio::test]
    async fn duplicate_username_and_email_rejected() {
        let auth = service();
        auth.register(form("anna", "anna@example.com", "pw", "pw"))
            .await
            .unwrap();

        let err = auth
            .register(form("anna", "altra@example.com", "pw", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UsernameTaken(ref u) if u == "anna"));

        let err = auth
            .register(form("anna2", "anna@example.com", "pw", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken(_)));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let auth = service();
        auth.register(form("marco", "marco@example.com", "giusta", "giusta"))
            .await
            .unwrap();

        let a = auth.login("marco", "sbagliata").await.unwrap_err();
        let b = auth.login("nessuno", "giusta").await.unwrap_err();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(auth.audit().entries_by_outcome(&AuditOutcome::Denied).len(), 2);
    }

    #[tokio::test]
    async fn empty_or_unknown_token_is_unauthorized() {
        let auth = service();
        assert!(matches!(auth.authenticate("").await, Err(AuthError::Unauthorized)));
        assert!(matches!(
            auth.authenticate("deadbeef").await,
            Err(AuthError::Unauthorized)
        ));
        assert!(!auth.logout("deadbeef").await.unwrap());
    }
}
