//! JSON API handlers.
//!
//! Endpoints:
//! - `POST /api/register`: create an account
//! - `POST /api/login`: exchange credentials for a bearer token
//! - `POST /api/logout`: revoke the presented token
//! - `POST /api/chat`: one chat turn; guests allowed
//! - `GET  /api/history`: stored history; login required

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::Json;
use chrono::{DateTime, Utc};
use nodu_chat::service::{
    APOLOGY_REPLY, EMPTY_MESSAGE_REPLY, INVALID_ATTACHMENT_REPLY, UNAVAILABLE_REPLY,
};
use nodu_chat::{ChatTurn, RawAttachment};
use nodu_core::error::{AuthError, ChatError};
use nodu_core::message::{Message, User, UserId};
use nodu_core::persona::PersonaId;
use nodu_security::Registration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::SharedState;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Error body. `reply` carries a user-facing text on chat errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub status: &'static str,
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            reply: None,
            status: "error",
            error: error.into(),
        }
    }

    fn with_reply(reply: &str, error: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::new(error)
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn auth_error(e: AuthError) -> ApiError {
    let status = match &e {
        AuthError::InvalidCredentials | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
        AuthError::UsernameTaken(_) | AuthError::EmailTaken(_) => StatusCode::CONFLICT,
        AuthError::PasswordMismatch | AuthError::MissingField(_) => StatusCode::BAD_REQUEST,
        AuthError::Store(s) if s.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Store(_) | AuthError::Hashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "Auth request failed");
    }
    (status, Json(ErrorResponse::new(e.to_string())))
}

fn chat_error(e: &ChatError) -> ApiError {
    let (status, reply) = match e {
        ChatError::Validation(_) => (StatusCode::BAD_REQUEST, EMPTY_MESSAGE_REPLY),
        ChatError::Attachment(_) => (StatusCode::BAD_REQUEST, INVALID_ATTACHMENT_REPLY),
        ChatError::Gateway(p) if p.is_unavailable() => {
            (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_REPLY)
        }
        ChatError::Gateway(_) => (StatusCode::INTERNAL_SERVER_ERROR, APOLOGY_REPLY),
        ChatError::Persistence(_) => (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_REPLY),
    };
    (status, Json(ErrorResponse::with_reply(reply, e.to_string())))
}

/// Resolve the bearer token to a user, or 401.
async fn require_user(
    state: &SharedState,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<UserId, ApiError> {
    let Some(token) = bearer_token(headers) else {
        state.auth.record_unauthorized(uri.path());
        return Err(auth_error(AuthError::Unauthorized));
    };
    match state.auth.authenticate(token).await {
        Ok(user) => Ok(user),
        Err(AuthError::Unauthorized) => {
            state.auth.record_unauthorized(uri.path());
            Err(auth_error(AuthError::Unauthorized))
        }
        Err(e) => Err(auth_error(e)),
    }
}

// --- Accounts ---

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub status: &'static str,
    pub user: User,
}

/// POST /api/register
pub async fn register_handler(
    State(state): State<SharedState>,
    Json(form): Json<Registration>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = state.auth.register(form).await.map_err(auth_error)?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            status: "success",
            user,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    pub token: String,
    pub user: User,
}

/// POST /api/login
pub async fn login_handler(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let grant = state
        .auth
        .login(&req.username, &req.password)
        .await
        .map_err(auth_error)?;
    Ok(Json(LoginResponse {
        status: "success",
        token: grant.token,
        user: grant.user,
    }))
}

/// POST /api/logout
pub async fn logout_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<StatusCode, ApiError> {
    require_user(&state, &headers, &uri).await?;
    if let Some(token) = bearer_token(&headers) {
        state.auth.logout(token).await.map_err(auth_error)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Chat ---

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "tutorType")]
    pub tutor_type: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub status: &'static str,
    pub is_guest: bool,
    pub history_saved: bool,
}

/// POST /api/chat
///
/// A missing or unknown token makes the turn a guest turn.
pub async fn chat_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let user = match bearer_token(&headers) {
        Some(token) => match state.auth.authenticate(token).await {
            Ok(user) => Some(user),
            Err(AuthError::Unauthorized) => {
                debug!("Unknown bearer token on chat; treating as guest");
                None
            }
            Err(e) => return Err(auth_error(e)),
        },
        None => None,
    };

    let turn = ChatTurn {
        user,
        persona: PersonaId::resolve(req.tutor_type.as_deref()),
        message: req.message,
        attachment: RawAttachment::from_parts(req.image_data, req.mime_type),
    };

    match state.chat.handle(turn).await {
        Ok(outcome) => Ok(Json(ChatResponse {
            reply: outcome.reply,
            status: "success",
            is_guest: outcome.is_guest,
            history_saved: outcome.history_saved,
        })),
        Err(e) => Err(chat_error(&e)),
    }
}

// --- History ---

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default, rename = "tutorType")]
    pub tutor_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PersonaHistory {
    pub messages: Vec<Message>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum HistoryResponse {
    /// One persona's active session
    Single {
        messages: Vec<Message>,
        status: &'static str,
    },
    /// The active session of every persona the user has talked to
    All {
        history: BTreeMap<PersonaId, PersonaHistory>,
        status: &'static str,
    },
}

/// GET /api/history
pub async fn history_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user = require_user(&state, &headers, &uri).await?;
    let store_error = |e: nodu_core::error::StoreError| {
        error!(error = %e, "History lookup failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(e.to_string())),
        )
    };

    if let Some(key) = query.tutor_type.as_deref() {
        let persona = PersonaId::resolve(Some(key));
        let session = state
            .sessions
            .get_active_session(user, persona)
            .await
            .map_err(store_error)?;
        return Ok(Json(HistoryResponse::Single {
            messages: session.map(|s| s.messages).unwrap_or_default(),
            status: "success",
        }));
    }

    // Sessions arrive most recent first; keep the first one per persona.
    let mut history = BTreeMap::new();
    for session in state.sessions.list_sessions(user).await.map_err(store_error)? {
        history.entry(session.persona).or_insert(PersonaHistory {
            messages: session.messages,
            last_updated: session.last_updated,
        });
    }

    Ok(Json(HistoryResponse::All {
        history,
        status: "success",
    }))
}
