//! The chat request handler.
//!
//! `RECEIVE → (guest ? SKIP_HISTORY : LOAD_OR_CREATE_SESSION) →
//! ASSEMBLE_PROMPT → CALL_GATEWAY → (guest ? RETURN : APPEND_AND_COMMIT) →
//! RESPOND`
//!
//! Validation and attachment decoding run before any store access, so a
//! rejected request has no persistence side effects. A session created for
//! this turn is deleted again when generation fails. The user message is only
//! ever committed together with its reply.

use std::sync::Arc;
use std::time::Duration;

use nodu_config::AppConfig;
use nodu_core::error::{ChatError, ProviderError};
use nodu_core::message::{Message, Session, UserId};
use nodu_core::persona::PersonaId;
use nodu_core::provider::{Attachment, GenerationRequest, Provider};
use nodu_core::store::SessionStore;
use tracing::{debug, error, info, warn};

use crate::attachment::{self, RawAttachment};
use crate::context::ContextAssembler;

/// Reply shown when the message is blank.
pub const EMPTY_MESSAGE_REPLY: &str = "Messaggio vuoto.";
/// Reply shown when the attachment cannot be decoded.
pub const INVALID_ATTACHMENT_REPLY: &str = "Immagine non valida o corrotta.";
/// Reply shown when the provider failed.
pub const APOLOGY_REPLY: &str =
    "Mi dispiace, ho perso il filo del discorso (Errore server). Riprova.";
/// Reply shown when the provider or the store is unreachable.
pub const UNAVAILABLE_REPLY: &str =
    "Il servizio non è al momento disponibile. Riprova tra qualche istante.";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// One incoming chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// `None` for guests
    pub user: Option<UserId>,
    pub persona: PersonaId,
    pub message: String,
    pub attachment: Option<RawAttachment>,
}

impl ChatTurn {
    pub fn guest(persona: PersonaId, message: impl Into<String>) -> Self {
        Self {
            user: None,
            persona,
            message: message.into(),
            attachment: None,
        }
    }

    pub fn for_user(user: UserId, persona: PersonaId, message: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            ..Self::guest(persona, message)
        }
    }

    pub fn with_attachment(mut self, attachment: Option<RawAttachment>) -> Self {
        self.attachment = attachment;
        self
    }
}

/// The result of a successful turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub reply: String,
    pub is_guest: bool,
    /// Whether the pair was committed. Always false for guests.
    pub history_saved: bool,
}

/// Runs chat turns against a provider and a session store.
pub struct ChatService {
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionStore>,
    assembler: ContextAssembler,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            sessions,
            assembler: ContextAssembler::default(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build with model, sampling, window and deadline taken from config.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionStore>,
        config: &AppConfig,
    ) -> Self {
        let model = config
            .providers
            .get(&config.default_provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| config.default_model.clone());

        Self::new(provider, sessions, model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(Some(config.default_max_tokens))
            .with_context_window(config.chat.context_window)
            .with_timeout(Duration::from_secs(config.generation.timeout_secs))
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.assembler = ContextAssembler::new(window);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Handle one chat turn.
    pub async fn handle(&self, turn: ChatTurn) -> Result<ChatOutcome, ChatError> {
        // RECEIVE
        if turn.message.trim().is_empty() {
            return Err(ChatError::Validation("empty message".into()));
        }
        let attachment = match turn.attachment {
            Some(raw) => Some(decode_off_runtime(raw).await?),
            None => None,
        };
        let user_message = Message::user(turn.message.clone());

        // LOAD_OR_CREATE_SESSION
        let (session, created) = match turn.user {
            Some(user_id) => {
                let (session, created) = self.load_or_create(user_id, turn.persona).await?;
                (Some(session), created)
            }
            None => (None, false),
        };

        // ASSEMBLE_PROMPT
        let history = session.as_ref().map(|s| s.messages.as_slice()).unwrap_or(&[]);
        let prompt = self
            .assembler
            .assemble(turn.persona, history, &turn.message);
        debug!(
            persona = %turn.persona,
            included = prompt.metadata.included,
            available = prompt.metadata.available,
            estimated_tokens = prompt.metadata.estimated_tokens,
            "Assembled prompt"
        );

        // CALL_GATEWAY
        let reply = match self.generate(prompt.text, attachment).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(persona = %turn.persona, error = %e, "Generation failed");
                if created && let Some(session) = &session {
                    self.rollback(session).await;
                }
                return Err(ChatError::Gateway(e));
            }
        };

        // APPEND_AND_COMMIT
        let Some(session) = session else {
            info!(persona = %turn.persona, "Guest turn answered");
            return Ok(ChatOutcome {
                reply,
                is_guest: true,
                history_saved: false,
            });
        };

        let history_saved = match self
            .sessions
            .append_turn(&session, user_message, Message::assistant(reply.clone()))
            .await
        {
            Ok(stored) => {
                info!(
                    session_id = %stored.id,
                    persona = %turn.persona,
                    messages = stored.messages.len(),
                    "Turn committed"
                );
                true
            }
            Err(e) => {
                error!(
                    session_id = %session.id,
                    error = %e,
                    "Failed to persist turn; reply returned unsaved"
                );
                if created {
                    self.rollback(&session).await;
                }
                false
            }
        };

        Ok(ChatOutcome {
            reply,
            is_guest: false,
            history_saved,
        })
    }

    async fn load_or_create(
        &self,
        user_id: UserId,
        persona: PersonaId,
    ) -> Result<(Session, bool), ChatError> {
        if let Some(session) = self.sessions.get_active_session(user_id, persona).await? {
            return Ok((session, false));
        }
        let session = self.sessions.create_session(user_id, persona).await?;
        debug!(session_id = %session.id, user_id = %user_id, persona = %persona, "Started session");
        Ok((session, true))
    }

    async fn generate(
        &self,
        prompt: String,
        attachment: Option<Attachment>,
    ) -> Result<String, ProviderError> {
        let request = GenerationRequest::new(&self.model, prompt)
            .with_attachment(attachment)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = tokio::time::timeout(self.timeout, self.provider.generate(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!("no reply within {}s", self.timeout.as_secs()))
            })??;

        if let Some(usage) = &response.usage {
            debug!(
                model = %response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Generation usage"
            );
        }
        Ok(response.text)
    }

    /// Drop a session created by this turn, unless a concurrent turn has
    /// committed to it in the meantime.
    async fn rollback(&self, session: &Session) {
        match self.sessions.delete_session_if_empty(session.id).await {
            Ok(true) => debug!(session_id = %session.id, "Rolled back new session"),
            Ok(false) => debug!(session_id = %session.id, "New session in use; kept"),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to roll back new session")
            }
        }
    }
}

async fn decode_off_runtime(raw: RawAttachment) -> Result<Attachment, ChatError> {
    tokio::task::spawn_blocking(move || attachment::decode(raw))
        .await
        .map_err(|e| ChatError::Attachment(format!("decode task failed: {e}")))?
}
