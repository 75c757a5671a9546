//! Context assembly: persona instructions, bounded history, new utterance.
//!
//! Layout of an assembled prompt:
//!
//! ```text
//! <persona instructions>
//!
//! Contesto della chat precedente:      <- or the no-prior-context marker
//! Studente: ...
//! Tutor: ...
//!
//! Studente: <utterance>
//! Tutor:
//! ```
//!
//! # Determinism
//!
//! Assembly is a pure function of its inputs: identical persona, history and
//! utterance always produce the identical prompt. Message timestamps are not
//! rendered.

use nodu_core::message::{Message, Role};
use nodu_core::persona::PersonaId;
use serde::Serialize;

use crate::context::token;

/// How many prior messages are rendered by default.
pub const DEFAULT_CONTEXT_WINDOW: usize = 5;

/// Header of the history excerpt section.
pub const HISTORY_HEADER: &str = "Contesto della chat precedente:";

/// Replaces the excerpt section when there is no history.
pub const NO_PRIOR_CONTEXT_MARKER: &str =
    "Nessun messaggio precedente: questo è l'inizio della conversazione.";

const STUDENT_LABEL: &str = "Studente";
const TUTOR_LABEL: &str = "Tutor";

/// The prompt text plus what went into it.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    pub metadata: AssemblyMetadata,
}

/// Assembly statistics, for debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssemblyMetadata {
    /// History messages rendered into the excerpt.
    pub included: usize,
    /// History messages available before windowing.
    pub available: usize,
    /// Rough token estimate of the whole prompt.
    pub estimated_tokens: usize,
}

/// Builds prompts with a fixed-size history window.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    window: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl ContextAssembler {
    /// Create an assembler rendering at most `window` prior messages.
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Assemble the prompt for one turn.
    ///
    /// `history` is the full session log, oldest first; only its last
    /// `window` messages are rendered, in order.
    pub fn assemble(
        &self,
        persona: PersonaId,
        history: &[Message],
        utterance: &str,
    ) -> AssembledPrompt {
        let start = history.len().saturating_sub(self.window);
        let excerpt = &history[start..];

        let mut text = String::with_capacity(
            persona.instruction().len()
                + utterance.len()
                + excerpt.iter().map(|m| m.content.len() + 12).sum::<usize>()
                + 96,
        );

        text.push_str(persona.instruction());
        text.push_str("\n\n");

        if excerpt.is_empty() {
            text.push_str(NO_PRIOR_CONTEXT_MARKER);
        } else {
            text.push_str(HISTORY_HEADER);
            for message in excerpt {
                text.push('\n');
                text.push_str(label(message.role));
                text.push_str(": ");
                text.push_str(&message.content);
            }
        }

        text.push_str("\n\n");
        text.push_str(STUDENT_LABEL);
        text.push_str(": ");
        text.push_str(utterance);
        text.push('\n');
        text.push_str(TUTOR_LABEL);
        text.push(':');

        let metadata = AssemblyMetadata {
            included: excerpt.len(),
            available: history.len(),
            estimated_tokens: token::estimate_tokens(&text),
        };

        AssembledPrompt { text, metadata }
    }
}

fn label(role: Role) -> &'static str {
    match role {
        Role::User => STUDENT_LABEL,
        Role::Assistant => TUTOR_LABEL,
    }
}
