//! Prompt assembly.
//!
//! Builds the single prompt string sent to the provider from three parts:
//!
//! | Part | Source | Trim Strategy |
//! |------|--------|---------------|
//! | 1. Instructions | Persona registry | Never trimmed |
//! | 2. History excerpt | Active session | Oldest messages dropped beyond the window |
//! | 3. Utterance | The current request | Never trimmed |

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledPrompt, AssemblyMetadata, ContextAssembler, DEFAULT_CONTEXT_WINDOW, HISTORY_HEADER,
    NO_PRIOR_CONTEXT_MARKER,
};
