//! Chat turn handling: the heart of NODU.
//!
//! A turn follows a fixed sequence:
//!
//! 1. **Receive** the student's message (and optional attachment)
//! 2. **Load or create** the active session (skipped for guests)
//! 3. **Assemble** persona instructions + bounded history + utterance
//! 4. **Generate** via the configured provider, under a deadline
//! 5. **Commit** the user message and reply as one pair (skipped for guests)
//!
//! A failed generation never leaves an unpaired user message behind.

pub mod attachment;
pub mod context;
pub mod service;

pub use attachment::RawAttachment;
pub use context::{AssembledPrompt, AssemblyMetadata, ContextAssembler};
pub use service::{ChatOutcome, ChatService, ChatTurn};
