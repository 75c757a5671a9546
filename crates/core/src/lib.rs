//! # NODU Core
//!
//! Domain types, traits, and error definitions for the NODU tutoring chat
//! service. This crate has **zero framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (generation backend, persistence) is a trait
//! here. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod persona;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, Role, Session, SessionId, User, UserId};
pub use persona::{Persona, PersonaId};
pub use provider::{Attachment, GenerationRequest, GenerationResponse, Provider};
pub use store::{SessionStore, UserStore};
