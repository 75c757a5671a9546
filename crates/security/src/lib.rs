//! Security module for NODU: credentials, login tokens, and audit logging.
//!
//! Provides:
//! - **Passwords**: bcrypt hashing and verification off the async runtime
//! - **Tokens**: opaque bearer tokens, stored only as SHA-256 digests
//! - **Auth flows**: registration, login, logout, and token authentication
//! - **Audit logging**: Structured security event logging

pub mod audit;
pub mod auth;
pub mod password;
pub mod token;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use auth::{AuthService, LoginGrant, Registration};
pub use password::{hash_password, verify_password};
pub use token::{IssuedToken, digest_token, issue_token};
