//! Persistence backends for NODU sessions, users and login tokens.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use nodu_config::StoreConfig;
use nodu_core::error::StoreError;
use nodu_core::store::{SessionStore, UserStore};
use tracing::info;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// One backend seen through both store traits.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
}

impl Stores {
    /// Share a single backend between both handles.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: SessionStore + UserStore + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            sessions: backend.clone(),
            users: backend,
        }
    }
}

/// Open the backend named in the configuration.
pub async fn open(config: &StoreConfig) -> Result<Stores, StoreError> {
    match config.backend.as_str() {
        "memory" => {
            info!("Using in-memory store; history is lost on restart");
            Ok(Stores::from_backend(InMemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let backend = SqliteStore::connect(&config.path, config.max_connections).await?;
            Ok(Stores::from_backend(backend))
        }
        other => Err(StoreError::Unavailable(format!(
            "unknown store backend '{other}'"
        ))),
    }
}
