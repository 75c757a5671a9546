//! `nodu user add`: Create an account without going through the API.

use std::sync::Arc;

use nodu_config::AppConfig;
use nodu_security::{AuditLogger, AuthService, Registration};

pub async fn add(
    username: String,
    email: String,
    password: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let stores = nodu_store::open(&config.store).await?;
    let auth = AuthService::new(stores.users, Arc::new(AuditLogger::tracing()));

    let user = auth
        .register(Registration {
            username,
            email,
            confirm_password: password.clone(),
            password,
        })
        .await?;

    println!("✅ Created user '{}' (id {})", user.username, user.id);
    Ok(())
}
