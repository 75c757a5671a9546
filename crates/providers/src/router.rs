//! Provider router: selects the generation backend based on config.
//!
//! Handles provider creation and lookup by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nodu_core::provider::Provider;
use tracing::{debug, warn};

use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Holds the configured providers, keyed by name.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Name of the default provider.
    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Added to the per-turn deadline to get the HTTP client timeout, so the
/// caller's deadline always fires first.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Build providers from configuration.
///
/// Every `[providers.<name>]` section is registered, and the default provider
/// is always present even when it has no section of its own. Sections naming
/// an unknown backend without an `api_url` are skipped.
pub fn build_from_config(config: &nodu_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);
    let timeout = Duration::from_secs(config.generation.timeout_secs) + CLIENT_TIMEOUT_MARGIN;

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();
        match build_provider(name, provider_config.api_url.as_deref(), api_key, timeout) {
            Some(provider) => router.register(name.clone(), provider),
            None => warn!(provider = %name, "Unknown provider without api_url; skipping"),
        }
    }

    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        if let Some(provider) = build_provider(&config.default_provider, None, api_key, timeout) {
            router.register(config.default_provider.clone(), provider);
        }
    }

    debug!(providers = ?router.list(), default = router.default_name(), "Providers registered");
    router
}

fn build_provider(
    name: &str,
    api_url: Option<&str>,
    api_key: String,
    timeout: Duration,
) -> Option<Arc<dyn Provider>> {
    if name == "gemini" {
        let mut provider = GeminiProvider::new(api_key).with_timeout(timeout);
        if let Some(url) = api_url {
            provider = provider.with_base_url(url);
        }
        return Some(Arc::new(provider));
    }

    let base_url = api_url.map(str::to_string).or_else(|| default_base_url(name))?;
    Some(Arc::new(
        OpenAiCompatProvider::new(name, base_url, api_key).with_timeout(timeout),
    ))
}

/// Base URL of a well-known OpenAI-compatible backend.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        _ => return None,
    };
    Some(url.into())
}
