//! Google Gemini provider (`generateContent` REST API).
//!
//! Sends the prompt as a single user turn. An attachment travels as an
//! `inlineData` part (base64) next to the text part, which covers both
//! images and PDF documents.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use nodu_core::error::ProviderError;
use nodu_core::provider::{Attachment, GenerationRequest, GenerationResponse, Provider, Usage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{CLIENT_TIMEOUT, build_client, check_status, transport_error};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A Gemini provider.
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a provider against the public Gemini endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: build_client(CLIENT_TIMEOUT),
        }
    }

    /// Point the provider at a different endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the HTTP client timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    fn build_body(request: &GenerationRequest) -> GenerateContentRequest {
        let mut parts = vec![Part::Text {
            text: request.prompt.clone(),
        }];
        if let Some(attachment) = &request.attachment {
            parts.push(Self::attachment_part(attachment));
        }

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".into(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }

    fn attachment_part(attachment: &Attachment) -> Part {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: attachment.media_type.clone(),
                data: BASE64_STANDARD.encode(&attachment.data),
            },
        }
    }

    fn extract(
        response: GenerateContentResponse,
        requested_model: &str,
    ) -> Result<GenerationResponse, ProviderError> {
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ProviderError::EmptyResponse(format!(
                "prompt blocked: {reason}"
            )));
        }

        let text: String = response
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse(
                "no text in first candidate".into(),
            ));
        }

        let usage = response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(GenerationResponse {
            text,
            model: response
                .model_version
                .unwrap_or_else(|| requested_model.to_string()),
            usage,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "gemini: no API key (set GEMINI_API_KEY)".into(),
            ));
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = Self::build_body(&request);

        debug!(
            provider = "gemini",
            model = %request.model,
            prompt_chars = request.prompt.len(),
            attachment = request.attachment.as_ref().map(|a| a.media_type.as_str()),
            "Sending generation request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status("gemini", response).await?;

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Self::extract(parsed, &request.model)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        Ok(response.status().is_success())
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};

    async fn spawn_mock(status: StatusCode, body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/models/{*rest}",
            post(move || {
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn body_has_text_then_inline_data() {
        let request = GenerationRequest::new("gemini-2.5-flash", "Risolvi")
            .with_attachment(Some(Attachment::new("image/png", vec![0x89, 0x50])))
            .with_max_tokens(Some(256));
        let body = serde_json::to_value(GeminiProvider::build_body(&request)).unwrap();

        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "Risolvi");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "iVA=");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn text_only_body_omits_max_tokens() {
        let request = GenerationRequest::new("gemini-2.5-flash", "Ciao");
        let body = serde_json::to_value(GeminiProvider::build_body(&request)).unwrap();
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn extract_joins_parts_and_reads_usage() {
        let raw = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Ciao! "}, {"text": "Come stai?"}]}}],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 4,
                "totalTokenCount": 16
            },
            "modelVersion": "gemini-2.5-flash-001"
        });
        let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let resp = GeminiProvider::extract(parsed, "gemini-2.5-flash").unwrap();
        assert_eq!(resp.text, "Ciao! Come stai?");
        assert_eq!(resp.model, "gemini-2.5-flash-001");
        assert_eq!(resp.usage.unwrap().total_tokens, 16);
    }

    #[test]
    fn extract_blocked_prompt_is_error() {
        let raw = serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let err = GeminiProvider::extract(parsed, "m").unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse(ref m) if m.contains("SAFETY")));
    }

    #[test]
    fn extract_without_candidates_is_error() {
        let parsed: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(GeminiProvider::extract(parsed, "m").is_err());
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let provider = GeminiProvider::new("");
        let err = provider
            .generate(GenerationRequest::new("gemini-2.5-flash", "Ciao"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn generate_against_mock_server() {
        let base = spawn_mock(
            StatusCode::OK,
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": "Eccomi"}]}}]}),
        )
        .await;
        let provider = GeminiProvider::new("test-key").with_base_url(base);
        let resp = provider
            .generate(GenerationRequest::new("gemini-2.5-flash", "Ciao"))
            .await
            .unwrap();
        assert_eq!(resp.text, "Eccomi");
        assert_eq!(resp.model, "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let base = spawn_mock(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({"error": {"message": "overloaded"}}),
        )
        .await;
        let provider = GeminiProvider::new("test-key").with_base_url(base);
        let err = provider
            .generate(GenerationRequest::new("gemini-2.5-flash", "Ciao"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 503, .. }));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_failure() {
        let base = spawn_mock(StatusCode::FORBIDDEN, serde_json::json!({})).await;
        let provider = GeminiProvider::new("bad-key").with_base_url(base);
        let err = provider
            .generate(GenerationRequest::new("gemini-2.5-flash", "Ciao"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }
}
