//! OpenAI-compatible HTTP provider client.
//!
//! Most of the providers this pipeline talks to (DeepSeek, Qwen,
//! Perplexity) expose an OpenAI-shaped `chat/completions` endpoint, so
//! one client covers them; only the base URL, model ids, and credential
//! differ per instance.
//!
//! The model is instructed to answer with a JSON risk profile; a reply
//! that cannot be parsed as one is a [`ProviderError::MalformedResponse`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vantage_core::{ConfidenceTier, RiskProfile};

use super::{
    secrets::ApiCredential, ProviderClient, ProviderError, ProviderRequest, ProviderResponse,
};

/// Client for one OpenAI-compatible provider endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    credential: ApiCredential,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Create a client for a provider endpoint.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        credential: ApiCredential,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            credential,
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Pull a JSON object out of the reply, tolerating surrounding prose
/// and markdown fences.
fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

#[async_trait]
impl ProviderClient for OpenAiCompatProvider {
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut user_content = request.query.clone();
        if let Some(ctx) = &request.context {
            user_content.push_str("\n\nContext:\n");
            user_content.push_str(&ctx.to_string());
        }

        let body = ChatRequest {
            model: request.model.clone(),
            messages: vec![
                ChatRequestMessage {
                    role: "system".to_string(),
                    content: "Answer with a single JSON object describing the company's \
                              risk profile. Omit fields you cannot support with evidence."
                        .to_string(),
                },
                ChatRequestMessage {
                    role: "user".to_string(),
                    content: user_content,
                },
            ],
            temperature: 0.0,
        };

        // Pool-selected credential wins over the client's own.
        let credential = request.credential.as_ref().unwrap_or(&self.credential);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(credential.expose())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(request.timeout)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::Auth);
        }

        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::MalformedResponse("empty choices".to_string()))?;

        let profile: RiskProfile = extract_json(&content)
            .and_then(|json| serde_json::from_str(json).ok())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("no JSON risk profile in reply".to_string())
            })?;

        Ok(ProviderResponse {
            profile,
            raw_content: content,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            confidence: ConfidenceTier::Medium,
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
