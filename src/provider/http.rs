//! HTTP adapter for a chat-completions-style narrative provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::{NarrativeDraft, NarrativeGateway, NarrativeRequest};

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Default hard wall-clock timeout for one generation call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const PROVIDER_NAME: &str = "narrative-llm";

/// Chat-completions adapter for narrative generation.
#[derive(Debug, Clone)]
pub struct HttpNarrativeProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpNarrativeProvider {
    /// Create from environment:
    /// `ORGPULSE_LLM_API_KEY` (required), `ORGPULSE_LLM_BASE_URL`,
    /// `ORGPULSE_LLM_MODEL`, `ORGPULSE_LLM_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("ORGPULSE_LLM_API_KEY")
            .map_err(|_| ProviderError::config("ORGPULSE_LLM_API_KEY not set"))?;
        let base_url = std::env::var("ORGPULSE_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".into());
        let model = std::env::var("ORGPULSE_LLM_MODEL")
            .unwrap_or_else(|_| "anthropic/claude-sonnet-4-6".into());
        let timeout = std::env::var("ORGPULSE_LLM_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::with_config(api_key, base_url, model, timeout)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn build_prompt(req: &NarrativeRequest) -> String {
        format!(
            "You are a workplace analytics writer. Using ONLY the canonical \
             data below, write a short weekly narrative for the team. Reply \
             as JSON: {{\"narrative\": string, \"claims\": [{{\"claim_text\": \
             string, \"sources\": [string]}}]}}. Every claim must cite \
             dot-notation paths into the canonical data. Never state a number \
             that is not present in the data.\n\nteam_state: {}\n\
             top_drivers: {}\n\ncanonical:\n{}",
            req.team_state,
            req.top_drivers.join(", "),
            req.canonical.canonical_json(),
        )
    }
}

// =============================================================================
// API types
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

#[async_trait]
impl NarrativeGateway for HttpNarrativeProvider {
    async fn generate(&self, req: &NarrativeRequest) -> Result<NarrativeDraft, ProviderError> {
        let prompt = Self::build_prompt(req);
        let api_req = ChatApiRequest {
            model: &self.model,
            messages: vec![ApiMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.2,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = response.text().await?;
        if body.len() > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                PROVIDER_NAME,
                self.model.clone(),
                format!("response too large: {} bytes", body.len()),
                false,
            ));
        }

        if !status.is_success() {
            let ctx = ErrorContext::new().with_status(status.as_u16());
            let ctx = match &request_id {
                Some(id) => ctx.with_request_id(id),
                None => ctx,
            };
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited {
                    retry_after: Duration::from_secs(60),
                    context: Some(ctx),
                });
            }
            let message = serde_json::from_str::<ChatApiResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .and_then(|e| {
                    let code = e.code;
                    e.message.map(|m| match code {
                        Some(c) => format!("{m} ({c})"),
                        None => m,
                    })
                })
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ProviderError::provider_with_context(
                PROVIDER_NAME,
                self.model.clone(),
                message,
                status.as_u16() >= 500,
                ctx,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(PROVIDER_NAME, self.model.clone(), format!("invalid JSON envelope: {e}"))
        })?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider(
                PROVIDER_NAME,
                self.model.clone(),
                error.message.unwrap_or_default(),
                false,
            ));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| {
                ProviderError::invalid_response(PROVIDER_NAME, self.model.clone(), "no content in response")
            })?;

        // The contract shape is part of the API: a malformed draft is a
        // permanent failure, not a retry candidate.
        let draft: NarrativeDraft = serde_json::from_str(content.trim()).map_err(|e| {
            ProviderError::invalid_response(
                PROVIDER_NAME,
                self.model.clone(),
                format!("draft does not match contract: {e}"),
            )
        })?;

        Ok(draft)
    }
}
