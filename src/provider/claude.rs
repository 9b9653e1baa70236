//! Anthropic Claude backend — the Messages API with base64 image blocks.
//!
//! Anthropic signals truncation via `stop_reason == "max_tokens"` and rate
//! limits with a `retry-after` header; both map straight onto the shared
//! taxonomy.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::retry::{parse_retry_after, with_retry, RetryPolicy};
use super::types::{
    read_image_base64, Availability, Description, ProviderError, ProviderKind, TokenUsage,
    VisionProvider,
};

/// Anthropic rejects images over 5 MB.
const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

const REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_OUTPUT_TOKENS: u32 = 1024;
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl ClaudeProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            retry: RetryPolicy::default(),
        }
    }

    fn send_error(&self, e: reqwest::Error) -> ProviderError {
        ProviderError::Transient {
            provider: ProviderKind::Claude,
            detail: if e.is_timeout() {
                format!("request timed out after {REQUEST_TIMEOUT_SECS}s")
            } else {
                e.to_string()
            },
        }
    }

    fn status_error(
        &self,
        status: reqwest::StatusCode,
        retry_after: Option<&str>,
        body: String,
    ) -> ProviderError {
        let provider = ProviderKind::Claude;
        let detail = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        match status.as_u16() {
            401 | 403 => ProviderError::Auth { provider, detail },
            429 => ProviderError::RateLimited {
                provider,
                retry_after: parse_retry_after(retry_after),
            },
            // 529 is Anthropic's "overloaded" — transient by definition.
            400 | 404 | 413 | 415 | 422 => ProviderError::UnsupportedInput { provider, detail },
            _ => ProviderError::Transient {
                provider,
                detail: format!("HTTP {status}: {detail}"),
            },
        }
    }

    fn messages_once(
        &self,
        model: &str,
        prompt: &str,
        image_b64: &str,
        mime: &str,
    ) -> Result<Description, ProviderError> {
        let body = json!({
            "model": model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": { "type": "base64", "media_type": mime, "data": image_b64 }
                    },
                    { "type": "text", "text": prompt }
                ]
            }],
        });

        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = response.text().unwrap_or_default();
            return Err(self.status_error(status, retry_after.as_deref(), text));
        }

        let parsed: MessagesResponse = response.json().map_err(|e| ProviderError::Malformed {
            provider: ProviderKind::Claude,
            detail: format!("unparseable messages response: {e}"),
            stop_reason: None,
            output_tokens: None,
        })?;

        let usage = parsed.usage.as_ref().map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });
        let output_tokens = usage.as_ref().and_then(|u| u.output_tokens);

        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            return Err(ProviderError::Malformed {
                provider: ProviderKind::Claude,
                detail: format!(
                    "generation truncated at {MAX_OUTPUT_TOKENS} tokens ({} chars received)",
                    text.len()
                ),
                stop_reason: parsed.stop_reason,
                output_tokens,
            });
        }
        if text.is_empty() {
            return Err(ProviderError::Malformed {
                provider: ProviderKind::Claude,
                detail: "response contained no text blocks".into(),
                stop_reason: parsed.stop_reason,
                output_tokens,
            });
        }

        Ok(Description { text, usage })
    }

    fn models_once(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.status_error(status, None, text));
        }

        let parsed: ModelsResponse = response.json().map_err(|e| ProviderError::Malformed {
            provider: ProviderKind::Claude,
            detail: format!("unparseable model list: {e}"),
            stop_reason: None,
            output_tokens: None,
        })?;

        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}

impl VisionProvider for ClaudeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn describe(
        &self,
        image_path: &Path,
        model: &str,
        prompt: &str,
    ) -> Result<Description, ProviderError> {
        let (image_b64, mime) =
            read_image_base64(ProviderKind::Claude, image_path, MAX_IMAGE_BYTES)?;

        with_retry(&self.retry, "claude.describe", |attempt| {
            tracing::debug!(model, attempt, image = %image_path.display(), "Claude describe");
            self.messages_once(model, prompt, &image_b64, mime)
        })
    }

    fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        with_retry(&RetryPolicy::none(), "claude.models", |_| self.models_once())
    }

    fn probe(&self) -> Availability {
        match self.models_once() {
            Ok(_) => Availability::Available,
            Err(_) => Availability::Unavailable,
        }
    }
}
