//! OpenAI backend — chat completions with inline data-URI images.
//!
//! Truncation shows up as `finish_reason == "length"`; that is surfaced as
//! `Malformed` with the stop reason and token counts so an operator can tell
//! a cut-off description apart from an empty one.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::retry::{parse_retry_after, with_retry, RetryPolicy};
use super::types::{
    read_image_base64, Availability, Description, ProviderError, ProviderKind, TokenUsage,
    VisionProvider,
};

/// Documented payload ceiling for vision inputs.
const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

const REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_COMPLETION_TOKENS: u32 = 1024;

pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
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

/// Error envelope OpenAI wraps failures in.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl OpenAiProvider {
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
            provider: ProviderKind::OpenAi,
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
        let provider = ProviderKind::OpenAi;
        // Prefer the API's own error message over the raw body.
        let detail = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        match status.as_u16() {
            401 | 403 => ProviderError::Auth { provider, detail },
            429 => ProviderError::RateLimited {
                provider,
                retry_after: parse_retry_after(retry_after),
            },
            400 | 404 | 413 | 415 | 422 => ProviderError::UnsupportedInput { provider, detail },
            _ => ProviderError::Transient {
                provider,
                detail: format!("HTTP {status}: {detail}"),
            },
        }
    }

    fn completion_once(
        &self,
        model: &str,
        prompt: &str,
        data_uri: &str,
    ) -> Result<Description, ProviderError> {
        let body = json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_uri } }
                ]
            }],
            "max_tokens": MAX_COMPLETION_TOKENS,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

        let parsed: ChatCompletionResponse =
            response.json().map_err(|e| ProviderError::Malformed {
                provider: ProviderKind::OpenAi,
                detail: format!("unparseable completion: {e}"),
                stop_reason: None,
                output_tokens: None,
            })?;

        let usage = parsed.usage.as_ref().map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        let output_tokens = usage.as_ref().and_then(|u| u.output_tokens);

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed {
                provider: ProviderKind::OpenAi,
                detail: "response contained no choices".into(),
                stop_reason: None,
                output_tokens,
            })?;

        let finish_reason = choice.finish_reason.clone();
        let text = choice
            .message
            .content
            .unwrap_or_default()
            .trim()
            .to_string();

        if finish_reason.as_deref() == Some("length") {
            return Err(ProviderError::Malformed {
                provider: ProviderKind::OpenAi,
                detail: format!(
                    "generation truncated at {MAX_COMPLETION_TOKENS} tokens ({} chars received)",
                    text.len()
                ),
                stop_reason: finish_reason,
                output_tokens,
            });
        }
        if text.is_empty() {
            return Err(ProviderError::Malformed {
                provider: ProviderKind::OpenAi,
                detail: "model returned no text".into(),
                stop_reason: finish_reason,
                output_tokens,
            });
        }

        Ok(Description { text, usage })
    }

    fn models_once(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(self.status_error(status, None, text));
        }

        let parsed: ModelsResponse = response.json().map_err(|e| ProviderError::Malformed {
            provider: ProviderKind::OpenAi,
            detail: format!("unparseable model list: {e}"),
            stop_reason: None,
            output_tokens: None,
        })?;

        let mut models: Vec<String> = parsed.data.into_iter().map(|m| m.id).collect();
        models.sort();
        Ok(models)
    }
}

impl VisionProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn describe(
        &self,
        image_path: &Path,
        model: &str,
        prompt: &str,
    ) -> Result<Description, ProviderError> {
        let (image_b64, mime) =
            read_image_base64(ProviderKind::OpenAi, image_path, MAX_IMAGE_BYTES)?;
        let data_uri = format!("data:{mime};base64,{image_b64}");

        with_retry(&self.retry, "openai.describe", |attempt| {
            tracing::debug!(model, attempt, image = %image_path.display(), "OpenAI describe");
            self.completion_once(model, prompt, &data_uri)
        })
    }

    fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        with_retry(&RetryPolicy::none(), "openai.models", |_| self.models_once())
    }

    fn probe(&self) -> Availability {
        match self.models_once() {
            Ok(_) => Availability::Available,
            Err(_) => Availability::Unavailable,
        }
    }
}
