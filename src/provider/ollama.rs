//! Ollama backend — local vision models over the Ollama HTTP API.
//!
//! Vision calls go through `/api/chat` with base64 images on the user
//! message (the generate endpoint rejects images for chat-template models).
//! Model listing uses `/api/tags`. No credential is involved; auth errors
//! only appear when an authenticating reverse proxy sits in front.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::{parse_retry_after, with_retry, RetryPolicy};
use super::types::{
    read_image_base64, Availability, Description, ProviderError, ProviderKind, TokenUsage,
    VisionProvider,
};

/// Ollama accepts large payloads; cap well below typical proxy limits.
const MAX_IMAGE_BYTES: u64 = 50 * 1024 * 1024;

/// Local models are slow on CPU; generous request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 300;
const PROBE_TIMEOUT_SECS: u64 = 5;

pub struct OllamaProvider {
    base_url: String,
    client: reqwest::blocking::Client,
    probe_client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");
        let probe_client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            probe_client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send_error(&self, e: reqwest::Error) -> ProviderError {
        let detail = if e.is_connect() {
            format!("cannot reach {}", self.base_url)
        } else if e.is_timeout() {
            format!("request timed out after {REQUEST_TIMEOUT_SECS}s")
        } else {
            e.to_string()
        };
        ProviderError::Transient {
            provider: ProviderKind::Ollama,
            detail,
        }
    }

    fn status_error(&self, status: reqwest::StatusCode, retry_after: Option<&str>, body: String) -> ProviderError {
        let provider = ProviderKind::Ollama;
        match status.as_u16() {
            401 | 403 => ProviderError::Auth {
                provider,
                detail: format!("HTTP {status}: {body}"),
            },
            429 => ProviderError::RateLimited {
                provider,
                retry_after: parse_retry_after(retry_after),
            },
            400 | 404 | 413 | 415 | 422 => ProviderError::UnsupportedInput {
                provider,
                detail: format!("HTTP {status}: {body}"),
            },
            _ => ProviderError::Transient {
                provider,
                detail: format!("HTTP {status}: {body}"),
            },
        }
    }

    fn chat_once(&self, model: &str, prompt: &str, image_b64: String) -> Result<Description, ProviderError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
                images: Some(vec![image_b64]),
            }],
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().unwrap_or_default();
            return Err(self.status_error(status, retry_after.as_deref(), body));
        }

        let parsed: ChatResponse = response.json().map_err(|e| ProviderError::Malformed {
            provider: ProviderKind::Ollama,
            detail: format!("unparseable chat response: {e}"),
            stop_reason: None,
            output_tokens: None,
        })?;

        let text = parsed.message.content.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::Malformed {
                provider: ProviderKind::Ollama,
                detail: "model returned no text".into(),
                stop_reason: parsed.done_reason,
                output_tokens: parsed.eval_count,
            });
        }

        Ok(Description {
            text,
            usage: Some(TokenUsage {
                input_tokens: parsed.prompt_eval_count,
                output_tokens: parsed.eval_count,
            }),
        })
    }

    fn tags_once(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .probe_client
            .get(&url)
            .send()
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(self.status_error(status, None, body));
        }

        let parsed: TagsResponse = response.json().map_err(|e| ProviderError::Malformed {
            provider: ProviderKind::Ollama,
            detail: format!("unparseable tags response: {e}"),
            stop_reason: None,
            output_tokens: None,
        })?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

impl VisionProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn describe(
        &self,
        image_path: &Path,
        model: &str,
        prompt: &str,
    ) -> Result<Description, ProviderError> {
        let (image_b64, _mime) =
            read_image_base64(ProviderKind::Ollama, image_path, MAX_IMAGE_BYTES)?;

        with_retry(&self.retry, "ollama.describe", |attempt| {
            tracing::debug!(model, attempt, image = %image_path.display(), "Ollama describe");
            self.chat_once(model, prompt, image_b64.clone())
        })
    }

    fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        with_retry(&RetryPolicy::none(), "ollama.tags", |_| self.tags_once())
    }

    fn probe(&self) -> Availability {
        match self.tags_once() {
            Ok(_) => Availability::Available,
            Err(_) => Availability::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let provider = OllamaProvider::new("http://localhost:11434/");
        assert_eq!(provider.base_url(), "http://localhost:11434");
    }

    #[test]
    fn status_mapping_covers_taxonomy() {
        let provider = OllamaProvider::new("http://localhost:11434");

        let auth = provider.status_error(reqwest::StatusCode::UNAUTHORIZED, None, "denied".into());
        assert_eq!(auth.kind_str(), "auth");

        let rate =
            provider.status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, Some("3"), String::new());
        assert_eq!(rate.kind_str(), "rate_limited");
        assert_eq!(rate.retry_hint(), Some(Duration::from_secs(3)));

        let bad = provider.status_error(reqwest::StatusCode::NOT_FOUND, None, "no model".into());
        assert_eq!(bad.kind_str(), "unsupported_input");

        let server =
            provider.status_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, None, "oom".into());
        assert_eq!(server.kind_str(), "transient");
    }

    #[test]
    fn describe_rejects_non_image_before_network() {
        let provider = OllamaProvider::new("http://localhost:1");
        let err = provider
            .describe(Path::new("/tmp/nope.txt"), "llava", "describe this")
            .unwrap_err();
        assert_eq!(err.kind_str(), "unsupported_input");
    }

    #[test]
    fn chat_request_serializes_images_on_user_message() {
        let request = ChatRequest {
            model: "llava:latest",
            messages: vec![ChatMessage {
                role: "user",
                content: "what is in this photo?",
                images: Some(vec!["QUJD".into()]),
            }],
            stream: false,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"images\":[\"QUJD\"]"));
        assert!(json.contains("\"stream\":false"));
    }

    #[test]
    fn chat_response_tolerates_missing_counters() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"message": {"content": "a red bicycle"}, "done": true}"#,
        )
        .unwrap();
        assert_eq!(parsed.message.content, "a red bicycle");
        assert!(parsed.done_reason.is_none());
        assert!(parsed.eval_count.is_none());
    }
}
