//! Provider contract and failure taxonomy.
//!
//! Every AI vision backend is normalized behind the `VisionProvider` trait:
//! one describe call, one model listing, one availability probe. Backends
//! differ in request shapes and rate-limit behavior, so each concrete client
//! owns its own mapping and backoff tuning — callers only ever see a
//! `ProviderError` from the closed taxonomy below.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════
// Provider Kind
// ═══════════════════════════════════════════

/// The closed set of supported vision backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Claude,
    #[serde(rename = "huggingface")]
    HuggingFace,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::HuggingFace => "huggingface",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ollama" => Some(Self::Ollama),
            "openai" => Some(Self::OpenAi),
            "claude" => Some(Self::Claude),
            "huggingface" => Some(Self::HuggingFace),
            _ => None,
        }
    }

    pub fn all() -> &'static [ProviderKind] {
        &[Self::Ollama, Self::OpenAi, Self::Claude, Self::HuggingFace]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Availability
// ═══════════════════════════════════════════

/// Probe result for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Unknown,
    Available,
    Unavailable,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Available => write!(f, "available"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ═══════════════════════════════════════════
// Description output
// ═══════════════════════════════════════════

/// Token accounting, where the backend reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Raw outcome of one successful describe call.
///
/// This is the provider-layer value; the workspace layer wraps it into a
/// `DescriptionRecord` with identity and timestamps.
#[derive(Debug, Clone)]
pub struct Description {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

// ═══════════════════════════════════════════
// Error taxonomy
// ═══════════════════════════════════════════

/// Typed failures surfaced by every backend.
///
/// `RateLimited` and `Transient` are the only retryable kinds; the retry
/// loop in `retry::with_retry` is the single place that acts on that.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Bad or missing credential. Never retried — every later call with the
    /// same credential fails the same way.
    #[error("{provider}: authentication failed: {detail}")]
    Auth {
        provider: ProviderKind,
        detail: String,
    },

    /// Quota exhausted / HTTP 429. Retryable, honoring the backend's
    /// retry-after hint when one was supplied.
    #[error("{provider}: rate limited")]
    RateLimited {
        provider: ProviderKind,
        retry_after: Option<Duration>,
    },

    /// Timeout, connection reset, 5xx. Retryable with backoff.
    #[error("{provider}: transient failure: {detail}")]
    Transient {
        provider: ProviderKind,
        detail: String,
    },

    /// Response arrived but is unusable (empty text, truncated generation,
    /// missing fields). Terminal for the attempt; carries enough diagnostics
    /// to tell "truncated" apart from "no output".
    #[error("{provider}: malformed response: {detail}")]
    Malformed {
        provider: ProviderKind,
        detail: String,
        stop_reason: Option<String>,
        output_tokens: Option<u64>,
    },

    /// The backend rejected the input itself (MIME, pixel limit, payload
    /// size). Resubmitting unchanged cannot succeed.
    #[error("{provider}: unsupported input: {detail}")]
    UnsupportedInput {
        provider: ProviderKind,
        detail: String,
    },
}

impl ProviderError {
    /// Only rate limiting and transient faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Backend-supplied delay hint, if any.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable short name, persisted on failed tasks and in the run log.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Malformed { .. } => "malformed",
            Self::UnsupportedInput { .. } => "unsupported_input",
        }
    }
}

// ═══════════════════════════════════════════
// VisionProvider trait
// ═══════════════════════════════════════════

/// Uniform interface to one AI vision backend.
///
/// Implementations own their retry/backoff entirely: a `describe` that
/// returns `Err` has already exhausted the bounded policy for retryable
/// kinds. Implementations never touch workspace or task state.
pub trait VisionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Produce a text description for one image.
    fn describe(
        &self,
        image_path: &Path,
        model: &str,
        prompt: &str,
    ) -> Result<Description, ProviderError>;

    /// Model ids this backend currently offers.
    fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Cheap reachability check. Never retried beyond the client's policy.
    fn probe(&self) -> Availability;
}

// ═══════════════════════════════════════════
// Image payload helpers
// ═══════════════════════════════════════════

/// MIME type for an image path, by extension.
///
/// Returns `None` for extensions no backend accepts as a vision payload;
/// callers map that to `UnsupportedInput` before any network traffic.
pub fn image_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Read an image and base64-encode it for a JSON payload.
///
/// `max_bytes` is the backend's payload ceiling — oversized files are
/// rejected locally as `UnsupportedInput` instead of burning a network call.
pub fn read_image_base64(
    provider: ProviderKind,
    path: &Path,
    max_bytes: u64,
) -> Result<(String, &'static str), ProviderError> {
    let mime = image_mime_type(path).ok_or_else(|| ProviderError::UnsupportedInput {
        provider,
        detail: format!("unrecognized image type: {}", path.display()),
    })?;

    let bytes = std::fs::read(path).map_err(|e| ProviderError::UnsupportedInput {
        provider,
        detail: format!("cannot read {}: {e}", path.display()),
    })?;

    if bytes.len() as u64 > max_bytes {
        return Err(ProviderError::UnsupportedInput {
            provider,
            detail: format!(
                "{} is {} bytes, over the {} byte limit",
                path.display(),
                bytes.len(),
                max_bytes
            ),
        });
    }

    use base64::Engine as _;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok((encoded, mime))
}

// ═══════════════════════════════════════════
// MockProvider (testing)
// ═══════════════════════════════════════════

/// Scriptable provider for tests.
///
/// Returns a configured response by default; `fail_on` schedules a typed
/// failure for specific call indices. Counts describe calls so idempotence
/// properties can assert "zero provider calls on the second run".
pub struct MockProvider {
    kind: ProviderKind,
    response: String,
    models: Vec<String>,
    availability: Availability,
    fail_on: Mutex<Vec<(usize, &'static str)>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(response: &str) -> Self {
        Self {
            kind: ProviderKind::Ollama,
            response: response.to_string(),
            models: vec!["llava:latest".to_string()],
            availability: Availability::Available,
            fail_on: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    /// Schedule a failure for the Nth describe call (0-based).
    /// `kind` is one of "auth", "rate_limited", "transient",
    /// "malformed", "unsupported_input".
    pub fn fail_on_call(self, index: usize, kind: &'static str) -> Self {
        self.fail_on.lock().unwrap().push((index, kind));
        self
    }

    /// Number of describe calls made so far.
    pub fn describe_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, index: usize) -> Option<ProviderError> {
        let scripted = self.fail_on.lock().unwrap();
        let (_, kind) = scripted.iter().find(|(i, _)| *i == index)?;
        Some(match *kind {
            "auth" => ProviderError::Auth {
                provider: self.kind,
                detail: "invalid api key".into(),
            },
            "rate_limited" => ProviderError::RateLimited {
                provider: self.kind,
                retry_after: None,
            },
            "malformed" => ProviderError::Malformed {
                provider: self.kind,
                detail: "empty response".into(),
                stop_reason: Some("length".into()),
                output_tokens: Some(0),
            },
            "unsupported_input" => ProviderError::UnsupportedInput {
                provider: self.kind,
                detail: "bad mime".into(),
            },
            _ => ProviderError::Transient {
                provider: self.kind,
                detail: "connection reset".into(),
            },
        })
    }
}

impl VisionProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn describe(
        &self,
        _image_path: &Path,
        _model: &str,
        _prompt: &str,
    ) -> Result<Description, ProviderError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.scripted_failure(index) {
            return Err(err);
        }
        Ok(Description {
            text: self.response.clone(),
            usage: Some(TokenUsage {
                input_tokens: Some(640),
                output_tokens: Some(96),
            }),
        })
    }

    fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        if self.availability == Availability::Unavailable {
            return Err(ProviderError::Transient {
                provider: self.kind,
                detail: "unreachable".into(),
            });
        }
        Ok(self.models.clone())
    }

    fn probe(&self) -> Availability {
        self.availability
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_roundtrip() {
        for kind in ProviderKind::all() {
            let parsed = ProviderKind::from_str(kind.as_str());
            assert_eq!(parsed, Some(*kind), "Roundtrip failed for {kind}");
        }
    }

    #[test]
    fn provider_kind_from_invalid() {
        assert_eq!(ProviderKind::from_str("gemini"), None);
        assert_eq!(ProviderKind::from_str(""), None);
    }

    #[test]
    fn provider_kind_serde_matches_as_str() {
        for kind in ProviderKind::all() {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let parsed: ProviderKind = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn retryable_classification() {
        let auth = ProviderError::Auth {
            provider: ProviderKind::OpenAi,
            detail: "bad key".into(),
        };
        let rate = ProviderError::RateLimited {
            provider: ProviderKind::OpenAi,
            retry_after: Some(Duration::from_secs(2)),
        };
        let transient = ProviderError::Transient {
            provider: ProviderKind::OpenAi,
            detail: "timeout".into(),
        };
        let malformed = ProviderError::Malformed {
            provider: ProviderKind::OpenAi,
            detail: "no text".into(),
            stop_reason: None,
            output_tokens: None,
        };

        assert!(!auth.is_retryable());
        assert!(rate.is_retryable());
        assert!(transient.is_retryable());
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn retry_hint_only_on_rate_limited() {
        let rate = ProviderError::RateLimited {
            provider: ProviderKind::Claude,
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(rate.retry_hint(), Some(Duration::from_secs(7)));

        let transient = ProviderError::Transient {
            provider: ProviderKind::Claude,
            detail: "reset".into(),
        };
        assert_eq!(transient.retry_hint(), None);
    }

    #[test]
    fn kind_str_is_stable() {
        let err = ProviderError::UnsupportedInput {
            provider: ProviderKind::Ollama,
            detail: "tiff".into(),
        };
        assert_eq!(err.kind_str(), "unsupported_input");
    }

    #[test]
    fn mime_type_by_extension() {
        assert_eq!(
            image_mime_type(Path::new("/a/photo.JPG")),
            Some("image/jpeg")
        );
        assert_eq!(image_mime_type(Path::new("/a/shot.png")), Some("image/png"));
        assert_eq!(image_mime_type(Path::new("/a/scan.tiff")), None);
        assert_eq!(image_mime_type(Path::new("/a/noext")), None);
    }

    #[test]
    fn read_image_rejects_unknown_extension() {
        let err = read_image_base64(
            ProviderKind::OpenAi,
            Path::new("/tmp/document.pdf"),
            1_000_000,
        )
        .unwrap_err();
        assert_eq!(err.kind_str(), "unsupported_input");
    }

    #[test]
    fn read_image_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jpg");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = read_image_base64(ProviderKind::Claude, &path, 16).unwrap_err();
        assert_eq!(err.kind_str(), "unsupported_input");
        assert!(err.to_string().contains("64 bytes"));
    }

    #[test]
    fn read_image_encodes_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.png");
        std::fs::write(&path, b"fake-png").unwrap();

        let (b64, mime) = read_image_base64(ProviderKind::Ollama, &path, 1024).unwrap();
        assert_eq!(mime, "image/png");
        assert!(!b64.is_empty());
    }

    #[test]
    fn mock_counts_calls_and_scripts_failures() {
        let mock = MockProvider::new("a dog on a beach").fail_on_call(1, "transient");

        let ok = mock.describe(Path::new("a.jpg"), "llava", "describe").unwrap();
        assert_eq!(ok.text, "a dog on a beach");

        let err = mock
            .describe(Path::new("b.jpg"), "llava", "describe")
            .unwrap_err();
        assert_eq!(err.kind_str(), "transient");

        assert_eq!(mock.describe_calls(), 2);
    }

    #[test]
    fn mock_unavailable_fails_model_listing() {
        let mock = MockProvider::new("x").with_availability(Availability::Unavailable);
        assert_eq!(mock.probe(), Availability::Unavailable);
        assert!(mock.list_models().is_err());
    }
}
