//! Application constants and provider settings resolution.
//!
//! Credentials and endpoints come from the environment; a run snapshots
//! them into its provider client at construction and never re-reads them.

use std::path::PathBuf;
use std::sync::Arc;

use crate::provider::claude::ClaudeProvider;
use crate::provider::huggingface::HuggingFaceProvider;
use crate::provider::ollama::OllamaProvider;
use crate::provider::openai::OpenAiProvider;
use crate::provider::{ProviderKind, VisionProvider};

pub const APP_NAME: &str = "mediascribe";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("{APP_NAME}=info")
}

/// Application data directory: ~/.mediascribe/
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(".mediascribe")
}

/// Default output root for workflow runs without an explicit --output.
pub fn default_output_root() -> PathBuf {
    app_data_dir().join("runs")
}

// ═══════════════════════════════════════════
// Provider settings
// ═══════════════════════════════════════════

/// Resolved settings for one backend.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub default_model: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Provider {provider} needs a credential: set {env_var}")]
    MissingCredential {
        provider: ProviderKind,
        env_var: &'static str,
    },
}

const OLLAMA_URL_VAR: &str = "MEDIASCRIBE_OLLAMA_URL";
const OPENAI_URL_VAR: &str = "MEDIASCRIBE_OPENAI_URL";
const CLAUDE_URL_VAR: &str = "MEDIASCRIBE_CLAUDE_URL";
const HF_URL_VAR: &str = "MEDIASCRIBE_HF_URL";

const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
const CLAUDE_KEY_VAR: &str = "ANTHROPIC_API_KEY";
const HF_KEY_VAR: &str = "HF_API_TOKEN";

/// Resolve settings for a provider from the process environment.
pub fn provider_settings(kind: ProviderKind) -> ProviderSettings {
    resolve_settings(kind, |var| std::env::var(var).ok())
}

fn resolve_settings(
    kind: ProviderKind,
    get: impl Fn(&str) -> Option<String>,
) -> ProviderSettings {
    let model_var = |suffix: &str| get(&format!("MEDIASCRIBE_{suffix}_MODEL"));
    match kind {
        ProviderKind::Ollama => ProviderSettings {
            kind,
            endpoint: get(OLLAMA_URL_VAR)
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            api_key: None,
            default_model: model_var("OLLAMA").unwrap_or_else(|| "llava:latest".to_string()),
        },
        ProviderKind::OpenAi => ProviderSettings {
            kind,
            endpoint: get(OPENAI_URL_VAR)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: get(OPENAI_KEY_VAR),
            default_model: model_var("OPENAI").unwrap_or_else(|| "gpt-4o-mini".to_string()),
        },
        ProviderKind::Claude => ProviderSettings {
            kind,
            endpoint: get(CLAUDE_URL_VAR)
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            api_key: get(CLAUDE_KEY_VAR),
            default_model: model_var("CLAUDE")
                .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
        },
        ProviderKind::HuggingFace => ProviderSettings {
            kind,
            endpoint: get(HF_URL_VAR)
                .unwrap_or_else(|| "https://router.huggingface.co/v1".to_string()),
            api_key: get(HF_KEY_VAR),
            default_model: model_var("HF")
                .unwrap_or_else(|| "Qwen/Qwen2.5-VL-7B-Instruct".to_string()),
        },
    }
}

fn credential_var(kind: ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::Ollama => None,
        ProviderKind::OpenAi => Some(OPENAI_KEY_VAR),
        ProviderKind::Claude => Some(CLAUDE_KEY_VAR),
        ProviderKind::HuggingFace => Some(HF_KEY_VAR),
    }
}

/// Construct a client from resolved settings.
///
/// Cloud providers without a credential fail here, before any network or
/// pipeline work starts.
pub fn build_provider(
    settings: &ProviderSettings,
) -> Result<Arc<dyn VisionProvider>, SettingsError> {
    match settings.kind {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(&settings.endpoint))),
        ProviderKind::OpenAi => {
            let key = require_key(settings)?;
            Ok(Arc::new(OpenAiProvider::new(&settings.endpoint, &key)))
        }
        ProviderKind::Claude => {
            let key = require_key(settings)?;
            Ok(Arc::new(ClaudeProvider::new(&settings.endpoint, &key)))
        }
        ProviderKind::HuggingFace => {
            let key = require_key(settings)?;
            Ok(Arc::new(HuggingFaceProvider::new(&settings.endpoint, &key)))
        }
    }
}

fn require_key(settings: &ProviderSettings) -> Result<String, SettingsError> {
    settings
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or(SettingsError::MissingCredential {
            provider: settings.kind,
            env_var: credential_var(settings.kind).unwrap_or("?"),
        })
}
