//! Workspace element types: items and their versioned descriptions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompt::PromptSpec;
use crate::provider::{Description, ProviderKind, TokenUsage};

// ═══════════════════════════════════════════
// Item type
// ═══════════════════════════════════════════

/// What kind of media an item is.
///
/// `Unknown` exists only so documents written by a newer version load
/// instead of crashing; unknown items are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Image,
    Video,
    ExtractedFrame,
    #[serde(other)]
    Unknown,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::ExtractedFrame => "extracted_frame",
            Self::Unknown => "unknown",
        }
    }

    /// Videos are containers; only images and frames go to a provider.
    pub fn is_describable(&self) -> bool {
        matches!(self, Self::Image | Self::ExtractedFrame)
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Description record
// ═══════════════════════════════════════════

/// One generated description, appended to an item's history.
///
/// Records are never replaced: re-describing an item appends a new record,
/// and only an explicit user edit mutates the text of an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionRecord {
    pub id: Uuid,
    pub text: String,
    pub provider: ProviderKind,
    pub model: String,
    pub prompt_style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl DescriptionRecord {
    /// Wrap a provider result with identity and provenance.
    pub fn from_description(
        description: Description,
        provider: ProviderKind,
        model: &str,
        prompt: &PromptSpec,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: description.text,
            provider,
            model: model.to_string(),
            prompt_style: prompt.style.as_str().to_string(),
            custom_prompt: prompt.custom.clone(),
            created: chrono::Utc::now().to_rfc3339(),
            usage: description.usage,
        }
    }

    /// Does this record cover the exact (provider, model, prompt) tuple?
    /// This is the idempotence test: a match means skip, not re-describe.
    pub fn matches(&self, provider: ProviderKind, model: &str, prompt: &PromptSpec) -> bool {
        self.provider == provider
            && self.model == model
            && self.prompt_style == prompt.style.as_str()
            && self.custom_prompt == prompt.custom
    }
}

// ═══════════════════════════════════════════
// Item
// ═══════════════════════════════════════════

/// One file in the workspace, keyed by normalized path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub file_path: String,
    #[serde(default = "default_item_type")]
    pub item_type: ItemType,
    /// For extracted frames: the source video's workspace key. A relation
    /// only — removing the video does not cascade to its frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_video: Option<String>,
    #[serde(default)]
    pub batch_marked: bool,
    #[serde(default)]
    pub descriptions: Vec<DescriptionRecord>,
}

fn default_item_type() -> ItemType {
    ItemType::Unknown
}

impl Item {
    pub fn new(file_path: &str, item_type: ItemType) -> Self {
        Self {
            file_path: file_path.to_string(),
            item_type,
            parent_video: None,
            batch_marked: false,
            descriptions: Vec::new(),
        }
    }

    pub fn frame_of(file_path: &str, parent_video: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            item_type: ItemType::ExtractedFrame,
            parent_video: Some(parent_video.to_string()),
            batch_marked: false,
            descriptions: Vec::new(),
        }
    }

    pub fn has_description(
        &self,
        provider: ProviderKind,
        model: &str,
        prompt: &PromptSpec,
    ) -> bool {
        self.descriptions
            .iter()
            .any(|d| d.matches(provider, model, prompt))
    }
}
