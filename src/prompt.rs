//! Prompt styles for image description.
//!
//! A closed set of built-in styles plus a custom escape hatch. The style
//! name (and the custom text, when present) is part of a description's
//! identity: re-running with the same (provider, model, prompt) tuple is a
//! no-op, while changing the style produces a new description version.

use serde::{Deserialize, Serialize};

/// Default style for every front end.
pub const DEFAULT_STYLE: PromptStyle = PromptStyle::Detailed;

const DETAILED_PROMPT: &str = "\
Describe this image in detail. Cover the main subject, the setting, any \
people or animals and what they are doing, notable objects, colors, and \
lighting. Mention any visible text verbatim. Write 3-5 sentences of plain \
prose with no preamble.";

const CONCISE_PROMPT: &str = "\
Describe this image in one short sentence. Name the main subject and the \
setting only. No preamble, no formatting.";

const NARRATIVE_PROMPT: &str = "\
Describe this image as if telling a friend what you are looking at. Use a \
warm, natural tone and focus on what makes the scene interesting or \
memorable. 2-4 sentences, no preamble.";

const KEYWORDS_PROMPT: &str = "\
List 5-10 comma-separated lowercase keywords for this image: subjects, \
setting, activities, notable objects. Keywords only, no sentences, no \
preamble.";

/// Built-in prompt styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    Detailed,
    Concise,
    Narrative,
    Keywords,
}

impl PromptStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detailed => "detailed",
            Self::Concise => "concise",
            Self::Narrative => "narrative",
            Self::Keywords => "keywords",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "detailed" => Some(Self::Detailed),
            "concise" => Some(Self::Concise),
            "narrative" => Some(Self::Narrative),
            "keywords" => Some(Self::Keywords),
            _ => None,
        }
    }

    pub fn all() -> &'static [PromptStyle] {
        &[
            Self::Detailed,
            Self::Concise,
            Self::Narrative,
            Self::Keywords,
        ]
    }

    /// The prompt text sent to the provider.
    pub fn template(&self) -> &'static str {
        match self {
            Self::Detailed => DETAILED_PROMPT,
            Self::Concise => CONCISE_PROMPT,
            Self::Narrative => NARRATIVE_PROMPT,
            Self::Keywords => KEYWORDS_PROMPT,
        }
    }
}

impl std::fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved prompt: a style, optionally overridden by custom text.
///
/// Custom text wins when present; the style is still recorded so the
/// workspace can show where a description came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub style: PromptStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

impl PromptSpec {
    pub fn style(style: PromptStyle) -> Self {
        Self {
            style,
            custom: None,
        }
    }

    pub fn custom(style: PromptStyle, text: &str) -> Self {
        Self {
            style,
            custom: Some(text.to_string()),
        }
    }

    /// The text actually sent to the provider.
    pub fn text(&self) -> &str {
        self.custom.as_deref().unwrap_or_else(|| self.style.template())
    }
}

impl Default for PromptSpec {
    fn default() -> Self {
        Self::style(DEFAULT_STYLE)
    }
}
