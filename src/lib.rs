//! mediascribe — batch image/video description through interchangeable AI
//! vision providers.
//!
//! The engine is toolkit-agnostic: front ends (the bundled CLI, or a GUI
//! adapter) issue commands and subscribe to progress events, nothing more.
//! Layers, leaves first:
//!
//! - [`provider`] — one contract over Ollama / OpenAI / Claude / Hugging
//!   Face, with retry/backoff owned entirely inside the provider layer.
//! - [`prompt`] — built-in prompt styles plus custom text.
//! - [`workspace`] — the persisted document model: items, versioned
//!   descriptions, batch marks.
//! - [`batch`] — sequential, cancellable task execution with progress
//!   events and a background-thread adapter.
//! - [`workflow`] — the resumable pipeline: discover, extract frames,
//!   convert formats, describe, report; status-logged per stage.
//! - [`config`] — environment-based provider settings.

pub mod batch;
pub mod config;
pub mod prompt;
pub mod provider;
pub mod workflow;
pub mod workspace;
