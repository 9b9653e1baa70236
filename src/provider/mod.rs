//! AI vision providers behind one contract.
//!
//! `types` defines the `VisionProvider` trait and the failure taxonomy;
//! `retry` owns the one retry loop in the crate; each backend module maps
//! its own wire format; `registry` answers availability and model-list
//! queries with a short cache.

pub mod claude;
pub mod huggingface;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod types;

pub use registry::{ProviderDescriptor, ProviderRegistry, RegistryError};
pub use types::{
    Availability, Description, MockProvider, ProviderError, ProviderKind, TokenUsage,
    VisionProvider,
};
