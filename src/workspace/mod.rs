//! The persisted document model shared by every front end.

pub mod document;
pub mod types;

pub use document::{normalize_path, Workspace, WorkspaceError, FORMAT_VERSION, WORKSPACE_EXTENSION};
pub use types::{DescriptionRecord, Item, ItemType};
