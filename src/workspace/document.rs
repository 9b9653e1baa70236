//! The workspace document: items, description history, persistence.
//!
//! A workspace is the single shared mutable resource in the system. It is
//! mutated only on the driving context; everything a front end renders
//! comes from event snapshots or an explicit reload. The in-memory
//! `modified` flag is the one source of truth for "needs save" prompts:
//! set by every mutation, cleared exactly on load and save.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{DescriptionRecord, Item, ItemType};
use crate::prompt::PromptSpec;
use crate::provider::ProviderKind;

/// Document format version written by this build.
pub const FORMAT_VERSION: &str = "1";

/// Conventional workspace file extension.
pub const WORKSPACE_EXTENSION: &str = "mdw";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workspace document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("An item with path '{0}' already exists")]
    DuplicateItem(String),

    #[error("No item with path '{0}'")]
    ItemNotFound(String),

    #[error("Item '{path}' has no description {id}")]
    DescriptionNotFound { path: String, id: Uuid },
}

/// Normalize a path into the workspace key form.
///
/// Lexical only: resolves `.`/`..` components and unifies separators to
/// `/`. No filesystem access, so items can outlive their files.
pub fn normalize_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::RootDir => prefix.push('/'),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
        }
    }
    format!("{prefix}{}", parts.join("/"))
}

/// The persisted workspace document.
#[derive(Debug, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default = "default_version")]
    pub version: String,
    /// Directories this workspace was populated from, in add order.
    #[serde(default)]
    pub directory_paths: Vec<String>,
    /// Items keyed by normalized path; the key is the uniqueness invariant.
    #[serde(default)]
    items: BTreeMap<String, Item>,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub created: String,
    /// RFC 3339 timestamp of the last save.
    #[serde(default)]
    pub modified: String,

    /// True iff a mutation happened since the last load/save.
    #[serde(skip)]
    dirty: bool,
}

fn default_version() -> String {
    FORMAT_VERSION.to_string()
}

impl Workspace {
    pub fn new() -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            version: FORMAT_VERSION.to_string(),
            directory_paths: Vec::new(),
            items: BTreeMap::new(),
            created: now.clone(),
            modified: now,
            dirty: false,
        }
    }

    // ── Queries ──────────────────────────────────────────

    pub fn is_modified(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn get(&self, path: &Path) -> Option<&Item> {
        self.items.get(&normalize_path(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.items.contains_key(&normalize_path(path))
    }

    /// Items the user queued for the next batch run.
    pub fn marked_items(&self) -> Vec<&Item> {
        self.items.values().filter(|i| i.batch_marked).collect()
    }

    /// Items a describe stage would feed to a provider.
    pub fn describable_items(&self) -> Vec<&Item> {
        self.items
            .values()
            .filter(|i| i.item_type.is_describable())
            .collect()
    }

    /// The idempotence query: is this exact tuple already described?
    pub fn has_description(
        &self,
        path: &Path,
        provider: ProviderKind,
        model: &str,
        prompt: &PromptSpec,
    ) -> bool {
        self.get(path)
            .map(|i| i.has_description(provider, model, prompt))
            .unwrap_or(false)
    }

    // ── Mutations ────────────────────────────────────────

    /// Record a source directory. Duplicate adds are ignored and do not
    /// dirty the document.
    pub fn add_directory(&mut self, dir: &Path) {
        let key = normalize_path(dir);
        if !self.directory_paths.contains(&key) {
            self.directory_paths.push(key);
            self.dirty = true;
        }
    }

    pub fn add_item(&mut self, mut item: Item) -> Result<(), WorkspaceError> {
        let key = normalize_path(Path::new(&item.file_path));
        if self.items.contains_key(&key) {
            return Err(WorkspaceError::DuplicateItem(key));
        }
        item.file_path = key.clone();
        self.items.insert(key, item);
        self.dirty = true;
        Ok(())
    }

    /// Add an item if its path is new; existing items keep their state
    /// (marks, descriptions) untouched. Returns true when added.
    pub fn add_item_if_absent(&mut self, item: Item) -> bool {
        match self.add_item(item) {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    pub fn remove_item(&mut self, path: &Path) -> Result<Item, WorkspaceError> {
        let key = normalize_path(path);
        let removed = self
            .items
            .remove(&key)
            .ok_or(WorkspaceError::ItemNotFound(key))?;
        self.dirty = true;
        Ok(removed)
    }

    /// Append a description to an item's history. Never replaces.
    pub fn add_description(
        &mut self,
        path: &Path,
        record: DescriptionRecord,
    ) -> Result<(), WorkspaceError> {
        let key = normalize_path(path);
        let item = self
            .items
            .get_mut(&key)
            .ok_or(WorkspaceError::ItemNotFound(key))?;
        item.descriptions.push(record);
        self.dirty = true;
        Ok(())
    }

    /// Explicit user edit of one record's text. Distinct from add+remove:
    /// identity, provenance, and position in the history are preserved.
    pub fn edit_description(
        &mut self,
        path: &Path,
        id: Uuid,
        new_text: &str,
    ) -> Result<(), WorkspaceError> {
        let key = normalize_path(path);
        let item = self
            .items
            .get_mut(&key)
            .ok_or_else(|| WorkspaceError::ItemNotFound(key.clone()))?;
        let record = item
            .descriptions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(WorkspaceError::DescriptionNotFound { path: key, id })?;
        record.text = new_text.to_string();
        self.dirty = true;
        Ok(())
    }

    /// Remove one record outright. No tombstones; the rest of the history
    /// is untouched.
    pub fn remove_description(&mut self, path: &Path, id: Uuid) -> Result<(), WorkspaceError> {
        let key = normalize_path(path);
        let item = self
            .items
            .get_mut(&key)
            .ok_or_else(|| WorkspaceError::ItemNotFound(key.clone()))?;
        let before = item.descriptions.len();
        item.descriptions.retain(|d| d.id != id);
        if item.descriptions.len() == before {
            return Err(WorkspaceError::DescriptionNotFound { path: key, id });
        }
        self.dirty = true;
        Ok(())
    }

    /// Flip an item's batch mark. Marking is independent of description
    /// state: an already-described item can be queued for re-description.
    pub fn toggle_batch_mark(&mut self, path: &Path) -> Result<bool, WorkspaceError> {
        let key = normalize_path(path);
        let item = self
            .items
            .get_mut(&key)
            .ok_or(WorkspaceError::ItemNotFound(key))?;
        item.batch_marked = !item.batch_marked;
        self.dirty = true;
        Ok(item.batch_marked)
    }

    // ── Persistence ──────────────────────────────────────

    /// Load a workspace document. Missing optional fields default; unknown
    /// item types load as `Unknown`. Clears the modified flag.
    pub fn load(path: &Path) -> Result<Self, WorkspaceError> {
        let text = std::fs::read_to_string(path)?;
        let mut ws: Workspace = serde_json::from_str(&text)?;
        ws.dirty = false;
        Ok(ws)
    }

    /// Write the document and clear the modified flag.
    pub fn save(&mut self, path: &Path) -> Result<(), WorkspaceError> {
        self.modified = chrono::Utc::now().to_rfc3339();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        self.dirty = false;
        Ok(())
    }

    /// Load if the file exists, otherwise start empty.
    pub fn load_or_new(path: &Path) -> Result<Self, WorkspaceError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptStyle;
    use crate::provider::Description;

    fn image(path: &str) -> Item {
        Item::new(path, ItemType::Image)
    }

    fn record() -> DescriptionRecord {
        DescriptionRecord::from_description(
            Description {
                text: "a snowy mountain pass".into(),
                usage: None,
            },
            ProviderKind::Ollama,
            "llava:latest",
            &PromptSpec::style(PromptStyle::Detailed),
        )
    }

    #[test]
    fn normalize_resolves_dots_and_separators() {
        assert_eq!(normalize_path(Path::new("photos/./a.jpg")), "photos/a.jpg");
        assert_eq!(
            normalize_path(Path::new("photos/raw/../a.jpg")),
            "photos/a.jpg"
        );
        assert_eq!(normalize_path(Path::new("/abs/path/a.jpg")), "/abs/path/a.jpg");
    }

    #[test]
    fn new_workspace_is_clean_and_empty() {
        let ws = Workspace::new();
        assert!(ws.is_empty());
        assert!(!ws.is_modified());
        assert_eq!(ws.version, FORMAT_VERSION);
    }

    #[test]
    fn add_item_sets_modified_and_enforces_uniqueness() {
        let mut ws = Workspace::new();
        ws.add_item(image("photos/a.jpg")).unwrap();
        assert!(ws.is_modified());
        assert_eq!(ws.len(), 1);

        // Same file through a different lexical spelling is a duplicate.
        let dup = ws.add_item(image("photos/./a.jpg"));
        assert!(matches!(dup, Err(WorkspaceError::DuplicateItem(_))));
        assert_eq!(ws.len(), 1);
    }

    #[test]
    fn add_item_if_absent_preserves_existing_state() {
        let mut ws = Workspace::new();
        ws.add_item(image("a.jpg")).unwrap();
        ws.toggle_batch_mark(Path::new("a.jpg")).unwrap();

        assert!(!ws.add_item_if_absent(image("a.jpg")));
        assert!(ws.get(Path::new("a.jpg")).unwrap().batch_marked);
    }

    #[test]
    fn remove_missing_item_errors() {
        let mut ws = Workspace::new();
        let result = ws.remove_item(Path::new("ghost.jpg"));
        assert!(matches!(result, Err(WorkspaceError::ItemNotFound(_))));
        assert!(!ws.is_modified(), "Failed mutation must not dirty");
    }

    #[test]
    fn descriptions_append_in_order() {
        let mut ws = Workspace::new();
        ws.add_item(image("a.jpg")).unwrap();

        let first = record();
        let second = record();
        ws.add_description(Path::new("a.jpg"), first.clone()).unwrap();
        ws.add_description(Path::new("a.jpg"), second.clone()).unwrap();

        let item = ws.get(Path::new("a.jpg")).unwrap();
        assert_eq!(item.descriptions.len(), 2);
        assert_eq!(item.descriptions[0].id, first.id);
        assert_eq!(item.descriptions[1].id, second.id);
    }

    #[test]
    fn edit_description_mutates_text_in_place() {
        let mut ws = Workspace::new();
        ws.add_item(image("a.jpg")).unwrap();
        let rec = record();
        let id = rec.id;
        ws.add_description(Path::new("a.jpg"), rec).unwrap();

        ws.edit_description(Path::new("a.jpg"), id, "fixed wording")
            .unwrap();

        let item = ws.get(Path::new("a.jpg")).unwrap();
        assert_eq!(item.descriptions.len(), 1);
        assert_eq!(item.descriptions[0].text, "fixed wording");
        assert_eq!(item.descriptions[0].id, id, "Identity preserved on edit");
    }

    #[test]
    fn remove_description_deletes_outright() {
        let mut ws = Workspace::new();
        ws.add_item(image("a.jpg")).unwrap();
        let keep = record();
        let drop = record();
        ws.add_description(Path::new("a.jpg"), keep.clone()).unwrap();
        ws.add_description(Path::new("a.jpg"), drop.clone()).unwrap();

        ws.remove_description(Path::new("a.jpg"), drop.id).unwrap();
        let item = ws.get(Path::new("a.jpg")).unwrap();
        assert_eq!(item.descriptions.len(), 1);
        assert_eq!(item.descriptions[0].id, keep.id);

        let missing = ws.remove_description(Path::new("a.jpg"), drop.id);
        assert!(matches!(
            missing,
            Err(WorkspaceError::DescriptionNotFound { .. })
        ));
    }

    #[test]
    fn marked_items_filters_on_flag() {
        let mut ws = Workspace::new();
        ws.add_item(image("a.jpg")).unwrap();
        ws.add_item(image("b.jpg")).unwrap();
        ws.add_item(image("c.jpg")).unwrap();

        ws.toggle_batch_mark(Path::new("a.jpg")).unwrap();
        ws.toggle_batch_mark(Path::new("c.jpg")).unwrap();

        let marked: Vec<_> = ws.marked_items().iter().map(|i| i.file_path.clone()).collect();
        assert_eq!(marked, vec!["a.jpg", "c.jpg"]);

        // Toggling off removes from the queue.
        ws.toggle_batch_mark(Path::new("a.jpg")).unwrap();
        assert_eq!(ws.marked_items().len(), 1);
    }

    #[test]
    fn modified_flag_cleared_exactly_on_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("project.mdw");

        let mut ws = Workspace::new();
        ws.add_item(image("a.jpg")).unwrap();
        assert!(ws.is_modified());

        ws.save(&file).unwrap();
        assert!(!ws.is_modified());

        let mut loaded = Workspace::load(&file).unwrap();
        assert!(!loaded.is_modified());

        // load then save with no intervening mutation keeps it clean
        loaded.save(&file).unwrap();
        assert!(!loaded.is_modified());

        loaded.toggle_batch_mark(Path::new("a.jpg")).unwrap();
        assert!(loaded.is_modified());
    }

    #[test]
    fn save_load_roundtrip_is_semantically_equal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("project.mdw");

        let mut ws = Workspace::new();
        ws.add_directory(Path::new("/photos/trip"));
        ws.add_item(image("/photos/trip/a.jpg")).unwrap();
        ws.add_item(Item::new("/photos/trip/clip.mp4", ItemType::Video))
            .unwrap();
        ws.add_item(Item::frame_of(
            "/photos/trip/frames/clip/frame_001.jpg",
            "/photos/trip/clip.mp4",
        ))
        .unwrap();
        ws.add_description(Path::new("/photos/trip/a.jpg"), record())
            .unwrap();
        ws.toggle_batch_mark(Path::new("/photos/trip/a.jpg")).unwrap();
        ws.save(&file).unwrap();

        let loaded = Workspace::load(&file).unwrap();
        assert_eq!(loaded.len(), ws.len());
        assert_eq!(loaded.directory_paths, ws.directory_paths);
        for item in ws.items() {
            let reloaded = loaded.get(Path::new(&item.file_path)).unwrap();
            assert_eq!(reloaded, item);
        }
    }

    #[test]
    fn load_tolerates_minimal_document() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sparse.mdw");
        std::fs::write(
            &file,
            r#"{"items": {"a.jpg": {"file_path": "a.jpg", "item_type": "hologram"}}}"#,
        )
        .unwrap();

        let ws = Workspace::load(&file).unwrap();
        assert_eq!(ws.len(), 1);
        let item = ws.get(Path::new("a.jpg")).unwrap();
        assert_eq!(item.item_type, ItemType::Unknown);
        assert!(!item.batch_marked);
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.mdw");
        std::fs::write(&file, "{not json").unwrap();
        assert!(matches!(
            Workspace::load(&file),
            Err(WorkspaceError::Parse(_))
        ));
    }

    #[test]
    fn has_description_tuple_queries() {
        let mut ws = Workspace::new();
        ws.add_item(image("a.jpg")).unwrap();
        ws.add_description(Path::new("a.jpg"), record()).unwrap();

        let prompt = PromptSpec::style(PromptStyle::Detailed);
        assert!(ws.has_description(Path::new("a.jpg"), ProviderKind::Ollama, "llava:latest", &prompt));
        assert!(!ws.has_description(Path::new("a.jpg"), ProviderKind::Ollama, "other", &prompt));
        assert!(!ws.has_description(Path::new("missing.jpg"), ProviderKind::Ollama, "llava:latest", &prompt));
    }
}
