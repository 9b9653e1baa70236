//! Input discovery — classify the files under a root directory.
//!
//! Classification decides which later stages are needed at all: no videos
//! means the extract stage is skipped outright, no HEIC-like files means
//! no conversion pass. Classification is by extension; media decoding is a
//! collaborator concern, not ours.

use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];
/// Formats vision providers reject; converted to JPEG before describing.
const CONVERTIBLE_EXTENSIONS: &[&str] = &["heic", "heif", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

/// What discovery decided about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// Directly describable.
    Image,
    /// Needs frame extraction first.
    Video,
    /// Needs format conversion first.
    ConvertibleImage,
    /// Ignored by the pipeline.
    Unsupported,
}

/// Classify a single path by extension.
pub fn classify(path: &Path) -> FileClass {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return FileClass::Unsupported,
    };
    let ext = ext.as_str();
    if IMAGE_EXTENSIONS.contains(&ext) {
        FileClass::Image
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        FileClass::Video
    } else if CONVERTIBLE_EXTENSIONS.contains(&ext) {
        FileClass::ConvertibleImage
    } else {
        FileClass::Unsupported
    }
}

/// Everything found under an input root, in sorted path order.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub images: Vec<PathBuf>,
    pub videos: Vec<PathBuf>,
    pub convertibles: Vec<PathBuf>,
    pub unsupported: Vec<PathBuf>,
}

impl Discovery {
    pub fn total_media(&self) -> usize {
        self.images.len() + self.videos.len() + self.convertibles.len()
    }
}

/// Walk `root` recursively and classify every regular file.
///
/// Hidden entries (dot-prefixed) are skipped: output directories and
/// editor droppings otherwise pollute every re-run. Results are sorted for
/// deterministic task ordering across runs.
pub fn discover(root: &Path) -> std::io::Result<Discovery> {
    let mut discovery = Discovery::default();
    walk(root, &mut discovery)?;
    discovery.images.sort();
    discovery.videos.sort();
    discovery.convertibles.sort();
    discovery.unsupported.sort();
    tracing::info!(
        root = %root.display(),
        images = discovery.images.len(),
        videos = discovery.videos.len(),
        convertibles = discovery.convertibles.len(),
        unsupported = discovery.unsupported.len(),
        "Discovery complete"
    );
    Ok(discovery)
}

fn walk(dir: &Path, discovery: &mut Discovery) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, discovery)?;
        } else if file_type.is_file() {
            match classify(&path) {
                FileClass::Image => discovery.images.push(path),
                FileClass::Video => discovery.videos.push(path),
                FileClass::ConvertibleImage => discovery.convertibles.push(path),
                FileClass::Unsupported => discovery.unsupported.push(path),
            }
        }
    }
    Ok(())
}
