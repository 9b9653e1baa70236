//! Media collaborators: frame extraction and format conversion.
//!
//! Codecs are out of scope — both operations are black boxes that take a
//! file and return file paths. Production implementations shell out to
//! ffmpeg and ImageMagick found on PATH; tests use the mock impls. Both
//! reuse existing outputs instead of re-producing them, which keeps
//! re-runs from duplicating frames or converted files even before the
//! stage-level skip logic gets involved.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::error::WorkflowError;

/// Extract still frames from a video into a directory.
pub trait FrameExtractor: Send + Sync {
    fn extract_frames(&self, video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, WorkflowError>;
}

/// Convert an image the providers reject (HEIC, TIFF) into a JPEG.
pub trait FormatConverter: Send + Sync {
    fn convert(&self, src: &Path, out_dir: &Path) -> Result<PathBuf, WorkflowError>;
}

// ═══════════════════════════════════════════
// ffmpeg
// ═══════════════════════════════════════════

/// Frame extraction via the ffmpeg binary.
pub struct FfmpegExtractor {
    binary: PathBuf,
    /// Seconds between sampled frames.
    pub interval_secs: u32,
    /// Hard cap per video; long recordings otherwise flood the workspace.
    pub max_frames: u32,
}

impl FfmpegExtractor {
    pub fn locate() -> Result<Self, WorkflowError> {
        let binary = which::which("ffmpeg")
            .map_err(|_| WorkflowError::ToolMissing("ffmpeg".to_string()))?;
        Ok(Self {
            binary,
            interval_secs: 10,
            max_frames: 12,
        })
    }
}

/// Output naming shared by the real and mock extractors, so resumed runs
/// find prior frames regardless of which produced them.
fn frame_pattern(video: &Path) -> String {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    format!("{stem}_frame_")
}

fn existing_frames(video: &Path, out_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let prefix = frame_pattern(video);
    let mut frames: Vec<PathBuf> = std::fs::read_dir(out_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    Ok(frames)
}

impl FrameExtractor for FfmpegExtractor {
    fn extract_frames(&self, video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
        std::fs::create_dir_all(out_dir)?;

        let prior = existing_frames(video, out_dir)?;
        if !prior.is_empty() {
            tracing::info!(
                video = %video.display(),
                frames = prior.len(),
                "Reusing previously extracted frames"
            );
            return Ok(prior);
        }

        let pattern = out_dir.join(format!("{}%03d.jpg", frame_pattern(video)));
        let output = Command::new(&self.binary)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(video)
            .arg("-vf")
            .arg(format!("fps=1/{}", self.interval_secs.max(1)))
            .arg("-frames:v")
            .arg(self.max_frames.to_string())
            .arg(&pattern)
            .output()
            .map_err(|e| WorkflowError::ToolFailed {
                tool: "ffmpeg".to_string(),
                path: video.display().to_string(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(WorkflowError::ToolFailed {
                tool: "ffmpeg".to_string(),
                path: video.display().to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let frames = existing_frames(video, out_dir)?;
        tracing::info!(
            video = %video.display(),
            frames = frames.len(),
            "Frames extracted"
        );
        Ok(frames)
    }
}

// ═══════════════════════════════════════════
// ImageMagick
// ═══════════════════════════════════════════

/// HEIC/TIFF → JPEG via ImageMagick (`magick`, or the legacy `convert`).
pub struct MagickConverter {
    binary: PathBuf,
}

impl MagickConverter {
    pub fn locate() -> Result<Self, WorkflowError> {
        let binary = which::which("magick")
            .or_else(|_| which::which("convert"))
            .map_err(|_| WorkflowError::ToolMissing("magick/convert".to_string()))?;
        Ok(Self { binary })
    }
}

fn converted_target(src: &Path, out_dir: &Path) -> PathBuf {
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    out_dir.join(format!("{stem}.jpg"))
}

impl FormatConverter for MagickConverter {
    fn convert(&self, src: &Path, out_dir: &Path) -> Result<PathBuf, WorkflowError> {
        std::fs::create_dir_all(out_dir)?;

        let target = converted_target(src, out_dir);
        if target.exists() {
            tracing::debug!(src = %src.display(), "Reusing previously converted file");
            return Ok(target);
        }

        let output = Command::new(&self.binary)
            .arg(src)
            .arg(&target)
            .output()
            .map_err(|e| WorkflowError::ToolFailed {
                tool: "magick".to_string(),
                path: src.display().to_string(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(WorkflowError::ToolFailed {
                tool: "magick".to_string(),
                path: src.display().to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(target)
    }
}

// ═══════════════════════════════════════════
// Lazy lookups
// ═══════════════════════════════════════════

/// Locates ffmpeg on first use, so runs that never reach the extract
/// stage (no videos, or the stage was not requested) do not require it.
pub struct LazyFfmpegExtractor;

impl FrameExtractor for LazyFfmpegExtractor {
    fn extract_frames(&self, video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
        FfmpegExtractor::locate()?.extract_frames(video, out_dir)
    }
}

/// Same deferral for ImageMagick.
pub struct LazyMagickConverter;

impl FormatConverter for LazyMagickConverter {
    fn convert(&self, src: &Path, out_dir: &Path) -> Result<PathBuf, WorkflowError> {
        MagickConverter::locate()?.convert(src, out_dir)
    }
}

// ═══════════════════════════════════════════
// Mocks (testing)
// ═══════════════════════════════════════════

/// Writes `frames_per_video` stub JPEGs per video.
pub struct MockFrameExtractor {
    pub frames_per_video: usize,
    pub fail: bool,
}

impl MockFrameExtractor {
    pub fn new(frames_per_video: usize) -> Self {
        Self {
            frames_per_video,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            frames_per_video: 0,
            fail: true,
        }
    }
}

impl FrameExtractor for MockFrameExtractor {
    fn extract_frames(&self, video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
        if self.fail {
            return Err(WorkflowError::ToolFailed {
                tool: "ffmpeg".to_string(),
                path: video.display().to_string(),
                detail: "simulated extractor crash".to_string(),
            });
        }
        std::fs::create_dir_all(out_dir)?;

        let prior = existing_frames(video, out_dir)?;
        if !prior.is_empty() {
            return Ok(prior);
        }

        let mut frames = Vec::new();
        for i in 1..=self.frames_per_video {
            let frame = out_dir.join(format!("{}{i:03}.jpg", frame_pattern(video)));
            std::fs::write(&frame, b"stub-frame")?;
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Copies the source bytes to a `.jpg` target.
pub struct MockConverter {
    pub fail: bool,
}

impl MockConverter {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatConverter for MockConverter {
    fn convert(&self, src: &Path, out_dir: &Path) -> Result<PathBuf, WorkflowError> {
        if self.fail {
            return Err(WorkflowError::ToolFailed {
                tool: "magick".to_string(),
                path: src.display().to_string(),
                detail: "simulated converter crash".to_string(),
            });
        }
        std::fs::create_dir_all(out_dir)?;
        let target = converted_target(src, out_dir);
        if !target.exists() {
            std::fs::copy(src, &target)?;
        }
        Ok(target)
    }
}
