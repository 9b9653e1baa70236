//! HTML report generation — the final pipeline stage.
//!
//! A single self-contained page summarizing the run: outcome counts, then
//! every describable item with its description history. Rendering is pure
//! workspace data; the template never reaches back into the pipeline.

use std::path::{Path, PathBuf};

use askama::Template;

use super::error::WorkflowError;
use crate::batch::BatchSummary;
use crate::workspace::Workspace;

pub const REPORT_FILE_NAME: &str = "report.html";

#[derive(Template)]
#[template(
    ext = "html",
    source = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>mediascribe report</title>
<style>
body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 56rem; color: #222; }
h1 { font-size: 1.4rem; } h2 { font-size: 1.05rem; margin-top: 1.6rem; }
.summary td { padding: 0.15rem 0.9rem 0.15rem 0; }
.item { border-top: 1px solid #ddd; padding: 0.7rem 0; }
.path { font-family: monospace; font-size: 0.9rem; }
.meta { color: #777; font-size: 0.8rem; }
.desc { margin: 0.4rem 0 0.2rem 0; white-space: pre-wrap; }
.empty { color: #a33; }
</style>
</head>
<body>
<h1>mediascribe report</h1>
<p class="meta">Generated {{ generated_at }} &middot; provider {{ provider }} &middot; model {{ model }}</p>
<table class="summary">
<tr><td>Items</td><td>{{ item_count }}</td></tr>
<tr><td>Described</td><td>{{ described_count }}</td></tr>
<tr><td>Succeeded</td><td>{{ succeeded }}</td></tr>
<tr><td>Failed</td><td>{{ failed }}</td></tr>
<tr><td>Skipped</td><td>{{ skipped }}</td></tr>
<tr><td>Cancelled</td><td>{{ cancelled }}</td></tr>
</table>
{% for item in items %}
<div class="item">
<div class="path">{{ item.path }} <span class="meta">({{ item.kind }})</span></div>
{% if item.descriptions.is_empty() %}
<p class="empty">No description.</p>
{% else %}
{% for desc in item.descriptions %}
<p class="desc">{{ desc.text }}</p>
<p class="meta">{{ desc.provider }} / {{ desc.model }} / {{ desc.style }} &middot; {{ desc.created }}</p>
{% endfor %}
{% endif %}
</div>
{% endfor %}
</body>
</html>
"#
)]
struct ReportTemplate {
    generated_at: String,
    provider: String,
    model: String,
    item_count: usize,
    described_count: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    cancelled: usize,
    items: Vec<ReportItem>,
}

struct ReportItem {
    path: String,
    kind: String,
    descriptions: Vec<ReportDescription>,
}

struct ReportDescription {
    text: String,
    provider: String,
    model: String,
    style: String,
    created: String,
}

/// Render `report.html` into the output root.
pub fn generate_report(
    workspace: &Workspace,
    provider: &str,
    model: &str,
    summary: Option<&BatchSummary>,
    output_root: &Path,
) -> Result<PathBuf, WorkflowError> {
    let items: Vec<ReportItem> = workspace
        .items()
        .filter(|i| i.item_type.is_describable())
        .map(|item| ReportItem {
            path: item.file_path.clone(),
            kind: item.item_type.as_str().to_string(),
            descriptions: item
                .descriptions
                .iter()
                .map(|d| ReportDescription {
                    text: d.text.clone(),
                    provider: d.provider.as_str().to_string(),
                    model: d.model.clone(),
                    style: d.prompt_style.clone(),
                    created: d.created.clone(),
                })
                .collect(),
        })
        .collect();

    let described_count = items.iter().filter(|i| !i.descriptions.is_empty()).count();
    let template = ReportTemplate {
        generated_at: chrono::Utc::now().to_rfc3339(),
        provider: provider.to_string(),
        model: model.to_string(),
        item_count: items.len(),
        described_count,
        succeeded: summary.map(|s| s.succeeded).unwrap_or(0),
        failed: summary.map(|s| s.failed).unwrap_or(0),
        skipped: summary.map(|s| s.skipped).unwrap_or(0),
        cancelled: summary.map(|s| s.cancelled).unwrap_or(0),
        items,
    };

    let html = template
        .render()
        .map_err(|e| WorkflowError::Report(e.to_string()))?;

    std::fs::create_dir_all(output_root)?;
    let path = output_root.join(REPORT_FILE_NAME);
    std::fs::write(&path, html)?;
    tracing::info!(report = %path.display(), "Report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptSpec, PromptStyle};
    use crate::provider::{Description, ProviderKind};
    use crate::workspace::{DescriptionRecord, Item, ItemType};

    fn workspace_with_data() -> Workspace {
        let mut ws = Workspace::new();
        ws.add_item(Item::new("photos/a.jpg", ItemType::Image)).unwrap();
        ws.add_item(Item::new("photos/clip.mp4", ItemType::Video)).unwrap();
        ws.add_item(Item::new("photos/b.jpg", ItemType::Image)).unwrap();
        ws.add_description(
            Path::new("photos/a.jpg"),
            DescriptionRecord::from_description(
                Description {
                    text: "An old tram crossing a bridge <at> dusk.".into(),
                    usage: None,
                },
                ProviderKind::Ollama,
                "llava:latest",
                &PromptSpec::style(PromptStyle::Detailed),
            ),
        )
        .unwrap();
        ws
    }

    #[test]
    fn report_written_with_items_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace_with_data();
        let summary = BatchSummary {
            succeeded: 1,
            failed: 0,
            skipped: 1,
            cancelled: 0,
            duration_ms: 1234,
        };

        let path = generate_report(&ws, "ollama", "llava:latest", Some(&summary), dir.path())
            .unwrap();
        let html = std::fs::read_to_string(&path).unwrap();

        assert!(html.contains("photos/a.jpg"));
        assert!(html.contains("photos/b.jpg"));
        assert!(!html.contains("clip.mp4"), "Videos are not describable items");
        assert!(html.contains("An old tram"));
        assert!(html.contains("No description."));
    }

    #[test]
    fn report_escapes_html_in_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace_with_data();
        let path = generate_report(&ws, "ollama", "llava:latest", None, dir.path()).unwrap();
        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("&lt;at&gt;"), "Model output must be escaped");
    }

    #[test]
    fn report_without_summary_defaults_counts() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new();
        let path = generate_report(&ws, "claude", "claude-3-5-haiku-latest", None, dir.path())
            .unwrap();
        assert!(path.ends_with(REPORT_FILE_NAME));
    }
}
