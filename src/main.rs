//! mediascribe CLI — a thin front end over the pipeline engine.
//!
//! All real behavior lives in the library; this binary parses arguments,
//! builds the provider from environment settings, renders progress events,
//! and maps run outcomes to exit codes. Per-item describe failures are
//! reported in the summary but do not fail the process — only a stage
//! failure does.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use mediascribe::batch::{
    BatchConfig, BatchEvent, BatchRunner, CancellationToken, DescriptionTask, TaskState,
};
use mediascribe::config;
use mediascribe::prompt::{PromptSpec, PromptStyle};
use mediascribe::provider::{ProviderKind, ProviderRegistry, VisionProvider};
use mediascribe::workflow::media::{LazyFfmpegExtractor, LazyMagickConverter};
use mediascribe::workflow::{PipelineOrchestrator, RunRequest, StepSet, WorkflowRun};
use mediascribe::workspace::Workspace;

#[derive(Parser)]
#[command(name = "mediascribe", version, about = "Batch media description with AI vision providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging (equivalent to RUST_LOG=mediascribe=debug)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the media pipeline over an input directory
    Workflow {
        /// Directory of images and videos to process
        root: PathBuf,
        #[arg(long, default_value = "ollama")]
        provider: String,
        /// Model id; defaults to the provider's configured model
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value = "detailed")]
        prompt_style: String,
        /// Custom prompt text, overriding the style template
        #[arg(long)]
        prompt: Option<String>,
        /// Comma-separated subset of extract,convert,describe,report
        #[arg(long, default_value = "extract,convert,describe,report")]
        steps: String,
        /// Output root (workspace, frames, converted files, report)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Delay between provider calls, in milliseconds
        #[arg(long, default_value_t = 1500)]
        delay_ms: u64,
    },

    /// Describe a single image and print the result
    Describe {
        image: PathBuf,
        #[arg(long, default_value = "ollama")]
        provider: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value = "detailed")]
        prompt_style: String,
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Probe configured providers and show availability
    Providers,

    /// List models offered by one provider
    Models {
        #[arg(default_value = "ollama")]
        provider: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        format!("{}=debug", config::APP_NAME)
    } else {
        config::default_log_filter()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Command::Workflow {
            root,
            provider,
            model,
            prompt_style,
            prompt,
            steps,
            output,
            delay_ms,
        } => {
            let kind = parse_provider(&provider)?;
            let steps = StepSet::parse(&steps)
                .map_err(|e| mediascribe::workflow::WorkflowError::InvalidSteps(steps.clone(), e))?;
            let prompt = parse_prompt(&prompt_style, prompt.as_deref())?;
            let settings = config::provider_settings(kind);
            let model = model.unwrap_or_else(|| settings.default_model.clone());
            let client = config::build_provider(&settings)?;

            let output_root = output.unwrap_or_else(|| {
                config::default_output_root().join(root.file_name().unwrap_or_default())
            });

            let orchestrator = PipelineOrchestrator::new(
                client,
                Box::new(LazyFfmpegExtractor),
                Box::new(LazyMagickConverter),
                BatchConfig {
                    inter_item_delay: std::time::Duration::from_millis(delay_ms),
                    ..BatchConfig::default()
                },
            );

            let request = RunRequest {
                root,
                output_root,
                model,
                prompt,
                steps,
            };

            let progress = ProgressRenderer::new();
            let mut on_event = {
                let progress = &progress;
                move |event: BatchEvent| progress.render(&event)
            };
            let run = orchestrator.run(&request, &mut on_event, &CancellationToken::new())?;
            progress.finish();

            print_run(&run);
            if run.succeeded() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }

        Command::Describe {
            image,
            provider,
            model,
            prompt_style,
            prompt,
        } => {
            let kind = parse_provider(&provider)?;
            let prompt = parse_prompt(&prompt_style, prompt.as_deref())?;
            let settings = config::provider_settings(kind);
            let model = model.unwrap_or_else(|| settings.default_model.clone());
            let client = config::build_provider(&settings)?;

            // One-task batch through the same machinery as every other
            // front end; the throwaway workspace captures the record.
            let mut tasks = vec![DescriptionTask::new(image.clone(), kind, &model, prompt)];
            let mut workspace = Workspace::new();
            let runner = BatchRunner::new(
                client,
                BatchConfig {
                    inter_item_delay: std::time::Duration::ZERO,
                    ..BatchConfig::default()
                },
            );
            runner.run(
                &mut tasks,
                &mut workspace,
                &mut |_| {},
                &CancellationToken::new(),
            );

            match tasks[0].state() {
                TaskState::Succeeded => {
                    let item = workspace.get(&image).expect("described item present");
                    let record = item.descriptions.last().expect("record appended");
                    println!("{}", record.text);
                    Ok(ExitCode::SUCCESS)
                }
                _ => {
                    eprintln!(
                        "error: {} ({})",
                        tasks[0].last_error.as_deref().unwrap_or("describe failed"),
                        tasks[0].error_kind.as_deref().unwrap_or("unknown")
                    );
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Providers => {
            let mut registry = ProviderRegistry::new();
            let mut unconfigured: Vec<(ProviderKind, String)> = Vec::new();
            for kind in ProviderKind::all() {
                let settings = config::provider_settings(*kind);
                match config::build_provider(&settings) {
                    Ok(client) => registry.register(client),
                    Err(e) => unconfigured.push((*kind, e.to_string())),
                }
            }

            println!("{:<14} {:<13} {}", "PROVIDER", "AVAILABILITY", "MODELS");
            for descriptor in registry.descriptors() {
                println!(
                    "{:<14} {:<13} {}",
                    descriptor.kind.as_str(),
                    descriptor.availability.to_string(),
                    descriptor.models.len()
                );
            }
            for (kind, reason) in unconfigured {
                println!("{:<14} {:<13} {}", kind.as_str(), "unconfigured", reason);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Models { provider } => {
            let kind = parse_provider(&provider)?;
            let settings = config::provider_settings(kind);
            let client: Arc<dyn VisionProvider> = config::build_provider(&settings)?;
            let models = client.list_models()?;
            if models.is_empty() {
                println!("(no models reported)");
            }
            for model in models {
                println!("{model}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    ProviderKind::from_str(s).ok_or_else(|| {
        format!(
            "unknown provider '{s}' (expected one of: {})",
            ProviderKind::all()
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

fn parse_prompt(
    style: &str,
    custom: Option<&str>,
) -> Result<PromptSpec, mediascribe::workflow::WorkflowError> {
    let style = PromptStyle::from_str(style).ok_or_else(|| {
        mediascribe::workflow::WorkflowError::InvalidPromptStyle(style.to_string())
    })?;
    Ok(match custom {
        Some(text) => PromptSpec::custom(style, text),
        None => PromptSpec::style(style),
    })
}

// ═══════════════════════════════════════════
// Progress rendering
// ═══════════════════════════════════════════

/// Renders batch events as an indicatif bar on stderr.
struct ProgressRenderer {
    bar: ProgressBar,
}

impl ProgressRenderer {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template("{bar:36} {pos}/{len} {msg}")
                .expect("valid progress template"),
        );
        Self { bar }
    }

    fn render(&self, event: &BatchEvent) {
        match event {
            BatchEvent::Started { total } => {
                self.bar.set_length(*total as u64);
                self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            }
            BatchEvent::ItemStarted { name, .. } => {
                self.bar.set_message(name.clone());
            }
            BatchEvent::ItemFinished {
                name, state, error, ..
            } => {
                self.bar.inc(1);
                if *state == TaskState::Failed {
                    self.bar.println(format!(
                        "  failed: {name}: {}",
                        error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
            BatchEvent::Finished { .. } => {}
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn print_run(run: &WorkflowRun) {
    println!("run {} ({} / {})", run.id, run.provider, run.model);
    for record in &run.stages {
        match &record.detail {
            Some(detail) => println!("  {:<16} {:<22} {detail}", record.stage, record.status),
            None => println!("  {:<16} {}", record.stage, record.status),
        }
    }
    if let Some(summary) = &run.summary {
        println!(
            "described: {} succeeded, {} failed, {} skipped, {} cancelled ({} ms)",
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.cancelled,
            summary.duration_ms
        );
    }
    println!("workspace: {}", run.workspace_path.display());
}
