use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rfrecreate::capture::cdp::CdpScreenshotter;
use rfrecreate::capture::{CaptureSource, Screenshot};
use rfrecreate::collaborators::Judge;
use rfrecreate::compare::ComparisonEngine;
use rfrecreate::llm::{ChatBackend, LlmConfig};
use rfrecreate::{Collaborators, RecreationController, SessionConfig, StopReason, Viewport};

#[derive(Parser)]
#[command(name = "rfrecreate", version, about = "Recreate web pages from screenshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Iteratively recreate the page at URL until it matches visually
    Recreate {
        url: String,
        /// JSON session config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        pixel_threshold: Option<f64>,
        #[arg(long)]
        judge_threshold: Option<f64>,
        /// Gate on the pixel diff alone
        #[arg(long)]
        no_judge: bool,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        settle_ms: Option<u64>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Capture only the element matching this CSS selector
        #[arg(long)]
        selector: Option<String>,
    },
    /// Pixel-compare two PNG screenshots and print the result as JSON
    Compare {
        target: PathBuf,
        candidate: PathBuf,
        #[arg(long, default_value = "diffs")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 92.0)]
        threshold: f64,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rfrecreate: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Recreate {
            url,
            config,
            max_iterations,
            pixel_threshold,
            judge_threshold,
            no_judge,
            width,
            height,
            settle_ms,
            out_dir,
            selector,
        } => {
            let mut cfg = match config {
                Some(path) => SessionConfig::from_json_file(&path)?,
                None => SessionConfig::default(),
            };
            if let Some(v) = max_iterations {
                cfg.max_iterations = v;
            }
            if let Some(v) = pixel_threshold {
                cfg.pixel_threshold = v;
            }
            if let Some(v) = judge_threshold {
                cfg.judge_threshold = v;
            }
            cfg.viewport = Viewport {
                width: width.unwrap_or(cfg.viewport.width),
                height: height.unwrap_or(cfg.viewport.height),
            };
            if let Some(v) = settle_ms {
                cfg.settle_ms = v;
            }
            if let Some(v) = out_dir {
                cfg.output_dir = v;
            }

            let llm = LlmConfig {
                judge_threshold: cfg.judge_threshold,
                ..LlmConfig::from_env()?
            };
            let backend = Arc::new(ChatBackend::new(llm)?);
            let mut screenshotter = CdpScreenshotter::new();
            if let Some(sel) = selector {
                screenshotter = screenshotter.with_selector(sel);
            }
            let collaborators = Collaborators {
                screenshotter: Arc::new(screenshotter),
                generator: backend.clone(),
                judge: if no_judge { None } else { Some(backend.clone() as Arc<dyn Judge>) },
                critiquer: backend,
            };

            let controller = RecreationController::new(cfg, collaborators)?;
            let report = controller.run(CaptureSource::Url(url)).await;

            for it in &report.iterations {
                println!(
                    "iteration {:>2}: pixel {:>6.2}{}  {}",
                    it.number,
                    it.comparison.score,
                    it.judge
                        .as_ref()
                        .map(|j| format!("  judge {:>5.1}", j.score))
                        .unwrap_or_default(),
                    if it.passed { "pass" } else { "fail" }
                );
            }
            println!("stop reason: {}", report.stop_reason);
            if let Some(err) = &report.error {
                println!("error: {}", err);
            }
            if let Some(path) = &report.final_output {
                println!("final markup: {}", path.display());
            }
            if let Some(path) = &report.summary_path {
                println!("summary: {}", path.display());
            }

            Ok(match report.stop_reason {
                StopReason::Success => 0,
                StopReason::Exhausted => 1,
                StopReason::Error => 2,
            })
        }
        Command::Compare {
            target,
            candidate,
            out_dir,
            threshold,
        } => {
            let target = Screenshot::open(&target).context("loading target")?;
            let candidate = Screenshot::open(&candidate).context("loading candidate")?;
            let engine = ComparisonEngine::new(out_dir, threshold);
            let result = engine.compare(&target, &candidate, "cli")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.pass { 0 } else { 1 })
        }
    }
}
