use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use inkframe_contracts::events::EventWriter;
use inkframe_contracts::models::ModelSelector;
use inkframe_contracts::runs::new_run_id;
use inkframe_contracts::runs::summary::{now_utc_iso, write_summary, RunOutcomeKind, RunSummary};
use inkframe_engine::{build_client, ComicConfig, ComicPipeline, RunOutcome, StoryPrompt, Transport};
use serde_json::{json, Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod server;

const DEFAULT_LOG_FILTER: &str = "inkframe=info,inkframe_engine=info,inkframe_contracts=info";

#[derive(Debug, Parser)]
#[command(name = "inkframe", version, about = "Turn a story prompt into a comic page")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline once and write the comic PNG.
    Generate(GenerateArgs),
    /// Serve runs over WebSocket, one per connection.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Offline transport: no network, solid-color images.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    /// Page count used when planning fails.
    #[arg(long)]
    default_page_count: Option<u32>,
    #[arg(long)]
    spacing_ms: Option<u64>,
    /// Send the character as a reference image with every page request.
    #[arg(long)]
    reference_character: bool,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,
    #[command(flatten)]
    config: ConfigArgs,
}

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("inkframe error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Serve(args) => {
            let config = load_config(&args.config)?;
            server::serve(&args.bind, config)?;
            Ok(0)
        }
    }
}

/// Logs go to stderr; `INKFRAME_LOG_FORMAT=json` switches to one JSON object
/// per line.
fn init_tracing() {
    let json = std::env::var("INKFRAME_LOG_FORMAT")
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr)))
        .init();
}

fn load_config(args: &ConfigArgs) -> Result<ComicConfig> {
    let mut config = ComicConfig::from_env();
    if args.dryrun {
        config.transport = Transport::Dryrun;
    }
    if let Some(model) = &args.text_model {
        config.text_model = model.clone();
    }
    if let Some(model) = &args.image_model {
        config.image_model = model.clone();
    }
    if let Some(count) = args.default_page_count {
        config.set_default_page_count(count);
    }
    if let Some(ms) = args.spacing_ms {
        config.request_spacing = Duration::from_millis(ms);
    }
    if args.reference_character {
        config.reference_character = true;
    }
    let reasons = config
        .resolve_models(&ModelSelector::new(None))
        .map_err(anyhow::Error::msg)?;
    for reason in reasons {
        tracing::warn!(reason = %reason, "model fallback");
    }
    Ok(config)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let config = load_config(&args.config)?;
    let story = StoryPrompt::new(&args.prompt)?;
    let out_dir = output_dir(&args.out);
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| out_dir.join("events.jsonl"));
    let summary_path = out_dir.join("summary.json");

    let client = build_client(&config)?;
    let run_id = new_run_id();
    let mut events = EventWriter::new(&events_path, &run_id);
    let mut started = Map::new();
    started.insert("story_prompt".to_string(), Value::String(story.to_string()));
    started.insert(
        "transport".to_string(),
        Value::String(config.transport.provider_name().to_string()),
    );
    started.insert("text_model".to_string(), Value::String(config.text_model.clone()));
    started.insert("image_model".to_string(), Value::String(config.image_model.clone()));
    events.emit("run_started", started)?;

    let started_at = now_utc_iso();
    let outcome = ComicPipeline::new(&*client, &config).run(&story, &mut events);
    let finished_at = now_utc_iso();

    let summary = match &outcome {
        RunOutcome::Completed(layout) => {
            write_png(&args.out, &layout.png)?;
            tracing::info!(path = %args.out.display(), grid = %layout.grid, "comic written");
            RunSummary {
                run_id: run_id.clone(),
                started_at,
                finished_at,
                outcome: RunOutcomeKind::Completed,
                story_prompt: story.to_string(),
                planned_pages: layout.pages.len() as u64,
                rendered_pages: layout.rendered_pages as u64,
                grid: Some(layout.grid.to_string()),
                error: None,
            }
        }
        RunOutcome::Failed(message) => RunSummary {
            run_id: run_id.clone(),
            started_at,
            finished_at,
            outcome: RunOutcomeKind::Failed,
            story_prompt: story.to_string(),
            planned_pages: 0,
            rendered_pages: 0,
            grid: None,
            error: Some(message.clone()),
        },
    };

    let mut finished = Map::new();
    finished.insert("outcome".to_string(), json!(summary.outcome));
    finished.insert(
        "summary_path".to_string(),
        Value::String(summary_path.to_string_lossy().to_string()),
    );
    events.emit("run_finished", finished)?;
    write_summary(&summary_path, &summary, None)?;

    Ok(if outcome.is_completed() { 0 } else { 1 })
}

fn output_dir(out: &Path) -> PathBuf {
    out.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn write_png(path: &Path, png: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, png).with_context(|| format!("failed to write {}", path.display()))
}
