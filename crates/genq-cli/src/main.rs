mod rpc;
mod server;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use genq_contracts::config::Config;
use genq_contracts::queue::QueueIdentifier;
use genq_contracts::request::{QualityTier, SizeClass};
use genq_contracts::tools::{
    AddToBatchArgs, GenerateImageArgs, ReferenceList, RemoveFromBatchArgs, ToolCall,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::server::ImageServer;

#[derive(Debug, Parser)]
#[command(name = "genq", version, about = "Gemini image generation with a durable batch queue")]
struct Cli {
    /// Config file. Defaults to $GENQ_CONFIG, then ./config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve tool calls as line-delimited JSON-RPC on stdin/stdout.
    Serve,
    /// Generate one image now.
    Generate(GenerateArgs),
    /// Inspect or edit the batch queue.
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Generate every queued image.
    Batch(BatchArgs),
}

#[derive(Debug, Args)]
struct RequestArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    aspect_ratio: Option<String>,
    #[arg(long, default_value = "large")]
    size: String,
    #[arg(long, default_value = "pro")]
    quality: String,
    #[arg(long = "reference")]
    references: Vec<String>,
}

impl RequestArgs {
    fn references(&self) -> Option<ReferenceList> {
        (!self.references.is_empty()).then(|| ReferenceList::Many(self.references.clone()))
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    request: RequestArgs,
    /// Directory for the generated image. Defaults to `images_dir`.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    Add {
        #[command(flatten)]
        request: RequestArgs,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove by current index or by filename.
    Remove { identifier: String },
    View,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[arg(long)]
    queue: Option<PathBuf>,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("genq error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    let config_path = cli.config.unwrap_or_else(Config::default_location);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("cannot start without configuration ({})", config_path.display()))?
        .with_env_overrides();
    tracing::debug!(config = %config_path.display(), images_dir = %config.images_dir.display(), "configuration loaded");

    match cli.command {
        Command::Serve => {
            let server = ImageServer::from_config(config)?;
            let stdin = io::stdin();
            server.serve(stdin.lock(), io::stdout().lock())?;
            Ok(0)
        }
        Command::Generate(args) => {
            if let Some(out) = args.out {
                config.images_dir = out;
            }
            let request = args.request;
            let call = ToolCall::GenerateImage(GenerateImageArgs {
                prompt: request.prompt.clone(),
                aspect_ratio: request.aspect_ratio.clone(),
                image_size: SizeClass::parse_lenient(&request.size),
                quality: QualityTier::parse_lenient(&request.quality),
                reference_image: None,
                reference_images: request.references(),
            });
            run_tool(config, call)
        }
        Command::Queue(QueueCommand::Add {
            request,
            filename,
            description,
        }) => {
            let call = ToolCall::AddToBatch(AddToBatchArgs {
                prompt: request.prompt.clone(),
                filename,
                aspect_ratio: request.aspect_ratio.clone(),
                image_size: SizeClass::parse_lenient(&request.size),
                quality: QualityTier::parse_lenient(&request.quality),
                description,
                reference_image: None,
                reference_images: request.references(),
            });
            run_tool(config, call)
        }
        Command::Queue(QueueCommand::Remove { identifier }) => {
            let call = ToolCall::RemoveFromBatch(RemoveFromBatchArgs {
                identifier: QueueIdentifier::Auto(identifier),
            });
            run_tool(config, call)
        }
        Command::Queue(QueueCommand::View) => run_tool(config, ToolCall::ViewBatchQueue),
        Command::Batch(args) => {
            if let Some(queue) = args.queue {
                config.queue_file = queue;
            }
            if let Some(out) = args.out {
                config.batch_dir = out;
            }
            run_tool(config, ToolCall::RunBatch)
        }
    }
}

/// Runs one tool outside the server loop and prints its result. A result
/// with `"success": false` exits with status 2.
fn run_tool(config: Config, call: ToolCall) -> Result<i32> {
    let server = ImageServer::from_config(config)?;
    let result = server.call_tool(call)?;
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &result)?;
    writeln!(stdout)?;
    let failed = result.get("success").and_then(Value::as_bool) == Some(false);
    Ok(if failed { 2 } else { 0 })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
