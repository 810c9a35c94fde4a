//! kiln-worker – entry point.
//!
//! Stand-in for the task-queue consumer: reads one generation request as
//! JSON (file or stdin), runs it through the engine, and writes the produced
//! artifacts to an output directory.
//!
//! Startup order:
//! 1. Parse the CLI and configuration from environment variables.
//! 2. Initialise structured tracing.
//! 3. Assemble the engine with the builtin model table.
//! 4. Execute the request and persist artifacts.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use kiln_core::pipeline::LoaderSet;
use kiln_core::provider::HttpProviderTransport;
use kiln_core::{ArtifactData, Config, Engine, GenerationRequest, MediaKind};

#[derive(Parser, Debug)]
#[command(name = "kiln-worker", about = "Run one generation request")]
struct Cli {
    /// Request JSON file; reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory to write artifacts into.
    #[arg(short, long, default_value = "out")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env();

    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: KILN_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "kiln-worker starting");

    let raw = match &cli.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let request: GenerationRequest = serde_json::from_str(&raw)?;
    info!(model = %request.model, family = %request.family, "request parsed");

    // Local pipeline loaders come from the inference build that embeds this
    // crate; the standalone worker serves the external model table.
    let transport = HttpProviderTransport::new(
        reqwest::Client::new(),
        cfg.provider_base_url.clone(),
        cfg.provider_api_key.clone(),
    );
    let engine = Engine::with_default_models(&cfg, LoaderSet::new(), Arc::new(transport))?;

    let outcome = engine.execute(request).await?;
    info!(
        model = %outcome.request.model,
        count = outcome.artifacts.len(),
        "generation complete"
    );

    std::fs::create_dir_all(&cli.output)?;
    for artifact in &outcome.artifacts {
        let ext = match artifact.kind {
            MediaKind::Image => "png",
            MediaKind::Video => "mp4",
        };
        match &artifact.data {
            ArtifactData::Bytes(bytes) => {
                let path = cli.output.join(format!("artifact-{}.{ext}", artifact.index));
                std::fs::write(&path, bytes)?;
                info!(path = %path.display(), "artifact written");
            }
            ArtifactData::Reference(url) => {
                // Leave retrieval to the persistence layer; record the URL.
                let path = cli.output.join(format!("artifact-{}.url", artifact.index));
                std::fs::write(&path, url)?;
                warn!(path = %path.display(), "artifact staged by reference");
            }
        }
    }

    engine.flush_pipelines();
    Ok(())
}
