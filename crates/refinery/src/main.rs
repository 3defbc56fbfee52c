use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use refinery::{
    ApiCredential, ModelId, PipelineConfig, RefinementPipeline, RefinementRequest, RunContext,
};

/// Iteratively refine an AI-generated answer and print the result as JSON.
#[derive(Debug, Parser)]
#[command(name = "refinery", version)]
struct Args {
    /// The original user prompt the answer was generated for.
    #[arg(long)]
    prompt: String,

    /// The existing AI-generated answer to improve.
    #[arg(long)]
    initial_output: String,

    /// Model executing every judge/critique/refine call.
    #[arg(long, default_value = "gemini-2.5-flash")]
    model: ModelId,

    /// Number of judge→critique→refine passes.
    #[arg(long, default_value_t = 3)]
    max_iterations: u32,

    /// Stop early once a pass scores at least this overall (0–10).
    #[arg(long)]
    threshold: Option<f64>,

    /// Optional TOML config file; REFINERY_* env vars override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if args.threshold.is_some() {
        config.quality_threshold = args.threshold;
    }
    if let Err(problem) = config.validate() {
        bail!("invalid configuration: {problem}");
    }

    let credential = match std::env::var("REFINERY_API_KEY") {
        Ok(key) if !key.trim().is_empty() => ApiCredential::new(key),
        _ => bail!("REFINERY_API_KEY must be set to the provider API key"),
    };

    let request = RefinementRequest {
        original_prompt: args.prompt,
        initial_output: args.initial_output,
        model_id: args.model,
        credential,
        max_iterations: args.max_iterations,
    };

    let pipeline = RefinementPipeline::with_http(&config);
    let ctx = RunContext::new();
    info!(run_id = %ctx.run_id, model = %request.model_id, "starting refinement");

    // Ctrl-C stops the run between iterations; the best record so far is
    // still returned.
    let cancel = ctx.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current iteration");
            cancel.cancel();
        }
    });

    let result = pipeline
        .run_refinement(&request, &ctx)
        .await
        .map_err(|err| anyhow::anyhow!("{} ({})", err, err.kind()))?;

    let rendered =
        serde_json::to_string_pretty(&result).context("serializing refinement result")?;
    println!("{rendered}");

    Ok(())
}
