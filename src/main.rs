use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use farmcast::cli::{Cli, Commands};
use farmcast::config::PipelineConfig;
use farmcast::pipeline::Pipeline;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("🌾 farmcast v{} starting", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let pipeline = Pipeline::new(config);

    let outcome = match cli.command() {
        Commands::Run => pipeline.run().map(|s| info!("Forecast {} rows", s.len())),
        Commands::Train => pipeline.train().map(|a| info!("Trained {} models", a.ensemble.len())),
        Commands::Predict => pipeline.predict().map(|s| info!("Forecast {} rows", s.len())),
    };
    if let Err(e) = outcome {
        error!("❌ {}", e);
        return Err(e.into());
    }
    Ok(())
}
