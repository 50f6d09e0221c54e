use anyhow::Context;
use clap::Parser;
use risefall::config::Config;
use risefall::engine::Engine;
use tokio::signal;
use tracing::info;

#[derive(Parser)]
#[command(name = "risefall", about = "Automated rise/fall contract trading engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config =
        Config::load(&cli.config).with_context(|| format!("failed to load {}", cli.config))?;

    config.init_logging();
    info!("risefall starting");

    let engine = Engine::new(config);
    engine.start().await.context("engine startup failed")?;

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.shutdown().await;

    info!("risefall stopped");
    Ok(())
}
