use anyhow::{Context, Result};
use clap::Parser;
use mirror_core::BridgeConfig;
use mirror_io::TransformerService;
use std::{path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(about = "Mirrors HTTP traffic records from one Kafka topic to another")]
struct Args {
    /// Bridge YAML; the environment is used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// `RUST_LOG` wins; otherwise the configured level applies to every target.
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level.to_ascii_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARN" | "WARNING" => "warn",
            "ERROR" => "error",
            _ => "info",
        };
        EnvFilter::new(level)
    })
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => BridgeConfig::from_yaml_file(path),
        None => BridgeConfig::from_env(),
    }
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let service = TransformerService::connect(&config)
        .await
        .context("failed to create transformer service")?;
    service
        .start()
        .await
        .context("failed to start transformer service")?;
    info!("transformer service started, waiting for shutdown signal");

    shutdown_signal().await?;
    info!("shutdown signal received");
    service.stop(SHUTDOWN_DEADLINE).await;
    Ok(())
}
