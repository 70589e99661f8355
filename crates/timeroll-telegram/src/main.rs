//! # timeroll-bot
//!
//! Telegram front end for the login-time registry.

mod api;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use timeroll::{BotConfig, EngineBuilder};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Edit device login times over Telegram.
#[derive(Parser, Debug)]
#[command(name = "timeroll-bot")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "timeroll.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = BotConfig::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.check_config {
        println!(
            "config ok: {} users, registry {}, backups in {}, publish every {}s via {}",
            config.users.len(),
            config.registry_path.display(),
            config.backup_dir.display(),
            config.publish.interval_secs,
            config.publish.program,
        );
        return Ok(());
    }

    let token = std::env::var(&config.telegram.token_env)
        .with_context(|| format!("environment variable {} is not set", config.telegram.token_env))?;
    let api = api::BotApi::new(&token, Duration::from_secs(config.telegram.poll_timeout_secs))?;

    info!(
        users = config.users.len(),
        registry = %config.registry_path.display(),
        "starting timeroll-bot"
    );

    let engine = Arc::new(EngineBuilder::new(config).build());
    let handle = engine.clone().start();

    let (stop, stopped) = watch::channel(false);
    let poller = tokio::spawn(transport::run(api, engine, stopped));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    let _ = stop.send(true);

    match poller.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %format!("{e:#}"), "poller failed"),
        Err(e) => error!(error = %e, "poller task panicked"),
    }
    handle.shutdown().await;
    Ok(())
}
