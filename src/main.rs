use std::{io, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use rearch::Container;
use tokio::io::BufReader;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use quota_short::{
    cli::{CommandLoop, SystemUrlOpener},
    config::app_config_capsule,
    identity::owner_identity_service_capsule,
    link_service::link_service_capsule,
    sweeper::cleanup_sweeper_capsule,
};

/// Interactive URL shortener with per-link click quotas and expiry
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Dotenv file with SHORTENER_* settings; missing is fine
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    load_env_file(&args);
    let container = Container::new();

    let config = container.read(app_config_capsule);
    let (links, identities, sweeper) = container.read((
        link_service_capsule,
        owner_identity_service_capsule,
        cleanup_sweeper_capsule,
    ));

    let session = identities.get_or_create().await?;
    info!(owner = %session.owner(), "Session started");

    let sweep_task = Arc::clone(&sweeper)
        .spawn_periodic(Duration::from_secs(config.cleanup_interval_seconds));

    let mut command_loop = CommandLoop::new(
        &config,
        links,
        identities,
        sweeper,
        Arc::new(SystemUrlOpener),
        session,
        io::stdout(),
    );
    let result = command_loop
        .run(BufReader::new(tokio::io::stdin()))
        .await;

    sweep_task.abort();
    result
}

#[instrument]
fn load_env_file(args: &Args) {
    match dotenvy::from_path(&args.env_file) {
        Ok(()) => info!("Loaded environment file"),
        Err(err) if err.not_found() => debug!("No environment file"),
        Err(err) => warn!(?err, "Failed to load environment file; continuing without it"),
    }
}
