//! Tribune relay entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tribune_relay::api::{self, AppState};
use tribune_relay::clients::tee::HttpTeeClient;
use tribune_relay::clients::verifier::HttpVerifierClient;
use tribune_relay::config::RelayConfig;
use tribune_relay::storage::Store;
use tribune_relay::workers;

#[derive(Parser)]
#[command(name = "tribune-relay")]
#[command(version = "0.1.0")]
#[command(about = "Submission relay for proof-bound constituent messaging")]
struct Cli {
    /// Path to the relay config file
    #[arg(long, default_value = "relay.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(RelayConfig::load(&cli.config)?);
    tracing::info!(listen = %config.listen_addr, "starting relay");

    let store = Arc::new(Store::open(&config.db_path).context("opening submission store")?);

    let verifier = Arc::new(HttpVerifierClient::new(
        config.verifier_url.clone(),
        config.workers.upstream_timeout,
    ));
    let tee = Arc::new(HttpTeeClient::new(
        config.tee_url.clone(),
        config.workers.upstream_timeout,
    ));
    let worker_handle = workers::spawn(
        Arc::clone(&store),
        config.workers.clone(),
        verifier,
        tee,
    );

    let state = AppState::new(Arc::clone(&config), Arc::clone(&store), worker_handle.sender.clone())?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!("relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Teardown: close the job queue, let in-flight workers finish, flush
    // the subscriber on drop. The store flushes on drop.
    drop(worker_handle.sender);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), worker_handle.join).await;
    tracing::info!("relay stopped");
    Ok(())
}
