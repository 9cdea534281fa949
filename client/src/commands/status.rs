//! Show the status of a submission.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use colored::Colorize;

use tribune_client::config::ClientConfig;
use tribune_client::submit::fetch_status;

pub async fn run(config_path: Option<&Path>, submission_id: &str) -> Result<()> {
    let config = ClientConfig::load(config_path)?;
    let Some(token) = config.session_token.as_deref() else {
        bail!("no session token configured; sign in first");
    };

    let http = reqwest::Client::new();
    let view = fetch_status(
        &http,
        &config.relay_url,
        token,
        submission_id,
        Duration::from_secs(10),
    )
    .await?;

    println!("Submission:  {}", view.submission_id);
    let status = match view.status.as_str() {
        "pending" => view.status.yellow(),
        "verified" | "delivered" => view.status.green(),
        _ => view.status.red(),
    };
    println!("Status:      {status}");
    if let Some(tx) = view.on_chain_tx {
        println!("On-chain tx: {tx}");
    }
    if let Some(delivered) = view.delivered_at {
        println!("Delivered:   {delivered}");
    }
    Ok(())
}
