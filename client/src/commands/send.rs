//! Prove membership and send a sealed message.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use tribune_client::coordinator::{Coordinator, SendPhase, SendRequest};
use tribune_client::keystore::{prompt_passphrase, KeyStorage};
use tribune_client::config::ClientConfig;
use tribune_client::prover::CancelToken;
use tribune_protocol::domain::JurisdictionType;

pub struct SendArgs<'a> {
    pub config_path: Option<&'a Path>,
    pub template: String,
    pub country: String,
    pub jurisdiction: JurisdictionType,
    pub recipient: String,
    pub message_path: String,
    pub session: String,
    pub idempotency_key: Option<String>,
    pub user: String,
}

pub async fn run(args: SendArgs<'_>) -> Result<()> {
    let config = ClientConfig::load(args.config_path)?;

    let message = fs::read_to_string(&args.message_path)
        .with_context(|| format!("cannot read message {}", args.message_path))?;

    let passphrase = prompt_passphrase("Keystore passphrase: ")?;
    let keys = KeyStorage::new(config.keystore_path()).load(&passphrase)?;

    // The address is prompted, never taken from a file or shell history.
    let address = rpassword::prompt_password("Street address (sent encrypted): ")
        .context("failed to read address")?;

    let coordinator = Coordinator::new(config);

    let mut status_rx = coordinator.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = SendPhase::Idle;
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow().clone();
            if status.phase != last {
                last = status.phase;
                let line = match status.phase {
                    SendPhase::LoadingCredential => "Loading credential...",
                    SendPhase::InitializingProver => "Initializing prover (one-time setup)...",
                    SendPhase::GeneratingProof => "Generating proof...",
                    SendPhase::EncryptingWitness => "Encrypting to the TEE key...",
                    SendPhase::Submitting => "Submitting...",
                    _ => continue,
                };
                println!("{}", line.cyan());
            }
        }
    });

    let request = SendRequest {
        user_id: args.user,
        template_id: args.template,
        country: args.country,
        jurisdiction: args.jurisdiction,
        recipient_subdivision: args.recipient,
        session_id: args.session,
        message,
        address,
        idempotency_key: args.idempotency_key,
    };

    let result = coordinator.send(request, &keys, CancelToken::new()).await;
    printer.abort();

    match result {
        Ok(receipt) => {
            println!();
            println!("{}", "Message submitted.".green().bold());
            println!();
            println!("Submission:  {}", receipt.submission_id);
            println!("Status:      {}", receipt.status);
            println!("Nullifier:   {}", receipt.nullifier);
            println!();
            println!(
                "{}",
                "Track verification and delivery with 'tribune status'.".dimmed()
            );
            Ok(())
        }
        Err(err) => {
            println!();
            println!("{}", err.user_message().red());
            Err(err.into())
        }
    }
}
