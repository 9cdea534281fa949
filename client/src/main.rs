//! Tribune CLI - prove district membership, send sealed messages.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use tribune_protocol::domain::JurisdictionType;

#[derive(Parser)]
#[command(name = "tribune")]
#[command(version = "0.1.0")]
#[command(about = "Privacy-preserving constituent messaging")]
#[command(long_about = r#"
Tribune lets a verified constituent message an office while proving, in zero
knowledge, that they live in the recipient's district. The street address and
message body are sealed to a trusted execution environment; the relay in the
middle can read neither.

Quick Start:
  1. tribune keygen             Generate your identity secret
  2. tribune register           Register into your district tree
  3. tribune send               Send a message to a recipient office
  4. tribune status             Check delivery of a submission
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: ~/.tribune/config.json)
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity secret and salt (stored encrypted)
    Keygen {
        /// Overwrite an existing keystore
        #[arg(short, long)]
        force: bool,
    },

    /// Verify a provider attestation and register into a district tree
    Register {
        /// Latitude of your residence (used for district lookup only)
        #[arg(long)]
        lat: f64,

        /// Longitude of your residence
        #[arg(long)]
        lng: f64,

        /// Path to the identity-provider attestation JSON
        #[arg(long)]
        attestation: String,

        /// Local user id for the credential cache
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Generate a proof and send a sealed message
    Send {
        /// Template id of the campaign
        #[arg(short, long)]
        template: String,

        /// 2-letter country code
        #[arg(long, default_value = "US")]
        country: String,

        /// Jurisdiction type: federal, state, local, international
        #[arg(long, default_value = "state")]
        jurisdiction: JurisdictionType,

        /// Recipient subdivision, e.g. US-CA-12
        #[arg(short, long)]
        recipient: String,

        /// Path to the plaintext message file
        #[arg(short, long)]
        message: String,

        /// Campaign session id published with the template. Part of the
        /// action scope: the same session can be acted on once per recipient.
        #[arg(long, default_value = "default")]
        session: String,

        /// Idempotency key for safe retries
        #[arg(long)]
        idempotency_key: Option<String>,

        /// Local user id for the credential cache
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Show the status of a submission
    Status {
        /// Submission id returned by send
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(std::path::Path::new);

    match cli.command {
        Commands::Keygen { force } => {
            commands::keygen::run(config_path, force)?;
        }
        Commands::Register { lat, lng, attestation, user } => {
            commands::register::run(config_path, lat, lng, &attestation, &user).await?;
        }
        Commands::Send {
            template,
            country,
            jurisdiction,
            recipient,
            message,
            session,
            idempotency_key,
            user,
        } => {
            commands::send::run(commands::send::SendArgs {
                config_path,
                template,
                country,
                jurisdiction,
                recipient,
                message_path: message,
                session,
                idempotency_key,
                user,
            })
            .await?;
        }
        Commands::Status { id } => {
            commands::status::run(config_path, &id).await?;
        }
    }

    Ok(())
}
