//! Verify an attestation and register into a district tree.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use colored::Colorize;

use tribune_client::config::ClientConfig;
use tribune_client::credentials::{CredentialStore, SessionCredential, MAX_LIFETIME_DAYS, SCHEMA_VERSION};
use tribune_client::identity::{parse_provider_key, verify_attestation, IdentityAttestation};
use tribune_client::keystore::{prompt_passphrase, KeyStorage};
use tribune_client::registry::RegistryClient;
use tribune_protocol::field::{fr_from_hex, fr_to_hex};

pub async fn run(
    config_path: Option<&Path>,
    lat: f64,
    lng: f64,
    attestation_path: &str,
    user: &str,
) -> Result<()> {
    let config = ClientConfig::load(config_path)?;

    let raw = fs::read_to_string(attestation_path)
        .with_context(|| format!("cannot read attestation {attestation_path}"))?;
    let attestation: IdentityAttestation =
        serde_json::from_str(&raw).context("malformed attestation")?;

    let provider_key = parse_provider_key(&config.identity_provider_key)?;
    verify_attestation(&attestation, &provider_key, Utc::now())
        .context("attestation verification failed")?;
    println!("{}", "Attestation verified.".green());

    let passphrase = prompt_passphrase("Keystore passphrase: ")?;
    let keys = KeyStorage::new(config.keystore_path()).load(&passphrase)?;
    let commitment = keys.commitment()?;

    let attested = fr_from_hex(&attestation.identity_commitment)
        .context("attestation carries an invalid commitment")?;
    if attested != commitment {
        bail!("attestation does not match the local keystore");
    }

    println!("{}", "Registering with the district registry...".cyan());
    let registry = RegistryClient::new(&config)?;
    let registration = registry.register(commitment, lat, lng).await?;

    if registration.depth != config.tree_depth {
        bail!(
            "registry depth {} does not match the configured circuit depth {}",
            registration.depth,
            config.tree_depth
        );
    }

    let now = Utc::now();
    let credential = SessionCredential {
        schema_version: SCHEMA_VERSION,
        identity_commitment: commitment,
        leaf_index: registration.leaf_index,
        merkle_path: registration.path.clone(),
        merkle_root: registration.merkle_root,
        cell_map_root: registration.cell_map_root,
        district_id: registration.district_id.clone(),
        authority_level: attestation.authority_level,
        verification_method: attestation.verification_method.clone(),
        created_at: now,
        expires_at: now + Duration::days(MAX_LIFETIME_DAYS),
    };

    let store = CredentialStore::new(config.credentials_dir());
    store.put(user, &credential, config.tree_depth)?;

    println!();
    println!("{}", "Registration complete.".green().bold());
    println!();
    println!("District:    {}", registration.district_id);
    println!("Leaf index:  {}", registration.leaf_index);
    println!("Tree root:   {}", fr_to_hex(&registration.merkle_root));
    println!();
    println!(
        "{}",
        "Your session credential is cached locally; no address was stored.".dimmed()
    );
    Ok(())
}
