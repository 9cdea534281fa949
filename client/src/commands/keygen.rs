//! Generate identity material and store it encrypted.

use std::path::Path;

use anyhow::{bail, Result};
use colored::Colorize;

use tribune_client::config::ClientConfig;
use tribune_client::keystore::{prompt_new_passphrase, IdentityKeyData, KeyStorage};
use tribune_protocol::field::fr_to_hex;

pub fn run(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config = ClientConfig::load(config_path)?;
    let storage = KeyStorage::new(config.keystore_path());

    if storage.exists() && !force {
        bail!("identity keystore already exists; use --force to overwrite");
    }

    println!("{}", "Generating identity material...".cyan());
    let keys = IdentityKeyData::generate();
    let commitment = keys.commitment()?;

    let passphrase = prompt_new_passphrase()?;
    storage.save(&keys, &passphrase)?;

    println!();
    println!("{}", "Identity keystore created.".green().bold());
    println!();
    println!("Commitment: {}", fr_to_hex(&commitment));
    println!();
    println!(
        "{}",
        "Take this commitment to your identity provider for verification,\n\
         then run 'tribune register' with the attestation you receive."
            .dimmed()
    );
    Ok(())
}
