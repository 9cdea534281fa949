//! Process-wide relay configuration.
//!
//! Loaded once at startup and immutable thereafter. Every timeout, cap and
//! allow-set in the relay is named here.

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::Deserialize;
use url::Url;

use tribune_protocol::field::fr_from_hex;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(with = "humantime_serde", default = "defaults::base_backoff")]
    pub base_backoff: Duration,
    /// Upstream call timeout for the verifier and TEE clients.
    #[serde(with = "humantime_serde", default = "defaults::upstream_timeout")]
    pub upstream_timeout: Duration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(default = "defaults::rate_capacity")]
    pub capacity: u32,
    #[serde(default = "defaults::rate_refill_per_sec")]
    pub refill_per_sec: f64,
}

mod defaults {
    use std::time::Duration;

    pub fn max_retries() -> u32 {
        5
    }
    pub fn base_backoff() -> Duration {
        Duration::from_millis(500)
    }
    pub fn upstream_timeout() -> Duration {
        Duration::from_secs(15)
    }
    pub fn rate_capacity() -> u32 {
        10
    }
    pub fn rate_refill_per_sec() -> f64 {
        0.2
    }
    pub fn max_proof_bytes() -> usize {
        8 * 1024
    }
    pub fn max_blob_bytes() -> usize {
        128 * 1024
    }
    pub fn workers() -> super::WorkerSettings {
        super::WorkerSettings {
            max_retries: max_retries(),
            base_backoff: base_backoff(),
            upstream_timeout: upstream_timeout(),
        }
    }
    pub fn rate() -> super::RateLimitSettings {
        super::RateLimitSettings {
            capacity: rate_capacity(),
            refill_per_sec: rate_refill_per_sec(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Base64, 32-byte HMAC key for session tokens.
    pub session_key: String,
    /// On-chain verifier endpoint.
    pub verifier_url: Url,
    /// TEE delivery-queue endpoint.
    pub tee_url: Url,
    /// Hex action-domain values this deployment accepts ("known campaigns").
    pub action_domains: Vec<String>,
    /// Registry depths whose circuits this deployment verifies against.
    pub allowed_depths: Vec<u32>,
    #[serde(default = "default_circuit_version")]
    pub circuit_version: u16,
    #[serde(default = "defaults::max_proof_bytes")]
    pub max_proof_bytes: usize,
    #[serde(default = "defaults::max_blob_bytes")]
    pub max_blob_bytes: usize,
    #[serde(default = "defaults::rate")]
    pub rate: RateLimitSettings,
    #[serde(default = "defaults::workers")]
    pub workers: WorkerSettings,
}

fn default_circuit_version() -> u16 {
    tribune_protocol::inputs::CIRCUIT_VERSION
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("malformed config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation: a relay with a malformed allow-set or session key
    /// must not come up at all.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_key_bytes()?.len() != 32 {
            anyhow::bail!("session_key must decode to 32 bytes");
        }
        for domain in &self.action_domains {
            fr_from_hex(domain)
                .map_err(|e| anyhow::anyhow!("bad action domain {domain}: {e}"))?;
        }
        if self.allowed_depths.is_empty() {
            anyhow::bail!("allowed_depths must not be empty");
        }
        Ok(())
    }

    pub fn session_key_bytes(&self) -> anyhow::Result<Vec<u8>> {
        B64.decode(&self.session_key)
            .map_err(|e| anyhow::anyhow!("session_key is not valid base64: {e}"))
    }

    /// Canonicalized allow-set for membership checks.
    pub fn action_domain_set(&self) -> HashSet<String> {
        self.action_domains
            .iter()
            .filter_map(|d| fr_from_hex(d).ok())
            .map(|fr| tribune_protocol::field::fr_to_hex(&fr))
            .collect()
    }
}
