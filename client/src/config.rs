//! Client configuration.
//!
//! One JSON file under the data directory, loaded once at startup. Timeouts
//! are named here and referenced by name everywhere else; nothing in the
//! pipeline hard-codes a duration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ClientError;

const TRIBUNE_DIR: &str = ".tribune";
const CONFIG_FILE: &str = "config.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timeouts {
    /// Registry lookup/register/proof calls.
    #[serde(with = "humantime_serde", default = "defaults::registry")]
    pub registry: Duration,
    /// Prover one-time initialization, hard cap.
    #[serde(with = "humantime_serde", default = "defaults::prover_init")]
    pub prover_init: Duration,
    /// Proof generation, hard cap.
    #[serde(with = "humantime_serde", default = "defaults::proof")]
    pub proof: Duration,
    /// TEE public-key fetch.
    #[serde(with = "humantime_serde", default = "defaults::tee_key")]
    pub tee_key: Duration,
    /// Submission POST.
    #[serde(with = "humantime_serde", default = "defaults::submit")]
    pub submit: Duration,
}

mod defaults {
    use std::time::Duration;

    pub fn registry() -> Duration {
        Duration::from_secs(10)
    }
    pub fn prover_init() -> Duration {
        Duration::from_secs(30)
    }
    pub fn proof() -> Duration {
        Duration::from_secs(60)
    }
    pub fn tee_key() -> Duration {
        Duration::from_secs(5)
    }
    pub fn submit() -> Duration {
        Duration::from_secs(15)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            registry: defaults::registry(),
            prover_init: defaults::prover_init(),
            proof: defaults::proof(),
            tee_key: defaults::tee_key(),
            submit: defaults::submit(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub registry_url: Url,
    /// Outbound registry calls must match one of these prefixes.
    pub registry_allowlist: Vec<String>,
    pub relay_url: Url,
    pub tee_key_url: Url,
    /// Base64 ed25519 key of the identity provider.
    pub identity_provider_key: String,
    /// Session token for the relay, issued out of band.
    #[serde(default)]
    pub session_token: Option<String>,
    /// Registry tree depth the circuit is compiled for.
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Registry rate limit: bucket capacity and refill per second.
    #[serde(default = "default_registry_rate")]
    pub registry_rate: (u32, f64),
    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_tree_depth() -> usize {
    tribune_protocol::inputs::REFERENCE_TREE_DEPTH
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("could not find home directory")
        .join(TRIBUNE_DIR)
}

fn default_registry_rate() -> (u32, f64) {
    (30, 0.5)
}

impl ClientConfig {
    pub fn default_path() -> PathBuf {
        default_data_dir().join(CONFIG_FILE)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let raw = fs::read_to_string(&path).map_err(|e| {
            ClientError::InvalidInput(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ClientError::InvalidInput(format!("malformed config: {e}")))
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.data_dir.join("credentials")
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join("identity.enc")
    }

    pub fn prover_cache_dir(&self) -> PathBuf {
        self.data_dir.join("prover")
    }
}
