//! TEE public-key envelope fetch and cache.
//!
//! Keys rotate; each encryption records the `key_id` it used so in-flight
//! submissions survive a rotation. The cache holds one envelope for at most
//! an hour and readers never block on a refresh in progress.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

use crate::error::ClientError;

pub const MIN_CACHE_TTL: Duration = Duration::from_secs(60);
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(3600);

/// The algorithm identifier this client can seal to.
pub const SUPPORTED_ALGORITHM: &str = "x25519-hkdf-aes256gcm";

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeeKeyEnvelope {
    pub key_id: String,
    /// Base64, 32-byte x25519 public key.
    pub public_key: String,
    pub algorithm: String,
    pub expires_at: DateTime<Utc>,
}

struct CachedKey {
    envelope: TeeKeyEnvelope,
    fetched_at: std::time::Instant,
    ttl: Duration,
}

pub struct TeeKeyCache {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
    cached: RwLock<Option<CachedKey>>,
}

impl TeeKeyCache {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            timeout,
            cached: RwLock::new(None),
        }
    }

    /// Current envelope, from cache when fresh.
    pub async fn current(&self) -> Result<TeeKeyEnvelope, ClientError> {
        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < cached.ttl {
                    return Ok(cached.envelope.clone());
                }
            }
        }
        self.refresh().await
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn refresh(&self) -> Result<TeeKeyEnvelope, ClientError> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::KeyFetchFailed(e.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::KeyFetchFailed(format!(
                "key endpoint returned {}",
                response.status()
            )));
        }
        let envelope: TeeKeyEnvelope = response
            .json()
            .await
            .map_err(|e| ClientError::KeyFetchFailed(format!("malformed envelope: {e}")))?;

        if envelope.algorithm != SUPPORTED_ALGORITHM {
            return Err(ClientError::KeyFetchFailed(format!(
                "unsupported algorithm {}",
                envelope.algorithm
            )));
        }
        let now = Utc::now();
        if envelope.expires_at <= now {
            return Err(ClientError::KeyExpired);
        }

        let until_expiry = (envelope.expires_at - now)
            .to_std()
            .unwrap_or(MIN_CACHE_TTL);
        let ttl = until_expiry.clamp(MIN_CACHE_TTL, MAX_CACHE_TTL);

        let mut guard = self.cached.write().await;
        *guard = Some(CachedKey {
            envelope: envelope.clone(),
            fetched_at: std::time::Instant::now(),
            ttl,
        });
        Ok(envelope)
    }
}
