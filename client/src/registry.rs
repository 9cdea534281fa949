//! District-registry client.
//!
//! Network adapter over the external registry that owns the commitment
//! trees. Outbound URLs are allowlisted at construction, responses are
//! closed-shape validated, and every call spends a rate-limit token.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use tribune_protocol::field::{fr_from_hex, fr_to_hex, Fr};
use tribune_protocol::merkle::{verify_path, MerklePath};
use tribune_protocol::ratelimit::TokenBucket;

use crate::config::ClientConfig;
use crate::error::ClientError;

const BACKOFF_BASE_MS: u64 = 250;

/// Parsed result of `register` / `get_path`.
#[derive(Clone, Debug)]
pub struct DistrictRegistration {
    pub leaf_index: u32,
    pub path: Vec<Fr>,
    pub merkle_root: Fr,
    pub cell_map_root: Fr,
    pub district_id: String,
    pub depth: usize,
}

#[derive(Clone, Debug)]
pub struct DistrictInfo {
    pub district_id: String,
    pub merkle_root: Fr,
}

// Closed response shapes: unknown fields widen trust and are rejected.

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LookupEntry {
    district_id: String,
    merkle_root: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LookupResponse {
    districts: Vec<LookupEntry>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistrationResponse {
    leaf_index: u32,
    merkle_path: Vec<String>,
    merkle_root: String,
    cell_map_root: String,
    district_id: String,
    depth: u32,
}

pub struct RegistryClient {
    http: reqwest::Client,
    base_url: Url,
    limiter: TokenBucket,
    timeout: Duration,
    max_retries: u32,
}

impl RegistryClient {
    /// Fails with `PolicyViolation` when the registry URL is not covered by
    /// the configured allowlist — before any request is ever made.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = config.registry_url.clone();
        let allowed = config
            .registry_allowlist
            .iter()
            .any(|prefix| base.as_str().starts_with(prefix.as_str()));
        if !allowed {
            return Err(ClientError::PolicyViolation(format!(
                "registry url {base} is not in the allowlist"
            )));
        }
        let (capacity, refill) = config.registry_rate;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base,
            limiter: TokenBucket::new(capacity, refill),
            timeout: config.timeouts.registry,
            max_retries: 3,
        })
    }

    /// Geocode-adjacent lookup; may be called without an identity.
    pub async fn lookup(&self, lat: f64, lng: f64) -> Result<DistrictInfo, ClientError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(ClientError::InvalidCoords);
        }
        let url = self.endpoint("v1/lookup")?;
        self.with_retries(|| {
            let url = url.clone();
            async move {
                let response = self
                    .send(self.http.get(url).query(&[("lat", lat), ("lng", lng)]))
                    .await?;
                let parsed: LookupResponse = decode(&response)?;
                let entry = parsed
                    .districts
                    .into_iter()
                    .next()
                    .ok_or(ClientError::DistrictNotFound)?;
                Ok(DistrictInfo {
                    merkle_root: parse_field("merkle_root", &entry.merkle_root)?,
                    district_id: entry.district_id,
                })
            }
        })
        .await
    }

    /// Writes the commitment into the registry. Called once per identity and
    /// never auto-retried: an ambiguous failure must not risk inserting the
    /// same commitment twice.
    pub async fn register(
        &self,
        commitment: Fr,
        lat: f64,
        lng: f64,
    ) -> Result<DistrictRegistration, ClientError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(ClientError::InvalidCoords);
        }
        let url = self.endpoint("v1/register")?;
        let body = serde_json::json!({
            "identity_commitment": fr_to_hex(&commitment),
            "coords": { "lat": lat, "lng": lng },
        });
        let response = self.send(self.http.post(url).json(&body)).await?;
        let parsed: RegistrationResponse = decode(&response)?;
        validate_registration(commitment, parsed)
    }

    /// Idempotent path recovery for an already-registered commitment.
    pub async fn get_path(
        &self,
        district_id: &str,
        commitment: Fr,
    ) -> Result<DistrictRegistration, ClientError> {
        let url = self.endpoint("v1/proof")?;
        let commitment_hex = fr_to_hex(&commitment);
        self.with_retries(|| {
            let url = url.clone();
            let commitment_hex = commitment_hex.clone();
            async move {
                let response = self
                    .send(self.http.get(url).query(&[
                        ("district", district_id),
                        ("commitment", commitment_hex.as_str()),
                    ]))
                    .await?;
                let parsed: RegistrationResponse = decode(&response)?;
                validate_registration(commitment, parsed)
            }
        })
        .await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Internal(format!("bad registry path: {e}")))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, ClientError> {
        if !self.limiter.consume() {
            return Err(ClientError::RateLimited);
        }
        let response = request.timeout(self.timeout).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.text().await?);
        }
        Err(match status.as_u16() {
            400 => ClientError::InvalidCoords,
            401 | 403 => ClientError::Unauthorized,
            404 => ClientError::DistrictNotFound,
            409 => ClientError::DuplicateRegistration,
            429 => ClientError::RateLimited,
            503 => ClientError::TreeRebuilding,
            other => ClientError::Server(format!("registry returned {other}")),
        })
    }

    /// Bounded exponential backoff for the idempotent calls only.
    async fn with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(err @ (ClientError::TreeRebuilding | ClientError::Network(_)))
                    if attempt < self.max_retries =>
                {
                    let delay = BACKOFF_BASE_MS * (1 << attempt);
                    tracing::debug!(%err, attempt, delay_ms = delay, "retrying registry call");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    serde_json::from_str(body)
        .map_err(|e| ClientError::Server(format!("registry response failed validation: {e}")))
}

fn parse_field(label: &str, value: &str) -> Result<Fr, ClientError> {
    fr_from_hex(value)
        .map_err(|e| ClientError::Server(format!("registry sent invalid {label}: {e}")))
}

/// The registry is external; its answers are verified, not trusted. The
/// returned path must prove the commitment into the returned root.
fn validate_registration(
    commitment: Fr,
    response: RegistrationResponse,
) -> Result<DistrictRegistration, ClientError> {
    let depth = response.depth as usize;
    if response.merkle_path.len() != depth {
        return Err(ClientError::Server(format!(
            "registry path has {} elements for depth {depth}",
            response.merkle_path.len()
        )));
    }
    let siblings: Vec<Fr> = response
        .merkle_path
        .iter()
        .map(|s| parse_field("merkle_path element", s))
        .collect::<Result<_, _>>()?;
    let merkle_root = parse_field("merkle_root", &response.merkle_root)?;
    let cell_map_root = parse_field("cell_map_root", &response.cell_map_root)?;

    let path = MerklePath {
        siblings: siblings.clone(),
        leaf_index: response.leaf_index,
    };
    path.check_bounds()?;
    if !verify_path(commitment, &path, merkle_root) {
        return Err(ClientError::Server(
            "registry path does not verify against its root".into(),
        ));
    }

    Ok(DistrictRegistration {
        leaf_index: response.leaf_index,
        path: siblings,
        merkle_root,
        cell_map_root,
        district_id: response.district_id,
        depth,
    })
}
