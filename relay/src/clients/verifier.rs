//! On-chain verifier contract client.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::Deserialize;
use url::Url;

use super::{classify_status, ClientFault};

#[async_trait]
pub trait VerifierClient: Send + Sync {
    /// Contract read; lets the relayer skip a submission whose nullifier is
    /// already anchored instead of wasting gas.
    async fn is_nullifier_used(&self, nullifier: &str) -> Result<bool, ClientFault>;

    /// Submit `(proof, public_inputs)`; returns the transaction hash.
    async fn submit_proof(
        &self,
        proof: &[u8],
        public_inputs: &[String],
    ) -> Result<String, ClientFault>;
}

pub struct HttpVerifierClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpVerifierClient {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Self { http: reqwest::Client::new(), base_url, timeout }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientFault> {
        self.base_url
            .join(path)
            .map_err(|e| ClientFault::Permanent(format!("bad verifier path: {e}")))
    }
}

#[derive(Deserialize)]
struct NullifierUsedResponse {
    used: bool,
}

#[derive(Deserialize)]
struct SubmitProofResponse {
    tx_hash: String,
}

#[async_trait]
impl VerifierClient for HttpVerifierClient {
    async fn is_nullifier_used(&self, nullifier: &str) -> Result<bool, ClientFault> {
        let url = self.endpoint(&format!("nullifier/{nullifier}"))?;
        let response = self.http.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.text().await.unwrap_or_default()));
        }
        let parsed: NullifierUsedResponse = response
            .json()
            .await
            .map_err(|e| ClientFault::Permanent(format!("malformed verifier response: {e}")))?;
        Ok(parsed.used)
    }

    async fn submit_proof(
        &self,
        proof: &[u8],
        public_inputs: &[String],
    ) -> Result<String, ClientFault> {
        let url = self.endpoint("submit")?;
        let body = serde_json::json!({
            "proof": B64.encode(proof),
            "public_inputs": public_inputs,
        });
        let response = self
            .http
            .post(url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.text().await.unwrap_or_default()));
        }
        let parsed: SubmitProofResponse = response
            .json()
            .await
            .map_err(|e| ClientFault::Permanent(format!("malformed verifier response: {e}")))?;
        Ok(parsed.tx_hash)
    }
}
