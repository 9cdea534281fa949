//! TEE delivery-queue client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use tribune_protocol::blob::EncryptedBlob;

use super::{classify_status, ClientFault};

/// The queue message shape; opaque to the relay after handoff.
#[derive(Clone, Debug, Serialize)]
pub struct DeliveryRequest {
    pub submission_id: String,
    pub encrypted_address_blob: EncryptedBlob,
    pub encrypted_message_blob: EncryptedBlob,
    pub template_id: String,
    pub tee_key_id: String,
}

#[async_trait]
pub trait TeeClient: Send + Sync {
    /// Forward the sealed blobs; returns the confirmed delivery time.
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DateTime<Utc>, ClientFault>;
}

pub struct HttpTeeClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTeeClient {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Self { http: reqwest::Client::new(), base_url, timeout }
    }
}

#[derive(Deserialize)]
struct DeliveryResponse {
    delivered_at: DateTime<Utc>,
}

#[async_trait]
impl TeeClient for HttpTeeClient {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DateTime<Utc>, ClientFault> {
        let url = self
            .base_url
            .join("deliver")
            .map_err(|e| ClientFault::Permanent(format!("bad tee path: {e}")))?;
        let response = self
            .http
            .post(url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.text().await.unwrap_or_default()));
        }
        let parsed: DeliveryResponse = response
            .json()
            .await
            .map_err(|e| ClientFault::Permanent(format!("malformed tee response: {e}")))?;
        Ok(parsed.delivered_at)
    }
}
