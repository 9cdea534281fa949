//! Submission POST and status polling against the relay.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use tribune_protocol::blob::EncryptedBlob;

use crate::error::ClientError;

#[derive(Clone, Debug, Serialize)]
pub struct SubmitRequest {
    pub template_id: String,
    /// Base64 compressed proof bytes.
    pub proof: String,
    /// Hex field elements in the fixed layout.
    pub public_inputs: Vec<String>,
    pub verifier_depth: u32,
    pub encrypted_address_blob: EncryptedBlob,
    pub encrypted_message_blob: EncryptedBlob,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitReceipt {
    pub submission_id: String,
    pub status: String,
    pub nullifier: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionStatusView {
    pub submission_id: String,
    pub status: String,
    pub on_chain_tx: Option<String>,
    pub delivered_at: Option<String>,
}

fn map_error(status: reqwest::StatusCode, body: &str) -> ClientError {
    match status.as_u16() {
        401 => ClientError::Unauthorized,
        400 => ClientError::InvalidInput(extract_message(body)),
        403 => ClientError::PolicyViolation(extract_message(body)),
        404 => ClientError::Server("submission not found".into()),
        409 => ClientError::DuplicateAction,
        429 => ClientError::RateLimited,
        other => ClientError::Server(format!("relay returned {other}")),
    }
}

fn extract_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| "request rejected".into())
}

pub async fn submit(
    http: &reqwest::Client,
    relay_url: &Url,
    session_token: &str,
    request: &SubmitRequest,
    timeout: Duration,
) -> Result<SubmitReceipt, ClientError> {
    let url = relay_url
        .join("v1/submissions")
        .map_err(|e| ClientError::Internal(e.to_string()))?;
    let response = http
        .post(url)
        .bearer_auth(session_token)
        .json(request)
        .timeout(timeout)
        .send()
        .await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(map_error(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ClientError::Server(format!("malformed receipt: {e}")))
}

pub async fn fetch_status(
    http: &reqwest::Client,
    relay_url: &Url,
    session_token: &str,
    submission_id: &str,
    timeout: Duration,
) -> Result<SubmissionStatusView, ClientError> {
    let url = relay_url
        .join(&format!("v1/submissions/{submission_id}"))
        .map_err(|e| ClientError::Internal(e.to_string()))?;
    let response = http
        .get(url)
        .bearer_auth(session_token)
        .timeout(timeout)
        .send()
        .await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(map_error(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ClientError::Server(format!("malformed status: {e}")))
}
