//! Submission endpoint (C7).
//!
//! The handler authenticates before any other work, validates shape and
//! policy, and persists within one storage transaction that enforces
//! nullifier and idempotency uniqueness. It does not verify proofs — that
//! is the verifier's job after handoff.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use tribune_protocol::blob::{EncryptedBlob, BLOB_VERSION, EPHEMERAL_KEY_LEN, NONCE_LEN};
use tribune_protocol::field::{fr_from_hex, fr_to_bytes, fr_to_hex, Fr};
use tribune_protocol::inputs::PublicInputs;
use tribune_protocol::ratelimit::TokenBucket;

use crate::auth;
use crate::config::RelayConfig;
use crate::error::ApiError;
use crate::storage::{InsertOutcome, NewSubmission, Store, SubmissionRecord};
use crate::workers::{Job, JobSender};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub session_key: Arc<Vec<u8>>,
    pub action_domains: Arc<HashSet<String>>,
    pub store: Arc<Store>,
    pub jobs: JobSender,
    limiters: Arc<Mutex<HashMap<String, Arc<TokenBucket>>>>,
}

impl AppState {
    pub fn new(
        config: Arc<RelayConfig>,
        store: Arc<Store>,
        jobs: JobSender,
    ) -> anyhow::Result<Self> {
        let session_key = Arc::new(config.session_key_bytes()?);
        let action_domains = Arc::new(config.action_domain_set());
        Ok(Self {
            config,
            session_key,
            action_domains,
            store,
            jobs,
            limiters: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn limiter_for(&self, user_id: &str) -> Arc<TokenBucket> {
        let mut limiters = self.limiters.lock().expect("limiter map lock poisoned");
        Arc::clone(limiters.entry(user_id.to_string()).or_insert_with(|| {
            Arc::new(TokenBucket::new(
                self.config.rate.capacity,
                self.config.rate.refill_per_sec,
            ))
        }))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/v1/submissions", post(submit))
        .route("/v1/submissions/:id", get(submission_status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    pub template_id: String,
    /// Base64 proof bytes; opaque here.
    pub proof: String,
    /// Hex field elements in the fixed layout.
    pub public_inputs: Vec<String>,
    pub verifier_depth: u32,
    pub encrypted_address_blob: EncryptedBlob,
    pub encrypted_message_blob: EncryptedBlob,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub submission_id: String,
    pub status: &'static str,
    pub nullifier: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub submission_id: String,
    pub status: String,
    pub on_chain_tx: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(auth::bearer)
        .and_then(|token| auth::verify_token(&state.session_key, token))
        .ok_or(ApiError::Unauthorized)
}

fn check_template_id(template_id: &str) -> Result<(), ApiError> {
    if template_id.is_empty()
        || template_id.len() > 64
        || !template_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(ApiError::InvalidInput("invalid template id".into()));
    }
    Ok(())
}

fn check_blob(label: &str, blob: &EncryptedBlob, max_bytes: usize) -> Result<(), ApiError> {
    if blob.version != BLOB_VERSION {
        return Err(ApiError::InvalidShape(format!("{label}: unsupported version")));
    }
    if blob.key_id.is_empty() || blob.key_id.len() > 128 {
        return Err(ApiError::InvalidShape(format!("{label}: bad key id")));
    }
    let ciphertext = B64
        .decode(&blob.ciphertext)
        .map_err(|_| ApiError::InvalidShape(format!("{label}: ciphertext is not base64")))?;
    if ciphertext.is_empty() || ciphertext.len() > max_bytes {
        return Err(ApiError::InvalidShape(format!("{label}: ciphertext size out of bounds")));
    }
    let nonce = B64
        .decode(&blob.nonce)
        .map_err(|_| ApiError::InvalidShape(format!("{label}: nonce is not base64")))?;
    if nonce.len() != NONCE_LEN {
        return Err(ApiError::InvalidShape(format!("{label}: nonce must be {NONCE_LEN} bytes")));
    }
    let ephemeral = B64
        .decode(&blob.ephemeral_public_key)
        .map_err(|_| ApiError::InvalidShape(format!("{label}: ephemeral key is not base64")))?;
    if ephemeral.len() != EPHEMERAL_KEY_LEN {
        return Err(ApiError::InvalidShape(format!(
            "{label}: ephemeral key must be {EPHEMERAL_KEY_LEN} bytes"
        )));
    }
    Ok(())
}

fn keccak_inputs(inputs: &[Fr]) -> String {
    let mut hasher = Keccak256::new();
    for element in inputs {
        hasher.update(fr_to_bytes(element));
    }
    format!("0x{}", hex::encode(hasher.finalize()))
}

async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    // Authentication precedes all other work.
    let user_id = authenticate(&state, &headers)?;

    if !state.limiter_for(&user_id).consume() {
        return Err(ApiError::RateLimited);
    }

    check_template_id(&request.template_id)?;

    let proof = B64
        .decode(&request.proof)
        .map_err(|_| ApiError::InvalidShape("proof is not base64".into()))?;
    if proof.is_empty() || proof.len() > state.config.max_proof_bytes {
        return Err(ApiError::InvalidShape("proof size out of bounds".into()));
    }

    if !state.config.allowed_depths.contains(&request.verifier_depth) {
        return Err(ApiError::InvalidShape(format!(
            "verifier depth {} is not supported",
            request.verifier_depth
        )));
    }
    let depth = request.verifier_depth as usize;

    let expected_len = PublicInputs::expected_len(depth);
    if request.public_inputs.len() != expected_len {
        return Err(ApiError::InvalidShape(format!(
            "expected {expected_len} public inputs, got {}",
            request.public_inputs.len()
        )));
    }
    let elements: Vec<Fr> = request
        .public_inputs
        .iter()
        .map(|raw| {
            fr_from_hex(raw)
                .map_err(|e| ApiError::InvalidShape(format!("public input: {e}")))
        })
        .collect::<Result<_, _>>()?;
    let parsed = PublicInputs::from_field_vec(&elements, depth)
        .map_err(|e| ApiError::InvalidShape(e.to_string()))?;

    check_blob("address blob", &request.encrypted_address_blob, state.config.max_blob_bytes)?;
    check_blob("message blob", &request.encrypted_message_blob, state.config.max_blob_bytes)?;

    // Action-domain allowlist: only configured campaigns are accepted.
    let domain_hex = fr_to_hex(&parsed.action_domain);
    if !state.action_domains.contains(&domain_hex) {
        return Err(ApiError::PolicyViolation("unknown campaign".into()));
    }

    let nullifier_hex = fr_to_hex(&parsed.nullifier);
    let outcome = state.store.insert_submission(NewSubmission {
        user_id,
        template_id: request.template_id,
        nullifier: nullifier_hex,
        action_domain: domain_hex,
        public_inputs_hash: keccak_inputs(&elements),
        public_inputs: elements.iter().map(fr_to_hex).collect(),
        verifier_depth: request.verifier_depth,
        proof,
        encrypted_address_blob: request.encrypted_address_blob,
        encrypted_message_blob: request.encrypted_message_blob,
        idempotency_key: request.idempotency_key,
    })?;

    let (record, created): (SubmissionRecord, bool) = match outcome {
        InsertOutcome::Created(record) => (record, true),
        InsertOutcome::Idempotent(record) => (record, false),
    };

    // Post-commit handoff; failures are the workers' problem, never the
    // caller's.
    if created {
        state.jobs.enqueue(Job::ChainSubmit(record.id.clone()));
        state.jobs.enqueue(Job::TeeDeliver(record.id.clone()));
    }

    Ok(Json(SubmitResponse {
        submission_id: record.id,
        status: "pending",
        nullifier: record.nullifier,
    }))
}

async fn submission_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;

    let record = state.store.get(&id)?.ok_or(ApiError::NotFound)?;
    // A submission is only visible to the session that created it.
    if record.user_id != user_id {
        return Err(ApiError::NotFound);
    }

    Ok(Json(StatusResponse {
        submission_id: record.id,
        status: record.status.as_str().to_string(),
        on_chain_tx: record.on_chain_tx,
        delivered_at: record.delivered_at,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use tribune_protocol::poseidon;

    use crate::auth::issue_token;
    use crate::workers::Job;

    use super::*;

    const DEPTH: usize = 4;
    const SESSION_KEY: [u8; 32] = [7u8; 32];

    struct Harness {
        router: Router,
        jobs_rx: mpsc::Receiver<Job>,
        store: Arc<Store>,
        _dir: tempfile::TempDir,
        action_domain: Fr,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("t.redb")).unwrap());

        let action_domain = Fr::from(777u64);
        let config: RelayConfig = serde_json::from_value(json!({
            "listen_addr": "127.0.0.1:0",
            "db_path": dir.path().join("t.redb"),
            "session_key": B64.encode(SESSION_KEY),
            "verifier_url": "https://verifier.example.org",
            "tee_url": "https://tee.example.org",
            "action_domains": [fr_to_hex(&action_domain)],
            "allowed_depths": [DEPTH],
            "rate": { "capacity": 4, "refill_per_sec": 0.0 },
        }))
        .unwrap();

        let (tx, jobs_rx) = mpsc::channel(64);
        let state = AppState::new(Arc::new(config), Arc::clone(&store), JobSender(tx)).unwrap();
        Harness {
            router: router(state),
            jobs_rx,
            store,
            _dir: dir,
            action_domain,
        }
    }

    fn valid_blob() -> Value {
        json!({
            "ciphertext": B64.encode([1u8; 64]),
            "nonce": B64.encode([2u8; 12]),
            "ephemeral_public_key": B64.encode([3u8; 32]),
            "key_id": "kid-a",
            "version": 1,
            "created_at": Utc::now(),
        })
    }

    fn inputs_for(action_domain: Fr, commitment_seed: u64) -> Vec<String> {
        let commitment = poseidon::identity_commitment(Fr::from(commitment_seed), Fr::from(9u64));
        let publics = PublicInputs {
            user_root: Fr::from(1u64),
            cell_map_root: Fr::from(2u64),
            siblings: (0..DEPTH as u64).map(Fr::from).collect(),
            nullifier: poseidon::nullifier(commitment, action_domain),
            action_domain,
            authority_level: 2,
        };
        publics.to_field_vec().iter().map(fr_to_hex).collect()
    }

    fn body_for(inputs: Vec<String>, idempotency_key: Option<&str>) -> Value {
        let mut body = json!({
            "template_id": "tmpl-climate",
            "proof": B64.encode([9u8; 128]),
            "public_inputs": inputs,
            "verifier_depth": DEPTH,
            "encrypted_address_blob": valid_blob(),
            "encrypted_message_blob": valid_blob(),
        });
        if let Some(key) = idempotency_key {
            body["idempotency_key"] = json!(key);
        }
        body
    }

    fn token() -> String {
        issue_token(&SESSION_KEY, "alice")
    }

    async fn post_submission(router: &Router, token: Option<&str>, body: &Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/submissions")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn unauthenticated_fails_before_any_work() {
        let h = harness();
        let body = body_for(inputs_for(h.action_domain, 1), None);
        let (status, payload) = post_submission(&h.router, None, &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(payload["error"], "unauthorized");

        let (status, _) = post_submission(&h.router, Some("forged.token"), &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        // Nothing was stored.
        assert!(h.store.list_by_status(crate::storage::SubmissionStatus::Pending).unwrap().is_empty());
    }

    #[tokio::test]
    async fn happy_path_persists_and_enqueues() {
        let mut h = harness();
        let body = body_for(inputs_for(h.action_domain, 1), None);
        let (status, payload) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "pending");
        let id = payload["submission_id"].as_str().unwrap();

        let record = h.store.get(id).unwrap().unwrap();
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.verifier_depth, DEPTH as u32);

        // Both handoffs were enqueued post-commit.
        assert!(matches!(h.jobs_rx.recv().await.unwrap(), Job::ChainSubmit(_)));
        assert!(matches!(h.jobs_rx.recv().await.unwrap(), Job::TeeDeliver(_)));
    }

    #[tokio::test]
    async fn duplicate_nullifier_conflicts_and_single_row_remains() {
        let h = harness();
        let body = body_for(inputs_for(h.action_domain, 1), None);

        let (status, first) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::OK);

        let (status, payload) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(payload["error"], "duplicate_action");

        let nullifier = first["nullifier"].as_str().unwrap();
        assert!(h.store.find_by_nullifier(nullifier).unwrap().is_some());
        assert_eq!(
            h.store
                .list_by_status(crate::storage::SubmissionStatus::Pending)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn idempotency_key_returns_the_same_submission() {
        let mut h = harness();
        let first_body = body_for(inputs_for(h.action_domain, 1), Some("key-1"));
        let (_, first) = post_submission(&h.router, Some(&token()), &first_body).await;

        // Retried with the same key but a fresh nullifier (e.g. the client
        // lost the response and rebuilt the request).
        let retry_body = body_for(inputs_for(h.action_domain, 2), Some("key-1"));
        let (status, second) = post_submission(&h.router, Some(&token()), &retry_body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["submission_id"], second["submission_id"]);

        // Exactly one row; only the first insert enqueued jobs.
        assert_eq!(
            h.store
                .list_by_status(crate::storage::SubmissionStatus::Pending)
                .unwrap()
                .len(),
            1
        );
        let mut jobs = 0;
        while h.jobs_rx.try_recv().is_ok() {
            jobs += 1;
        }
        assert_eq!(jobs, 2);
    }

    #[tokio::test]
    async fn unknown_campaign_is_a_policy_violation() {
        let h = harness();
        let body = body_for(inputs_for(Fr::from(999u64), 1), None);
        let (status, payload) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "policy_violation");
    }

    #[tokio::test]
    async fn shape_violations_are_rejected() {
        let h = harness();

        // Wrong vector length.
        let mut short = inputs_for(h.action_domain, 1);
        short.pop();
        let (status, _) = post_submission(&h.router, Some(&token()), &body_for(short, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Unsupported depth.
        let mut body = body_for(inputs_for(h.action_domain, 1), None);
        body["verifier_depth"] = json!(9);
        let (status, _) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Unreduced field element in the nullifier slot.
        let mut bad = inputs_for(h.action_domain, 1);
        bad[DEPTH + 2] = format!("0x{}", "ff".repeat(32));
        let (status, _) = post_submission(&h.router, Some(&token()), &body_for(bad, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Authority level out of bounds.
        let mut bad = inputs_for(h.action_domain, 1);
        let last = bad.len() - 1;
        bad[last] = fr_to_hex(&Fr::from(6u64));
        let (status, _) = post_submission(&h.router, Some(&token()), &body_for(bad, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Oversized proof.
        let mut body = body_for(inputs_for(h.action_domain, 1), None);
        body["proof"] = json!(B64.encode(vec![0u8; 9 * 1024]));
        let (status, _) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Truncated nonce in a blob.
        let mut body = body_for(inputs_for(h.action_domain, 1), None);
        body["encrypted_address_blob"]["nonce"] = json!(B64.encode([2u8; 8]));
        let (status, _) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn per_user_rate_limit_applies() {
        let h = harness();
        // Capacity is 4 with zero refill; the fifth call must be rejected
        // even though each uses a fresh nullifier.
        for seed in 1..=4u64 {
            let body = body_for(inputs_for(h.action_domain, seed), None);
            let (status, _) = post_submission(&h.router, Some(&token()), &body).await;
            assert_eq!(status, StatusCode::OK);
        }
        let body = body_for(inputs_for(h.action_domain, 5), None);
        let (status, payload) = post_submission(&h.router, Some(&token()), &body).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(payload["error"], "rate_limited");
    }

    #[tokio::test]
    async fn status_visible_only_to_its_owner() {
        let h = harness();
        let body = body_for(inputs_for(h.action_domain, 1), None);
        let (_, created) = post_submission(&h.router, Some(&token()), &body).await;
        let id = created["submission_id"].as_str().unwrap();

        let request = Request::builder()
            .uri(format!("/v1/submissions/{id}"))
            .header("authorization", format!("Bearer {}", token()))
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let other = issue_token(&SESSION_KEY, "mallory");
        let request = Request::builder()
            .uri(format!("/v1/submissions/{id}"))
            .header("authorization", format!("Bearer {other}"))
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
