//! Submission coordinator.
//!
//! Drives one send through credential load, proof generation, witness
//! encryption and the submission POST, surfacing progress through a watch
//! channel. At most one send runs per coordinator; this is also the only
//! place allowed to assemble the full public-input vector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use zeroize::Zeroize;

use tribune_protocol::domain::{build_action_domain, ActionDomainParams, JurisdictionType};
use tribune_protocol::field::fr_to_hex;
use tribune_protocol::inputs::PublicInputs;
use tribune_protocol::poseidon;
use tribune_protocol::witness::Witness;

use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::encryptor::encrypt_to_tee;
use crate::error::{ClientError, ErrorCategory};
use crate::keystore::IdentityKeyData;
use crate::prover::{CancelToken, ProgressFn, Prover};
use crate::submit::{self, SubmitReceipt, SubmitRequest};
use crate::teekey::TeeKeyCache;

/// Caps checked before any plaintext touches the encryptor.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;
pub const MAX_ADDRESS_BYTES: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPhase {
    Idle,
    LoadingCredential,
    CredentialMissing,
    InitializingProver,
    GeneratingProof,
    EncryptingWitness,
    Submitting,
    Complete,
    Cancelled,
    Error,
}

#[derive(Clone, Debug)]
pub struct SendStatus {
    pub phase: SendPhase,
    /// Prover progress in `[0,100]` while proving, otherwise the last value.
    pub percent: u8,
    pub error: Option<ErrorCategory>,
}

pub struct SendRequest {
    pub user_id: String,
    pub template_id: String,
    pub country: String,
    pub jurisdiction: JurisdictionType,
    pub recipient_subdivision: String,
    pub session_id: String,
    /// Plaintext message body; encrypted before leaving the process.
    pub message: String,
    /// Plaintext street address; encrypted before leaving the process.
    pub address: String,
    pub idempotency_key: Option<String>,
}

pub struct Coordinator {
    config: ClientConfig,
    store: CredentialStore,
    prover: Arc<Prover>,
    tee_keys: TeeKeyCache,
    http: reqwest::Client,
    running: AtomicBool,
    status_tx: watch::Sender<SendStatus>,
}

impl Coordinator {
    pub fn new(config: ClientConfig) -> Self {
        let store = CredentialStore::new(config.credentials_dir());
        let prover = Arc::new(Prover::new(config.tree_depth, config.prover_cache_dir()));
        let tee_keys = TeeKeyCache::new(config.tee_key_url.clone(), config.timeouts.tee_key);
        let (status_tx, _) = watch::channel(SendStatus {
            phase: SendPhase::Idle,
            percent: 0,
            error: None,
        });
        Self {
            config,
            store,
            prover,
            tee_keys,
            http: reqwest::Client::new(),
            running: AtomicBool::new(false),
            status_tx,
        }
    }

    /// Observe state transitions; the receiver always sees the latest state.
    pub fn subscribe(&self) -> watch::Receiver<SendStatus> {
        self.status_tx.subscribe()
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.store
    }

    fn set_phase(&self, phase: SendPhase) {
        self.status_tx.send_replace(SendStatus { phase, percent: percent_for(phase), error: None });
    }

    fn set_error(&self, err: &ClientError) {
        let phase = match err {
            ClientError::CredentialMissing | ClientError::CredentialExpired => {
                SendPhase::CredentialMissing
            }
            ClientError::Cancelled => SendPhase::Cancelled,
            _ => SendPhase::Error,
        };
        self.status_tx.send_replace(SendStatus {
            phase,
            percent: 0,
            error: Some(err.category()),
        });
    }

    /// Run one send end to end. A second call while one is in flight fails
    /// with `Busy` without touching any state.
    pub async fn send(
        &self,
        request: SendRequest,
        keys: &IdentityKeyData,
        cancel: CancelToken,
    ) -> Result<SubmitReceipt, ClientError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::Busy);
        }
        let result = self.run(request, keys, cancel).await;
        self.running.store(false, Ordering::SeqCst);
        match &result {
            Ok(_) => self.set_phase(SendPhase::Complete),
            Err(err) => self.set_error(err),
        }
        result
    }

    async fn run(
        &self,
        mut request: SendRequest,
        keys: &IdentityKeyData,
        cancel: CancelToken,
    ) -> Result<SubmitReceipt, ClientError> {
        if request.message.is_empty() || request.message.len() > MAX_MESSAGE_BYTES {
            return Err(ClientError::InvalidInput("message size out of bounds".into()));
        }
        if request.address.is_empty() || request.address.len() > MAX_ADDRESS_BYTES {
            return Err(ClientError::InvalidInput("address size out of bounds".into()));
        }

        self.set_phase(SendPhase::LoadingCredential);
        let credential = self
            .store
            .get(&request.user_id)
            .ok_or(ClientError::CredentialMissing)?;

        let action_domain = build_action_domain(&ActionDomainParams {
            country: request.country.clone(),
            jurisdiction: request.jurisdiction,
            recipient_subdivision: request.recipient_subdivision.clone(),
            template_id: request.template_id.clone(),
            session_id: request.session_id.clone(),
        })?;

        let commitment = keys.commitment()?;
        if commitment != credential.identity_commitment {
            return Err(ClientError::WitnessInvalid(
                "keystore does not match the cached credential".into(),
            ));
        }
        let nullifier = poseidon::nullifier(commitment, action_domain);

        // The one place the full vector is assembled, in the fixed layout.
        let public_inputs = PublicInputs {
            user_root: credential.merkle_root,
            cell_map_root: credential.cell_map_root,
            siblings: credential.merkle_path.clone(),
            nullifier,
            action_domain,
            authority_level: credential.authority_level,
        };

        let witness = Witness {
            identity_secret: keys.identity_secret,
            identity_salt: keys.identity_salt,
            path: credential.path(),
        };

        self.set_phase(SendPhase::InitializingProver);
        let status_tx = self.status_tx.clone();
        let progress: ProgressFn = Arc::new(move |percent| {
            // Best-effort: a closed channel must never stall the prover.
            let _ = status_tx.send(SendStatus {
                phase: if percent < 40 {
                    SendPhase::InitializingProver
                } else {
                    SendPhase::GeneratingProof
                },
                percent,
                error: None,
            });
        });

        let bundle = tokio::time::timeout(
            self.config.timeouts.prover_init + self.config.timeouts.proof,
            self.prover
                .generate_proof(witness, public_inputs, Some(progress), cancel.clone()),
        )
        .await
        .map_err(|_| ClientError::InitFailed("proof generation timed out".into()))??;

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        self.set_phase(SendPhase::EncryptingWitness);
        let mut tee_key = self.tee_keys.current().await?;
        let now = Utc::now();
        let address_blob = match encrypt_to_tee(request.address.as_bytes(), &tee_key, now) {
            Err(ClientError::KeyExpired) => {
                // Rotation raced us; refresh once and retry.
                self.tee_keys.invalidate().await;
                tee_key = self.tee_keys.current().await?;
                encrypt_to_tee(request.address.as_bytes(), &tee_key, now)?
            }
            other => other?,
        };
        let message_blob = encrypt_to_tee(request.message.as_bytes(), &tee_key, now)?;
        request.address.zeroize();
        request.message.zeroize();

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        self.set_phase(SendPhase::Submitting);
        let token = self
            .config
            .session_token
            .as_deref()
            .ok_or(ClientError::Unauthorized)?;
        let submit_request = SubmitRequest {
            template_id: request.template_id.clone(),
            proof: B64.encode(&bundle.proof),
            public_inputs: bundle
                .public_inputs
                .to_field_vec()
                .iter()
                .map(fr_to_hex)
                .collect(),
            verifier_depth: self.config.tree_depth as u32,
            encrypted_address_blob: address_blob,
            encrypted_message_blob: message_blob,
            idempotency_key: request.idempotency_key.clone(),
        };
        submit::submit(
            &self.http,
            &self.config.relay_url,
            token,
            &submit_request,
            self.config.timeouts.submit,
        )
        .await
    }
}

fn percent_for(phase: SendPhase) -> u8 {
    match phase {
        SendPhase::Idle | SendPhase::LoadingCredential => 0,
        SendPhase::InitializingProver => 10,
        SendPhase::GeneratingProof => 40,
        SendPhase::EncryptingWitness => 85,
        SendPhase::Submitting => 95,
        SendPhase::Complete => 100,
        SendPhase::CredentialMissing | SendPhase::Cancelled | SendPhase::Error => 0,
    }
}
