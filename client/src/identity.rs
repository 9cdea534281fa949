//! Identity-provider attestation verification.
//!
//! The provider attests, off-box, that a commitment belongs to a verified
//! person at some authority tier. The attestation is checked before any
//! registry registration; no raw PII ever reaches this client.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Attestations older than this are rejected outright.
pub const MAX_ATTESTATION_AGE_HOURS: i64 = 24;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityAttestation {
    /// Hex field element; must match the local keystore's commitment.
    pub identity_commitment: String,
    pub verification_method: String,
    pub authority_level: u8,
    pub verification_timestamp: DateTime<Utc>,
    /// Base64 ed25519 signature over the canonical payload.
    pub provider_signature: String,
}

impl IdentityAttestation {
    /// Canonical byte string the provider signs. Pipe-separated, RFC 3339
    /// timestamp in UTC seconds; both sides must produce this byte-for-byte.
    pub fn signing_payload(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            self.identity_commitment,
            self.verification_method,
            self.authority_level,
            self.verification_timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        )
        .into_bytes()
    }
}

pub fn parse_provider_key(base64_key: &str) -> Result<VerifyingKey, ClientError> {
    let raw = B64
        .decode(base64_key)
        .map_err(|e| ClientError::InvalidInput(format!("provider key base64: {e}")))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| ClientError::InvalidInput("provider key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| ClientError::InvalidInput(format!("provider key invalid: {e}")))
}

/// Check signature, authority bounds and freshness. Any failure is a
/// `PolicyViolation`: an unverifiable attestation must never reach the
/// registry.
pub fn verify_attestation(
    attestation: &IdentityAttestation,
    provider_key: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<(), ClientError> {
    if !(1..=5).contains(&attestation.authority_level) {
        return Err(ClientError::PolicyViolation(
            "authority level outside 1..=5".into(),
        ));
    }
    let age = now - attestation.verification_timestamp;
    if age > Duration::hours(MAX_ATTESTATION_AGE_HOURS) || age < Duration::zero() {
        return Err(ClientError::PolicyViolation(
            "attestation timestamp outside the accepted window".into(),
        ));
    }

    let raw = B64
        .decode(&attestation.provider_signature)
        .map_err(|_| ClientError::PolicyViolation("malformed provider signature".into()))?;
    let sig_bytes: [u8; 64] = raw
        .try_into()
        .map_err(|_| ClientError::PolicyViolation("provider signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    provider_key
        .verify(&attestation.signing_payload(), &signature)
        .map_err(|_| ClientError::PolicyViolation("provider signature does not verify".into()))
}
