//! Witness encryption to the TEE.
//!
//! The street address and message body are sealed here and become opaque to
//! everything else in the pipeline: fresh x25519 ephemeral key per
//! encryption, HKDF-SHA256 key derivation, AES-256-GCM with a random nonce
//! and the TEE key id as associated data. There is no decryption path
//! outside the test harness.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroize;

use tribune_protocol::blob::{EncryptedBlob, BLOB_VERSION, EPHEMERAL_KEY_LEN, NONCE_LEN};

use crate::error::ClientError;
use crate::teekey::{TeeKeyEnvelope, SUPPORTED_ALGORITHM};

const HKDF_INFO: &[u8] = b"tribune-tee-seal-v1";

pub fn encrypt_to_tee(
    plaintext: &[u8],
    tee_key: &TeeKeyEnvelope,
    now: DateTime<Utc>,
) -> Result<EncryptedBlob, ClientError> {
    if tee_key.algorithm != SUPPORTED_ALGORITHM {
        return Err(ClientError::EncryptFailed(format!(
            "unsupported algorithm {}",
            tee_key.algorithm
        )));
    }
    if tee_key.expires_at <= now {
        return Err(ClientError::KeyExpired);
    }

    let raw = B64
        .decode(&tee_key.public_key)
        .map_err(|e| ClientError::EncryptFailed(format!("tee key base64: {e}")))?;
    let tee_public_bytes: [u8; EPHEMERAL_KEY_LEN] = raw
        .try_into()
        .map_err(|_| ClientError::EncryptFailed("tee key must be 32 bytes".into()))?;
    let tee_public = PublicKey::from(tee_public_bytes);

    // Fresh ephemeral pair per encryption: identical inputs never produce
    // identical ciphertexts, and compromise of one blob reveals nothing
    // about another.
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&tee_public);

    let mut salt = [0u8; EPHEMERAL_KEY_LEN * 2];
    salt[..EPHEMERAL_KEY_LEN].copy_from_slice(ephemeral_public.as_bytes());
    salt[EPHEMERAL_KEY_LEN..].copy_from_slice(&tee_public_bytes);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|_| ClientError::EncryptFailed("hkdf expand failed".into()))?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| ClientError::EncryptFailed("cipher init failed".into()))?;
    key.zeroize();

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            &Nonce::from(nonce_bytes),
            Payload { msg: plaintext, aad: tee_key.key_id.as_bytes() },
        )
        .map_err(|_| ClientError::EncryptFailed("aead encryption failed".into()))?;

    Ok(EncryptedBlob {
        ciphertext: B64.encode(&ciphertext),
        nonce: B64.encode(nonce_bytes),
        ephemeral_public_key: B64.encode(ephemeral_public.as_bytes()),
        key_id: tee_key.key_id.clone(),
        version: BLOB_VERSION,
        created_at: now,
    })
}

/// Test-harness decryption: exercises the round trip the real TEE performs.
/// The core has no path to plaintext outside `cfg(test)`.
#[cfg(test)]
pub(crate) fn decrypt_from_tee(
    blob: &EncryptedBlob,
    tee_secret: &x25519_dalek::StaticSecret,
) -> Result<Vec<u8>, ClientError> {
    let tee_public = PublicKey::from(tee_secret);

    let ephemeral_raw = B64
        .decode(&blob.ephemeral_public_key)
        .map_err(|e| ClientError::EncryptFailed(format!("ephemeral key base64: {e}")))?;
    let ephemeral_bytes: [u8; EPHEMERAL_KEY_LEN] = ephemeral_raw
        .try_into()
        .map_err(|_| ClientError::EncryptFailed("ephemeral key must be 32 bytes".into()))?;
    let shared = tee_secret.diffie_hellman(&PublicKey::from(ephemeral_bytes));

    let mut salt = [0u8; EPHEMERAL_KEY_LEN * 2];
    salt[..EPHEMERAL_KEY_LEN].copy_from_slice(&ephemeral_bytes);
    salt[EPHEMERAL_KEY_LEN..].copy_from_slice(tee_public.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|_| ClientError::EncryptFailed("hkdf expand failed".into()))?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| ClientError::EncryptFailed("cipher init failed".into()))?;
    key.zeroize();

    let nonce_raw = B64
        .decode(&blob.nonce)
        .map_err(|e| ClientError::EncryptFailed(format!("nonce base64: {e}")))?;
    let nonce_bytes: [u8; NONCE_LEN] = nonce_raw
        .try_into()
        .map_err(|_| ClientError::EncryptFailed("nonce must be 12 bytes".into()))?;
    let ciphertext = B64
        .decode(&blob.ciphertext)
        .map_err(|e| ClientError::EncryptFailed(format!("ciphertext base64: {e}")))?;

    cipher
        .decrypt(
            &Nonce::from(nonce_bytes),
            Payload { msg: ciphertext.as_slice(), aad: blob.key_id.as_bytes() },
        )
        .map_err(|_| ClientError::EncryptFailed("aead decryption failed".into()))
}
