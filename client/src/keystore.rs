//! Encrypted identity keystore.
//!
//! The identity secret and salt are the only long-lived private material on
//! the client. They are sealed as one fixed 64-byte payload under
//! AES-256-GCM with a passphrase-derived key; a wrong passphrase surfaces as
//! an AEAD tag failure, so no separate password hash is stored. The KDF
//! parameters travel inside the file, which lets them be raised later
//! without breaking existing keystores.

use std::fs;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use ark_ff::UniformRand;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use tribune_protocol::field::{fr_from_bytes, fr_to_bytes, Fr};
use tribune_protocol::poseidon;

use crate::error::ClientError;

const KEYSTORE_VERSION: u8 = 1;

/// Binds ciphertexts to this file format; a blob lifted into some other
/// context will not open.
const KEYSTORE_AAD: &[u8] = b"tribune-identity-keystore-v1";

const KDF_SALT_LEN: usize = 16;

/// identity_secret followed by identity_salt, 32 bytes each.
const SEALED_PAYLOAD_LEN: usize = 64;

/// Decrypted identity material. Both values are canonical big-endian field
/// elements; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeyData {
    pub identity_secret: [u8; 32],
    pub identity_salt: [u8; 32],
}

impl IdentityKeyData {
    /// Sample fresh identity material. Values are drawn as field elements so
    /// their byte form always parses strictly.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            identity_secret: fr_to_bytes(&Fr::rand(&mut rng)),
            identity_salt: fr_to_bytes(&Fr::rand(&mut rng)),
        }
    }

    /// The public identity commitment `H(secret, salt)`.
    pub fn commitment(&self) -> Result<Fr, ClientError> {
        let secret = fr_from_bytes(&self.identity_secret)
            .map_err(|e| ClientError::Keystore(e.to_string()))?;
        let salt = fr_from_bytes(&self.identity_salt)
            .map_err(|e| ClientError::Keystore(e.to_string()))?;
        Ok(poseidon::identity_commitment(secret, salt))
    }
}

/// Argon2id cost parameters, persisted with the file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // 19 MiB / 2 passes / 1 lane.
        Self { m_cost: 19_456, t_cost: 2, p_cost: 1 }
    }
}

impl KdfParams {
    fn derive(&self, passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, ClientError> {
        let params = argon2::Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| ClientError::Keystore(format!("kdf params: {e}")))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
            .map_err(|e| ClientError::Keystore(format!("key derivation: {e}")))?;
        Ok(key)
    }
}

/// On-disk keystore format.
#[derive(Serialize, Deserialize)]
pub struct KeystoreFile {
    pub version: u8,
    pub kdf: KdfParams,
    /// Base64, 16 bytes.
    pub kdf_salt: String,
    /// Base64, 12 bytes.
    pub nonce: String,
    /// Base64: the 64-byte identity payload plus the AEAD tag.
    pub sealed: String,
    pub created_at: DateTime<Utc>,
}

fn decode_exact(label: &str, value: &str, expected: usize) -> Result<Vec<u8>, ClientError> {
    let raw = B64
        .decode(value)
        .map_err(|e| ClientError::Keystore(format!("{label}: {e}")))?;
    if raw.len() != expected {
        return Err(ClientError::Keystore(format!(
            "{label}: expected {expected} bytes, got {}",
            raw.len()
        )));
    }
    Ok(raw)
}

impl KeystoreFile {
    pub fn seal(data: &IdentityKeyData, passphrase: &str) -> Result<Self, ClientError> {
        let kdf = KdfParams::default();
        let mut kdf_salt = [0u8; KDF_SALT_LEN];
        OsRng.fill_bytes(&mut kdf_salt);
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = kdf.derive(passphrase, &kdf_salt)?;
        let cipher = Aes256Gcm::new_from_slice(&*key)
            .map_err(|_| ClientError::Keystore("cipher init failed".into()))?;

        let mut payload = [0u8; SEALED_PAYLOAD_LEN];
        payload[..32].copy_from_slice(&data.identity_secret);
        payload[32..].copy_from_slice(&data.identity_salt);
        let sealed = cipher
            .encrypt(
                &Nonce::from(nonce_bytes),
                Payload { msg: &payload, aad: KEYSTORE_AAD },
            )
            .map_err(|_| ClientError::Keystore("sealing failed".into()))?;
        payload.zeroize();

        Ok(Self {
            version: KEYSTORE_VERSION,
            kdf,
            kdf_salt: B64.encode(kdf_salt),
            nonce: B64.encode(nonce_bytes),
            sealed: B64.encode(&sealed),
            created_at: Utc::now(),
        })
    }

    pub fn open(&self, passphrase: &str) -> Result<IdentityKeyData, ClientError> {
        if self.version != KEYSTORE_VERSION {
            return Err(ClientError::Keystore(format!(
                "unsupported keystore version {}",
                self.version
            )));
        }
        let kdf_salt = decode_exact("kdf salt", &self.kdf_salt, KDF_SALT_LEN)?;
        let nonce_raw = decode_exact("nonce", &self.nonce, 12)?;
        let nonce_bytes: [u8; 12] = nonce_raw.try_into().expect("length checked above");
        let sealed = B64
            .decode(&self.sealed)
            .map_err(|e| ClientError::Keystore(format!("sealed payload: {e}")))?;

        let key = self.kdf.derive(passphrase, &kdf_salt)?;
        let cipher = Aes256Gcm::new_from_slice(&*key)
            .map_err(|_| ClientError::Keystore("cipher init failed".into()))?;

        let mut payload = cipher
            .decrypt(
                &Nonce::from(nonce_bytes),
                Payload { msg: sealed.as_slice(), aad: KEYSTORE_AAD },
            )
            .map_err(|_| ClientError::Keystore("wrong passphrase or corrupted keystore".into()))?;
        if payload.len() != SEALED_PAYLOAD_LEN {
            payload.zeroize();
            return Err(ClientError::Keystore("sealed payload has the wrong size".into()));
        }

        let mut data = IdentityKeyData {
            identity_secret: [0u8; 32],
            identity_salt: [0u8; 32],
        };
        data.identity_secret.copy_from_slice(&payload[..32]);
        data.identity_salt.copy_from_slice(&payload[32..]);
        payload.zeroize();
        Ok(data)
    }
}

/// On-disk keystore manager.
pub struct KeyStorage {
    path: PathBuf,
}

impl KeyStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomic replace: seal, write next to the target, then rename over it.
    pub fn save(&self, data: &IdentityKeyData, passphrase: &str) -> Result<(), ClientError> {
        let file = KeystoreFile::seal(data, passphrase)?;
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ClientError::Keystore(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ClientError::Keystore(e.to_string()))?;
        }
        let tmp = self.path.with_extension("enc.tmp");
        fs::write(&tmp, &json).map_err(|e| ClientError::Keystore(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .map_err(|e| ClientError::Keystore(e.to_string()))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| ClientError::Keystore(e.to_string()))
    }

    pub fn load(&self, passphrase: &str) -> Result<IdentityKeyData, ClientError> {
        let json = fs::read_to_string(&self.path).map_err(|_| {
            ClientError::Keystore("no identity keystore found; run 'tribune keygen' first".into())
        })?;
        let file: KeystoreFile = serde_json::from_str(&json)
            .map_err(|e| ClientError::Keystore(format!("malformed keystore: {e}")))?;
        file.open(passphrase)
    }

    /// Removal requires proving knowledge of the passphrase first.
    pub fn delete(&self, passphrase: &str) -> Result<(), ClientError> {
        let _ = self.load(passphrase)?;
        fs::remove_file(&self.path).map_err(|e| ClientError::Keystore(e.to_string()))
    }
}

/// A passphrase must be at least 10 characters and mix letters with digits.
pub fn validate_passphrase(passphrase: &str) -> Result<(), ClientError> {
    if passphrase.chars().count() < 10 {
        return Err(ClientError::InvalidInput(
            "passphrase must be at least 10 characters".into(),
        ));
    }
    let has_letter = passphrase.chars().any(|c| c.is_alphabetic());
    let has_digit = passphrase.chars().any(|c| c.is_numeric());
    if !has_letter || !has_digit {
        return Err(ClientError::InvalidInput(
            "passphrase must mix letters and digits".into(),
        ));
    }
    Ok(())
}

pub fn prompt_passphrase(prompt: &str) -> Result<String, ClientError> {
    rpassword::prompt_password(prompt).map_err(|e| ClientError::Keystore(e.to_string()))
}

/// Prompt twice for a fresh passphrase and enforce the strength rule.
pub fn prompt_new_passphrase() -> Result<String, ClientError> {
    let passphrase = prompt_passphrase("New keystore passphrase: ")?;
    if passphrase != prompt_passphrase("Confirm passphrase: ")? {
        return Err(ClientError::InvalidInput("passphrases do not match".into()));
    }
    validate_passphrase(&passphrase)?;
    Ok(passphrase)
}
