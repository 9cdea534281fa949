//! Wire shape of a witness-encrypted blob.
//!
//! Produced by the client's encryptor, persisted opaquely by the relay, and
//! forwarded to the TEE. Nothing in this repository can decrypt one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const BLOB_VERSION: u16 = 1;

/// AES-256-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// X25519 public key length.
pub const EPHEMERAL_KEY_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedBlob {
    /// Base64 ciphertext including the AEAD tag.
    pub ciphertext: String,
    /// Base64, 12 bytes.
    pub nonce: String,
    /// Base64, 32 bytes. Fresh per encryption.
    pub ephemeral_public_key: String,
    /// Which TEE key the blob was sealed to; lets the TEE pick the right
    /// private key across rotations.
    pub key_id: String,
    pub version: u16,
    pub created_at: DateTime<Utc>,
}
