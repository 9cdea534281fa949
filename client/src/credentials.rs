//! Session-credential store.
//!
//! One JSON file per user under the data directory. The credential caches
//! the user's position in the public commitment tree so repeated sends do
//! not re-contact the registry. It carries no street address and no PII.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tribune_protocol::field::Fr;
use tribune_protocol::merkle::{verify_path, MerklePath};
use tribune_protocol::ProtocolError;

use crate::error::ClientError;

pub const SCHEMA_VERSION: u32 = 1;

/// Hard expiry cap, independent of usage.
pub const MAX_LIFETIME_DAYS: i64 = 180;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionCredential {
    pub schema_version: u32,
    #[serde(with = "tribune_protocol::field::serde_hex")]
    pub identity_commitment: Fr,
    pub leaf_index: u32,
    #[serde(with = "tribune_protocol::field::serde_hex_vec")]
    pub merkle_path: Vec<Fr>,
    #[serde(with = "tribune_protocol::field::serde_hex")]
    pub merkle_root: Fr,
    #[serde(with = "tribune_protocol::field::serde_hex")]
    pub cell_map_root: Fr,
    pub district_id: String,
    pub authority_level: u8,
    pub verification_method: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn path(&self) -> MerklePath {
        MerklePath {
            siblings: self.merkle_path.clone(),
            leaf_index: self.leaf_index,
        }
    }
}

pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, user_id: &str) -> Result<PathBuf, ClientError> {
        // User ids become file names; keep them to a safe alphabet.
        if user_id.is_empty()
            || user_id.len() > 64
            || !user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        {
            return Err(ClientError::InvalidInput("invalid user id".into()));
        }
        Ok(self.dir.join(format!("{user_id}.json")))
    }

    /// Atomic replace. The path must verify against the stored root and
    /// match the expected registry depth before anything hits disk.
    pub fn put(
        &self,
        user_id: &str,
        credential: &SessionCredential,
        expected_depth: usize,
    ) -> Result<(), ClientError> {
        if credential.merkle_path.len() != expected_depth {
            return Err(ProtocolError::WitnessInvalid(format!(
                "path length {} does not match registry depth {expected_depth}",
                credential.merkle_path.len()
            ))
            .into());
        }
        let path = credential.path();
        path.check_bounds()?;
        if !verify_path(credential.identity_commitment, &path, credential.merkle_root) {
            return Err(ClientError::WitnessInvalid(
                "credential path does not verify against its root".into(),
            ));
        }
        if credential.expires_at > credential.created_at + Duration::days(MAX_LIFETIME_DAYS) {
            return Err(ClientError::InvalidInput(
                "credential expiry exceeds the hard cap".into(),
            ));
        }

        let file = self.path_for(user_id)?;
        fs::create_dir_all(&self.dir).map_err(|e| ClientError::Internal(e.to_string()))?;

        let json = serde_json::to_string_pretty(credential)
            .map_err(|e| ClientError::Internal(e.to_string()))?;
        let tmp = file.with_extension("json.tmp");
        fs::write(&tmp, &json).map_err(|e| ClientError::Internal(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .map_err(|e| ClientError::Internal(e.to_string()))?;
        }
        fs::rename(&tmp, &file).map_err(|e| ClientError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Missing, expired, unreadable and old-schema credentials all read as
    /// `None`; expired and unreadable files are lazily deleted.
    pub fn get(&self, user_id: &str) -> Option<SessionCredential> {
        let file = self.path_for(user_id).ok()?;
        let raw = fs::read_to_string(&file).ok()?;

        let credential: SessionCredential = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(err) => {
                tracing::debug!(user_id, %err, "dropping unreadable credential");
                let _ = fs::remove_file(&file);
                return None;
            }
        };
        if credential.schema_version != SCHEMA_VERSION {
            tracing::debug!(user_id, credential.schema_version, "dropping old-schema credential");
            let _ = fs::remove_file(&file);
            return None;
        }
        if credential.is_expired(Utc::now()) {
            let _ = fs::remove_file(&file);
            return None;
        }
        Some(credential)
    }

    pub fn clear(&self, user_id: &str) -> Result<(), ClientError> {
        let file = self.path_for(user_id)?;
        if file.exists() {
            fs::remove_file(&file).map_err(|e| ClientError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    pub fn is_valid(&self, user_id: &str) -> bool {
        self.get(user_id).is_some()
    }

    #[cfg(test)]
    pub(crate) fn clone_dir_for_tests(&self) -> PathBuf {
        self.dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use tribune_protocol::merkle::DenseTree;
    use tribune_protocol::poseidon;

    use super::*;

    const DEPTH: usize = 4;

    fn sample_credential(expires_in_days: i64) -> SessionCredential {
        let commitment = poseidon::identity_commitment(Fr::from(3u64), Fr::from(5u64));
        let tree = DenseTree::new(DEPTH, &[Fr::from(1u64), commitment]).unwrap();
        let path = tree.path(1).unwrap();
        let now = Utc::now();
        SessionCredential {
            schema_version: SCHEMA_VERSION,
            identity_commitment: commitment,
            leaf_index: 1,
            merkle_path: path.siblings,
            merkle_root: tree.root(),
            cell_map_root: Fr::from(42u64),
            district_id: "CA-12".into(),
            authority_level: 2,
            verification_method: "passport_nfc".into(),
            created_at: now,
            expires_at: now + Duration::days(expires_in_days),
        }
    }

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials"));
        (dir, store)
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, store) = store();
        let credential = sample_credential(30);
        store.put("alice", &credential, DEPTH).unwrap();

        let loaded = store.get("alice").unwrap();
        assert_eq!(loaded.district_id, "CA-12");
        assert_eq!(loaded.identity_commitment, credential.identity_commitment);
        assert!(store.is_valid("alice"));
    }

    #[test]
    fn expired_credential_reads_as_missing_and_is_deleted() {
        let (_dir, store) = store();
        let mut credential = sample_credential(30);
        credential.expires_at = Utc::now() - Duration::hours(1);
        store.put("alice", &credential, DEPTH).unwrap();

        assert!(store.get("alice").is_none());
        // Lazy cleanup happened; a second read still finds nothing.
        assert!(!store.is_valid("alice"));
    }

    #[test]
    fn schema_mismatch_reads_as_missing() {
        let (_dir, store) = store();
        let mut credential = sample_credential(30);
        store.put("alice", &credential, DEPTH).unwrap();

        credential.schema_version = 0;
        let file = store.dir.join("alice.json");
        fs::write(&file, serde_json::to_string(&credential).unwrap()).unwrap();
        assert!(store.get("alice").is_none());
    }

    #[test]
    fn garbage_file_does_not_crash() {
        let (_dir, store) = store();
        fs::create_dir_all(&store.dir).unwrap();
        fs::write(store.dir.join("alice.json"), "not json").unwrap();
        assert!(store.get("alice").is_none());
    }

    #[test]
    fn rejects_wrong_depth_and_broken_path() {
        let (_dir, store) = store();
        let credential = sample_credential(30);
        assert!(store.put("alice", &credential, DEPTH + 1).is_err());

        let mut broken = credential;
        broken.merkle_root = Fr::from(999u64);
        assert!(store.put("alice", &broken, DEPTH).is_err());
    }

    #[test]
    fn rejects_expiry_beyond_cap() {
        let (_dir, store) = store();
        let credential = sample_credential(MAX_LIFETIME_DAYS + 1);
        assert!(store.put("alice", &credential, DEPTH).is_err());
    }

    #[test]
    fn clear_removes_credential() {
        let (_dir, store) = store();
        store.put("alice", &sample_credential(30), DEPTH).unwrap();
        store.clear("alice").unwrap();
        assert!(store.get("alice").is_none());
    }

    #[test]
    fn rejects_path_traversal_user_ids() {
        let (_dir, store) = store();
        assert!(store.put("../evil", &sample_credential(30), DEPTH).is_err());
    }
}
