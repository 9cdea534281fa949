//! Submission store on redb.
//!
//! One write transaction per logical operation. redb serializes writers, so
//! among concurrent inserts with the same nullifier exactly one commits and
//! the rest observe the existing index entry — the total order the
//! double-action guarantee rests on.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tribune_protocol::blob::EncryptedBlob;

/// id -> bincode(SubmissionRecord)
const SUBMISSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("submissions");
/// nullifier hex -> id. The keyed table IS the uniqueness constraint.
const NULLIFIERS: TableDefinition<&str, &str> = TableDefinition::new("nullifier_index");
/// idempotency key -> id.
const IDEMPOTENCY: TableDefinition<&str, &str> = TableDefinition::new("idempotency_index");
/// "{status}/{id}" -> id, for worker sweeps.
const STATUS_INDEX: TableDefinition<&str, &str> = TableDefinition::new("status_index");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend: {0}")]
    Backend(String),

    #[error("nullifier already consumed")]
    DuplicateNullifier,

    #[error("record not found")]
    NotFound,

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("illegal status transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

macro_rules! backend_from {
    ($($ty:ty),+) => {
        $(impl From<$ty> for StorageError {
            fn from(e: $ty) -> Self {
                StorageError::Backend(e.to_string())
            }
        })+
    };
}

backend_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Verified,
    Delivered,
    Failed,
    FailedDelivery,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Verified => "verified",
            SubmissionStatus::Delivered => "delivered",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::FailedDelivery => "failed_delivery",
        }
    }

    /// Forward-only progression. Failure states are terminal.
    fn rank(&self) -> u8 {
        match self {
            SubmissionStatus::Pending => 0,
            SubmissionStatus::Verified => 1,
            SubmissionStatus::Delivered => 2,
            SubmissionStatus::Failed | SubmissionStatus::FailedDelivery => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub user_id: String,
    pub template_id: String,
    /// Canonical hex; globally unique.
    pub nullifier: String,
    pub action_domain: String,
    /// Keccak-256 over the concatenated big-endian input bytes.
    pub public_inputs_hash: String,
    /// Full vector, needed verbatim by the on-chain relayer.
    pub public_inputs: Vec<String>,
    pub verifier_depth: u32,
    pub proof: Vec<u8>,
    pub encrypted_address_blob: EncryptedBlob,
    pub encrypted_message_blob: EncryptedBlob,
    pub status: SubmissionStatus,
    pub on_chain_tx: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct NewSubmission {
    pub user_id: String,
    pub template_id: String,
    pub nullifier: String,
    pub action_domain: String,
    pub public_inputs_hash: String,
    pub public_inputs: Vec<String>,
    pub verifier_depth: u32,
    pub proof: Vec<u8>,
    pub encrypted_address_blob: EncryptedBlob,
    pub encrypted_message_blob: EncryptedBlob,
    pub idempotency_key: Option<String>,
}

pub enum InsertOutcome {
    Created(SubmissionRecord),
    /// The idempotency key matched an existing row; nothing was written.
    Idempotent(SubmissionRecord),
}

/// Fields a worker may patch alongside a status advance.
#[derive(Default)]
pub struct StatusPatch {
    pub on_chain_tx: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

fn status_key(status: SubmissionStatus, id: &str) -> String {
    format!("{}/{}", status.as_str(), id)
}

fn decode(bytes: &[u8]) -> Result<SubmissionRecord, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn encode(record: &SubmissionRecord) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(record).map_err(|e| StorageError::Corrupt(e.to_string()))
}

pub struct Store {
    db: Arc<Database>,
}

enum InsertAction {
    Created(SubmissionRecord),
    Existing(SubmissionRecord),
    Duplicate,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(SUBMISSIONS)?;
            txn.open_table(NULLIFIERS)?;
            txn.open_table(IDEMPOTENCY)?;
            txn.open_table(STATUS_INDEX)?;
        }
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Atomic insert with nullifier and idempotency uniqueness.
    pub fn insert_submission(&self, new: NewSubmission) -> Result<InsertOutcome, StorageError> {
        let txn = self.db.begin_write()?;
        let action = {
            let mut submissions = txn.open_table(SUBMISSIONS)?;
            let mut nullifiers = txn.open_table(NULLIFIERS)?;
            let mut idempotency = txn.open_table(IDEMPOTENCY)?;
            let mut status_index = txn.open_table(STATUS_INDEX)?;

            let existing_id = match &new.idempotency_key {
                Some(key) => idempotency.get(key.as_str())?.map(|g| g.value().to_string()),
                None => None,
            };
            if let Some(id) = existing_id {
                let record = submissions
                    .get(id.as_str())?
                    .map(|g| decode(g.value()))
                    .transpose()?
                    .ok_or(StorageError::NotFound)?;
                InsertAction::Existing(record)
            } else if nullifiers.get(new.nullifier.as_str())?.is_some() {
                InsertAction::Duplicate
            } else {
                let record = SubmissionRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: new.user_id,
                    template_id: new.template_id,
                    nullifier: new.nullifier,
                    action_domain: new.action_domain,
                    public_inputs_hash: new.public_inputs_hash,
                    public_inputs: new.public_inputs,
                    verifier_depth: new.verifier_depth,
                    proof: new.proof,
                    encrypted_address_blob: new.encrypted_address_blob,
                    encrypted_message_blob: new.encrypted_message_blob,
                    status: SubmissionStatus::Pending,
                    on_chain_tx: None,
                    delivered_at: None,
                    failure_reason: None,
                    idempotency_key: new.idempotency_key,
                    created_at: Utc::now(),
                };
                submissions.insert(record.id.as_str(), encode(&record)?.as_slice())?;
                nullifiers.insert(record.nullifier.as_str(), record.id.as_str())?;
                if let Some(key) = &record.idempotency_key {
                    idempotency.insert(key.as_str(), record.id.as_str())?;
                }
                status_index.insert(
                    status_key(SubmissionStatus::Pending, &record.id).as_str(),
                    record.id.as_str(),
                )?;
                InsertAction::Created(record)
            }
        };
        match action {
            InsertAction::Created(record) => {
                txn.commit()?;
                Ok(InsertOutcome::Created(record))
            }
            InsertAction::Existing(record) => {
                txn.abort()?;
                Ok(InsertOutcome::Idempotent(record))
            }
            InsertAction::Duplicate => {
                txn.abort()?;
                Err(StorageError::DuplicateNullifier)
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<SubmissionRecord>, StorageError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SUBMISSIONS)?;
        let result = table.get(id)?.map(|g| decode(g.value())).transpose();
        result
    }

    pub fn find_by_nullifier(
        &self,
        nullifier: &str,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        let txn = self.db.begin_read()?;
        let index = txn.open_table(NULLIFIERS)?;
        let Some(id) = index.get(nullifier)?.map(|g| g.value().to_string()) else {
            return Ok(None);
        };
        let table = txn.open_table(SUBMISSIONS)?;
        let result = table.get(id.as_str())?.map(|g| decode(g.value())).transpose();
        result
    }

    /// Advance the status rank and merge worker results. A patch whose
    /// status would move backward keeps the current status but still records
    /// `on_chain_tx`/`delivered_at`, so a late verifier result on an
    /// already-delivered submission is not lost.
    pub fn advance_status(
        &self,
        id: &str,
        status: SubmissionStatus,
        patch: StatusPatch,
    ) -> Result<SubmissionRecord, StorageError> {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut submissions = txn.open_table(SUBMISSIONS)?;
            let mut status_index = txn.open_table(STATUS_INDEX)?;

            let mut record = submissions
                .get(id)?
                .map(|g| decode(g.value()))
                .transpose()?
                .ok_or(StorageError::NotFound)?;

            let old_status = record.status;
            if old_status.is_terminal() && status != old_status {
                return Err(StorageError::IllegalTransition {
                    from: old_status.as_str().into(),
                    to: status.as_str().into(),
                });
            }
            if status.rank() > old_status.rank() {
                record.status = status;
            }
            if patch.on_chain_tx.is_some() {
                record.on_chain_tx = patch.on_chain_tx;
            }
            if patch.delivered_at.is_some() {
                record.delivered_at = patch.delivered_at;
            }
            if patch.failure_reason.is_some() {
                record.failure_reason = patch.failure_reason;
            }

            submissions.insert(record.id.as_str(), encode(&record)?.as_slice())?;
            if record.status != old_status {
                status_index.remove(status_key(old_status, &record.id).as_str())?;
                status_index.insert(
                    status_key(record.status, &record.id).as_str(),
                    record.id.as_str(),
                )?;
            }
            record
        };
        txn.commit()?;
        Ok(updated)
    }

    /// All submissions currently in `status`, for worker recovery sweeps.
    pub fn list_by_status(
        &self,
        status: SubmissionStatus,
    ) -> Result<Vec<SubmissionRecord>, StorageError> {
        let txn = self.db.begin_read()?;
        let index = txn.open_table(STATUS_INDEX)?;
        let table = txn.open_table(SUBMISSIONS)?;

        // '0' is the ASCII successor of '/', so this range covers exactly
        // the "{status}/" prefix.
        let start = format!("{}/", status.as_str());
        let end = format!("{}0", status.as_str());

        let mut out = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (_, id) = entry?;
            if let Some(bytes) = table.get(id.value())? {
                out.push(decode(bytes.value())?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;

    use super::*;

    fn blob(tag: &str) -> EncryptedBlob {
        EncryptedBlob {
            ciphertext: format!("ct-{tag}"),
            nonce: "bm9uY2U=".into(),
            ephemeral_public_key: "ZXBr".into(),
            key_id: "kid-a".into(),
            version: 1,
            created_at: Utc::now(),
        }
    }

    fn new_submission(nullifier: &str, idempotency_key: Option<&str>) -> NewSubmission {
        NewSubmission {
            user_id: "alice".into(),
            template_id: "tmpl-1".into(),
            nullifier: nullifier.into(),
            action_domain: "0xdomain".into(),
            public_inputs_hash: "0xhash".into(),
            public_inputs: vec!["0x01".into()],
            verifier_depth: 4,
            proof: vec![1, 2, 3],
            encrypted_address_blob: blob("addr"),
            encrypted_message_blob: blob("msg"),
            idempotency_key: idempotency_key.map(String::from),
        }
    }

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("tribune.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_and_fetch() {
        let (_dir, store) = open_store();
        let InsertOutcome::Created(record) =
            store.insert_submission(new_submission("0xaaa", None)).unwrap()
        else {
            panic!("expected created");
        };
        assert_eq!(record.status, SubmissionStatus::Pending);

        let fetched = store.get(&record.id).unwrap().unwrap();
        assert_eq!(fetched.nullifier, "0xaaa");
        assert_eq!(
            store.find_by_nullifier("0xaaa").unwrap().unwrap().id,
            record.id
        );
    }

    #[test]
    fn duplicate_nullifier_rejected() {
        let (_dir, store) = open_store();
        store.insert_submission(new_submission("0xaaa", None)).unwrap();
        assert!(matches!(
            store.insert_submission(new_submission("0xaaa", None)),
            Err(StorageError::DuplicateNullifier)
        ));
    }

    #[test]
    fn concurrent_same_nullifier_exactly_one_wins() {
        let (_dir, store) = open_store();
        let store = StdArc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = StdArc::clone(&store);
                std::thread::spawn(move || {
                    store.insert_submission(new_submission("0xrace", None))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(StorageError::DuplicateNullifier)))
            .count();
        assert_eq!(created, 1);
        assert_eq!(duplicates, 7);
    }

    #[test]
    fn idempotency_key_returns_existing_row() {
        let (_dir, store) = open_store();
        let InsertOutcome::Created(first) = store
            .insert_submission(new_submission("0xaaa", Some("key-1")))
            .unwrap()
        else {
            panic!("expected created");
        };

        // Same key, even with a different nullifier: the stored row answers.
        let InsertOutcome::Idempotent(second) = store
            .insert_submission(new_submission("0xbbb", Some("key-1")))
            .unwrap()
        else {
            panic!("expected idempotent");
        };
        assert_eq!(first.id, second.id);
        assert!(store.find_by_nullifier("0xbbb").unwrap().is_none());
    }

    #[test]
    fn status_advances_forward_only() {
        let (_dir, store) = open_store();
        let InsertOutcome::Created(record) =
            store.insert_submission(new_submission("0xaaa", None)).unwrap()
        else {
            panic!("expected created");
        };

        let verified = store
            .advance_status(
                &record.id,
                SubmissionStatus::Verified,
                StatusPatch { on_chain_tx: Some("0xtx".into()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(verified.status, SubmissionStatus::Verified);
        assert_eq!(verified.on_chain_tx.as_deref(), Some("0xtx"));

        let delivered = store
            .advance_status(
                &record.id,
                SubmissionStatus::Delivered,
                StatusPatch { delivered_at: Some(Utc::now()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(delivered.status, SubmissionStatus::Delivered);

        // A late "verified" result does not move the status backward but
        // its patch is still merged.
        let late = store
            .advance_status(
                &record.id,
                SubmissionStatus::Verified,
                StatusPatch { on_chain_tx: Some("0xtx2".into()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(late.status, SubmissionStatus::Delivered);
        assert_eq!(late.on_chain_tx.as_deref(), Some("0xtx2"));
    }

    #[test]
    fn terminal_status_is_sticky() {
        let (_dir, store) = open_store();
        let InsertOutcome::Created(record) =
            store.insert_submission(new_submission("0xaaa", None)).unwrap()
        else {
            panic!("expected created");
        };
        store
            .advance_status(&record.id, SubmissionStatus::Failed, StatusPatch::default())
            .unwrap();
        assert!(store
            .advance_status(&record.id, SubmissionStatus::Verified, StatusPatch::default())
            .is_err());
    }

    #[test]
    fn status_index_tracks_transitions() {
        let (_dir, store) = open_store();
        let InsertOutcome::Created(a) =
            store.insert_submission(new_submission("0xaaa", None)).unwrap()
        else {
            panic!()
        };
        let InsertOutcome::Created(_b) =
            store.insert_submission(new_submission("0xbbb", None)).unwrap()
        else {
            panic!()
        };

        assert_eq!(store.list_by_status(SubmissionStatus::Pending).unwrap().len(), 2);

        store
            .advance_status(&a.id, SubmissionStatus::Verified, StatusPatch::default())
            .unwrap();
        assert_eq!(store.list_by_status(SubmissionStatus::Pending).unwrap().len(), 1);
        assert_eq!(store.list_by_status(SubmissionStatus::Verified).unwrap().len(), 1);
    }
}
