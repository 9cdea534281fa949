//! TEE delivery handoff (C8b).
//!
//! Terminal delivery failure is the conservative path: the submission is
//! marked `failed_delivery` and the nullifier stays consumed. Refunding the
//! nullifier would need a verifier-side coordinated mechanism that does not
//! exist.

use crate::clients::tee::{DeliveryRequest, TeeClient};
use crate::clients::ClientFault;
use crate::config::WorkerSettings;
use crate::storage::{StatusPatch, Store, SubmissionStatus};

use super::with_retries;

pub async fn run(store: &Store, tee: &dyn TeeClient, settings: &WorkerSettings, id: &str) {
    let record = match store.get(id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(id, "delivery job for unknown submission");
            return;
        }
        Err(err) => {
            tracing::error!(id, %err, "delivery job failed to load submission");
            return;
        }
    };
    if record.delivered_at.is_some() || record.status.is_terminal() {
        return;
    }

    let request = DeliveryRequest {
        submission_id: record.id.clone(),
        tee_key_id: record.encrypted_address_blob.key_id.clone(),
        encrypted_address_blob: record.encrypted_address_blob,
        encrypted_message_blob: record.encrypted_message_blob,
        template_id: record.template_id,
    };

    match with_retries(settings, || tee.deliver(&request)).await {
        Ok(delivered_at) => {
            tracing::info!(id, %delivered_at, "delivery confirmed");
            if let Err(err) = store.advance_status(
                id,
                SubmissionStatus::Delivered,
                StatusPatch { delivered_at: Some(delivered_at), ..Default::default() },
            ) {
                tracing::error!(id, %err, "failed to record delivery");
            }
        }
        Err(ClientFault::Permanent(detail)) => {
            tracing::warn!(id, detail, "permanent delivery failure; nullifier stays consumed");
            if let Err(err) = store.advance_status(
                id,
                SubmissionStatus::FailedDelivery,
                StatusPatch { failure_reason: Some(format!("delivery: {detail}")), ..Default::default() },
            ) {
                tracing::error!(id, %err, "failed to record delivery failure");
            }
        }
        Err(ClientFault::Transient(detail)) => {
            tracing::warn!(id, detail, "tee still unavailable after retries");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::clients::ClientFault;
    use crate::storage::{InsertOutcome, NewSubmission};
    use crate::workers::testutil::{fast_settings, ScriptedTee};

    use super::*;
    use tribune_protocol::blob::EncryptedBlob;

    fn blob() -> EncryptedBlob {
        EncryptedBlob {
            ciphertext: "ct".into(),
            nonce: "bm9uY2U=".into(),
            ephemeral_public_key: "ZXBr".into(),
            key_id: "kid-a".into(),
            version: 1,
            created_at: Utc::now(),
        }
    }

    fn seed(store: &Store) -> String {
        let InsertOutcome::Created(record) = store
            .insert_submission(NewSubmission {
                user_id: "alice".into(),
                template_id: "tmpl".into(),
                nullifier: "0xaaa".into(),
                action_domain: "0xd".into(),
                public_inputs_hash: "0xh".into(),
                public_inputs: vec!["0x01".into()],
                verifier_depth: 4,
                proof: vec![1],
                encrypted_address_blob: blob(),
                encrypted_message_blob: blob(),
                idempotency_key: None,
            })
            .unwrap()
        else {
            panic!()
        };
        record.id
    }

    fn open_store() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("t.redb")).unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn confirmed_delivery_records_timestamp() {
        let (_dir, store) = open_store();
        let id = seed(&store);
        let when = Utc::now();
        let tee = ScriptedTee::new(vec![Ok(when)]);

        run(&store, &tee, &fast_settings(), &id).await;

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Delivered);
        assert_eq!(record.delivered_at, Some(when));
    }

    #[tokio::test]
    async fn transient_then_success() {
        let (_dir, store) = open_store();
        let id = seed(&store);
        let tee = ScriptedTee::new(vec![
            Err(ClientFault::Transient("queue full".into())),
            Ok(Utc::now()),
        ]);

        run(&store, &tee, &fast_settings(), &id).await;

        assert_eq!(tee.calls.load(Ordering::SeqCst), 2);
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Delivered);
    }

    #[tokio::test]
    async fn permanent_failure_is_terminal_and_keeps_nullifier() {
        let (_dir, store) = open_store();
        let id = seed(&store);
        // A key the TEE no longer holds (rotated past its grace window).
        let tee = ScriptedTee::new(vec![Err(ClientFault::Permanent("unknown key id".into()))]);

        run(&store, &tee, &fast_settings(), &id).await;

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::FailedDelivery);
        // The nullifier row is still present: resubmission stays blocked.
        assert!(store.find_by_nullifier("0xaaa").unwrap().is_some());
    }

    #[tokio::test]
    async fn already_delivered_is_a_no_op() {
        let (_dir, store) = open_store();
        let id = seed(&store);
        let tee = ScriptedTee::new(vec![Ok(Utc::now())]);

        run(&store, &tee, &fast_settings(), &id).await;
        run(&store, &tee, &fast_settings(), &id).await;

        assert_eq!(tee.calls.load(Ordering::SeqCst), 1);
    }
}
