//! On-chain relayer (C8a).

use crate::clients::verifier::VerifierClient;
use crate::clients::ClientFault;
use crate::config::WorkerSettings;
use crate::storage::{StatusPatch, Store, SubmissionStatus};

use super::with_retries;

pub async fn run(store: &Store, verifier: &dyn VerifierClient, settings: &WorkerSettings, id: &str) {
    let record = match store.get(id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(id, "chain job for unknown submission");
            return;
        }
        Err(err) => {
            tracing::error!(id, %err, "chain job failed to load submission");
            return;
        }
    };
    if record.on_chain_tx.is_some() || record.status.is_terminal() {
        return;
    }

    // Pre-flight read: a nullifier that is already anchored means some
    // earlier attempt landed; submitting again only burns gas.
    match with_retries(settings, || verifier.is_nullifier_used(&record.nullifier)).await {
        Ok(true) => {
            tracing::info!(id, "nullifier already anchored; marking verified");
            advance(store, id, SubmissionStatus::Verified, StatusPatch::default());
            return;
        }
        Ok(false) => {}
        Err(fault) => {
            fail_or_leave(store, id, "nullifier pre-check", fault);
            return;
        }
    }

    match with_retries(settings, || {
        verifier.submit_proof(&record.proof, &record.public_inputs)
    })
    .await
    {
        Ok(tx_hash) => {
            tracing::info!(id, %tx_hash, "proof anchored");
            advance(
                store,
                id,
                SubmissionStatus::Verified,
                StatusPatch { on_chain_tx: Some(tx_hash), ..Default::default() },
            );
        }
        Err(fault) => fail_or_leave(store, id, "proof submission", fault),
    }
}

fn advance(store: &Store, id: &str, status: SubmissionStatus, patch: StatusPatch) {
    if let Err(err) = store.advance_status(id, status, patch) {
        tracing::error!(id, %err, "failed to record chain result");
    }
}

/// Permanent faults mark the submission failed; exhausted transients leave
/// it as-is for the next recovery sweep.
fn fail_or_leave(store: &Store, id: &str, stage: &str, fault: ClientFault) {
    match fault {
        ClientFault::Permanent(detail) => {
            tracing::warn!(id, stage, detail, "permanent verifier failure");
            advance(
                store,
                id,
                SubmissionStatus::Failed,
                StatusPatch { failure_reason: Some(format!("{stage}: {detail}")), ..Default::default() },
            );
        }
        ClientFault::Transient(detail) => {
            tracing::warn!(id, stage, detail, "verifier still unavailable after retries");
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
    use crate::workers::testutil::{fast_settings, ScriptedVerifier};

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

    fn seed(store: &Store, nullifier: &str) -> String {
        let InsertOutcome::Created(record) = store
            .insert_submission(NewSubmission {
                user_id: "alice".into(),
                template_id: "tmpl".into(),
                nullifier: nullifier.into(),
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
    async fn success_records_tx_and_verifies() {
        let (_dir, store) = open_store();
        let id = seed(&store, "0xaaa");
        let verifier = ScriptedVerifier::new(false, vec![Ok("0xtx1".into())]);

        run(&store, &verifier, &fast_settings(), &id).await;

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Verified);
        assert_eq!(record.on_chain_tx.as_deref(), Some("0xtx1"));
    }

    #[tokio::test]
    async fn transient_faults_are_retried() {
        let (_dir, store) = open_store();
        let id = seed(&store, "0xaaa");
        let verifier = ScriptedVerifier::new(
            false,
            vec![
                Err(ClientFault::Transient("503".into())),
                Err(ClientFault::Transient("503".into())),
                Ok("0xtx2".into()),
            ],
        );

        run(&store, &verifier, &fast_settings(), &id).await;

        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Verified);
    }

    #[tokio::test]
    async fn permanent_fault_marks_failed() {
        let (_dir, store) = open_store();
        let id = seed(&store, "0xaaa");
        let verifier =
            ScriptedVerifier::new(false, vec![Err(ClientFault::Permanent("bad proof".into()))]);

        run(&store, &verifier, &fast_settings(), &id).await;

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Failed);
        assert!(record.failure_reason.unwrap().contains("bad proof"));
    }

    #[tokio::test]
    async fn exhausted_transients_leave_pending_for_sweep() {
        let (_dir, store) = open_store();
        let id = seed(&store, "0xaaa");
        let verifier = ScriptedVerifier::new(
            false,
            (0..10)
                .map(|_| Err(ClientFault::Transient("503".into())))
                .collect(),
        );

        run(&store, &verifier, &fast_settings(), &id).await;

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn already_anchored_nullifier_skips_submission() {
        let (_dir, store) = open_store();
        let id = seed(&store, "0xaaa");
        let verifier = ScriptedVerifier::new(true, vec![]);

        run(&store, &verifier, &fast_settings(), &id).await;

        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, SubmissionStatus::Verified);
        assert!(record.on_chain_tx.is_none());
    }

    #[tokio::test]
    async fn idempotent_on_submission_id() {
        let (_dir, store) = open_store();
        let id = seed(&store, "0xaaa");
        let verifier = ScriptedVerifier::new(false, vec![Ok("0xtx1".into())]);

        run(&store, &verifier, &fast_settings(), &id).await;
        run(&store, &verifier, &fast_settings(), &id).await;

        // The second run saw on_chain_tx set and did nothing.
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }
}
