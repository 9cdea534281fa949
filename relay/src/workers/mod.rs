//! Post-submission workers.
//!
//! Both workers are asynchronous and best-effort with bounded retries. They
//! read only persisted fields — never plaintext witness data — and are
//! idempotent per submission id, so the startup recovery sweep can re-enqueue
//! anything non-terminal without double effects.

pub mod chain;
pub mod delivery;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use crate::clients::tee::TeeClient;
use crate::clients::verifier::VerifierClient;
use crate::clients::ClientFault;
use crate::config::WorkerSettings;
use crate::storage::{Store, SubmissionStatus};

#[derive(Clone, Debug)]
pub enum Job {
    ChainSubmit(String),
    TeeDeliver(String),
}

/// Post-commit handle into the worker queue. Enqueue failures are logged and
/// left to the recovery sweep; they never block a response.
#[derive(Clone)]
pub struct JobSender(pub(crate) mpsc::Sender<Job>);

impl JobSender {
    pub fn enqueue(&self, job: Job) {
        if let Err(err) = self.0.try_send(job) {
            tracing::warn!(%err, "job queue full or closed; recovery sweep will pick it up");
        }
    }
}

pub struct WorkerHandle {
    pub sender: JobSender,
    pub join: tokio::task::JoinHandle<()>,
}

/// Spawn the worker loop and run the recovery sweep for submissions stranded
/// between commit and enqueue by an earlier crash.
pub fn spawn(
    store: Arc<Store>,
    settings: WorkerSettings,
    verifier: Arc<dyn VerifierClient>,
    tee: Arc<dyn TeeClient>,
) -> WorkerHandle {
    let (tx, mut rx) = mpsc::channel::<Job>(1024);
    let sender = JobSender(tx);

    recovery_sweep(&store, &sender);

    let join = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let store = Arc::clone(&store);
            let verifier = Arc::clone(&verifier);
            let tee = Arc::clone(&tee);
            let settings = settings.clone();
            tokio::spawn(async move {
                match job {
                    Job::ChainSubmit(id) => {
                        chain::run(&store, verifier.as_ref(), &settings, &id).await;
                    }
                    Job::TeeDeliver(id) => {
                        delivery::run(&store, tee.as_ref(), &settings, &id).await;
                    }
                }
            });
        }
    });

    WorkerHandle { sender, join }
}

fn recovery_sweep(store: &Store, sender: &JobSender) {
    match store.list_by_status(SubmissionStatus::Pending) {
        Ok(pending) => {
            for record in pending {
                sender.enqueue(Job::ChainSubmit(record.id.clone()));
                sender.enqueue(Job::TeeDeliver(record.id));
            }
        }
        Err(err) => tracing::error!(%err, "recovery sweep failed to list pending"),
    }
    // Verified submissions still need delivery; delivered ones may still
    // lack an anchoring transaction.
    match store.list_by_status(SubmissionStatus::Verified) {
        Ok(verified) => {
            for record in verified {
                if record.delivered_at.is_none() {
                    sender.enqueue(Job::TeeDeliver(record.id));
                }
            }
        }
        Err(err) => tracing::error!(%err, "recovery sweep failed to list verified"),
    }
    match store.list_by_status(SubmissionStatus::Delivered) {
        Ok(delivered) => {
            for record in delivered {
                if record.on_chain_tx.is_none() {
                    sender.enqueue(Job::ChainSubmit(record.id));
                }
            }
        }
        Err(err) => tracing::error!(%err, "recovery sweep failed to list delivered"),
    }
}

/// Bounded retries with exponential backoff and jitter. `Permanent` faults
/// stop immediately; exhausting retries returns the last transient fault.
pub(crate) async fn with_retries<T, F, Fut>(
    settings: &WorkerSettings,
    mut call: F,
) -> Result<T, ClientFault>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientFault>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(ClientFault::Transient(detail)) if attempt < settings.max_retries => {
                let backoff = settings.base_backoff * 2u32.saturating_pow(attempt);
                let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                tracing::debug!(attempt, detail, "transient fault, backing off");
                tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
                attempt += 1;
            }
            Err(fault) => return Err(fault),
        }
    }
}
