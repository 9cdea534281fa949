//! Groth16 prover.
//!
//! One prover per process, serialized: a second caller gets `ProverBusy`
//! instead of a second multi-hundred-MB proving pass. The first invocation
//! pays a one-time setup cost (seconds on desktop, ~10x on constrained
//! clients); the proving key is cached on disk so later processes skip it.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ark_bn254::Bn254;
use ark_groth16::{Groth16, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
use rand::rngs::OsRng;
use tokio::sync::Mutex;

use tribune_protocol::circuit::MembershipCircuit;
use tribune_protocol::inputs::{PublicInputs, CIRCUIT_VERSION};
use tribune_protocol::merkle::verify_path;
use tribune_protocol::poseidon;
use tribune_protocol::witness::Witness;

use crate::error::ClientError;

/// Monotonic progress in `[0,100]`, delivered best-effort.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Cooperative cancellation, polled at safe points.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ProofBundle {
    /// Compressed Groth16 proof bytes.
    pub proof: Vec<u8>,
    /// The public inputs the proof verifies against, nullifier included.
    pub public_inputs: PublicInputs,
}

struct ProverKeys {
    proving_key: ProvingKey<Bn254>,
    verifying_key: VerifyingKey<Bn254>,
}

pub struct Prover {
    depth: usize,
    cache_dir: PathBuf,
    keys: Mutex<Option<Arc<ProverKeys>>>,
    busy: AtomicBool,
}

/// Clears the busy flag even on early return.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn report(progress: &Option<ProgressFn>, percent: u8) {
    if let Some(cb) = progress {
        cb(percent);
    }
}

impl Prover {
    pub fn new(depth: usize, cache_dir: PathBuf) -> Self {
        Self {
            depth,
            cache_dir,
            keys: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    fn key_path(&self) -> PathBuf {
        self.cache_dir
            .join(format!("membership-v{CIRCUIT_VERSION}-d{}.pk", self.depth))
    }

    /// One-time initialization: load the cached proving key or run the
    /// circuit-specific setup and persist it.
    async fn ensure_keys(&self, progress: &Option<ProgressFn>) -> Result<Arc<ProverKeys>, ClientError> {
        let mut guard = self.keys.lock().await;
        if let Some(keys) = guard.as_ref() {
            return Ok(Arc::clone(keys));
        }

        report(progress, 0);
        let depth = self.depth;
        let path = self.key_path();
        let cache_dir = self.cache_dir.clone();

        let keys = tokio::task::spawn_blocking(move || -> Result<ProverKeys, ClientError> {
            if let Ok(bytes) = fs::read(&path) {
                // Locally generated artifact; skip subgroup re-validation.
                if let Ok(proving_key) =
                    ProvingKey::<Bn254>::deserialize_compressed_unchecked(bytes.as_slice())
                {
                    let verifying_key = proving_key.vk.clone();
                    return Ok(ProverKeys { proving_key, verifying_key });
                }
                // Unreadable cache falls through to a fresh setup.
            }

            let mut rng = OsRng;
            let (proving_key, verifying_key) =
                Groth16::<Bn254>::circuit_specific_setup(MembershipCircuit::blank(depth), &mut rng)
                    .map_err(|e| ClientError::InitFailed(e.to_string()))?;

            fs::create_dir_all(&cache_dir)
                .map_err(|e| ClientError::InitFailed(e.to_string()))?;
            let mut bytes = Vec::new();
            proving_key
                .serialize_compressed(&mut bytes)
                .map_err(|e| ClientError::InitFailed(e.to_string()))?;
            fs::write(&path, &bytes).map_err(|e| ClientError::InitFailed(e.to_string()))?;

            Ok(ProverKeys { proving_key, verifying_key })
        })
        .await
        .map_err(|e| ClientError::InitFailed(format!("setup task failed: {e}")))??;

        report(progress, 30);
        let keys = Arc::new(keys);
        *guard = Some(Arc::clone(&keys));
        Ok(keys)
    }

    /// Generate a proof for `witness` against the assembled `public_inputs`.
    ///
    /// The witness is consumed and zeroized when this returns, success or
    /// not. Partial proofs are never returned: a cancellation observed after
    /// the proving pass still fails with `Cancelled`.
    pub async fn generate_proof(
        &self,
        witness: Witness,
        public_inputs: PublicInputs,
        progress: Option<ProgressFn>,
        cancel: CancelToken,
    ) -> Result<ProofBundle, ClientError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::ProverBusy);
        }
        let _busy = BusyGuard(&self.busy);

        self.check_witness(&witness, &public_inputs)?;

        let keys = self.ensure_keys(&progress).await?;
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        report(&progress, 40);

        let secret = witness.secret_fr()?;
        let salt = witness.salt_fr()?;
        let index_bits = witness.path.index_bits();
        drop(witness); // zeroizes the byte buffers

        let circuit = MembershipCircuit::from_parts(&public_inputs, secret, salt, index_bits);
        let proof = tokio::task::spawn_blocking(move || {
            let mut rng = OsRng;
            Groth16::<Bn254>::prove(&keys.proving_key, circuit, &mut rng)
        })
        .await
        .map_err(|e| ClientError::Internal(format!("proving task failed: {e}")))?
        .map_err(|e| ClientError::Internal(format!("proof generation failed: {e}")))?;

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        report(&progress, 90);

        let mut bytes = Vec::new();
        proof
            .serialize_compressed(&mut bytes)
            .map_err(|e| ClientError::Internal(e.to_string()))?;
        report(&progress, 100);

        Ok(ProofBundle { proof: bytes, public_inputs })
    }

    /// Verifying key for local sanity checks and tests.
    pub async fn verifying_key(&self) -> Result<VerifyingKey<Bn254>, ClientError> {
        Ok(self.ensure_keys(&None).await?.verifying_key.clone())
    }

    /// Structural witness checks; all caller bugs, none recoverable by
    /// retrying.
    fn check_witness(
        &self,
        witness: &Witness,
        public_inputs: &PublicInputs,
    ) -> Result<(), ClientError> {
        if witness.path.depth() != self.depth {
            return Err(ClientError::WitnessInvalid(format!(
                "path depth {} does not match circuit depth {}",
                witness.path.depth(),
                self.depth
            )));
        }
        witness.path.check_bounds()?;
        if public_inputs.siblings != witness.path.siblings {
            return Err(ClientError::WitnessInvalid(
                "public siblings do not match the witness path".into(),
            ));
        }
        let commitment = witness.commitment()?;
        if !verify_path(commitment, &witness.path, public_inputs.user_root) {
            return Err(ClientError::WitnessInvalid(
                "witness path does not reach the claimed root".into(),
            ));
        }
        let expected = poseidon::nullifier(commitment, public_inputs.action_domain);
        if expected != public_inputs.nullifier {
            return Err(ClientError::WitnessInvalid(
                "assembled nullifier does not match the witness".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tribune_protocol::field::{fr_to_bytes, Fr};
    use tribune_protocol::merkle::{DenseTree, MerklePath};

    use super::*;

    const DEPTH: usize = 4;

    fn setup() -> (tempfile::TempDir, Prover, Witness, PublicInputs) {
        let dir = tempfile::tempdir().unwrap();
        let prover = Prover::new(DEPTH, dir.path().join("prover"));

        let secret = Fr::from(1234u64);
        let salt = Fr::from(5678u64);
        let commitment = poseidon::identity_commitment(secret, salt);
        let tree = DenseTree::new(DEPTH, &[Fr::from(1u64), commitment]).unwrap();
        let path = tree.path(1).unwrap();

        let action_domain = Fr::from(777u64);
        let public_inputs = PublicInputs {
            user_root: tree.root(),
            cell_map_root: Fr::from(9u64),
            siblings: path.siblings.clone(),
            nullifier: poseidon::nullifier(commitment, action_domain),
            action_domain,
            authority_level: 2,
        };
        let witness = Witness {
            identity_secret: fr_to_bytes(&secret),
            identity_salt: fr_to_bytes(&salt),
            path,
        };
        (dir, prover, witness, public_inputs)
    }

    #[tokio::test]
    async fn proof_roundtrip_verifies() {
        let (_dir, prover, witness, publics) = setup();

        let progress_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&progress_log);
        let progress: ProgressFn = Arc::new(move |p| log.lock().unwrap().push(p));

        let bundle = prover
            .generate_proof(witness, publics.clone(), Some(progress), CancelToken::new())
            .await
            .unwrap();

        let vk = prover.verifying_key().await.unwrap();
        let proof = ark_groth16::Proof::<Bn254>::deserialize_compressed(bundle.proof.as_slice())
            .unwrap();
        assert!(Groth16::<Bn254>::verify(&vk, &publics.to_field_vec(), &proof).unwrap());

        // Progress was monotonic and reached completion.
        let seen = progress_log.lock().unwrap().clone();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn wrong_depth_is_witness_invalid() {
        let (_dir, prover, _witness, publics) = setup();
        let bad = Witness {
            identity_secret: fr_to_bytes(&Fr::from(1u64)),
            identity_salt: fr_to_bytes(&Fr::from(2u64)),
            path: MerklePath { siblings: vec![Fr::from(0u64); DEPTH + 1], leaf_index: 0 },
        };
        assert!(matches!(
            prover
                .generate_proof(bad, publics, None, CancelToken::new())
                .await,
            Err(ClientError::WitnessInvalid(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_nullifier_is_witness_invalid() {
        let (_dir, prover, witness, mut publics) = setup();
        publics.nullifier = Fr::from(1u64);
        assert!(matches!(
            prover
                .generate_proof(witness, publics, None, CancelToken::new())
                .await,
            Err(ClientError::WitnessInvalid(_))
        ));
    }

    #[tokio::test]
    async fn pre_cancelled_call_fails_cancelled() {
        let (_dir, prover, witness, publics) = setup();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            prover.generate_proof(witness, publics, None, cancel).await,
            Err(ClientError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn key_cache_is_reused_across_instances() {
        let (_dir, prover, witness, publics) = setup();
        let cache_dir = prover.cache_dir.clone();
        prover
            .generate_proof(witness, publics.clone(), None, CancelToken::new())
            .await
            .unwrap();
        assert!(prover.key_path().exists());

        // A second prover over the same cache dir loads instead of re-running
        // setup; its verifying key matches.
        let vk_a = prover.verifying_key().await.unwrap();
        let second = Prover::new(DEPTH, cache_dir);
        let vk_b = second.verifying_key().await.unwrap();
        let mut bytes_a = Vec::new();
        vk_a.serialize_compressed(&mut bytes_a).unwrap();
        let mut bytes_b = Vec::new();
        vk_b.serialize_compressed(&mut bytes_b).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }
}
