//! Poseidon over the BN254 scalar field.
//!
//! One parameter set backs both the native hash and the in-circuit gadget,
//! so the nullifier that appears in a proof's public inputs is derived by
//! the exact construction the relay uses for its own dedup checks. Mixing
//! two constructions here would silently break nullifier uniqueness.

use ark_crypto_primitives::crh::poseidon::TwoToOneCRH;
use ark_crypto_primitives::crh::TwoToOneCRHScheme;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;
use once_cell::sync::Lazy;

use crate::field::Fr;

pub const FULL_ROUNDS: usize = 8;
pub const PARTIAL_ROUNDS: usize = 57;
pub const ALPHA: u64 = 5;
pub const RATE: usize = 2;
pub const CAPACITY: usize = 1;

/// Shared parameter set. Grain-LFSR derivation is deterministic but slow,
/// so it runs once per process.
pub static POSEIDON_CONFIG: Lazy<PoseidonConfig<Fr>> = Lazy::new(|| {
    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        Fr::MODULUS_BIT_SIZE as u64,
        RATE,
        FULL_ROUNDS as u64,
        PARTIAL_ROUNDS as u64,
        0,
    );
    PoseidonConfig::new(FULL_ROUNDS, PARTIAL_ROUNDS, ALPHA, mds, ark, RATE, CAPACITY)
});

/// Two-to-one Poseidon compression.
pub fn hash2(left: Fr, right: Fr) -> Fr {
    TwoToOneCRH::<Fr>::evaluate(&POSEIDON_CONFIG, left, right)
        .expect("poseidon evaluation cannot fail with valid parameters")
}

/// Identity commitment: `H(identity_secret, identity_salt)`.
pub fn identity_commitment(secret: Fr, salt: Fr) -> Fr {
    hash2(secret, salt)
}

/// Nullifier: `H(identity_commitment, action_domain)`.
///
/// The circuit derives the same value from the private inputs; this native
/// form exists for pre-submission dedup and for tests that pin the two
/// constructions together.
pub fn nullifier(commitment: Fr, action_domain: Fr) -> Fr {
    hash2(commitment, action_domain)
}
