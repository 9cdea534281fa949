//! Groth16 membership circuit.
//!
//! Statement: the prover knows `(secret, salt, index_bits)` such that
//! `H(secret, salt)` sits at the indexed position of the Poseidon Merkle
//! tree rooted at `user_root`, the claimed authority level lies in `1..=5`,
//! and `nullifier == H(H(secret, salt), action_domain)`. The nullifier is
//! derived *inside* the circuit so the public output is guaranteed to
//! correspond to the private inputs.
//!
//! Instance variables are allocated in the exact order of
//! [`crate::inputs::PublicInputs::to_field_vec`].

use ark_crypto_primitives::crh::poseidon::constraints::{CRHParametersVar, TwoToOneCRHGadget};
use ark_crypto_primitives::crh::TwoToOneCRHSchemeGadget;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::ns;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

use crate::field::Fr;
use crate::inputs::PublicInputs;
use crate::poseidon::POSEIDON_CONFIG;

#[derive(Clone)]
pub struct MembershipCircuit {
    // Public, in layout order.
    pub user_root: Fr,
    pub cell_map_root: Fr,
    pub siblings: Vec<Fr>,
    pub nullifier: Fr,
    pub action_domain: Fr,
    pub authority_level: Fr,

    // Private.
    pub identity_secret: Fr,
    pub identity_salt: Fr,
    pub index_bits: Vec<bool>,
}

impl MembershipCircuit {
    /// Shape-only instance for key generation. The constraint structure
    /// depends only on the depth, never on assigned values.
    pub fn blank(depth: usize) -> Self {
        let zero = Fr::from(0u64);
        Self {
            user_root: zero,
            cell_map_root: zero,
            siblings: vec![zero; depth],
            nullifier: zero,
            action_domain: zero,
            authority_level: zero,
            identity_secret: zero,
            identity_salt: zero,
            index_bits: vec![false; depth],
        }
    }

    pub fn from_parts(
        publics: &PublicInputs,
        identity_secret: Fr,
        identity_salt: Fr,
        index_bits: Vec<bool>,
    ) -> Self {
        Self {
            user_root: publics.user_root,
            cell_map_root: publics.cell_map_root,
            siblings: publics.siblings.clone(),
            nullifier: publics.nullifier,
            action_domain: publics.action_domain,
            authority_level: Fr::from(u64::from(publics.authority_level)),
            identity_secret,
            identity_salt,
            index_bits,
        }
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

impl ConstraintSynthesizer<Fr> for MembershipCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let params = CRHParametersVar::new_constant(ns!(cs, "poseidon"), &*POSEIDON_CONFIG)?;

        let user_root = FpVar::new_input(ns!(cs, "user_root"), || Ok(self.user_root))?;
        // The geographic snapshot root carries no constraint of its own; it
        // is an instance variable so the proof is bound to one snapshot.
        let _cell_map_root = FpVar::new_input(ns!(cs, "cell_map_root"), || Ok(self.cell_map_root))?;
        let mut siblings = Vec::with_capacity(self.siblings.len());
        for value in &self.siblings {
            siblings.push(FpVar::new_input(ns!(cs, "sibling"), || Ok(*value))?);
        }
        let nullifier = FpVar::new_input(ns!(cs, "nullifier"), || Ok(self.nullifier))?;
        let action_domain = FpVar::new_input(ns!(cs, "action_domain"), || Ok(self.action_domain))?;
        let authority = FpVar::new_input(ns!(cs, "authority_level"), || Ok(self.authority_level))?;

        let secret = FpVar::new_witness(ns!(cs, "identity_secret"), || Ok(self.identity_secret))?;
        let salt = FpVar::new_witness(ns!(cs, "identity_salt"), || Ok(self.identity_salt))?;
        let mut bits = Vec::with_capacity(self.index_bits.len());
        for bit in &self.index_bits {
            bits.push(Boolean::new_witness(ns!(cs, "index_bit"), || Ok(*bit))?);
        }

        let commitment = TwoToOneCRHGadget::<Fr>::evaluate(&params, &secret, &salt)?;

        // Walk leaf to root; each index bit says whether our node is the
        // right child at that level.
        let mut node = commitment.clone();
        for (bit, sibling) in bits.iter().zip(siblings.iter()) {
            let left = FpVar::conditionally_select(bit, sibling, &node)?;
            let right = FpVar::conditionally_select(bit, &node, sibling)?;
            node = TwoToOneCRHGadget::<Fr>::evaluate(&params, &left, &right)?;
        }
        node.enforce_equal(&user_root)?;

        let derived = TwoToOneCRHGadget::<Fr>::evaluate(&params, &commitment, &action_domain)?;
        derived.enforce_equal(&nullifier)?;

        // (a-1)(a-2)(a-3)(a-4)(a-5) == 0  <=>  authority ∈ {1,..,5}.
        let mut product = FpVar::constant(Fr::from(1u64));
        for k in 1u64..=5 {
            product *= &authority - FpVar::constant(Fr::from(k));
        }
        product.enforce_equal(&FpVar::zero())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ark_bn254::Bn254;
    use ark_groth16::Groth16;
    use ark_relations::r1cs::ConstraintSystem;
    use ark_snark::{CircuitSpecificSetupSNARK, SNARK};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::merkle::DenseTree;
    use crate::poseidon;

    use super::*;

    const DEPTH: usize = 4;

    fn satisfied_circuit() -> (MembershipCircuit, PublicInputs) {
        let secret = Fr::from(1234u64);
        let salt = Fr::from(5678u64);
        let commitment = poseidon::identity_commitment(secret, salt);

        let leaves = vec![Fr::from(10u64), commitment, Fr::from(30u64)];
        let tree = DenseTree::new(DEPTH, &leaves).unwrap();
        let path = tree.path(1).unwrap();

        let action_domain = Fr::from(777u64);
        let publics = PublicInputs {
            user_root: tree.root(),
            cell_map_root: Fr::from(9u64),
            siblings: path.siblings.clone(),
            nullifier: poseidon::nullifier(commitment, action_domain),
            action_domain,
            authority_level: 3,
        };
        let circuit =
            MembershipCircuit::from_parts(&publics, secret, salt, path.index_bits());
        (circuit, publics)
    }

    fn is_satisfied(circuit: MembershipCircuit) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    #[test]
    fn valid_witness_satisfies() {
        let (circuit, _) = satisfied_circuit();
        assert!(is_satisfied(circuit));
    }

    #[test]
    fn wrong_nullifier_unsatisfiable() {
        let (mut circuit, _) = satisfied_circuit();
        circuit.nullifier = Fr::from(1u64);
        assert!(!is_satisfied(circuit));
    }

    #[test]
    fn wrong_root_unsatisfiable() {
        let (mut circuit, _) = satisfied_circuit();
        circuit.user_root = Fr::from(1u64);
        assert!(!is_satisfied(circuit));
    }

    #[test]
    fn authority_out_of_bounds_unsatisfiable() {
        for bad in [0u64, 6, 100] {
            let (mut circuit, _) = satisfied_circuit();
            circuit.authority_level = Fr::from(bad);
            assert!(!is_satisfied(circuit), "authority {bad}");
        }
    }

    #[test]
    fn in_circuit_nullifier_matches_native() {
        // The conformance the deployment depends on: the circuit accepts
        // exactly the nullifier the native hash produces, nothing else.
        let (circuit, publics) = satisfied_circuit();
        assert!(is_satisfied(circuit.clone()));

        let (mut shifted, _) = satisfied_circuit();
        shifted.nullifier = poseidon::hash2(publics.nullifier, Fr::from(0u64));
        assert!(!is_satisfied(shifted));
    }

    #[test]
    fn groth16_roundtrip() {
        let mut rng = StdRng::seed_from_u64(42);
        let (pk, vk) = Groth16::<Bn254>::circuit_specific_setup(
            MembershipCircuit::blank(DEPTH),
            &mut rng,
        )
        .unwrap();

        let (circuit, publics) = satisfied_circuit();
        let proof = Groth16::<Bn254>::prove(&pk, circuit, &mut rng).unwrap();

        let flat = publics.to_field_vec();
        assert!(Groth16::<Bn254>::verify(&vk, &flat, &proof).unwrap());

        // Tampered action domain must not verify.
        let mut tampered = flat.clone();
        tampered[DEPTH + 3] = Fr::from(1u64);
        assert!(!Groth16::<Bn254>::verify(&vk, &tampered, &proof).unwrap());
    }
}
