//! Fixed public-input layout.
//!
//! The vector order is part of the circuit's identity: the verifier, the
//! relay's shape checks, and the prover all index into the same positions.
//! Changing anything here requires bumping [`CIRCUIT_VERSION`].

use crate::error::ProtocolError;
use crate::field::Fr;

pub const CIRCUIT_VERSION: u16 = 1;

/// Registry tree depth the deployed circuit is compiled for.
pub const REFERENCE_TREE_DEPTH: usize = 24;

/// Vector length at the reference depth: two roots, one sibling per level,
/// then nullifier, action domain, authority level.
pub const PUBLIC_INPUT_COUNT: usize = REFERENCE_TREE_DEPTH + 5;

/// Layout, version 1:
///
/// ```text
/// [ user_root, cell_map_root,
///   sibling[0] .. sibling[depth-1],
///   nullifier, action_domain, authority_level ]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicInputs {
    pub user_root: Fr,
    pub cell_map_root: Fr,
    pub siblings: Vec<Fr>,
    pub nullifier: Fr,
    pub action_domain: Fr,
    pub authority_level: u8,
}

impl PublicInputs {
    pub fn expected_len(depth: usize) -> usize {
        depth + 5
    }

    pub fn len(&self) -> usize {
        Self::expected_len(self.siblings.len())
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Flatten into the fixed order consumed by the verifier.
    pub fn to_field_vec(&self) -> Vec<Fr> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self.user_root);
        out.push(self.cell_map_root);
        out.extend_from_slice(&self.siblings);
        out.push(self.nullifier);
        out.push(self.action_domain);
        out.push(Fr::from(u64::from(self.authority_level)));
        out
    }

    /// Parse a flat vector received over the wire against an expected depth.
    pub fn from_field_vec(values: &[Fr], depth: usize) -> Result<Self, ProtocolError> {
        let expected = Self::expected_len(depth);
        if values.len() != expected {
            return Err(ProtocolError::InvalidInput(format!(
                "expected {expected} public inputs for depth {depth}, got {}",
                values.len()
            )));
        }
        let authority_field = values[expected - 1];
        let authority_level = (1u8..=5)
            .find(|k| Fr::from(u64::from(*k)) == authority_field)
            .ok_or_else(|| {
                ProtocolError::InvalidInput("authority level outside 1..=5".into())
            })?;
        Ok(Self {
            user_root: values[0],
            cell_map_root: values[1],
            siblings: values[2..2 + depth].to_vec(),
            nullifier: values[expected - 3],
            action_domain: values[expected - 2],
            authority_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(depth: usize) -> PublicInputs {
        PublicInputs {
            user_root: Fr::from(1u64),
            cell_map_root: Fr::from(2u64),
            siblings: (0..depth as u64).map(|i| Fr::from(100 + i)).collect(),
            nullifier: Fr::from(3u64),
            action_domain: Fr::from(4u64),
            authority_level: 2,
        }
    }

    #[test]
    fn layout_is_stable() {
        let inputs = sample(4);
        let flat = inputs.to_field_vec();
        assert_eq!(flat.len(), 9);
        assert_eq!(flat[0], inputs.user_root);
        assert_eq!(flat[1], inputs.cell_map_root);
        assert_eq!(&flat[2..6], inputs.siblings.as_slice());
        assert_eq!(flat[6], inputs.nullifier);
        assert_eq!(flat[7], inputs.action_domain);
        assert_eq!(flat[8], Fr::from(2u64));
    }

    #[test]
    fn reference_depth_gives_29_elements() {
        assert_eq!(PUBLIC_INPUT_COUNT, 29);
        assert_eq!(sample(REFERENCE_TREE_DEPTH).to_field_vec().len(), 29);
    }

    #[test]
    fn roundtrip() {
        let inputs = sample(6);
        let parsed = PublicInputs::from_field_vec(&inputs.to_field_vec(), 6).unwrap();
        assert_eq!(parsed, inputs);
    }

    #[test]
    fn rejects_wrong_length_and_bad_authority() {
        let inputs = sample(6);
        let flat = inputs.to_field_vec();
        assert!(PublicInputs::from_field_vec(&flat, 5).is_err());

        let mut bad = flat.clone();
        *bad.last_mut().unwrap() = Fr::from(6u64);
        assert!(PublicInputs::from_field_vec(&bad, 6).is_err());

        let mut zero = flat;
        *zero.last_mut().unwrap() = Fr::from(0u64);
        assert!(PublicInputs::from_field_vec(&zero, 6).is_err());
    }
}
