//! Merkle membership paths over Poseidon.
//!
//! The district registry owns tree construction; this module only recomputes
//! roots from paths, which is all the client and relay ever need.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::field::Fr;
use crate::poseidon;

/// Ordered sibling hashes from leaf to root, plus the leaf position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    #[serde(with = "crate::field::serde_hex_vec")]
    pub siblings: Vec<Fr>,
    pub leaf_index: u32,
}

impl MerklePath {
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// The leaf index must address a slot that exists at this depth.
    pub fn check_bounds(&self) -> Result<(), ProtocolError> {
        let depth = self.depth();
        if depth == 0 || depth > 32 {
            return Err(ProtocolError::WitnessInvalid(format!(
                "unsupported tree depth {depth}"
            )));
        }
        if u64::from(self.leaf_index) >= 1u64 << depth {
            return Err(ProtocolError::WitnessInvalid(format!(
                "leaf index {} out of range for depth {depth}",
                self.leaf_index
            )));
        }
        Ok(())
    }

    /// Recompute the root for `leaf` along this path. Bit `i` of the leaf
    /// index selects the side at level `i`.
    pub fn root(&self, leaf: Fr) -> Fr {
        let mut node = leaf;
        for (level, sibling) in self.siblings.iter().enumerate() {
            let node_is_right = (self.leaf_index >> level) & 1 == 1;
            node = if node_is_right {
                poseidon::hash2(*sibling, node)
            } else {
                poseidon::hash2(node, *sibling)
            };
        }
        node
    }

    pub fn index_bits(&self) -> Vec<bool> {
        (0..self.depth())
            .map(|level| (self.leaf_index >> level) & 1 == 1)
            .collect()
    }
}

pub fn verify_path(leaf: Fr, path: &MerklePath, expected_root: Fr) -> bool {
    path.root(leaf) == expected_root
}

/// Fully materialized tree of fixed depth, zero-padded.
///
/// The production registry maintains its own trees; this exists for tests
/// and local tooling that need consistent (root, path) pairs.
pub struct DenseTree {
    depth: usize,
    levels: Vec<Vec<Fr>>,
}

impl DenseTree {
    pub fn new(depth: usize, leaves: &[Fr]) -> Result<Self, ProtocolError> {
        if depth == 0 || depth > 32 {
            return Err(ProtocolError::InvalidInput(format!(
                "unsupported tree depth {depth}"
            )));
        }
        let capacity = 1usize << depth;
        if leaves.len() > capacity {
            return Err(ProtocolError::InvalidInput(format!(
                "{} leaves exceed capacity {capacity}",
                leaves.len()
            )));
        }
        let mut level: Vec<Fr> = leaves.to_vec();
        level.resize(capacity, Fr::from(0u64));

        let mut levels = vec![level];
        for _ in 0..depth {
            let below = levels.last().expect("levels is never empty");
            let above: Vec<Fr> = below
                .chunks(2)
                .map(|pair| poseidon::hash2(pair[0], pair[1]))
                .collect();
            levels.push(above);
        }
        Ok(Self { depth, levels })
    }

    pub fn root(&self) -> Fr {
        self.levels[self.depth][0]
    }

    pub fn path(&self, leaf_index: u32) -> Result<MerklePath, ProtocolError> {
        if u64::from(leaf_index) >= 1u64 << self.depth {
            return Err(ProtocolError::InvalidInput(format!(
                "leaf index {leaf_index} out of range"
            )));
        }
        let mut siblings = Vec::with_capacity(self.depth);
        let mut index = leaf_index as usize;
        for level in 0..self.depth {
            siblings.push(self.levels[level][index ^ 1]);
            index >>= 1;
        }
        Ok(MerklePath { siblings, leaf_index })
    }
}
