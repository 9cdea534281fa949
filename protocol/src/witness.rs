//! Transient private inputs to a membership proof.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ProtocolError;
use crate::field::{fr_from_bytes, Fr};
use crate::merkle::MerklePath;
use crate::poseidon;

/// Private inputs, held only for the duration of one proof.
///
/// The secret material is carried as raw big-endian bytes so the buffers can
/// be wiped when the witness is dropped; the field-element copies made
/// during proving are cleaned up best-effort by the prover.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Witness {
    pub identity_secret: [u8; 32],
    pub identity_salt: [u8; 32],
    #[zeroize(skip)]
    pub path: MerklePath,
}

impl Witness {
    pub fn secret_fr(&self) -> Result<Fr, ProtocolError> {
        fr_from_bytes(&self.identity_secret)
    }

    pub fn salt_fr(&self) -> Result<Fr, ProtocolError> {
        fr_from_bytes(&self.identity_salt)
    }

    /// `H(secret, salt)` — the leaf this witness claims membership for.
    pub fn commitment(&self) -> Result<Fr, ProtocolError> {
        Ok(poseidon::identity_commitment(self.secret_fr()?, self.salt_fr()?))
    }
}
