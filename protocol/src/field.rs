//! Canonical wire encoding for BN254 scalar-field elements.
//!
//! Field elements cross process boundaries as `0x`-prefixed, 64-character,
//! big-endian hex. Decoding is strict: a value at or above the modulus is
//! rejected rather than silently reduced, so a relay and a client can never
//! disagree about what a submitted input "really" was.

use ark_ff::{BigInteger, PrimeField};

use crate::error::ProtocolError;

pub use ark_bn254::Fr;

/// Serialized size of one field element.
pub const FIELD_BYTES: usize = 32;

/// Big-endian bytes of a field element, left-padded to 32 bytes.
pub fn fr_to_bytes(value: &Fr) -> [u8; FIELD_BYTES] {
    let repr = value.into_bigint().to_bytes_be();
    let mut out = [0u8; FIELD_BYTES];
    out[FIELD_BYTES - repr.len()..].copy_from_slice(&repr);
    out
}

pub fn fr_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_bytes(value)))
}

/// Strict decode: exactly 32 big-endian bytes, below the modulus.
pub fn fr_from_bytes(bytes: &[u8; FIELD_BYTES]) -> Result<Fr, ProtocolError> {
    let modulus = Fr::MODULUS.to_bytes_be();
    if bytes.as_slice() >= modulus.as_slice() {
        return Err(ProtocolError::InvalidFieldElement(
            "value is not reduced below the field modulus".into(),
        ));
    }
    Ok(Fr::from_be_bytes_mod_order(bytes))
}

pub fn fr_from_hex(input: &str) -> Result<Fr, ProtocolError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() != FIELD_BYTES * 2 {
        return Err(ProtocolError::InvalidFieldElement(format!(
            "expected {} hex characters, got {}",
            FIELD_BYTES * 2,
            stripped.len()
        )));
    }
    let raw = hex::decode(stripped)
        .map_err(|e| ProtocolError::InvalidFieldElement(format!("bad hex: {e}")))?;
    let mut bytes = [0u8; FIELD_BYTES];
    bytes.copy_from_slice(&raw);
    fr_from_bytes(&bytes)
}

/// Serde adapter for a single `Fr` encoded as hex.
pub mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{fr_from_hex, fr_to_hex, Fr};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&fr_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let raw = String::deserialize(deserializer)?;
        fr_from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Vec<Fr>` encoded as hex strings.
pub mod serde_hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{fr_from_hex, fr_to_hex, Fr};

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(fr_to_hex))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(deserializer)?;
        raw.iter()
            .map(|s| fr_from_hex(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
