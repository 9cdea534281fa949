//! Action-domain builder.
//!
//! The action domain is the scoping scalar that enters the proof's public
//! inputs and, through the nullifier, decides what "once" means: the
//! recipient subdivision is hashed in, so one identity may act once per
//! recipient, not merely once per template.

use ark_ff::PrimeField;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::ProtocolError;
use crate::field::Fr;

/// Length cap for every string component.
pub const MAX_COMPONENT_LEN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JurisdictionType {
    Federal,
    State,
    Local,
    International,
}

impl JurisdictionType {
    pub fn tag(&self) -> &'static str {
        match self {
            JurisdictionType::Federal => "federal",
            JurisdictionType::State => "state",
            JurisdictionType::Local => "local",
            JurisdictionType::International => "international",
        }
    }

    /// Jurisdictions below the national level address a specific office and
    /// must carry a non-empty recipient subdivision.
    pub fn requires_subdivision(&self) -> bool {
        matches!(self, JurisdictionType::State | JurisdictionType::Local)
    }
}

impl std::str::FromStr for JurisdictionType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "federal" => Ok(JurisdictionType::Federal),
            "state" => Ok(JurisdictionType::State),
            "local" => Ok(JurisdictionType::Local),
            "international" => Ok(JurisdictionType::International),
            other => Err(ProtocolError::InvalidInput(format!(
                "unknown jurisdiction type: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ActionDomainParams {
    /// ISO 3166-1 alpha-2, uppercase.
    pub country: String,
    pub jurisdiction: JurisdictionType,
    pub recipient_subdivision: String,
    pub template_id: String,
    pub session_id: String,
}

/// The permitted alphabet for free-form components. Restricting inputs to
/// this ASCII set fixes the canonical form, so no Unicode normalization pass
/// can change what gets hashed.
fn permitted_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn check_component(label: &str, value: &str, allow_empty: bool) -> Result<(), ProtocolError> {
    if value.is_empty() && !allow_empty {
        return Err(ProtocolError::InvalidInput(format!("{label} must not be empty")));
    }
    if value.len() > MAX_COMPONENT_LEN {
        return Err(ProtocolError::InvalidInput(format!(
            "{label} exceeds {MAX_COMPONENT_LEN} bytes"
        )));
    }
    if !value.chars().all(permitted_char) {
        return Err(ProtocolError::InvalidInput(format!(
            "{label} contains characters outside the permitted set"
        )));
    }
    Ok(())
}

/// Deterministic scope scalar for one (campaign, recipient, session) tuple.
///
/// Components are framed with u16 big-endian length prefixes and hashed with
/// Keccak-256; the digest is read as a big-endian integer and reduced mod
/// the BN254 scalar modulus `p`. Since `2^256 / p ≈ 5.8`, every residue has
/// 5 or 6 preimages among 256-bit values, so two distinct digests collide
/// with probability ~`p^-1` — the bound the nullifier scheme needs.
pub fn build_action_domain(params: &ActionDomainParams) -> Result<Fr, ProtocolError> {
    if params.country.len() != 2
        || !params.country.chars().all(|c| c.is_ascii_uppercase())
    {
        return Err(ProtocolError::InvalidInput(
            "country must be a 2-letter uppercase code".into(),
        ));
    }
    check_component(
        "recipient_subdivision",
        &params.recipient_subdivision,
        !params.jurisdiction.requires_subdivision(),
    )?;
    check_component("template_id", &params.template_id, false)?;
    check_component("session_id", &params.session_id, false)?;

    let mut hasher = Keccak256::new();
    for part in [
        params.country.as_str(),
        params.jurisdiction.tag(),
        params.recipient_subdivision.as_str(),
        params.template_id.as_str(),
        params.session_id.as_str(),
    ] {
        hasher.update((part.len() as u16).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    Ok(Fr::from_be_bytes_mod_order(&digest))
}
