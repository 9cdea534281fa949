use thiserror::Error;

/// Errors raised by the shared protocol core.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An input failed structural validation before any hashing took place.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A value claimed to be a field element is not a canonical encoding.
    #[error("invalid field element: {0}")]
    InvalidFieldElement(String),

    /// A witness is structurally inconsistent with the circuit it targets.
    #[error("invalid witness: {0}")]
    WitnessInvalid(String),
}
