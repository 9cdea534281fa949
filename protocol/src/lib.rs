//! Shared core of the proof-bound constituent-messaging pipeline.
//!
//! Everything that must agree bit-for-bit between the client-side prover and
//! the relay lives here: field-element encoding, the Poseidon construction
//! used for commitments and nullifiers, the action-domain builder, Merkle
//! path verification, the membership circuit, and the fixed public-input
//! layout.

pub mod blob;
pub mod circuit;
pub mod domain;
pub mod error;
pub mod field;
pub mod inputs;
pub mod merkle;
pub mod poseidon;
pub mod ratelimit;
pub mod witness;

pub use error::ProtocolError;
pub use field::Fr;
