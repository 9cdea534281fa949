//! Submission relay.
//!
//! The relay's security contract is narrow: authenticate the session, store
//! what was claimed, make nullifier uniqueness unforgeable, and hand off to
//! the on-chain verifier and the TEE delivery worker. It never verifies
//! proofs and never sees plaintext.

pub mod api;
pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod storage;
pub mod workers;
