//! Crypto and identifier primitives for PEPPER contact tracing.
//!
//! # Modules
//!
//! - [`crypto`]: X25519 key pairs, shared secrets, PET derivation
//! - [`ebid`]: the sliced, XOR-reconstructible ephemeral identifier
//! - [`types`]: shared wire/data types (contacts, epoch summaries, SID/CID)
//! - [`error`]: error types

pub mod crypto;
pub mod ebid;
pub mod error;
pub mod types;

pub use error::{Error, Result};
