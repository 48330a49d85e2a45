//! Error types shared by the crypto and EBID layers

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Crypto and EBID error types
#[derive(Debug, Error)]
pub enum Error {
    /// Random number generation failed while creating a key pair
    #[error("key pair generation failed")]
    KeyGeneration,

    /// `gen_pet_pair` was called with identical public key and peer EBID
    #[error("pet derivation requires distinct peer identity")]
    IdenticalPeer,

    /// Fewer than three of the four EBID parts are present
    #[error("not enough slices to reconstruct EBID")]
    NeedMoreSlices,

    /// A slice index outside 0..=3 was requested
    #[error("invalid EBID slice index: {0}")]
    InvalidSliceIndex(u8),

    /// A slice payload had the wrong length for its index
    #[error("invalid slice length for index {index}: expected {expected}, got {got}")]
    InvalidSliceLength {
        index: u8,
        expected: usize,
        got: usize,
    },
}
