//! Error types for vaforge.

use thiserror::Error;

/// Main error type for vaforge operations.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Invalid option combination, unsupported profile/level or anything else
    /// rejected while the session is being set up.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A header writer or the byte-stream packer ran out of room.
    #[error("Not enough space: {needed_bits} bits needed, {available_bits} available")]
    NoSpace {
        needed_bits: usize,
        available_bits: usize,
    },

    /// The device rejected a query, a submission or a sync.
    #[error("Device error: {0}")]
    Device(String),

    /// Syntax the header writers refuse to approximate.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Broken picture bookkeeping (stale id, missing reference, bad type).
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// No free surface or output buffer.
    #[error("Pool exhausted: {0}")]
    PoolExhausted(&'static str),
}

impl EncodeError {
    pub(crate) fn no_space(needed_bits: usize, available_bits: usize) -> Self {
        EncodeError::NoSpace {
            needed_bits,
            available_bits,
        }
    }
}

/// Result type for vaforge operations.
pub type Result<T> = std::result::Result<T, EncodeError>;
