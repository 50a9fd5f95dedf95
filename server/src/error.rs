//! Server-side error types
//!
//! Client mistakes are not errors here; those travel back over the wire as
//! [`shared::RejectReason`] values. This type covers the conditions that are
//! genuinely the server's problem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The difficulty table produced a prime range with no primes in it.
    /// Indicates broken configuration, not a runtime user error.
    #[error("no usable primes below bound {bound}")]
    EmptyPrimeRange { bound: u64 },

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}
