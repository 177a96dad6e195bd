use std::io;

use thiserror::Error;

/// Errors raised by the sealing primitive.
#[derive(Debug, Error)]
pub enum SealError {
    /// A protected memory region could not be allocated, locked or protected.
    #[error("protected memory operation failed: {0}")]
    Memory(#[from] io::Error),

    /// The AEAD cipher rejected the operation, usually because the
    /// sealed blob does not authenticate.
    #[error("cryptographic operation failed")]
    Crypto,

    /// The sealed blob is too short to hold a nonce and a tag.
    #[error("sealed blob is malformed: {0}")]
    Malformed(&'static str),

    /// The unsealed plaintext does not have the recorded length.
    #[error("unsealed {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl From<ring::error::Unspecified> for SealError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::Crypto
    }
}

/// Errors that can occur while sealing or unsealing secrets.
///
/// All of them are local and synchronous: they signal caller misuse or a
/// failing sealing primitive, retrying does not help.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is absent.
    #[error("input cannot be null")]
    NullInput,

    /// The input has no elements.
    #[error("input cannot be empty")]
    EmptyInput,

    /// The requested representation is neither bytes nor chars.
    #[error("the type '{0}' is not supported")]
    UnsupportedType(&'static str),

    /// The destination buffer does not match the secret length.
    #[error("buffer holds {actual} bytes, the secret holds {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The secret has been disposed.
    #[error("secret has been disposed")]
    InvalidState,

    /// The sealing primitive failed.
    #[error("sealing failed: {0}")]
    SealingFailure(#[from] SealError),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::SealingFailure(SealError::Memory(err))
    }
}

/// Result type for sealing operations.
pub type Result<T> = std::result::Result<T, Error>;
