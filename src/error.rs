// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use thiserror::Error;

/// Result type of all tree operations.
pub type ArtResult<T> = Result<T, ArtError>;

#[derive(Debug, Error)]
pub enum ArtError {
    /// The tree structure or the local key material contradicts itself or an incoming message.
    #[error("inconsistent state: {0}")]
    InconsistentState(&'static str),

    /// A signature did not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(&'static str),

    /// An argument or message has the wrong shape, size or origin.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("crypto provider failed: {0}")]
    Provider(Box<dyn Error + Send + Sync + 'static>),
}

impl ArtError {
    pub(crate) fn provider<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Provider(Box::new(err))
    }
}

/// Errors which occur while reading or writing the binary wire format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("message ended at byte {offset} while {needed} more bytes were expected")]
    UnexpectedEnd { offset: usize, needed: usize },

    #[error("expected to be at byte {expected} but was at {actual}")]
    WrongOffset { actual: usize, expected: usize },

    #[error("unknown tree node tag {0}")]
    UnknownTag(u8),
}
