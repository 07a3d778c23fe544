use std::collections::TryReserveError;

use thiserror::Error;

use crate::algorithm::Category;

/// The error types that can occur when manipulating this crate.
///
/// Would-block is never reported as an error: resumable operations
/// return [`Poll::Pending`](std::task::Poll::Pending) instead.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The caller violated the API contract, the session was left untouched.
    #[error("Bad argument: {0}")]
    BadArgument(&'static str),

    /// Attempted to consume more bytes than a buffer holds.
    #[error("Attempted to consume {requested} bytes with only {available} available")]
    BufferUnderrun {
        /// Bytes the caller asked to consume.
        requested: usize,
        /// Unread bytes held by the buffer.
        available: usize,
    },

    /// Malformed, unexpected or oversized message from the peer.
    #[error("Protocol violation: {0}")]
    Protocol(&'static str),

    /// No common algorithm found between both sides for a category.
    #[error("Unable to negociate a common {0} algorithm")]
    NoMatchingAlgorithm(Category),

    /// The key agreement computation was rejected.
    #[error("Error in the key-exchange algorithm")]
    KeyExchangeFailed,

    /// The peer's host key or its signature of the exchange could not be trusted.
    #[error("The peer host key is untrusted")]
    UntrustedHost,

    /// A received packet failed its integrity check.
    #[error("Packet integrity check failed")]
    IntegrityFailure,

    /// An allocation failed while growing a buffer.
    #[error(transparent)]
    OutOfMemory(#[from] TryReserveError),

    /// I/O Error, reported by the I/O callbacks.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error while encrypting or decrypting messages.
    #[error("The cipher ended up in an error")]
    Cipher,

    /// The session has been disconnected.
    #[error("The session has been disconnected")]
    Disconnected,
}

impl Error {
    /// Whether this error leaves the session in a terminal state.
    ///
    /// Only caller contract violations are recoverable, every other
    /// error tears the session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BadArgument(_) | Self::BufferUnderrun { .. })
    }
}

impl From<ssh_packet::Error> for Error {
    fn from(err: ssh_packet::Error) -> Self {
        tracing::debug!("Identification parsing failed: {err}");

        Self::Protocol("malformed identification line")
    }
}

impl From<ssh_packet::binrw::Error> for Error {
    fn from(err: ssh_packet::binrw::Error) -> Self {
        tracing::debug!("Message (de)serialization failed: {err}");

        Self::Protocol("malformed message")
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
