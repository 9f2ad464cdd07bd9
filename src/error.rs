//! Crate-level error type.
//!
//! Each boundary keeps its own error enum ([`StoreError`], [`TransportError`],
//! [`PayloadError`]). [`DispatchError`] unifies them so the orchestrator can
//! log every failure with the same `kind` field.

use crate::channel::TransportError;
use crate::payload::PayloadError;
use crate::store::StoreError;

/// Coarse classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Store query or update failed.
    Store,
    /// Channel adapter call failed or was rejected.
    Transport,
    /// Item payload could not be decoded.
    Payload,
}

impl ErrorKind {
    /// Lowercase name used as a structured log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Transport => "transport",
            Self::Payload => "payload",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure raised while dispatching.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Store failure; aborts the current loop iteration.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Delivery failure; fails the item and the batch continues.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Undecodable payload; fails the item and the batch continues.
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl DispatchError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(_) => ErrorKind::Store,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Payload(_) => ErrorKind::Payload,
        }
    }
}
