// Error taxonomy for parley
//
// Every fallible client operation fails with one of three kinds:
// - Validation: rejected locally before any network call
// - Protocol: the peer rejected us; recoverable by retry or a new code
// - Transport: the peer was unreachable or answered with an unknown code

use thiserror::Error;

use crate::pairing::CODE_LEN;

/// Classification of a failure, used to decide how it is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Protocol,
    Transport,
}

/// Errors from the pairing handshake
#[derive(Debug, Error, PartialEq)]
pub enum PairError {
    /// The code must be exactly six ASCII digits; rejected before any
    /// network call.
    #[error("pairing code must be exactly {CODE_LEN} digits")]
    MalformedCode,

    /// The presented code is wrong, expired, superseded or already used
    #[error("pairing code is invalid or already used")]
    InvalidCode,

    /// The peer could not be reached on the local network
    #[error("peer is unreachable")]
    PeerUnreachable,

    /// The peer answered but the key material could not be processed
    #[error("key agreement failed: {0}")]
    Handshake(String),

    #[error("pairing failed: {0}")]
    Transport(String),
}

impl PairError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PairError::MalformedCode => ErrorKind::Validation,
            PairError::InvalidCode => ErrorKind::Protocol,
            PairError::PeerUnreachable => ErrorKind::Protocol,
            PairError::Handshake(_) => ErrorKind::Transport,
            PairError::Transport(_) => ErrorKind::Transport,
        }
    }
}

/// Errors from sending a message
#[derive(Debug, Error, PartialEq)]
pub enum SendError {
    /// Body length outside 1..=250 characters; rejected before any
    /// network call and without a local echo.
    #[error("message body must be between 1 and 250 characters, got {0}")]
    InvalidLength(usize),

    /// The peer is not currently reachable; the input is preserved so the
    /// user can retry.
    #[error("peer is offline")]
    PeerOffline,

    #[error("send failed: {0}")]
    Transport(String),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::InvalidLength(_) => ErrorKind::Validation,
            SendError::PeerOffline => ErrorKind::Protocol,
            SendError::Transport(_) => ErrorKind::Transport,
        }
    }
}

/// Errors from a history fetch
#[derive(Debug, Error, PartialEq)]
pub enum FetchError {
    #[error("history fetch failed: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}
