//! Error types, following the teacher crate's split between an internal
//! `RaftError` and client-visible structured errors.

use thiserror::Error;

use crate::NodeId;

/// The result type returned by fallible Raft-core operations.
pub type RaftResult<T> = Result<T, RaftError>;

/// Internal errors raised while driving the Raft state machine.
///
/// None of these are sent over the wire directly; client-visible failures
/// are represented by [`ClientError`] instead.
#[derive(Error, Debug)]
pub enum RaftError {
    #[error("node {0} received a message with a malformed or missing field: {1}")]
    MalformedMessage(NodeId, String),

    #[error("node addressed a request to itself that only a leader can serve")]
    NotLeader,
}

/// A structured error returned to a client, per `spec.md` §6.
///
/// Error codes follow the Maelstrom convention used throughout `spec.md`:
/// 11 (not leader / write conflict / outdated leaseholder, retriable),
/// 20 (key not found), 22 (compare-and-swap `from` mismatch).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    #[error("not the leader")]
    NotLeader,
    #[error("write conflict for key")]
    WriteConflict,
    #[error("outdated leaseholder")]
    OutdatedLeaseholder,
    #[error("no known leaseholder yet")]
    NoKnownLeaseholder,
    #[error("key not found")]
    KeyNotFound,
    #[error("compare-and-swap expected value did not match")]
    CasMismatch,
}

impl ClientError {
    /// The Maelstrom error code for this failure.
    pub fn code(self) -> u64 {
        match self {
            ClientError::NotLeader
            | ClientError::WriteConflict
            | ClientError::OutdatedLeaseholder
            | ClientError::NoKnownLeaseholder => 11,
            ClientError::KeyNotFound => 20,
            ClientError::CasMismatch => 22,
        }
    }

    /// The human-readable text carried alongside the error code.
    pub fn text(self) -> &'static str {
        match self {
            ClientError::NotLeader => "only the leader can handle requests",
            ClientError::WriteConflict => "Write conflict for key",
            ClientError::OutdatedLeaseholder => "outdated leaseholder",
            ClientError::NoKnownLeaseholder => "no known leaseholder yet",
            ClientError::KeyNotFound => "key not found",
            ClientError::CasMismatch => "expected value did not match",
        }
    }
}

/// Errors raised while decoding/framing messages on the transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("malformed JSON on the wire: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message body had unrecognized type {0:?}; dropping")]
    UnknownType(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
