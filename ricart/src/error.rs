//! # Summary
//!
//! Errors surfaced by the mutual exclusion engine. Transport failures are
//! retryable; protocol anomalies indicate a buggy or confused sender and are
//! rejected without touching local state.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("peer {0} is unreachable")]
    PeerUnreachable(usize),

    #[error("process {0} is not in the membership table")]
    UnknownProcess(usize),

    #[error("invalid membership table: {0}")]
    Membership(String),

    #[error("protocol anomaly: {0}")]
    Anomaly(#[from] Anomaly),

    #[error("stale reply from {from} for withdrawn round {round}")]
    Stale {
        from: usize,
        round: u64,
    },

    #[error("critical section already requested or held")]
    Busy,

    #[error("critical section is not held")]
    NotHeld,

    #[error("request for the critical section was cancelled")]
    Cancelled,

    #[error("process has shut down")]
    Shutdown,

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode message: {0}")]
    Codec(#[from] bincode::Error),

    #[error("failed to parse membership table: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
        | Error::PeerUnreachable(_)
        | Error::Io(_)
        | Error::Busy
        | Error::Cancelled => true,
        | _ => false,
        }
    }
}

/// Messages that cannot occur in a correct run of the protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Anomaly {
    #[error("reply from {from} while {status}")]
    UnexpectedReply {
        from: usize,
        status: &'static str,
    },

    #[error("reply from {from} for round {round}, expected round {expected}")]
    WrongRound {
        from: usize,
        round: u64,
        expected: u64,
    },

    #[error("message from {0} addressed to itself")]
    FromSelf(usize),

    #[error("timestamp from {from} has {len} slots, expected {expected}")]
    MalformedTimestamp {
        from: usize,
        len: usize,
        expected: usize,
    },
}
