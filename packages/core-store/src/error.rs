//! Error types for the block store layer.

use thiserror::Error;

use crate::types::Epoch;
use blockstore_ll_store::LLError;

/// Errors returned by every [`BlockStore`](crate::BlockStore) implementation.
#[derive(Debug, Error)]
pub enum Error {
    /// A key, head seed, session, store or federation child does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A store or session already exists.
    #[error("already exists: {0}")]
    NotUnique(String),

    /// The block does not fit in the remaining quota.
    #[error("no space: {needed} bytes needed, {free} free")]
    NoSpace { needed: u64, free: u64 },

    /// A refresh call named a session other than the one that is open.
    #[error("refresh session {requested} is not open (open session is {open})")]
    InvalidSession { requested: Epoch, open: Epoch },

    /// The caller passed something the store cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A persisted record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The low-level backend failed.
    #[error("backend error: {0}")]
    Backend(#[from] LLError),

    /// A spawned fan-out task died before reporting a result.
    #[error("task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        Error::NotFound(what.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Corrupt(e.to_string())
    }
}

/// Result type alias for block store operations.
pub type Result<T> = std::result::Result<T, Error>;
