//! Error types for the LL layer.
//!
//! Errors at this level are transport-focused. Quota, session and graph
//! errors belong in higher layers.

use std::path::PathBuf;

/// Errors at the LL (low-level) layer.
#[derive(Debug)]
pub enum LLError {
    /// Generic I/O or transport failure.
    Transport(Box<dyn std::error::Error + Send + Sync>),

    /// The operation is not supported by this backend.
    NotSupported,

    /// The backend root directory does not exist.
    RootMissing { root: PathBuf },

    /// The backend root directory already exists.
    RootExists { root: PathBuf },
}

impl std::fmt::Display for LLError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLError::Transport(e) => write!(f, "transport error: {}", e),
            LLError::NotSupported => write!(f, "operation not supported"),
            LLError::RootMissing { root } => {
                write!(f, "backend root does not exist: {}", root.display())
            }
            LLError::RootExists { root } => {
                write!(f, "backend root already exists: {}", root.display())
            }
        }
    }
}

impl std::error::Error for LLError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LLError::Transport(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LLError {
    fn from(e: std::io::Error) -> Self {
        LLError::Transport(Box::new(e))
    }
}
