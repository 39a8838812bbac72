//! Backend selection for quota stores.
//!
//! Backend configurations are JSON objects like:
//! ```json
//! {"type": "memory"}
//! {"type": "local", "path": "/var/lib/blocks/store1"}
//! ```

use std::path::PathBuf;

use blockstore_ll_store::{DiskLLStore, LLError, LLStore, MemoryLLStore};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a quota store keeps its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process memory. Gone once the store is dropped, so it cannot be
    /// reopened.
    Memory,
    /// A directory on local disk.
    Local { path: PathBuf },
}

impl BackendConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        BackendConfig::Local { path: path.into() }
    }

    pub fn create_backend(&self) -> Result<Box<dyn LLStore>> {
        match self {
            BackendConfig::Memory => Ok(Box::new(MemoryLLStore::new())),
            BackendConfig::Local { path } => {
                Ok(Box::new(DiskLLStore::create(path).map_err(lifecycle_error)?))
            }
        }
    }

    pub fn open_backend(&self) -> Result<Box<dyn LLStore>> {
        match self {
            BackendConfig::Memory => Err(Error::NotFound(
                "memory stores do not outlive their handle".to_string(),
            )),
            BackendConfig::Local { path } => {
                Ok(Box::new(DiskLLStore::open(path).map_err(lifecycle_error)?))
            }
        }
    }

    pub fn destroy_backend(&self) -> Result<()> {
        match self {
            // Nothing outlives the handle, so there is nothing to remove.
            BackendConfig::Memory => Ok(()),
            BackendConfig::Local { path } => DiskLLStore::destroy(path).map_err(lifecycle_error),
        }
    }
}

fn lifecycle_error(e: LLError) -> Error {
    match e {
        LLError::RootMissing { root } => {
            Error::NotFound(format!("block store at {}", root.display()))
        }
        LLError::RootExists { root } => {
            Error::NotUnique(format!("block store at {}", root.display()))
        }
        other => Error::Backend(other),
    }
}
