//! Quota-bounded block storage with epoch garbage collection and a version
//! graph.
//!
//! This layer gives meaning to the raw bytes of `blockstore-ll-store`:
//! - [`QuotaStore`]: opaque key -> value blocks under a fixed byte budget,
//!   reclaimed by mark/sweep refresh sessions
//! - [`HeadGraph`]: per-namespace DAG of snapshot versions, with tip
//!   (`furthest`) and history (`follow`) queries
//! - [`BlockStore`]: the async interface shared with federations
//! - [`StoreRegistry`]: name -> open store bindings
//!
//! # Example
//!
//! ```rust
//! use blockstore_core::{BackendConfig, BlockStore, QuotaStore};
//! use bytes::Bytes;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = QuotaStore::create("scratch", 1024, &BackendConfig::Memory).unwrap();
//! store.put(b"k1", Bytes::from_static(b"hello")).await.unwrap();
//! assert_eq!(store.stat().await.unwrap().free, 1019);
//! # });
//! ```

pub use bytes::Bytes;

mod codec;
mod config;
mod error;
mod head_graph;
mod quota_store;
mod registry;
mod traits;
mod types;

pub use codec::base64_bytes;
pub use config::BackendConfig;
pub use error::{Error, Result};
pub use head_graph::HeadGraph;
pub use quota_store::QuotaStore;
pub use registry::StoreRegistry;
pub use traits::{BlockStore, SharedStore};
pub use types::{EdgeId, Epoch, HeadEdge, HeadNode, Stat, Usage};

// Re-export LL types for convenience
pub use blockstore_ll_store::{DiskLLStore, LLError, LLStore, MemoryLLStore};
