//! Federated block stores.
//!
//! A [`Federation`] presents several named child stores (quota stores or
//! other federations) as one [`BlockStore`](blockstore_core::BlockStore):
//!
//! - `get` races every child and returns the first hit, copying the block
//!   into the other children in the background
//! - `put` and `head_insert` write to one child and replicate to the rest
//! - `head_furthest`, `head_follow`, `stat` and the refresh calls wait for
//!   every child and merge their answers
//! - `sync` waits until all background replication has landed
//!
//! Replication is eventually consistent. Copy failures are logged and
//! otherwise ignored; the next access to the same key tries again.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use blockstore_core::{BackendConfig, BlockStore, Bytes, QuotaStore, StoreRegistry};
//! use blockstore_federation::{Federation, FederationConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = StoreRegistry::new();
//! for name in ["a", "b"] {
//!     let store = QuotaStore::create(name, 1024, &BackendConfig::Memory).unwrap();
//!     registry.insert(name, Arc::new(store)).unwrap();
//! }
//! let vbs = Federation::open("vbs", &["a", "b"], &registry, FederationConfig::default()).unwrap();
//! vbs.put(b"k", Bytes::from_static(b"v")).await.unwrap();
//! vbs.sync().await.unwrap();
//! assert_eq!(registry.get("b").unwrap().get(b"k").await.unwrap(), Bytes::from_static(b"v"));
//! # });
//! ```

mod config;
mod fanout;
mod federation;
mod replication;

pub use config::FederationConfig;
pub use federation::Federation;
