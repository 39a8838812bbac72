//! Blockstore: immutable blocks under a byte quota, plus a version graph per
//! namespace.
//!
//! Everything is a [`BlockStore`]. A [`QuotaStore`] keeps blocks on one
//! backend and reclaims space through epoch garbage collection; a
//! [`Federation`] composes already-open stores and keeps them converging.
//! The [`Catalog`] creates, opens and names both kinds.
//!
//! ```
//! use blockstore::{BlockStore, Catalog, StoreConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let catalog = Catalog::new();
//! let store = catalog.create("scratch", 1024, &StoreConfig::memory()).unwrap();
//! store.put(b"key", "value".into()).await.unwrap();
//! assert_eq!(store.get(b"key").await.unwrap(), "value");
//! catalog.close("scratch").await.unwrap();
//! # });
//! ```

mod catalog;

pub use blockstore_core::{
    BackendConfig, BlockStore, Bytes, EdgeId, Epoch, Error, HeadEdge, HeadGraph, HeadNode,
    QuotaStore, Result, SharedStore, Stat, StoreRegistry, Usage,
};
pub use blockstore_federation::{Federation, FederationConfig};
pub use catalog::{Catalog, StoreConfig};
