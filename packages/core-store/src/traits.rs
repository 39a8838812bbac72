//! The block store interface shared by quota stores and federations.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::{Epoch, HeadEdge, HeadNode, Stat};

/// A store of immutable, quota-charged blocks plus a version graph.
///
/// # Object Safety
///
/// This trait is object-safe: stores are usually handled as
/// [`SharedStore`] so that a federation can hold a mix of implementations.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// The name this store was opened under.
    fn name(&self) -> &str;

    /// Store `value` under `key`. Storing to a key that already exists is a
    /// no-op, whatever the value.
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()>;

    async fn get(&self, key: &[u8]) -> Result<Bytes>;

    async fn del(&self, key: &[u8]) -> Result<()>;

    async fn stat(&self) -> Result<Stat>;

    /// Open a refresh session. Only one may be open at a time.
    async fn refresh_start(&self, epoch: Epoch) -> Result<()>;

    /// Mark `keys` as live for the open session, returning the ones the
    /// store does not hold at all.
    async fn refresh_blocks(&self, epoch: Epoch, keys: &[Bytes]) -> Result<Vec<Bytes>>;

    /// Close the session, sweeping every block it did not mark.
    async fn refresh_finish(&self, epoch: Epoch) -> Result<()>;

    async fn head_insert(&self, edge: &HeadEdge) -> Result<()>;

    /// Tips reachable from `seed`.
    async fn head_furthest(&self, seed: &HeadNode) -> Result<BTreeSet<Bytes>>;

    /// Edges reachable from `seed`, ancestors first.
    async fn head_follow(&self, seed: &HeadNode) -> Result<Vec<HeadEdge>>;

    /// Wait until background work scheduled by earlier calls has finished.
    async fn sync(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.sync().await
    }
}

/// A reference-counted, type-erased store.
pub type SharedStore = Arc<dyn BlockStore>;

impl std::fmt::Debug for dyn BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("name", &self.name())
            .finish()
    }
}
