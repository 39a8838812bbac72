//! Low-level block store backends.
//!
//! This is the narrow waist of the block store stack. Everything at this
//! level is pure bytes addressed by byte paths - no quota accounting, no
//! garbage collection, no version graph. The quota store in
//! `blockstore-core` is built on top of any [`LLStore`].
//!
//! Two backends are provided:
//! - [`MemoryLLStore`]: an ordered in-memory map, useful for tests and
//!   scratch stores.
//! - [`DiskLLStore`]: one file per entry under a root directory.
//!
//! # Example
//!
//! ```rust
//! use blockstore_ll_store::{LLReader, LLWriter, MemoryLLStore};
//! use bytes::Bytes;
//!
//! let mut store = MemoryLLStore::new();
//! store.ll_write(&[b"blocks", b"k1"], Bytes::from_static(b"v1")).unwrap();
//! assert_eq!(
//!     store.ll_read(&[b"blocks", b"k1"]).unwrap(),
//!     Some(Bytes::from_static(b"v1"))
//! );
//! ```

pub use bytes::Bytes;

mod disk;
mod error;
mod memory;
mod traits;

pub use disk::DiskLLStore;
pub use error::LLError;
pub use memory::MemoryLLStore;
pub use traits::{LLLister, LLPath, LLReader, LLRemover, LLStore, LLWriter};

/// Convenience function to create an owned path from byte slices.
pub fn ll_path(components: &[&[u8]]) -> LLPath {
    components
        .iter()
        .map(|c| Bytes::copy_from_slice(c))
        .collect()
}
