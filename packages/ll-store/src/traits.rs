//! Core traits for the LL layer.

use bytes::Bytes;

use crate::LLError;

/// An owned path at the LL level - a sequence of byte components.
///
/// Components are opaque. Backends decide how to map them onto their own
/// namespace (map keys, file names, ...).
pub type LLPath = Vec<Bytes>;

/// Read bytes from a path.
///
/// # Object Safety
///
/// This trait is object-safe: you can use `Box<dyn LLReader>`.
pub trait LLReader: Send + Sync {
    /// Read raw bytes from path components.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - The path does not exist (not an error condition).
    /// * `Ok(Some(bytes))` - The data at the path.
    /// * `Err(LLError)` - A transport or system error occurred.
    fn ll_read(&mut self, path: &[&[u8]]) -> Result<Option<Bytes>, LLError>;
}

/// Write bytes to a path, replacing anything already there.
///
/// # Object Safety
///
/// This trait is object-safe: you can use `Box<dyn LLWriter>`.
pub trait LLWriter: Send + Sync {
    /// Write raw bytes to path components.
    ///
    /// A reader must never observe a partially written entry.
    fn ll_write(&mut self, path: &[&[u8]], data: Bytes) -> Result<(), LLError>;
}

/// Remove the entry at a path.
pub trait LLRemover: Send + Sync {
    /// Returns `Ok(false)` when there was nothing to remove.
    fn ll_remove(&mut self, path: &[&[u8]]) -> Result<bool, LLError>;
}

/// Enumerate the entries directly beneath a prefix.
pub trait LLLister: Send + Sync {
    /// Returns the final component of every entry whose path is
    /// `prefix + [name]`, in ascending byte order.
    fn ll_list(&mut self, prefix: &[&[u8]]) -> Result<Vec<Bytes>, LLError>;
}

/// Everything a backend must provide to host a quota store.
///
/// Automatically implemented for any type that implements all four
/// component traits.
pub trait LLStore: LLReader + LLWriter + LLRemover + LLLister {}
impl<T: LLReader + LLWriter + LLRemover + LLLister> LLStore for T {}

impl std::fmt::Debug for dyn LLStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLStore").finish_non_exhaustive()
    }
}

// Blanket implementations for references and boxes

impl<T: LLReader + ?Sized> LLReader for &mut T {
    fn ll_read(&mut self, path: &[&[u8]]) -> Result<Option<Bytes>, LLError> {
        (*self).ll_read(path)
    }
}

impl<T: LLWriter + ?Sized> LLWriter for &mut T {
    fn ll_write(&mut self, path: &[&[u8]], data: Bytes) -> Result<(), LLError> {
        (*self).ll_write(path, data)
    }
}

impl<T: LLRemover + ?Sized> LLRemover for &mut T {
    fn ll_remove(&mut self, path: &[&[u8]]) -> Result<bool, LLError> {
        (*self).ll_remove(path)
    }
}

impl<T: LLLister + ?Sized> LLLister for &mut T {
    fn ll_list(&mut self, prefix: &[&[u8]]) -> Result<Vec<Bytes>, LLError> {
        (*self).ll_list(prefix)
    }
}

impl<T: LLReader + ?Sized> LLReader for Box<T> {
    fn ll_read(&mut self, path: &[&[u8]]) -> Result<Option<Bytes>, LLError> {
        self.as_mut().ll_read(path)
    }
}

impl<T: LLWriter + ?Sized> LLWriter for Box<T> {
    fn ll_write(&mut self, path: &[&[u8]], data: Bytes) -> Result<(), LLError> {
        self.as_mut().ll_write(path, data)
    }
}

impl<T: LLRemover + ?Sized> LLRemover for Box<T> {
    fn ll_remove(&mut self, path: &[&[u8]]) -> Result<bool, LLError> {
        self.as_mut().ll_remove(path)
    }
}

impl<T: LLLister + ?Sized> LLLister for Box<T> {
    fn ll_list(&mut self, prefix: &[&[u8]]) -> Result<Vec<Bytes>, LLError> {
        self.as_mut().ll_list(prefix)
    }
}
