use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{LLError, LLLister, LLPath, LLReader, LLRemover, LLWriter};

/// An in-memory LL backend.
///
/// Contents live as long as the value does; there is nothing to reopen.
#[derive(Debug, Default, Clone)]
pub struct MemoryLLStore {
    entries: BTreeMap<LLPath, Bytes>,
}

impl MemoryLLStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, across every prefix.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(path: &[&[u8]]) -> LLPath {
        crate::ll_path(path)
    }
}

impl LLReader for MemoryLLStore {
    fn ll_read(&mut self, path: &[&[u8]]) -> Result<Option<Bytes>, LLError> {
        Ok(self.entries.get(&Self::key(path)).cloned())
    }
}

impl LLWriter for MemoryLLStore {
    fn ll_write(&mut self, path: &[&[u8]], data: Bytes) -> Result<(), LLError> {
        self.entries.insert(Self::key(path), data);
        Ok(())
    }
}

impl LLRemover for MemoryLLStore {
    fn ll_remove(&mut self, path: &[&[u8]]) -> Result<bool, LLError> {
        Ok(self.entries.remove(&Self::key(path)).is_some())
    }
}

impl LLLister for MemoryLLStore {
    fn ll_list(&mut self, prefix: &[&[u8]]) -> Result<Vec<Bytes>, LLError> {
        let start = Self::key(prefix);
        Ok(self
            .entries
            .range(start.clone()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(&start))
            .filter(|path| path.len() == start.len() + 1)
            .map(|path| path[start.len()].clone())
            .collect())
    }
}
