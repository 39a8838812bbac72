//! Name -> store bindings.
//!
//! Stores are opened once and then referred to by name, most importantly
//! when composing a federation out of already-open children. The registry
//! is a cheap handle; clones share the same bindings.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::traits::SharedStore;

#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: Arc<RwLock<BTreeMap<String, SharedStore>>>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `store` to `name`. Fails if the name is already taken.
    pub fn insert(&self, name: impl Into<String>, store: SharedStore) -> Result<()> {
        let name = name.into();
        let mut stores = self.stores.write();
        if stores.contains_key(&name) {
            return Err(Error::NotUnique(format!("store name {}", name)));
        }
        stores.insert(name, store);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<SharedStore> {
        self.stores
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("open store {}", name)))
    }

    /// Look up several stores at once, failing on the first unknown name.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<SharedStore>> {
        names.iter().map(|name| self.get(name.as_ref())).collect()
    }

    pub fn remove(&self, name: &str) -> Result<SharedStore> {
        self.stores
            .write()
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("open store {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.stores.read().keys().cloned().collect()
    }
}
