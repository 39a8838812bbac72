//! Creating, opening and naming stores.
//!
//! Store configurations are JSON objects like:
//! ```json
//! {"kind": "quota", "backend": {"type": "local", "path": "/var/lib/blocks/a"}}
//! {"kind": "federation", "children": ["a", "b"]}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use blockstore_core::{BackendConfig, Error, QuotaStore, Result, SharedStore, StoreRegistry};
use blockstore_federation::{Federation, FederationConfig};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// A quota store on one backend.
    Quota { backend: BackendConfig },
    /// A federation over stores already open in the same catalog.
    Federation {
        children: Vec<String>,
        #[serde(default)]
        config: FederationConfig,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        StoreConfig::Quota {
            backend: BackendConfig::Memory,
        }
    }

    pub fn local(path: impl Into<std::path::PathBuf>) -> Self {
        StoreConfig::Quota {
            backend: BackendConfig::local(path),
        }
    }

    pub fn federation<S: Into<String>>(children: impl IntoIterator<Item = S>) -> Self {
        StoreConfig::Federation {
            children: children.into_iter().map(Into::into).collect(),
            config: FederationConfig::default(),
        }
    }

    /// Build a config from a kind name (`memory`, `local` or `federation`)
    /// and that kind's arguments.
    ///
    /// `local` takes `{"path": ...}`; `federation` takes
    /// `{"children": [...], "config": {...}}` with `config` optional.
    /// `memory` ignores its arguments.
    pub fn from_kind(kind: &str, args: Value) -> Result<Self> {
        let parsed = match kind {
            "memory" => return Ok(Self::memory()),
            "local" => serde_json::from_value(tagged(args, "type", "local")?)
                .map(|backend| StoreConfig::Quota { backend }),
            "federation" => serde_json::from_value(tagged(args, "kind", "federation")?),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown store kind {:?}",
                    other
                )))
            }
        };
        parsed.map_err(|e| Error::InvalidArgument(format!("{} store arguments: {}", kind, e)))
    }
}

impl std::str::FromStr for StoreConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::InvalidArgument(format!("store config: {}", e)))
    }
}

fn tagged(args: Value, tag: &str, kind: &str) -> Result<Value> {
    match args {
        Value::Object(mut map) => {
            map.insert(tag.to_string(), Value::String(kind.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(Error::InvalidArgument(format!(
            "{} store arguments must be an object, got {}",
            kind, other
        ))),
    }
}

/// Opens stores by configuration and keeps them reachable by name.
///
/// Every store the catalog creates or opens is registered under its name,
/// which is also how a federation finds its children. Clones share the same
/// stores.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    registry: StoreRegistry,
    configs: Arc<RwLock<BTreeMap<String, StoreConfig>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog around an existing registry, so stores opened
    /// elsewhere can serve as federation children.
    pub fn with_registry(registry: StoreRegistry) -> Self {
        Self {
            registry,
            configs: Arc::default(),
        }
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// Create a fresh store and register it as `name`.
    ///
    /// A federation holds no blocks, so `capacity` only applies to quota
    /// stores; creating a federation is the same as opening it.
    pub fn create(&self, name: &str, capacity: u64, config: &StoreConfig) -> Result<SharedStore> {
        self.ensure_free(name)?;
        let store: SharedStore = match config {
            StoreConfig::Quota { backend } => Arc::new(QuotaStore::create(name, capacity, backend)?),
            StoreConfig::Federation { .. } => return self.open(name, config),
        };
        self.register(name, store, config)
    }

    /// Open an existing store and register it as `name`.
    pub fn open(&self, name: &str, config: &StoreConfig) -> Result<SharedStore> {
        self.ensure_free(name)?;
        let store: SharedStore = match config {
            StoreConfig::Quota { backend } => Arc::new(QuotaStore::open(name, backend)?),
            StoreConfig::Federation { children, config: fed } => Arc::new(Federation::open(
                name,
                children.as_slice(),
                &self.registry,
                fed.clone(),
            )?),
        };
        self.register(name, store, config)
    }

    /// Remove a store's persistent state.
    ///
    /// Refuses while a store with the same on-disk configuration is open
    /// here. Destroying a federation touches none of its children.
    pub fn destroy(&self, config: &StoreConfig) -> Result<()> {
        let configs = self.configs.read();
        let in_use = configs
            .iter()
            .find(|(_, open)| *open == config && **open != StoreConfig::memory());
        if let Some((name, _)) = in_use {
            return Err(Error::InvalidArgument(format!(
                "store is still open as {}",
                name
            )));
        }
        match config {
            StoreConfig::Quota { backend } => QuotaStore::destroy(backend),
            StoreConfig::Federation { .. } => Ok(()),
        }
    }

    /// Unregister `name` and close it. Federations wait for their pending
    /// replication before returning.
    pub async fn close(&self, name: &str) -> Result<()> {
        let store = self.registry.remove(name)?;
        self.configs.write().remove(name);
        store.close().await?;
        info!(store = %name, "closed store");
        Ok(())
    }

    /// Close every store, federations first so their replication can still
    /// reach the children.
    pub async fn close_all(&self) -> Result<()> {
        let mut names: Vec<(bool, String)> = self
            .list()
            .into_iter()
            .map(|(name, config)| (matches!(config, StoreConfig::Quota { .. }), name))
            .collect();
        names.sort();
        let mut first_error = None;
        for (_, name) in names {
            if let Err(e) = self.close(&name).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn get(&self, name: &str) -> Result<SharedStore> {
        self.registry.get(name)
    }

    /// Open stores and the configurations they were opened with.
    pub fn list(&self) -> Vec<(String, StoreConfig)> {
        self.configs
            .read()
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect()
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        if self.registry.contains(name) {
            return Err(Error::NotUnique(format!("store name {}", name)));
        }
        Ok(())
    }

    fn register(&self, name: &str, store: SharedStore, config: &StoreConfig) -> Result<SharedStore> {
        self.registry.insert(name, store.clone())?;
        self.configs.write().insert(name.to_string(), config.clone());
        info!(store = %name, ?config, "registered store");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_configs() {
        let quota: StoreConfig =
            r#"{"kind": "quota", "backend": {"type": "local", "path": "/tmp/a"}}"#
                .parse()
                .unwrap();
        assert_eq!(quota, StoreConfig::local("/tmp/a"));

        let fed: StoreConfig = r#"{"kind": "federation", "children": ["a", "b"]}"#
            .parse()
            .unwrap();
        assert_eq!(fed, StoreConfig::federation(["a", "b"]));

        let tuned: StoreConfig = r#"{"kind": "federation", "children": ["a"],
            "config": {"max_concurrent_replications": 2}}"#
            .parse()
            .unwrap();
        match tuned {
            StoreConfig::Federation { config, .. } => {
                assert_eq!(config.max_concurrent_replications, 2)
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            "{\"kind\": \"tape\"}".parse::<StoreConfig>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn builds_from_kind_names() {
        assert_eq!(
            StoreConfig::from_kind("memory", Value::Null).unwrap(),
            StoreConfig::memory()
        );
        assert_eq!(
            StoreConfig::from_kind("local", json!({"path": "/srv/b"})).unwrap(),
            StoreConfig::local("/srv/b")
        );
        assert_eq!(
            StoreConfig::from_kind("federation", json!({"children": ["x"]})).unwrap(),
            StoreConfig::federation(["x"])
        );
        assert!(matches!(
            StoreConfig::from_kind("local", json!({})),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            StoreConfig::from_kind("local", json!("path")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            StoreConfig::from_kind("cloud", json!({})),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = StoreConfig::federation(["a", "b", "c"]);
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(text.parse::<StoreConfig>().unwrap(), config);
    }

    #[test]
    fn names_are_unique() {
        let catalog = Catalog::new();
        catalog.create("a", 10, &StoreConfig::memory()).unwrap();
        assert!(matches!(
            catalog.create("a", 10, &StoreConfig::memory()),
            Err(Error::NotUnique(_))
        ));
        assert_eq!(catalog.list().len(), 1);
        assert!(catalog.registry().contains("a"));
    }

    #[test]
    fn memory_stores_cannot_be_reopened() {
        let catalog = Catalog::new();
        assert!(catalog
            .open("a", &StoreConfig::memory())
            .unwrap_err()
            .is_not_found());
        assert!(catalog.list().is_empty());
    }
}
