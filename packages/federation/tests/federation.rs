use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use blockstore_core::{
    BackendConfig, BlockStore, Bytes, Epoch, Error, HeadEdge, HeadNode, QuotaStore, Result,
    SharedStore, Stat, StoreRegistry,
};
use blockstore_federation::{Federation, FederationConfig};

fn memory_children(registry: &StoreRegistry, names: &[&str], capacity: u64) -> Vec<SharedStore> {
    names
        .iter()
        .map(|name| {
            let store: SharedStore =
                Arc::new(QuotaStore::create(*name, capacity, &BackendConfig::Memory).unwrap());
            registry.insert(*name, store.clone()).unwrap();
            store
        })
        .collect()
}

fn federation(registry: &StoreRegistry, names: &[&str]) -> Federation {
    Federation::open("vbs", names, registry, FederationConfig::default()).unwrap()
}

fn tips(set: BTreeSet<Bytes>) -> Vec<String> {
    set.into_iter()
        .map(|b| String::from_utf8(b.to_vec()).unwrap())
        .collect()
}

fn edge(root: &'static str, prev: &'static str) -> HeadEdge {
    HeadEdge::new("fsid", root, prev)
}

#[test]
fn open_requires_known_children() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["a"], 10);

    let err = Federation::open("vbs", &["a", "b"], &registry, FederationConfig::default())
        .unwrap_err();
    assert!(err.is_not_found());

    let none: [&str; 0] = [];
    let err = Federation::open("vbs", &none, &registry, FederationConfig::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn get_heals_children_that_lacked_the_block() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["a", "b", "c"], 100);
    children[0]
        .put(b"k", Bytes::from_static(b"value"))
        .await
        .unwrap();
    let vbs = federation(&registry, &["a", "b", "c"]);

    assert_eq!(vbs.get(b"k").await.unwrap(), Bytes::from_static(b"value"));
    vbs.sync().await.unwrap();
    assert_eq!(vbs.pending_replications(), 0);
    for child in &children {
        assert_eq!(child.get(b"k").await.unwrap(), Bytes::from_static(b"value"));
    }
}

#[tokio::test]
async fn get_missing_everywhere_is_not_found() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["a", "b"], 100);
    let vbs = federation(&registry, &["a", "b"]);
    assert!(vbs.get(b"nope").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn put_reaches_every_child_after_sync() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["a", "b"], 100);
    let vbs = federation(&registry, &["a", "b"]);

    vbs.put(b"k", Bytes::from_static(b"0123456789")).await.unwrap();
    // Written synchronously to the first child.
    assert!(children[0].get(b"k").await.is_ok());

    vbs.sync().await.unwrap();
    assert!(children[1].get(b"k").await.is_ok());
    assert_eq!(vbs.stat().await.unwrap(), Stat { size: 200, free: 180 });
}

#[tokio::test]
async fn put_falls_through_to_a_child_with_space() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["small"], 4);
    let big = memory_children(&registry, &["big"], 100);
    let vbs = federation(&registry, &["small", "big"]);

    vbs.put(b"k", Bytes::from_static(b"0123456789")).await.unwrap();
    assert!(big[0].get(b"k").await.is_ok());
    // The copy into "small" fails quietly.
    vbs.sync().await.unwrap();
    assert_eq!(vbs.get(b"k").await.unwrap().len(), 10);
}

#[tokio::test]
async fn put_fails_when_no_child_has_space() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["a", "b"], 4);
    let vbs = federation(&registry, &["a", "b"]);
    assert!(matches!(
        vbs.put(b"k", Bytes::from_static(b"0123456789")).await,
        Err(Error::NoSpace { .. })
    ));
}

#[tokio::test]
async fn stat_is_the_sum_of_children() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["a"], 1000);
    let children = memory_children(&registry, &["b"], 500);
    children[0]
        .put(b"k", Bytes::from_static(b"12345"))
        .await
        .unwrap();
    let vbs = federation(&registry, &["a", "b"]);

    assert_eq!(vbs.stat().await.unwrap(), Stat { size: 1500, free: 1495 });
}

#[tokio::test]
async fn del_removes_from_every_child() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["a", "b"], 100);
    let vbs = federation(&registry, &["a", "b"]);

    vbs.put(b"k", Bytes::from_static(b"v")).await.unwrap();
    vbs.sync().await.unwrap();
    vbs.del(b"k").await.unwrap();
    for child in &children {
        assert!(child.get(b"k").await.unwrap_err().is_not_found());
    }
    assert!(vbs.del(b"k").await.unwrap_err().is_not_found());
    assert_eq!(vbs.stat().await.unwrap().free, 200);
}

#[tokio::test]
async fn furthest_on_empty_namespace_is_empty_but_follow_is_not_found() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["a", "b"], 0);
    let vbs = federation(&registry, &["a", "b"]);

    let seed = HeadNode::all_roots("fsid");
    assert!(vbs.head_furthest(&seed).await.unwrap().is_empty());
    assert!(vbs.head_follow(&seed).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn furthest_reconciles_disagreeing_children() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["c1", "c2", "c3"], 0);
    for child in &children {
        child.head_insert(&edge("node1", "")).await.unwrap();
        child.head_insert(&edge("node2", "node1")).await.unwrap();
    }
    children[2]
        .head_insert(&edge("node3", "node2"))
        .await
        .unwrap();
    let vbs = federation(&registry, &["c1", "c2", "c3"]);

    let seed = HeadNode::all_roots("fsid");
    assert_eq!(tips(vbs.head_furthest(&seed).await.unwrap()), ["node3"]);
    // Reconciliation is awaited, not deferred to sync.
    for child in &children {
        assert_eq!(tips(child.head_furthest(&seed).await.unwrap()), ["node3"]);
    }
}

#[tokio::test]
async fn furthest_fills_an_empty_child() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["full", "empty"], 0);
    children[0].head_insert(&edge("node1", "")).await.unwrap();
    let vbs = federation(&registry, &["full", "empty"]);

    let seed = HeadNode::all_roots("fsid");
    assert_eq!(tips(vbs.head_furthest(&seed).await.unwrap()), ["node1"]);
    vbs.sync().await.unwrap();
    assert_eq!(tips(children[1].head_furthest(&seed).await.unwrap()), ["node1"]);
}

#[tokio::test]
async fn insert_replicates_and_follow_merges() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["a", "b"], 0);
    let vbs = federation(&registry, &["a", "b"]);

    vbs.head_insert(&edge("n1", "")).await.unwrap();
    children[0].head_insert(&edge("n2", "n1")).await.unwrap();
    children[1].head_insert(&edge("n3", "n1")).await.unwrap();
    vbs.sync().await.unwrap();

    let all = HeadNode::all_roots("fsid");
    let followed = vbs.head_follow(&all).await.unwrap();
    let roots: Vec<&[u8]> = followed.iter().map(|e| e.rootref.as_ref()).collect();
    assert_eq!(roots, [b"n1".as_slice(), b"n2".as_slice(), b"n3".as_slice()]);

    // Each child is topped up with the branch it was missing.
    vbs.sync().await.unwrap();
    for child in &children {
        assert_eq!(tips(child.head_furthest(&all).await.unwrap()), ["n2", "n3"]);
    }
}

#[tokio::test]
async fn invalid_edges_are_rejected_up_front() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["a"], 0);
    let vbs = federation(&registry, &["a"]);
    assert!(matches!(
        vbs.head_insert(&edge("n1", "n1")).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn refresh_missing_means_missing_everywhere() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["a", "b"], 100);
    children[0].put(b"k1", Bytes::from_static(b"one")).await.unwrap();
    children[1].put(b"k2", Bytes::from_static(b"two")).await.unwrap();
    children[1].put(b"k3", Bytes::from_static(b"three")).await.unwrap();
    let vbs = federation(&registry, &["a", "b"]);

    vbs.refresh_start(1).await.unwrap();
    let wanted = [
        Bytes::from_static(b"k1"),
        Bytes::from_static(b"k2"),
        Bytes::from_static(b"k4"),
    ];
    let missing = vbs.refresh_blocks(1, &wanted).await.unwrap();
    assert_eq!(missing, vec![Bytes::from_static(b"k4")]);

    // Blocks healed into a child during the session belong to it.
    vbs.sync().await.unwrap();
    vbs.refresh_finish(1).await.unwrap();
    for child in &children {
        assert_eq!(child.get(b"k1").await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(child.get(b"k2").await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(child.stat().await.unwrap().free, 100 - 6);
    }
}

#[tokio::test]
async fn refresh_session_rules_fan_out() {
    let registry = StoreRegistry::new();
    memory_children(&registry, &["a", "b"], 10);
    let vbs = federation(&registry, &["a", "b"]);

    assert!(vbs
        .refresh_blocks(1, &[Bytes::from_static(b"k")])
        .await
        .unwrap_err()
        .is_not_found());
    vbs.refresh_start(1).await.unwrap();
    assert!(matches!(
        vbs.refresh_start(2).await,
        Err(Error::NotUnique(_))
    ));
    assert!(matches!(
        vbs.refresh_finish(2).await,
        Err(Error::InvalidSession { .. })
    ));
    vbs.refresh_finish(1).await.unwrap();
}

#[tokio::test]
async fn nested_federations_sync_all_the_way_down() {
    let registry = StoreRegistry::new();
    let leaves = memory_children(&registry, &["a", "b", "c"], 100);
    let inner: SharedStore = Arc::new(federation(&registry, &["a", "b"]));
    registry.insert("inner", inner).unwrap();
    let outer = Federation::open(
        "outer",
        &["c", "inner"],
        &registry,
        FederationConfig::default(),
    )
    .unwrap();

    outer.put(b"k", Bytes::from_static(b"v")).await.unwrap();
    outer.sync().await.unwrap();
    for leaf in &leaves {
        assert_eq!(leaf.get(b"k").await.unwrap(), Bytes::from_static(b"v"));
    }
    assert_eq!(outer.stat().await.unwrap().size, 300);
}

/// A child that never answers reads and accepts every write.
struct Stalled;

#[async_trait]
impl BlockStore for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }
    async fn put(&self, _key: &[u8], _value: Bytes) -> Result<()> {
        Ok(())
    }
    async fn get(&self, _key: &[u8]) -> Result<Bytes> {
        std::future::pending().await
    }
    async fn del(&self, _key: &[u8]) -> Result<()> {
        Err(Error::NotFound("stalled".into()))
    }
    async fn stat(&self) -> Result<Stat> {
        Err(Error::Task("stalled".into()))
    }
    async fn refresh_start(&self, _epoch: Epoch) -> Result<()> {
        Ok(())
    }
    async fn refresh_blocks(&self, _epoch: Epoch, keys: &[Bytes]) -> Result<Vec<Bytes>> {
        Ok(keys.to_vec())
    }
    async fn refresh_finish(&self, _epoch: Epoch) -> Result<()> {
        Ok(())
    }
    async fn head_insert(&self, _edge: &HeadEdge) -> Result<()> {
        Ok(())
    }
    async fn head_furthest(&self, _seed: &HeadNode) -> Result<BTreeSet<Bytes>> {
        Err(Error::Task("stalled".into()))
    }
    async fn head_follow(&self, _seed: &HeadNode) -> Result<Vec<HeadEdge>> {
        Err(Error::Task("stalled".into()))
    }
}

#[tokio::test]
async fn get_does_not_wait_for_a_stalled_child() {
    let registry = StoreRegistry::new();
    registry.insert("stalled", Arc::new(Stalled)).unwrap();
    let children = memory_children(&registry, &["a"], 100);
    children[0].put(b"k", Bytes::from_static(b"v")).await.unwrap();
    let vbs = federation(&registry, &["stalled", "a"]);

    let value = tokio::time::timeout(std::time::Duration::from_secs(5), vbs.get(b"k"))
        .await
        .expect("get should not wait for the stalled child")
        .unwrap();
    assert_eq!(value, Bytes::from_static(b"v"));
    vbs.sync().await.unwrap();
}

#[tokio::test]
async fn failing_children_are_absorbed() {
    let registry = StoreRegistry::new();
    registry.insert("stalled", Arc::new(Stalled)).unwrap();
    let children = memory_children(&registry, &["a"], 100);
    children[0].head_insert(&edge("n1", "")).await.unwrap();
    let vbs = federation(&registry, &["stalled", "a"]);

    let seed = HeadNode::all_roots("fsid");
    assert_eq!(tips(vbs.head_furthest(&seed).await.unwrap()), ["n1"]);
    assert_eq!(vbs.head_follow(&seed).await.unwrap().len(), 1);
    assert_eq!(vbs.stat().await.unwrap(), Stat { size: 100, free: 100 });
}

#[tokio::test]
async fn reconciled_edges_persist_without_the_source_child() {
    let dir = tempfile::tempdir().unwrap();
    let config = |name: &str| BackendConfig::local(dir.path().join(name));
    let seed = HeadNode::all_roots("fsid");

    {
        let registry = StoreRegistry::new();
        for name in ["c1", "c2", "c3"] {
            let store = QuotaStore::create(name, 1000, &config(name)).unwrap();
            store.head_insert(&edge("node1", "")).await.unwrap();
            if name == "c3" {
                store.head_insert(&edge("node2", "node1")).await.unwrap();
                store.head_insert(&edge("node3", "node2")).await.unwrap();
            }
            registry.insert(name, Arc::new(store)).unwrap();
        }
        let vbs = federation(&registry, &["c1", "c2", "c3"]);
        assert_eq!(tips(vbs.head_furthest(&seed).await.unwrap()), ["node3"]);
        vbs.close().await.unwrap();
    }

    let registry = StoreRegistry::new();
    for name in ["c1", "c2"] {
        let store = QuotaStore::open(name, &config(name)).unwrap();
        registry.insert(name, Arc::new(store)).unwrap();
    }
    let vbs = federation(&registry, &["c1", "c2"]);
    assert_eq!(tips(vbs.head_furthest(&seed).await.unwrap()), ["node3"]);
}

/// A memory store that takes a while to accept each write.
struct Sluggish {
    inner: QuotaStore,
    delay: std::time::Duration,
}

#[async_trait]
impl BlockStore for Sluggish {
    fn name(&self) -> &str {
        "sluggish"
    }
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, value).await
    }
    async fn get(&self, key: &[u8]) -> Result<Bytes> {
        self.inner.get(key).await
    }
    async fn del(&self, key: &[u8]) -> Result<()> {
        self.inner.del(key).await
    }
    async fn stat(&self) -> Result<Stat> {
        self.inner.stat().await
    }
    async fn refresh_start(&self, epoch: Epoch) -> Result<()> {
        self.inner.refresh_start(epoch).await
    }
    async fn refresh_blocks(&self, epoch: Epoch, keys: &[Bytes]) -> Result<Vec<Bytes>> {
        self.inner.refresh_blocks(epoch, keys).await
    }
    async fn refresh_finish(&self, epoch: Epoch) -> Result<()> {
        self.inner.refresh_finish(epoch).await
    }
    async fn head_insert(&self, edge: &HeadEdge) -> Result<()> {
        self.inner.head_insert(edge).await
    }
    async fn head_furthest(&self, seed: &HeadNode) -> Result<BTreeSet<Bytes>> {
        self.inner.head_furthest(seed).await
    }
    async fn head_follow(&self, seed: &HeadNode) -> Result<Vec<HeadEdge>> {
        self.inner.head_follow(seed).await
    }
}

#[tokio::test]
async fn concurrent_syncs_both_wait_for_replication() {
    let registry = StoreRegistry::new();
    let children = memory_children(&registry, &["a"], 100);
    children[0].put(b"k", Bytes::from_static(b"v")).await.unwrap();
    let sluggish: SharedStore = Arc::new(Sluggish {
        inner: QuotaStore::create("sluggish", 100, &BackendConfig::Memory).unwrap(),
        delay: std::time::Duration::from_millis(300),
    });
    registry.insert("sluggish", sluggish.clone()).unwrap();
    let vbs = Arc::new(federation(&registry, &["a", "sluggish"]));

    assert_eq!(vbs.get(b"k").await.unwrap(), Bytes::from_static(b"v"));
    let first = tokio::spawn({
        let vbs = vbs.clone();
        async move { vbs.sync().await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    vbs.sync().await.unwrap();
    assert_eq!(sluggish.get(b"k").await.unwrap(), Bytes::from_static(b"v"));
    assert_eq!(vbs.pending_replications(), 0);
    first.await.unwrap().unwrap();
}
