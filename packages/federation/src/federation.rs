//! The federated block store.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use blockstore_core::{
    BlockStore, Bytes, EdgeId, Epoch, Error, HeadEdge, HeadGraph, HeadNode, Result, SharedStore,
    Stat, StoreRegistry,
};
use tracing::{debug, info, warn};

use crate::config::FederationConfig;
use crate::fanout::{self, escalate};
use crate::replication::{ReplicaKey, Replicator};

/// A block store composed of other, already-open block stores.
///
/// The federation holds no blocks of its own. Reads race across children,
/// queries are answered from the union of every child's answer, and writes
/// land on one child synchronously and reach the others through background
/// replication. [`BlockStore::sync`] waits for that replication to finish.
pub struct Federation {
    name: String,
    children: Vec<SharedStore>,
    replicator: Replicator,
}

impl std::fmt::Debug for Federation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Federation")
            .field("name", &self.name)
            .field(
                "children",
                &self.children.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("pending_replications", &self.replicator.pending())
            .finish()
    }
}

impl Federation {
    /// Compose the stores registered under `child_names`, in that order.
    pub fn open<S: AsRef<str>>(
        name: impl Into<String>,
        child_names: &[S],
        registry: &StoreRegistry,
        config: FederationConfig,
    ) -> Result<Self> {
        let children = registry.resolve(child_names)?;
        Self::from_children(name, children, config)
    }

    pub fn from_children(
        name: impl Into<String>,
        children: Vec<SharedStore>,
        config: FederationConfig,
    ) -> Result<Self> {
        let name = name.into();
        if children.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "federation {} needs at least one child",
                name
            )));
        }
        info!(
            federation = %name,
            children = ?children.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "opened federation"
        );
        Ok(Self {
            name,
            children,
            replicator: Replicator::new(&config),
        })
    }

    pub fn children(&self) -> &[SharedStore] {
        &self.children
    }

    /// Replica copies that have not finished yet.
    pub fn pending_replications(&self) -> usize {
        self.replicator.pending()
    }

    fn replicate_block(&self, target: usize, key: Bytes, value: Bytes) {
        let child = self.children[target].clone();
        self.replicator
            .schedule(target, ReplicaKey::Block(key.clone()), async move {
                child.put(&key, value).await
            });
    }

    /// Copy a block that `source` holds into `target`, reading it first.
    fn heal_block(&self, source: usize, target: usize, key: Bytes) {
        let from = self.children[source].clone();
        let to = self.children[target].clone();
        self.replicator
            .schedule(target, ReplicaKey::Block(key.clone()), async move {
                let value = from.get(&key).await?;
                to.put(&key, value).await
            });
    }

    fn replicate_edge(&self, target: usize, edge: HeadEdge) {
        let child = self.children[target].clone();
        self.replicator
            .schedule(target, ReplicaKey::Edge(edge.id()), async move {
                child.head_insert(&edge).await
            });
    }

    fn others(&self, except: usize) -> impl Iterator<Item = usize> {
        (0..self.children.len()).filter(move |&index| index != except)
    }

    /// Write to the first child that accepts, returning its index.
    async fn write_through<F, Fut>(&self, op: F) -> Result<usize>
    where
        F: Fn(SharedStore) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut first_error = None;
        for (index, child) in self.children.iter().enumerate() {
            match op(child.clone()).await {
                Ok(()) => return Ok(index),
                Err(e) => {
                    debug!(federation = %self.name, child = child.name(), error = %e, "write refused");
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| {
            Error::NotFound(format!("writable child of federation {}", self.name))
        }))
    }

    /// Succeed if any child succeeded; otherwise surface the children's
    /// failure.
    fn any_ok<T>(&self, what: &str, results: Vec<Result<T>>) -> Result<Vec<(usize, T)>> {
        let mut answers = Vec::new();
        let mut errors = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(value) => answers.push((index, value)),
                Err(e) => {
                    warn!(
                        federation = %self.name,
                        child = self.children[index].name(),
                        error = %e,
                        "{} failed on child",
                        what
                    );
                    errors.push(e);
                }
            }
        }
        if answers.is_empty() {
            return Err(escalate(errors, what));
        }
        Ok(answers)
    }

    /// Ask every child for its tips. `None` marks a child that failed with
    /// something other than `NotFound`; a `NotFound` child has no tips.
    async fn survey(&self, seed: &HeadNode) -> (Vec<Option<BTreeSet<Bytes>>>, Vec<Error>) {
        let seed_for_children = seed.clone();
        let results = fanout::join_all(&self.children, move |child| {
            let seed = seed_for_children.clone();
            async move { child.head_furthest(&seed).await }
        })
        .await;

        let mut errors = Vec::new();
        let answers = results
            .into_iter()
            .map(|result| match result {
                Ok(tips) => Some(tips),
                Err(e) if e.is_not_found() => Some(BTreeSet::new()),
                Err(e) => {
                    errors.push(e);
                    None
                }
            })
            .collect();
        (answers, errors)
    }

    /// Give every reachable child every edge of `fsid` that some child has.
    async fn fill_namespace(&self, fsid: &Bytes) {
        let seed = HeadNode::all_roots(fsid.clone());
        let seed_for_children = seed.clone();
        let results = fanout::join_all(&self.children, move |child| {
            let seed = seed_for_children.clone();
            async move { child.head_follow(&seed).await }
        })
        .await;

        let mut held: Vec<Option<HashSet<EdgeId>>> = Vec::with_capacity(results.len());
        let mut union = Vec::new();
        for result in results {
            match result {
                Ok(edges) => {
                    held.push(Some(edges.iter().map(HeadEdge::id).collect()));
                    union.extend(edges);
                }
                Err(e) if e.is_not_found() => held.push(Some(HashSet::new())),
                Err(_) => held.push(None),
            }
        }
        let graph: HeadGraph = union.into_iter().collect();
        let Ok(ordered) = graph.follow(&seed) else {
            return;
        };

        let inserts = held.into_iter().enumerate().filter_map(|(index, held)| {
            let held = held?;
            let missing: Vec<HeadEdge> = ordered
                .iter()
                .filter(|edge| !held.contains(&edge.id()))
                .cloned()
                .collect();
            (!missing.is_empty()).then_some((index, missing))
        });
        let mut copies = tokio::task::JoinSet::new();
        for (index, missing) in inserts {
            let child = self.children[index].clone();
            debug!(
                federation = %self.name,
                child = child.name(),
                edges = missing.len(),
                "filling head graph"
            );
            copies.spawn(async move {
                for edge in &missing {
                    child.head_insert(edge).await?;
                }
                Ok::<_, Error>(())
            });
        }
        while let Some(joined) = copies.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!(federation = %self.name, error = %e, "head graph fill failed");
            }
        }
    }
}

#[async_trait]
impl BlockStore for Federation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        let written = self
            .write_through(|child| {
                let key = key.clone();
                let value = value.clone();
                async move { child.put(&key, value).await }
            })
            .await?;
        for target in self.others(written) {
            self.replicate_block(target, key.clone(), value.clone());
        }
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Bytes> {
        let key = Bytes::copy_from_slice(key);
        let request_key = key.clone();
        let race = fanout::race(&self.children, move |child| {
            let key = request_key.clone();
            async move { child.get(&key).await }
        })
        .await;

        match race.winner {
            Some((winner, value)) => {
                for target in self.others(winner) {
                    self.replicate_block(target, key.clone(), value.clone());
                }
                Ok(value)
            }
            None => Err(escalate(race.errors, format!("block {:?}", key))),
        }
    }

    async fn del(&self, key: &[u8]) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        self.replicator.forget(&ReplicaKey::Block(key.clone()));
        let request_key = key.clone();
        let results = fanout::join_all(&self.children, move |child| {
            let key = request_key.clone();
            async move { child.del(&key).await }
        })
        .await;
        if results.iter().any(Result::is_ok) {
            return Ok(());
        }
        Err(escalate(
            results.into_iter().filter_map(Result::err).collect(),
            format!("block {:?}", key),
        ))
    }

    async fn stat(&self) -> Result<Stat> {
        let results = fanout::join_all(&self.children, |child| async move { child.stat().await }).await;
        let answers = self.any_ok("stat", results)?;
        Ok(answers.into_iter().map(|(_, stat)| stat).sum())
    }

    async fn refresh_start(&self, epoch: Epoch) -> Result<()> {
        let results =
            fanout::join_all(&self.children, move |child| async move { child.refresh_start(epoch).await })
                .await;
        self.any_ok("refresh_start", results)?;
        Ok(())
    }

    async fn refresh_blocks(&self, epoch: Epoch, keys: &[Bytes]) -> Result<Vec<Bytes>> {
        let request: Vec<Bytes> = keys.to_vec();
        let results = fanout::join_all(&self.children, move |child| {
            let keys = request.clone();
            async move { child.refresh_blocks(epoch, &keys).await }
        })
        .await;
        let answers: Vec<(usize, HashSet<Bytes>)> = self
            .any_ok("refresh_blocks", results)?
            .into_iter()
            .map(|(index, missing)| (index, missing.into_iter().collect()))
            .collect();

        let mut missing_everywhere = Vec::new();
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            let holder = answers
                .iter()
                .find(|(_, missing)| !missing.contains(key))
                .map(|(index, _)| *index);
            match holder {
                None => missing_everywhere.push(key.clone()),
                Some(source) => {
                    for (target, missing) in &answers {
                        if missing.contains(key) {
                            self.heal_block(source, *target, key.clone());
                        }
                    }
                }
            }
        }
        Ok(missing_everywhere)
    }

    async fn refresh_finish(&self, epoch: Epoch) -> Result<()> {
        let results =
            fanout::join_all(&self.children, move |child| async move { child.refresh_finish(epoch).await })
                .await;
        self.any_ok("refresh_finish", results)?;
        Ok(())
    }

    async fn head_insert(&self, edge: &HeadEdge) -> Result<()> {
        HeadGraph::validate(edge)?;
        let written = self
            .write_through(|child| {
                let edge = edge.clone();
                async move { child.head_insert(&edge).await }
            })
            .await?;
        for target in self.others(written) {
            self.replicate_edge(target, edge.clone());
        }
        Ok(())
    }

    async fn head_furthest(&self, seed: &HeadNode) -> Result<BTreeSet<Bytes>> {
        let (answers, errors) = self.survey(seed).await;
        let responders: Vec<&BTreeSet<Bytes>> = answers.iter().flatten().collect();
        let Some(first) = responders.first() else {
            return Err(escalate(errors, "head seed"));
        };
        if responders.iter().all(|tips| tips == first) {
            return Ok((*first).clone());
        }

        debug!(federation = %self.name, fsid = ?seed.fsid, "children disagree on tips, reconciling");
        self.fill_namespace(&seed.fsid).await;
        let (answers, errors) = self.survey(seed).await;
        if answers.iter().all(Option::is_none) {
            return Err(escalate(errors, "head seed"));
        }
        Ok(answers.into_iter().flatten().flatten().collect())
    }

    async fn head_follow(&self, seed: &HeadNode) -> Result<Vec<HeadEdge>> {
        let seed_for_children = seed.clone();
        let results = fanout::join_all(&self.children, move |child| {
            let seed = seed_for_children.clone();
            async move { child.head_follow(&seed).await }
        })
        .await;

        let mut held: Vec<(usize, HashSet<EdgeId>)> = Vec::new();
        let mut union = Vec::new();
        let mut errors = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(edges) => {
                    held.push((index, edges.iter().map(HeadEdge::id).collect()));
                    union.extend(edges);
                }
                Err(e) => errors.push(e),
            }
        }
        if held.is_empty() {
            return Err(escalate(errors, "head seed"));
        }

        let graph: HeadGraph = union.into_iter().collect();
        let ordered = match graph.follow(seed) {
            Ok(edges) => edges,
            // Every child that answered had nothing beyond the seed.
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        for (index, held) in &held {
            for edge in ordered.iter().filter(|edge| !held.contains(&edge.id())) {
                self.replicate_edge(*index, edge.clone());
            }
        }
        Ok(ordered)
    }

    async fn sync(&self) -> Result<()> {
        self.replicator.drain().await;
        let results = fanout::join_all(&self.children, |child| async move { child.sync().await }).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.sync().await?;
        info!(federation = %self.name, "closed federation");
        Ok(())
    }
}
