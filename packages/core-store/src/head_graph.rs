//! In-memory index over the version graph of every namespace.
//!
//! The index only knows about edges. Persistence is the job of whoever owns
//! it: the quota store writes each new edge to its backend before indexing
//! it, and a federation builds a throwaway graph to merge child answers.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use bytes::Bytes;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{EdgeId, HeadEdge, HeadNode};

#[derive(Debug, Default, Clone)]
pub struct HeadGraph {
    /// Edges in insertion order; indices below point into this.
    edges: Vec<HeadEdge>,
    by_id: HashMap<EdgeId, usize>,
    /// prev node -> edges leaving it.
    children: HashMap<HeadNode, Vec<usize>>,
    /// root node -> edges arriving at it.
    parents: HashMap<HeadNode, Vec<usize>>,
}

impl HeadGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains(&self, id: &EdgeId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Reject edges that can never be part of a well-formed history.
    pub fn validate(edge: &HeadEdge) -> Result<()> {
        if edge.rootref.is_empty() {
            return Err(Error::InvalidArgument(
                "head edge must name a root".to_string(),
            ));
        }
        if edge.rootref == edge.prevref {
            return Err(Error::InvalidArgument(
                "head edge cannot supersede itself".to_string(),
            ));
        }
        Ok(())
    }

    /// Add an edge. Returns `false` when an edge with the same identity is
    /// already present, in which case nothing changes.
    pub fn insert(&mut self, edge: HeadEdge) -> Result<bool> {
        Self::validate(&edge)?;
        let id = edge.id();
        if self.by_id.contains_key(&id) {
            return Ok(false);
        }
        let index = self.edges.len();
        self.children.entry(edge.prev_node()).or_default().push(index);
        self.parents.entry(edge.root_node()).or_default().push(index);
        self.by_id.insert(id, index);
        self.edges.push(edge);
        Ok(true)
    }

    /// All edges of one namespace, in insertion order.
    pub fn namespace(&self, fsid: &[u8]) -> Vec<HeadEdge> {
        self.edges
            .iter()
            .filter(|edge| edge.fsid == fsid)
            .cloned()
            .collect()
    }

    /// Nodes of `fsid` that have successors but no predecessors.
    fn roots(&self, fsid: &Bytes) -> Vec<HeadNode> {
        let mut roots: Vec<HeadNode> = self
            .children
            .keys()
            .filter(|node| &node.fsid == fsid && !self.parents.contains_key(*node))
            .cloned()
            .collect();
        roots.sort();
        roots
    }

    fn start_nodes(&self, seed: &HeadNode) -> Result<Vec<HeadNode>> {
        if seed.rootref.is_empty() {
            let roots = self.roots(&seed.fsid);
            if roots.is_empty() {
                return Err(Error::not_found(format!(
                    "no head edges in namespace {:?}",
                    seed.fsid
                )));
            }
            return Ok(roots);
        }
        if self.parents.contains_key(seed) || self.children.contains_key(seed) {
            return Ok(vec![seed.clone()]);
        }
        Err(Error::not_found(format!(
            "unknown head {:?} in namespace {:?}",
            seed.rootref, seed.fsid
        )))
    }

    fn reachable(&self, starts: Vec<HeadNode>) -> HashSet<HeadNode> {
        let mut seen: HashSet<HeadNode> = starts.iter().cloned().collect();
        let mut queue: VecDeque<HeadNode> = starts.into();
        while let Some(node) = queue.pop_front() {
            for &index in self.children.get(&node).into_iter().flatten() {
                let next = self.edges[index].root_node();
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Tips reachable forward from `seed`. A seed with no successors is its
    /// own tip.
    pub fn furthest(&self, seed: &HeadNode) -> Result<BTreeSet<Bytes>> {
        let starts = self.start_nodes(seed)?;
        Ok(self
            .reachable(starts)
            .into_iter()
            .filter(|node| !self.children.contains_key(node))
            .map(|node| node.rootref)
            .collect())
    }

    /// Every edge reachable forward from `seed`, each exactly once.
    ///
    /// An edge is emitted only after all reachable edges into its `prevref`;
    /// among edges that are ready at the same time, older insertions go first.
    pub fn follow(&self, seed: &HeadNode) -> Result<Vec<HeadEdge>> {
        let starts = self.start_nodes(seed)?;
        let nodes = self.reachable(starts);

        let mut pending_in: HashMap<&HeadNode, usize> = HashMap::new();
        let mut relevant: Vec<usize> = Vec::new();
        for node in &nodes {
            for &index in self.children.get(node).into_iter().flatten() {
                relevant.push(index);
            }
            let incoming = self
                .parents
                .get(node)
                .into_iter()
                .flatten()
                .filter(|&&index| nodes.contains(&self.edges[index].prev_node()))
                .count();
            pending_in.insert(node, incoming);
        }

        let mut ready: BTreeSet<usize> = relevant
            .iter()
            .copied()
            .filter(|&index| pending_in[&self.edges[index].prev_node()] == 0)
            .collect();
        let mut emitted: HashSet<usize> = HashSet::with_capacity(relevant.len());
        let mut ordered = Vec::with_capacity(relevant.len());

        while let Some(index) = ready.pop_first() {
            emitted.insert(index);
            let edge = &self.edges[index];
            ordered.push(edge.clone());

            let root = edge.root_node();
            if let Some(count) = pending_in.get_mut(&root) {
                *count -= 1;
                if *count == 0 {
                    ready.extend(self.children.get(&root).into_iter().flatten().copied());
                }
            }
        }

        if ordered.len() < relevant.len() {
            relevant.sort_unstable();
            warn!(
                fsid = ?seed.fsid,
                stuck = relevant.len() - ordered.len(),
                "head graph has a cycle; appending remaining edges in insertion order"
            );
            for index in relevant {
                if !emitted.contains(&index) {
                    ordered.push(self.edges[index].clone());
                }
            }
        }
        Ok(ordered)
    }
}

impl FromIterator<HeadEdge> for HeadGraph {
    /// Builds a graph, silently skipping edges that fail validation.
    fn from_iter<I: IntoIterator<Item = HeadEdge>>(iter: I) -> Self {
        let mut graph = HeadGraph::new();
        for edge in iter {
            let _ = graph.insert(edge);
        }
        graph
    }
}
