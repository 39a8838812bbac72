//! A single-node block store bounded by a byte quota.
//!
//! # Reclamation
//!
//! Every block carries a recency sequence number. A *mark* splits the blocks
//! in two: those at or below it were swept by the last refresh session and
//! no longer count against the quota, those above it are live and charged.
//!
//! `refresh_start` reserves a sequence number for the session, marking a
//! block re-stamps it above that number, and `refresh_finish` moves the mark
//! up to the session's number. Blocks written after the session started are
//! therefore above the new mark too and survive the cycle.
//!
//! Swept blocks stay on the backend (and readable) until a later `put`
//! needs their space; the oldest go first. Callers may observe this but must
//! not rely on it.
//!
//! Backends do blocking I/O, so every operation that touches one runs on
//! the runtime's blocking pool. Queries answered from memory do not.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use blockstore_ll_store::LLStore;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::codec::{
    self, EdgeRecord, RecencyRecord, SessionRecord, BLOCKS, HEADS, META, META_MARK, META_SESSION,
    META_SIZE, RECENCY,
};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::head_graph::HeadGraph;
use crate::traits::BlockStore;
use crate::types::{Epoch, HeadEdge, HeadNode, Stat, Usage};

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    size: u64,
}

struct QuotaState {
    backend: Box<dyn LLStore>,
    capacity: u64,
    entries: HashMap<Bytes, Entry>,
    /// seq -> key, oldest first.
    recency: BTreeMap<u64, Bytes>,
    mark: u64,
    session: Option<SessionRecord>,
    next_seq: u64,
    charged: u64,
    swept: u64,
    heads: HeadGraph,
    next_edge_seq: u64,
}

/// A quota-bounded block store over any [`LLStore`] backend.
pub struct QuotaStore {
    name: String,
    state: Arc<Mutex<QuotaState>>,
}

impl std::fmt::Debug for QuotaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaStore")
            .field("name", &self.name)
            .field("usage", &self.usage())
            .finish()
    }
}

impl QuotaStore {
    /// Create a new, empty store on the backend described by `config`.
    pub fn create(name: impl Into<String>, capacity: u64, config: &BackendConfig) -> Result<Self> {
        let backend = config.create_backend()?;
        Self::create_on(name, capacity, backend)
    }

    /// Open a store previously created on the backend described by `config`.
    pub fn open(name: impl Into<String>, config: &BackendConfig) -> Result<Self> {
        let backend = config.open_backend()?;
        Self::open_on(name, backend)
    }

    /// Destroy the backend described by `config`, blocks and all.
    pub fn destroy(config: &BackendConfig) -> Result<()> {
        config.destroy_backend()?;
        info!(?config, "destroyed block store");
        Ok(())
    }

    /// Initialize a store on an already-constructed backend.
    pub fn create_on(
        name: impl Into<String>,
        capacity: u64,
        mut backend: Box<dyn LLStore>,
    ) -> Result<Self> {
        let name = name.into();
        if backend.ll_read(&[META, META_SIZE])?.is_some() {
            return Err(Error::NotUnique(format!("block store {}", name)));
        }
        backend.ll_write(&[META, META_SIZE], codec::encode_u64(capacity))?;
        info!(store = %name, capacity, "created block store");
        Ok(Self {
            name,
            state: Arc::new(Mutex::new(QuotaState::empty(backend, capacity))),
        })
    }

    /// Load a store from an already-constructed backend.
    pub fn open_on(name: impl Into<String>, backend: Box<dyn LLStore>) -> Result<Self> {
        let name = name.into();
        let state = QuotaState::load(&name, backend)?;
        info!(
            store = %name,
            capacity = state.capacity,
            blocks = state.entries.len(),
            edges = state.heads.len(),
            "opened block store"
        );
        Ok(Self {
            name,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn usage(&self) -> Usage {
        self.state.lock().usage()
    }

    /// Run `op` against the locked state on the blocking pool.
    async fn with_backend<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut QuotaState) -> Result<T> + Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || op(&mut state.lock()))
            .await
            .map_err(|e| Error::Task(format!("block store operation: {}", e)))?
    }
}

impl QuotaState {
    fn empty(backend: Box<dyn LLStore>, capacity: u64) -> Self {
        Self {
            backend,
            capacity,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            mark: 0,
            session: None,
            next_seq: 1,
            charged: 0,
            swept: 0,
            heads: HeadGraph::new(),
            next_edge_seq: 0,
        }
    }

    fn load(name: &str, mut backend: Box<dyn LLStore>) -> Result<Self> {
        let capacity = match backend.ll_read(&[META, META_SIZE])? {
            Some(data) => codec::decode_u64("capacity", &data)?,
            None => return Err(Error::NotFound(format!("block store {}", name))),
        };
        let mark = match backend.ll_read(&[META, META_MARK])? {
            Some(data) => codec::decode_u64("mark", &data)?,
            None => 0,
        };
        let session = match backend.ll_read(&[META, META_SESSION])? {
            Some(data) => Some(serde_json::from_slice::<SessionRecord>(&data)?),
            None => None,
        };

        let mut state = Self::empty(backend, capacity);
        state.mark = mark;
        state.session = session;

        let blocks: BTreeSet<Bytes> = state.backend.ll_list(&[BLOCKS])?.into_iter().collect();
        for key in state.backend.ll_list(&[RECENCY])? {
            let Some(data) = state.backend.ll_read(&[RECENCY, &key])? else {
                continue;
            };
            let record = RecencyRecord::decode(data)?;
            if !blocks.contains(&key) {
                debug!(store = %name, ?key, "dropping recency record without a block");
                state.backend.ll_remove(&[RECENCY, &key])?;
                continue;
            }
            state.recency.insert(record.seq, key.clone());
            state.entries.insert(
                key,
                Entry {
                    seq: record.seq,
                    size: record.size,
                },
            );
        }
        for key in blocks {
            if !state.entries.contains_key(&key) {
                debug!(store = %name, ?key, "removing block left behind by an interrupted write");
                state.backend.ll_remove(&[BLOCKS, &key])?;
            }
        }

        let mut edges = Vec::new();
        for id in state.backend.ll_list(&[HEADS])? {
            if let Some(data) = state.backend.ll_read(&[HEADS, &id])? {
                edges.push(serde_json::from_slice::<EdgeRecord>(&data)?);
            }
        }
        edges.sort_by_key(|record| record.seq);
        for record in edges {
            state.next_edge_seq = state.next_edge_seq.max(record.seq + 1);
            state.heads.insert(record.edge)?;
        }

        let newest = state.recency.keys().next_back().copied().unwrap_or(0);
        let session_seq = state.session.map(|s| s.seq).unwrap_or(0);
        state.next_seq = newest.max(mark).max(session_seq) + 1;
        state.recount();
        Ok(state)
    }

    fn usage(&self) -> Usage {
        Usage {
            charged: self.charged,
            swept: self.swept,
            blocks: self.entries.len(),
            session: self.session.map(|s| s.epoch),
        }
    }

    fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.charged)
    }

    fn is_swept(&self, entry: &Entry) -> bool {
        entry.seq <= self.mark
    }

    fn recount(&mut self) {
        let (mut charged, mut swept) = (0, 0);
        for entry in self.entries.values() {
            if entry.seq > self.mark {
                charged += entry.size;
            } else {
                swept += entry.size;
            }
        }
        self.charged = charged;
        self.swept = swept;
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Move a block to the newest position, charging it again if it had
    /// been swept.
    fn touch(&mut self, key: &Bytes) -> Result<()> {
        let Some(entry) = self.entries.get(key).copied() else {
            return Ok(());
        };
        if self.is_swept(&entry) {
            self.swept -= entry.size;
            self.charged += entry.size;
        }
        let seq = self.take_seq();
        let record = RecencyRecord {
            seq,
            size: entry.size,
        };
        self.backend.ll_write(&[RECENCY, key], record.encode())?;
        self.recency.remove(&entry.seq);
        self.recency.insert(seq, key.clone());
        self.entries.insert(key.clone(), Entry { seq, ..entry });
        Ok(())
    }

    /// Physically remove swept blocks, oldest first, until `needed` more
    /// bytes fit alongside everything still on the backend.
    fn purge_for(&mut self, needed: u64) -> Result<()> {
        while self.charged + self.swept + needed > self.capacity {
            let Some((&seq, key)) = self.recency.first_key_value() else {
                break;
            };
            if seq > self.mark {
                break;
            }
            let key = key.clone();
            self.remove(&key)?;
            debug!(?key, "purged swept block");
        }
        Ok(())
    }

    fn remove(&mut self, key: &Bytes) -> Result<Option<Entry>> {
        let Some(entry) = self.entries.remove(key) else {
            return Ok(None);
        };
        if self.is_swept(&entry) {
            self.swept -= entry.size;
        } else {
            self.charged -= entry.size;
        }
        self.recency.remove(&entry.seq);
        self.backend.ll_remove(&[RECENCY, key])?;
        self.backend.ll_remove(&[BLOCKS, key])?;
        Ok(Some(entry))
    }

    fn put(&mut self, key: &[u8], value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("block key is empty".to_string()));
        }
        let key = Bytes::copy_from_slice(key);

        if let Some(entry) = self.entries.get(&key).copied() {
            if !self.is_swept(&entry) {
                return Ok(());
            }
            if entry.size > self.free() {
                return Err(Error::NoSpace {
                    needed: entry.size,
                    free: self.free(),
                });
            }
            debug!(?key, "reviving swept block");
            return self.touch(&key);
        }

        let size = value.len() as u64;
        if size > self.free() {
            return Err(Error::NoSpace {
                needed: size,
                free: self.free(),
            });
        }
        self.purge_for(size)?;

        self.backend.ll_write(&[BLOCKS, &key], value)?;
        let seq = self.take_seq();
        self.backend
            .ll_write(&[RECENCY, &key], RecencyRecord { seq, size }.encode())?;
        self.recency.insert(seq, key.clone());
        self.entries.insert(key, Entry { seq, size });
        self.charged += size;
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Bytes> {
        if !self.entries.contains_key(key) {
            return Err(Error::not_found(format!("block {:?}", Bytes::copy_from_slice(key))));
        }
        self.backend.ll_read(&[BLOCKS, key])?.ok_or_else(|| {
            Error::Corrupt(format!(
                "block {:?} is indexed but missing from the backend",
                Bytes::copy_from_slice(key)
            ))
        })
    }

    fn del(&mut self, key: &[u8]) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        match self.remove(&key)? {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!("block {:?}", key))),
        }
    }

    fn check_session(&self, epoch: Epoch) -> Result<SessionRecord> {
        match self.session {
            None => Err(Error::not_found("refresh session")),
            Some(session) if session.epoch != epoch => Err(Error::InvalidSession {
                requested: epoch,
                open: session.epoch,
            }),
            Some(session) => Ok(session),
        }
    }

    fn refresh_start(&mut self, epoch: Epoch) -> Result<()> {
        if let Some(open) = self.session {
            return Err(Error::NotUnique(format!(
                "refresh session {} is already open",
                open.epoch
            )));
        }
        let session = SessionRecord {
            epoch,
            seq: self.take_seq(),
        };
        self.backend
            .ll_write(&[META, META_SESSION], Bytes::from(serde_json::to_vec(&session)?))?;
        self.session = Some(session);
        Ok(())
    }

    fn refresh_blocks(&mut self, epoch: Epoch, keys: &[Bytes]) -> Result<Vec<Bytes>> {
        self.check_session(epoch)?;
        let mut missing = Vec::new();
        for key in keys {
            if self.entries.contains_key(key) {
                self.touch(key)?;
            } else {
                missing.push(key.clone());
            }
        }
        Ok(missing)
    }

    fn refresh_finish(&mut self, epoch: Epoch) -> Result<u64> {
        let session = self.check_session(epoch)?;
        let before = self.charged;
        self.backend
            .ll_write(&[META, META_MARK], codec::encode_u64(session.seq))?;
        self.backend.ll_remove(&[META, META_SESSION])?;
        self.mark = session.seq;
        self.session = None;
        self.recount();
        Ok(before.saturating_sub(self.charged))
    }

    fn head_insert(&mut self, edge: &HeadEdge) -> Result<()> {
        HeadGraph::validate(edge)?;
        let id = edge.id();
        if self.heads.contains(&id) {
            return Ok(());
        }
        let record = EdgeRecord {
            seq: self.next_edge_seq,
            edge: edge.clone(),
        };
        self.backend
            .ll_write(&[HEADS, &id.encode()], Bytes::from(serde_json::to_vec(&record)?))?;
        self.next_edge_seq += 1;
        self.heads.insert(record.edge)?;
        Ok(())
    }
}

#[async_trait]
impl BlockStore for QuotaStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        self.with_backend(move |state| state.put(&key, value)).await
    }

    async fn get(&self, key: &[u8]) -> Result<Bytes> {
        let key = Bytes::copy_from_slice(key);
        self.with_backend(move |state| state.get(&key)).await
    }

    async fn del(&self, key: &[u8]) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        self.with_backend(move |state| state.del(&key)).await
    }

    async fn stat(&self) -> Result<Stat> {
        let state = self.state.lock();
        Ok(Stat {
            size: state.capacity,
            free: state.free(),
        })
    }

    async fn refresh_start(&self, epoch: Epoch) -> Result<()> {
        self.with_backend(move |state| state.refresh_start(epoch))
            .await?;
        info!(store = %self.name, epoch, "refresh session started");
        Ok(())
    }

    async fn refresh_blocks(&self, epoch: Epoch, keys: &[Bytes]) -> Result<Vec<Bytes>> {
        let keys = keys.to_vec();
        self.with_backend(move |state| state.refresh_blocks(epoch, &keys))
            .await
    }

    async fn refresh_finish(&self, epoch: Epoch) -> Result<()> {
        let reclaimed = self
            .with_backend(move |state| state.refresh_finish(epoch))
            .await?;
        info!(store = %self.name, epoch, reclaimed, "refresh session finished");
        Ok(())
    }

    async fn head_insert(&self, edge: &HeadEdge) -> Result<()> {
        let edge = edge.clone();
        self.with_backend(move |state| state.head_insert(&edge)).await
    }

    async fn head_furthest(&self, seed: &HeadNode) -> Result<BTreeSet<Bytes>> {
        self.state.lock().heads.furthest(seed)
    }

    async fn head_follow(&self, seed: &HeadNode) -> Result<Vec<HeadEdge>> {
        self.state.lock().heads.follow(seed)
    }
}
