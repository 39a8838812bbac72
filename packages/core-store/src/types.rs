//! Plain data carried through the block store API.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec;

/// Caller-chosen identifier of a refresh (garbage collection) session.
pub type Epoch = u64;

/// Capacity and remaining space of a store, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub size: u64,
    pub free: u64,
}

impl Stat {
    /// Element-wise sum, used to present several stores as one.
    pub fn combine(self, other: Stat) -> Stat {
        Stat {
            size: self.size.saturating_add(other.size),
            free: self.free.saturating_add(other.free),
        }
    }
}

impl std::iter::Sum for Stat {
    fn sum<I: Iterator<Item = Stat>>(iter: I) -> Stat {
        iter.fold(Stat::default(), Stat::combine)
    }
}

/// A point in one namespace's version history.
///
/// An empty `rootref` used as a query seed means "every root of `fsid`".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeadNode {
    pub fsid: Bytes,
    pub rootref: Bytes,
}

impl HeadNode {
    pub fn new(fsid: impl Into<Bytes>, rootref: impl Into<Bytes>) -> Self {
        Self {
            fsid: fsid.into(),
            rootref: rootref.into(),
        }
    }

    /// Seed selecting every root of a namespace.
    pub fn all_roots(fsid: impl Into<Bytes>) -> Self {
        Self::new(fsid, Bytes::new())
    }
}

/// A version graph edge: `rootref` supersedes `prevref` within `fsid`.
///
/// `tstamp`, `signed_by` and `signature` are carried opaquely. Two edges
/// with the same [`EdgeId`] are the same edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadEdge {
    #[serde(with = "codec::base64_bytes")]
    pub fsid: Bytes,
    #[serde(with = "codec::base64_bytes")]
    pub rootref: Bytes,
    #[serde(with = "codec::base64_bytes")]
    pub prevref: Bytes,
    pub tstamp: u64,
    #[serde(default, with = "codec::base64_bytes")]
    pub signed_by: Bytes,
    #[serde(default, with = "codec::base64_bytes")]
    pub signature: Bytes,
}

impl HeadEdge {
    /// Build an unsigned edge stamped with the current time in microseconds.
    pub fn new(
        fsid: impl Into<Bytes>,
        rootref: impl Into<Bytes>,
        prevref: impl Into<Bytes>,
    ) -> Self {
        let tstamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        Self {
            fsid: fsid.into(),
            rootref: rootref.into(),
            prevref: prevref.into(),
            tstamp,
            signed_by: Bytes::new(),
            signature: Bytes::new(),
        }
    }

    pub fn with_timestamp(mut self, tstamp: u64) -> Self {
        self.tstamp = tstamp;
        self
    }

    pub fn with_signature(mut self, signed_by: impl Into<Bytes>, signature: impl Into<Bytes>) -> Self {
        self.signed_by = signed_by.into();
        self.signature = signature.into();
        self
    }

    pub fn id(&self) -> EdgeId {
        EdgeId {
            fsid: self.fsid.clone(),
            prevref: self.prevref.clone(),
            rootref: self.rootref.clone(),
        }
    }

    pub fn prev_node(&self) -> HeadNode {
        HeadNode::new(self.fsid.clone(), self.prevref.clone())
    }

    pub fn root_node(&self) -> HeadNode {
        HeadNode::new(self.fsid.clone(), self.rootref.clone())
    }
}

/// Identity of a [`HeadEdge`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId {
    pub fsid: Bytes,
    pub prevref: Bytes,
    pub rootref: Bytes,
}

impl EdgeId {
    /// Stable, unambiguous byte encoding (length-prefixed fields).
    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(12 + self.fsid.len() + self.prevref.len() + self.rootref.len());
        for field in [&self.fsid, &self.prevref, &self.rootref] {
            buf.put_u32(field.len() as u32);
            buf.put_slice(field);
        }
        buf.freeze()
    }
}

/// Accounting snapshot of a quota store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Bytes held by live blocks; `size - charged` is the free space.
    pub charged: u64,
    /// Bytes held by swept blocks that have not been purged yet.
    pub swept: u64,
    /// Number of blocks physically present, swept ones included.
    pub blocks: usize,
    /// The refresh session currently open, if any.
    pub session: Option<Epoch>,
}
