//! Background replica copies and the bookkeeping `sync` waits on.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use blockstore_core::{Bytes, EdgeId, Error, Result};
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::FederationConfig;

/// What a replica copy carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ReplicaKey {
    Block(Bytes),
    Edge(EdgeId),
}

/// Tracks in-flight replica copies, keyed by target child and payload.
///
/// A copy that is already pending for the same target is not scheduled a
/// second time; blocks and edges are immutable, so the pending copy already
/// carries the same content.
///
/// Completion is counted separately from the handle map: a copy stays in
/// `in_flight` until its task is dropped, whether it finished, failed or
/// was aborted. Every drainer waits on that count.
pub(crate) struct Replicator {
    pending: Mutex<HashMap<(usize, ReplicaKey), JoinHandle<()>>>,
    in_flight: Arc<watch::Sender<usize>>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl Replicator {
    pub fn new(config: &FederationConfig) -> Self {
        let permits = config
            .max_concurrent_replications
            .clamp(1, Semaphore::MAX_PERMITS);
        Self {
            pending: Mutex::new(HashMap::new()),
            in_flight: Arc::new(watch::Sender::new(0)),
            permits: Arc::new(Semaphore::new(permits)),
            timeout: config.replication_timeout(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run `copy` in the background. Its outcome is logged, never returned.
    pub fn schedule<F>(&self, child: usize, key: ReplicaKey, copy: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        pending.retain(|_, handle| !handle.is_finished());
        let slot = (child, key);
        if pending.contains_key(&slot) {
            trace!(child, key = ?slot.1, "replica copy already pending");
            return;
        }

        let permits = self.permits.clone();
        let timeout = self.timeout;
        let shutdown = self.shutdown.clone();
        let key = slot.1.clone();
        let in_flight = InFlight::enter(&self.in_flight);
        let handle = tokio::spawn(async move {
            let _in_flight = in_flight;
            let work = async {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Ok(());
                };
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, copy)
                        .await
                        .unwrap_or_else(|_| Err(Error::Task("replica copy timed out".into()))),
                    None => copy.await,
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => trace!(child, ?key, "replica copy abandoned"),
                result = work => match result {
                    Ok(()) => trace!(child, ?key, "replica copy done"),
                    Err(e) => debug!(child, ?key, error = %e, "replica copy failed"),
                },
            }
        });
        pending.insert(slot, handle);
    }

    /// Abort pending copies of `key` to every target.
    pub fn forget(&self, key: &ReplicaKey) {
        self.pending.lock().retain(|(_, pending_key), handle| {
            if pending_key == key {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Wait until no copy is in flight, including copies scheduled while
    /// waiting. Any number of callers may wait at once.
    pub async fn drain(&self) {
        let mut idle = self.in_flight.subscribe();
        let _ = idle.wait_for(|count| *count == 0).await;
        self.pending.lock().retain(|_, handle| !handle.is_finished());
    }

    pub fn pending(&self) -> usize {
        *self.in_flight.borrow()
    }
}

/// Holds one unit of the in-flight count for as long as a copy's task
/// exists.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(count: &Arc<watch::Sender<usize>>) -> Self {
        count.send_modify(|n| *n += 1);
        InFlight(count.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
