// ── Twin synchronizer ──
//
// Presents one coherent TwinState above a HubSession:
// - desired deltas apply only when their version is strictly newer, so
//   duplicates and out-of-order redeliveries are ignored;
// - reported writes are serialized with at most one in flight, and
//   writes requested meanwhile coalesce to the latest patch;
// - every successful write is followed by a twin re-fetch, since the hub
//   owns merge semantics for reported properties.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{AckStatus, DesiredUpdate, TwinState, merge_patch};
use crate::session::HubSession;

const EVENT_CHANNEL_SIZE: usize = 64;

/// Notifications for observers of the synchronized twin.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A newer desired delta was applied.
    DesiredChanged { version: i64, patch: Value },
    /// A desired delta was dropped because it could not be decoded.
    DecodeFailed { error: CoreError },
    /// The local snapshot was refreshed from the hub.
    Refreshed,
    /// A write was accepted but the follow-up re-fetch failed, so the
    /// snapshot may not reflect it.
    RefreshFailed { error: CoreError },
}

type WriteResult = Result<AckStatus, CoreError>;

/// A patch waiting to be written, plus everyone waiting on it.
struct PendingWrite {
    patch: Value,
    waiters: Vec<oneshot::Sender<WriteResult>>,
}

#[derive(Default)]
struct WriteQueue {
    in_flight: bool,
    pending: Option<PendingWrite>,
}

/// Cheaply cloneable handle to a synchronized twin.
#[derive(Clone)]
pub struct TwinSynchronizer {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for TwinSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwinSynchronizer").finish_non_exhaustive()
    }
}

struct SyncInner {
    session: HubSession,
    state: watch::Sender<TwinState>,
    events: broadcast::Sender<Arc<SyncEvent>>,
    writes: Mutex<WriteQueue>,
}

impl TwinSynchronizer {
    /// Attach to `session` without fetching. The snapshot starts empty.
    pub fn new(session: HubSession) -> Self {
        let (state, _) = watch::channel(TwinState::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let inner = Arc::new(SyncInner {
            session,
            state,
            events,
            writes: Mutex::new(WriteQueue::default()),
        });

        let weak: Weak<SyncInner> = Arc::downgrade(&inner);
        inner.session.on_desired_property_change(move |update| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_desired(&update);
            }
        });

        Self { inner }
    }

    /// Attach to a connected `session` and seed the snapshot from the hub.
    pub async fn start(session: HubSession) -> Result<Self, CoreError> {
        let sync = Self::new(session);
        sync.refresh().await?;
        Ok(sync)
    }

    pub fn session(&self) -> &HubSession {
        &self.inner.session
    }

    /// Current snapshot.
    pub fn state(&self) -> TwinState {
        self.inner.state.borrow().clone()
    }

    /// Watch snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<TwinState> {
        self.inner.state.subscribe()
    }

    /// Receive twin change and failure notifications.
    pub fn events(&self) -> broadcast::Receiver<Arc<SyncEvent>> {
        self.inner.events.subscribe()
    }

    /// Apply a desired-property delivery. Normally called by the session.
    pub fn apply_desired(&self, update: &DesiredUpdate) {
        self.inner.apply_desired(update);
    }

    /// Re-fetch the twin and replace the snapshot.
    pub async fn refresh(&self) -> Result<TwinState, CoreError> {
        self.inner.refresh().await
    }

    /// Write a reported-properties patch.
    ///
    /// If another write is in flight, this patch waits; a later call made
    /// before it is sent replaces it, and every caller whose patch was
    /// replaced receives the outcome of the one that was sent.
    pub async fn update_twin(&self, patch: Value) -> WriteResult {
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut queue = self.inner.queue();
            if queue.in_flight {
                match queue.pending {
                    Some(ref mut pending) => {
                        debug!("Coalescing reported write with pending patch");
                        pending.patch = patch;
                        pending.waiters.push(tx);
                    }
                    None => {
                        queue.pending = Some(PendingWrite {
                            patch,
                            waiters: vec![tx],
                        });
                    }
                }
                None
            } else {
                queue.in_flight = true;
                Some(PendingWrite {
                    patch,
                    waiters: vec![tx],
                })
            }
        };

        if let Some(first) = start {
            tokio::spawn(Arc::clone(&self.inner).drain_writes(first));
        }

        rx.await.map_err(|_| CoreError::NotConnected)?
    }
}

impl SyncInner {
    fn queue(&self) -> MutexGuard<'_, WriteQueue> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_desired(&self, update: &DesiredUpdate) {
        let delta = match update.decode() {
            Ok(delta) => delta,
            Err(error) => {
                warn!(error = %error, "Dropping malformed desired update");
                let _ = self.events.send(Arc::new(SyncEvent::DecodeFailed { error }));
                return;
            }
        };

        let applied = self.state.send_if_modified(|state| {
            if delta.version <= state.desired_version {
                return false;
            }
            merge_patch(&mut state.desired, &delta.patch);
            state.desired_version = delta.version;
            true
        });

        if applied {
            info!(version = delta.version, "Applied desired update");
            let _ = self.events.send(Arc::new(SyncEvent::DesiredChanged {
                version: delta.version,
                patch: delta.patch,
            }));
        } else {
            debug!(version = delta.version, "Ignoring stale desired update");
        }
    }

    async fn refresh(&self) -> Result<TwinState, CoreError> {
        let fresh = self.session.get_twin().await?;
        self.state.send_modify(|state| {
            state.reported = fresh.reported;
            // A push newer than this fetch may already have been applied.
            if fresh.desired_version >= state.desired_version {
                state.desired = fresh.desired;
                state.desired_version = fresh.desired_version;
            }
        });
        let _ = self.events.send(Arc::new(SyncEvent::Refreshed));
        Ok(self.state.borrow().clone())
    }

    /// Write `first`, then whatever patch accumulated meanwhile, until the
    /// queue is empty.
    async fn drain_writes(self: Arc<Self>, first: PendingWrite) {
        let mut current = first;
        loop {
            let result = self.session.update_twin(&current.patch).await;
            if result.is_ok() {
                if let Err(error) = self.refresh().await {
                    warn!(error = %error, "Twin refresh after write failed");
                    let _ = self.events.send(Arc::new(SyncEvent::RefreshFailed { error }));
                }
            }
            for waiter in current.waiters {
                let _ = waiter.send(result.clone());
            }

            let next = {
                let mut queue = self.queue();
                let next = queue.pending.take();
                if next.is_none() {
                    queue.in_flight = false;
                }
                next
            };
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
    }
}
