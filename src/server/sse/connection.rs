//! SSE connection registry.
//!
//! Tracks the live stream of each user and the group subscriptions of those
//! streams. At most one connection per user is tracked; a reconnect closes the
//! superseded one. Writes are non-blocking: a full or closed channel is a
//! failed write for that connection only.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::frame::SseFrame;
use crate::server::metrics;

/// Why a frame could not be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The connection was closed or its stream went away.
    Closed,
    /// The client is not draining its stream fast enough.
    Full,
}

/// Writable handle to one SSE stream. Cheap to clone; clones share identity.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    user_id: Arc<str>,
    sender: mpsc::Sender<SseFrame>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn write(&self, frame: SseFrame) -> Result<(), WriteError> {
        if self.closed.is_cancelled() {
            return Err(WriteError::Closed);
        }
        self.sender.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => WriteError::Full,
            mpsc::error::TrySendError::Closed(_) => WriteError::Closed,
        })
    }

    /// Ends the stream. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Token cancelled when the connection is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionCount {
    pub users: usize,
    pub groups: usize,
}

#[derive(Default)]
struct Connections {
    users: HashMap<String, ConnectionHandle>,
    groups: HashMap<String, Vec<ConnectionHandle>>,
}

impl Connections {
    fn scrub_from_groups(&mut self, handle_id: u64) {
        self.groups.retain(|_, members| {
            members.retain(|h| h.id != handle_id);
            !members.is_empty()
        });
    }
}

/// Process-wide table of live SSE connections.
pub struct ConnectionRegistry {
    connections: RwLock<Connections>,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(Connections::default()),
            next_id: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Creates a handle and the receiving end of its frame channel. The handle
    /// is not registered yet.
    pub fn new_connection(&self, user_id: &str) -> (ConnectionHandle, mpsc::Receiver<SseFrame>) {
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        let handle = ConnectionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            user_id: Arc::from(user_id),
            sender,
            closed: CancellationToken::new(),
        };
        (handle, receiver)
    }

    /// Registers `handle` as the live connection of its user. A previous
    /// connection of the same user is closed and dropped from its groups.
    pub async fn add_user_connection(&self, handle: ConnectionHandle) {
        let mut conns = self.connections.write().await;
        let previous = conns.users.insert(handle.user_id.to_string(), handle.clone());
        if let Some(previous) = previous.filter(|p| p.id != handle.id) {
            info!(
                "User {} reconnected, closing superseded connection {}",
                handle.user_id, previous.id
            );
            conns.scrub_from_groups(previous.id);
            previous.close();
        }
        Self::update_gauge(&conns);
    }

    /// Subscribes `handle` to `group_id`. Adding the same handle twice is a no-op.
    pub async fn add_to_group(&self, group_id: &str, handle: &ConnectionHandle) {
        let mut conns = self.connections.write().await;
        let members = conns.groups.entry(group_id.to_string()).or_default();
        if !members.iter().any(|h| h.id == handle.id) {
            members.push(handle.clone());
        }
    }

    pub async fn get_user_connection(&self, user_id: &str) -> Option<ConnectionHandle> {
        let conns = self.connections.read().await;
        conns.users.get(user_id).cloned()
    }

    pub async fn get_group_connections(&self, group_id: &str) -> Vec<ConnectionHandle> {
        let conns = self.connections.read().await;
        conns.groups.get(group_id).cloned().unwrap_or_default()
    }

    /// Every registered connection, once.
    pub async fn all_connections(&self) -> Vec<ConnectionHandle> {
        let conns = self.connections.read().await;
        let mut seen = HashSet::new();
        conns
            .users
            .values()
            .chain(conns.groups.values().flatten())
            .filter(|h| seen.insert(h.id))
            .cloned()
            .collect()
    }

    /// Removes and closes the user's connection, wherever it is subscribed.
    pub async fn remove_user_connection(&self, user_id: &str) -> Option<ConnectionHandle> {
        let mut conns = self.connections.write().await;
        let removed = conns.users.remove(user_id)?;
        conns.scrub_from_groups(removed.id);
        removed.close();
        Self::update_gauge(&conns);
        debug!("Removed connection {} of user {}", removed.id, user_id);
        Some(removed)
    }

    /// Forgets `handle`. The user entry is only removed while it still points
    /// at this handle, so cleaning up a superseded connection never evicts its
    /// replacement. Safe to call any number of times.
    pub async fn cleanup_connection(&self, user_id: &str, handle: &ConnectionHandle) {
        let mut conns = self.connections.write().await;
        if conns
            .users
            .get(user_id)
            .is_some_and(|current| current.id == handle.id)
        {
            conns.users.remove(user_id);
            debug!("Cleaned up connection {} of user {}", handle.id, user_id);
        }
        conns.scrub_from_groups(handle.id);
        handle.close();
        Self::update_gauge(&conns);
    }

    pub async fn connection_count(&self) -> ConnectionCount {
        let conns = self.connections.read().await;
        ConnectionCount {
            users: conns.users.len(),
            groups: conns.groups.len(),
        }
    }

    /// Writes a keep-alive comment to `handle` every `interval` until a write
    /// fails or the connection closes, then cleans the connection up.
    pub fn supervise(self: &Arc<Self>, handle: ConnectionHandle, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            let closed = handle.closed_token();
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = handle.write(SseFrame::heartbeat()) {
                            debug!("Heartbeat to connection {} failed: {:?}", handle.id, err);
                            break;
                        }
                    }
                }
            }
            let user_id = handle.user_id.clone();
            registry.cleanup_connection(&user_id, &handle).await;
        })
    }

    fn update_gauge(conns: &Connections) {
        metrics::set_sse_connections(conns.users.len());
    }
}
