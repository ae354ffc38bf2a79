use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use tokio::sync::mpsc;
use tracing::debug;

use shared::{
    domain::{ConnectionId, UserId},
    protocol::ServerEvent,
};

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Live mapping of user id to connection, plus the full set of open
/// connections (authenticated or not) for online-set broadcasts.
///
/// At most one presence entry per user: a later registration supersedes an
/// earlier one. All state sits behind one mutex; each churn event is a
/// single critical section and nothing awaits while it is held. Senders are
/// snapshotted under the lock and pushed after it is released.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: Mutex<Inner>,
    next_connection_id: AtomicU64,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, EventSender>,
    by_user: HashMap<UserId, ConnectionId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a connection to the broadcast set. Connections without a
    /// resolved user id stay here without ever being registered; they
    /// still receive online-set broadcasts.
    pub fn connect(&self, sender: EventSender) -> ConnectionId {
        let connection_id =
            ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut inner = self.lock();
        inner.connections.insert(connection_id, sender);
        connection_id
    }

    /// Marks the user online on the given connection, superseding any prior
    /// entry for that user, and broadcasts the new online set.
    pub fn register(&self, user_id: UserId, connection_id: ConnectionId) {
        let snapshot = {
            let mut inner = self.lock();
            inner.by_user.insert(user_id, connection_id);
            snapshot(&inner)
        };
        debug!(user_id = user_id.0, connection_id = connection_id.0, "presence registered");
        send_online_set(snapshot);
    }

    /// Removes the user's presence entry only while it still points at the
    /// terminating connection; a stale disconnect must not evict a newer
    /// registration for the same user.
    pub fn unregister(&self, user_id: UserId, connection_id: ConnectionId) {
        let snapshot = {
            let mut inner = self.lock();
            if inner.by_user.get(&user_id).copied() == Some(connection_id) {
                inner.by_user.remove(&user_id);
                Some(snapshot(&inner))
            } else {
                None
            }
        };
        if let Some(snapshot) = snapshot {
            debug!(user_id = user_id.0, connection_id = connection_id.0, "presence removed");
            send_online_set(snapshot);
        }
    }

    /// Drops the connection from the broadcast set. Presence bookkeeping is
    /// handled by `unregister`; this only retires the transport handle.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.lock().connections.remove(&connection_id);
    }

    pub fn lookup(&self, user_id: UserId) -> Option<EventSender> {
        let inner = self.lock();
        let connection_id = inner.by_user.get(&user_id)?;
        inner.connections.get(connection_id).cloned()
    }

    pub fn online_user_ids(&self) -> Vec<UserId> {
        let inner = self.lock();
        let mut ids: Vec<UserId> = inner.by_user.keys().copied().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("presence registry lock poisoned")
    }
}

fn snapshot(inner: &Inner) -> (Vec<EventSender>, Vec<UserId>) {
    let senders = inner.connections.values().cloned().collect();
    let mut ids: Vec<UserId> = inner.by_user.keys().copied().collect();
    ids.sort();
    (senders, ids)
}

/// O(connections) per presence change. Fine at this scale; the cost is the
/// price of the full-set broadcast contract.
fn send_online_set((senders, ids): (Vec<EventSender>, Vec<UserId>)) {
    let event = ServerEvent::GetOnlineUsers(ids);
    for sender in senders {
        let _ = sender.send(event.clone());
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
