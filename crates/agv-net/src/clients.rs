//! Connected socket clients.
//!
//! Each accepted socket gets a numeric [`ClientId`] and an unbounded outbound
//! queue drained by its connection task.  The registry only ever holds the
//! sending half, so pushing a frame is a non-blocking channel operation that
//! is safe to perform under the shared lock.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::debug;

/// Per-connection numeric handle, unique within one socket server lifetime.
pub type ClientId = u32;

/// Sending half of a client's outbound frame queue.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<ClientId, Outbound>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client`.  A reused id replaces the stale entry.
    pub fn insert(&mut self, client: ClientId, outbound: Outbound) {
        self.clients.insert(client, outbound);
    }

    pub fn remove(&mut self, client: ClientId) -> bool {
        self.clients.remove(&client).is_some()
    }

    /// Queue `frame` for one client.  Returns `false` when the client is
    /// unknown or its connection has already gone away.
    pub fn send_to(&mut self, client: ClientId, frame: &str) -> bool {
        let delivered = match self.clients.get(&client) {
            Some(tx) => tx.send(frame.to_string()).is_ok(),
            None => return false,
        };
        if !delivered {
            self.clients.remove(&client);
        }
        delivered
    }

    /// Queue `frame` for every client, pruning closed connections.  Returns
    /// the number of clients the frame was queued for.
    pub fn broadcast(&mut self, frame: &str) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, tx| tx.send(frame.to_string()).is_ok());
        let pruned = before - self.clients.len();
        if pruned > 0 {
            debug!(pruned, "dropped closed socket clients during broadcast");
        }
        self.clients.len()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Forget every client.  Dropping the senders ends their connection
    /// tasks.
    pub fn clear(&mut self) {
        self.clients.clear();
    }
}
