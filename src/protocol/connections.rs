//! Registry of authenticated lobby connections used by the broadcaster.

use crate::models::PlayerId;
use crate::protocol::DisconnectedError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

pub type ConnectionId = u64;

/// One signed-in client as the broadcaster sees it: an identity and an
/// outbound message channel. The framing layer owns the receiving half.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ConnectionId,
    pub player_id: Option<PlayerId>,
    pub authenticated: bool,
    tx: mpsc::UnboundedSender<Value>,
}

impl ClientConnection {
    pub fn send(&self, message: &Value) -> Result<(), DisconnectedError> {
        self.tx.send(message.clone()).map_err(|_| DisconnectedError)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        player_id: Option<PlayerId>,
        authenticated: bool,
        tx: mpsc::UnboundedSender<Value>,
    ) -> Arc<ClientConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(ClientConnection {
            id,
            player_id,
            authenticated,
            tx,
        });
        self.connections.lock().await.insert(id, conn.clone());
        conn
    }

    pub async fn unregister(&self, id: ConnectionId) {
        self.connections.lock().await.remove(&id);
    }

    pub async fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.lock().await.values().cloned().collect()
    }

    /// Sends to every connection matching `predicate`. Send failures are
    /// logged and skipped so one dead socket never blocks the fan-out.
    pub async fn broadcast<F>(&self, message: &Value, predicate: F)
    where
        F: Fn(&ClientConnection) -> bool,
    {
        for conn in self.snapshot().await {
            if !predicate(&conn) {
                continue;
            }
            if conn.send(message).is_err() {
                tracing::debug!("Dropping broadcast to closed connection {}", conn.id);
            }
        }
    }

    pub async fn send_to_player(&self, player_id: PlayerId, message: &Value) {
        for conn in self.snapshot().await {
            if conn.player_id == Some(player_id) {
                if conn.send(message).is_err() {
                    tracing::debug!("Failed to message player {player_id}: connection closed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_respects_predicate() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(Some(1), true, tx1).await;
        registry.register(Some(2), true, tx2).await;

        registry
            .broadcast(&json!({"command": "ping"}), |conn| {
                conn.player_id == Some(1)
            })
            .await;

        assert_eq!(rx1.try_recv().unwrap()["command"], "ping");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_connections_are_skipped() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.register(Some(7), true, tx).await;
        registry.unregister(conn.id).await;

        registry.broadcast(&json!({"command": "ping"}), |_| true).await;
        assert!(rx.try_recv().is_err());
    }
}
