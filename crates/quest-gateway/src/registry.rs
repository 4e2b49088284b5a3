use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use quest_types::events::RealtimeEvent;

type Outbound = mpsc::UnboundedSender<RealtimeEvent>;

/// Live realtime connections, keyed by user. A user may hold several
/// connections at once (phone and browser); each gets every event.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    /// user_id -> (conn_id -> outbound channel)
    connections: Arc<RwLock<HashMap<i64, HashMap<Uuid, Outbound>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection for the user. Returns its id and the receiving end
    /// of its outbound channel.
    pub async fn register(&self, user_id: i64) -> (Uuid, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        debug!("Registered connection {} for user {}", conn_id, user_id);
        (conn_id, rx)
    }

    /// Removes one connection; the user's entry goes with its last one.
    pub async fn unregister(&self, user_id: i64, conn_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(conns) = connections.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                connections.remove(&user_id);
            }
        }
        debug!("Unregistered connection {} for user {}", conn_id, user_id);
    }

    /// Sends `event` to every live connection of the user and returns how
    /// many accepted it. Closed connections are skipped.
    pub async fn deliver(&self, user_id: i64, event: RealtimeEvent) -> usize {
        let connections = self.connections.read().await;
        let Some(conns) = connections.get(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, tx) in conns {
            match tx.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    "Dropped event for user {}: connection {} is closing",
                    user_id, conn_id
                ),
            }
        }
        delivered
    }

    /// Sends `event` to one connection only. Returns false if it is gone.
    pub async fn send_to_connection(&self, user_id: i64, conn_id: Uuid, event: RealtimeEvent) -> bool {
        let connections = self.connections.read().await;
        connections
            .get(&user_id)
            .and_then(|conns| conns.get(&conn_id))
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
