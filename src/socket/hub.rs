use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Frame pushed to a client, both for replies and server-initiated events.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Outbound {
    pub event: String,
    pub data: Value,
}

type Senders = HashMap<Uuid, mpsc::UnboundedSender<Outbound>>;

/// Process-wide registry of open sockets, keyed by user then socket id.
#[derive(Clone, Default)]
pub struct SocketHub {
    sockets: Arc<RwLock<HashMap<Uuid, Senders>>>,
}

impl SocketHub {
    pub async fn register(&self, user_id: Uuid, socket_id: Uuid) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(socket_id, tx);
        debug!(%user_id, %socket_id, "socket registered");
        rx
    }

    pub async fn unregister(&self, user_id: Uuid, socket_id: Uuid) {
        let mut sockets = self.sockets.write().await;
        if let Some(per_user) = sockets.get_mut(&user_id) {
            per_user.remove(&socket_id);
            if per_user.is_empty() {
                sockets.remove(&user_id);
            }
        }
        debug!(%user_id, %socket_id, "socket unregistered");
    }

    /// Moves a socket to another user after it re-authenticates.
    pub async fn rebind(&self, socket_id: Uuid, from: Uuid, to: Uuid) {
        if from == to {
            return;
        }
        let mut sockets = self.sockets.write().await;
        let Some(tx) = sockets.get_mut(&from).and_then(|s| s.remove(&socket_id)) else {
            return;
        };
        if sockets.get(&from).is_some_and(HashMap::is_empty) {
            sockets.remove(&from);
        }
        sockets.entry(to).or_default().insert(socket_id, tx);
    }

    /// Sends `event` to every open socket of `user_id`; returns how many
    /// sockets accepted it.
    pub async fn emit_to_user(&self, user_id: Uuid, event: &str, data: Value) -> usize {
        let sockets = self.sockets.read().await;
        let Some(per_user) = sockets.get(&user_id) else {
            return 0;
        };
        per_user
            .values()
            .filter(|tx| {
                tx.send(Outbound {
                    event: event.to_string(),
                    data: data.clone(),
                })
                .is_ok()
            })
            .count()
    }

    /// Forgets every socket of `user_id`. Their outboxes close once drained,
    /// which ends each connection loop. Returns how many were dropped.
    pub async fn disconnect_user(&self, user_id: Uuid) -> usize {
        let dropped = self
            .sockets
            .write()
            .await
            .remove(&user_id)
            .map_or(0, |per_user| per_user.len());
        if dropped > 0 {
            debug!(%user_id, dropped, "sockets disconnected");
        }
        dropped
    }

    pub async fn connected(&self, user_id: Uuid) -> usize {
        self.sockets
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
