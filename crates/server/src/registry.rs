//! Connected-client registry
//!
//! Maps connection ids to live handles. Broadcast iterates over a snapshot
//! of the handles, so a connection removed mid-broadcast simply fails its
//! send and is skipped.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt as _;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// One connected client: its id plus the write half of its socket.
///
/// All writes to a socket go through `send`, whatever task they originate
/// in; the mutex keeps frames from interleaving.
pub(crate) struct ClientHandle {
    id: Uuid,
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl ClientHandle {
    pub(crate) fn new(id: Uuid, sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            id,
            sink: Mutex::new(sink),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// Send one text frame, serialized against all other writers.
    pub(crate) async fn send(&self, frame: String) -> color_eyre::Result<()> {
        self.sink.lock().await.send(Message::Text(frame)).await?;
        Ok(())
    }
}

/// Concurrent map of live connections
#[derive(Default)]
pub(crate) struct Registry {
    clients: RwLock<HashMap<Uuid, Arc<ClientHandle>>>,
}

impl Registry {
    pub(crate) async fn insert(&self, client: Arc<ClientHandle>) {
        let _ = self.clients.write().await.insert(client.id(), client);
    }

    pub(crate) async fn remove(&self, id: Uuid) {
        let _ = self.clients.write().await.remove(&id);
    }

    /// Snapshot every connection except `sender`.
    pub(crate) async fn peers_of(&self, sender: Uuid) -> Vec<Arc<ClientHandle>> {
        self.clients
            .read()
            .await
            .values()
            .filter(|client| client.id() != sender)
            .cloned()
            .collect()
    }
}
