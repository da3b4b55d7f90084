//! Operation processor: the single task that mutates the authoritative tree
//!
//! One consumer drains a bounded FIFO channel, applies each operation to
//! disk, then fans it out to every connection except the originator. Serial
//! processing defines the total order of the replicated log; a full channel
//! blocks enqueuing readers, which is the backpressure mechanism.

use std::sync::Arc;

use entangle_core::apply;
use entangle_core::protocol::{Envelope, FileOperation, MessageType};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::ServerState;

/// A queued operation together with the connection that sent it
pub(crate) struct OpEnvelope {
    pub(crate) sender_id: Uuid,
    pub(crate) op: FileOperation,
}

pub(crate) async fn run(state: Arc<ServerState>, mut op_rx: mpsc::Receiver<OpEnvelope>) {
    info!("starting operation processor");
    while let Some(envelope) = op_rx.recv().await {
        info!(
            op = ?envelope.op.op,
            path = %envelope.op.path,
            client_id = %envelope.sender_id,
            "processing operation"
        );

        {
            let _disk = state.disk_mutex.lock().await;
            apply::apply_operation(&state.sync_dir, &envelope.op);
        }

        broadcast(&state, envelope.sender_id, &envelope.op).await;
    }
}

/// Fan an applied operation out to every connection except its originator.
///
/// Per-receiver send failures are logged and skipped; the broadcast always
/// runs to completion.
async fn broadcast(state: &ServerState, sender_id: Uuid, op: &FileOperation) {
    let frame = match Envelope::encode(MessageType::FileOperation, op) {
        Ok(frame) => frame,
        Err(err) => {
            error!(%err, "failed to encode operation for broadcast");
            return;
        }
    };

    for client in state.registry.peers_of(sender_id).await {
        if let Err(err) = client.send(frame.clone()).await {
            error!(client_id = %client.id(), %err, "failed to broadcast operation");
        }
    }
}
