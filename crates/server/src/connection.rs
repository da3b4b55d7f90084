//! Per-connection lifecycle: manifest handshake and the reader loop

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use entangle_core::protocol::{Envelope, FileContent, FileOperation, FileRequest, MessageType};
use entangle_core::{paths, Manifest};
use futures_util::StreamExt as _;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::processor::OpEnvelope;
use crate::registry::ClientHandle;
use crate::ServerState;

pub(crate) async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (sink, mut stream) = socket.split();
    let client = Arc::new(ClientHandle::new(Uuid::new_v4(), sink));

    state.registry.insert(Arc::clone(&client)).await;
    info!(client_id = %client.id(), "client connected");

    if let Err(err) = send_manifest(&state, &client).await {
        error!(client_id = %client.id(), %err, "failed to send initial manifest");
        state.registry.remove(client.id()).await;
        return;
    }

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                error!(client_id = %client.id(), %err, "client read error");
                break;
            }
        };

        match message {
            Message::Text(text) => dispatch(&state, &client, &text).await,
            Message::Close(_) => {
                debug!(client_id = %client.id(), "received close frame");
                break;
            }
            // Ping/pong are answered by the protocol layer; binary is not
            // part of the wire format.
            _ => {}
        }
    }

    state.registry.remove(client.id()).await;
    info!(client_id = %client.id(), "client disconnected");
}

/// Build a fresh manifest of the authoritative tree and send it.
async fn send_manifest(state: &ServerState, client: &ClientHandle) -> color_eyre::Result<()> {
    info!(client_id = %client.id(), "building and sending initial manifest");
    let manifest = Manifest::build(&state.sync_dir, &state.filter)?;
    let frame = Envelope::encode(MessageType::Manifest, &manifest)?;
    client.send(frame).await
}

async fn dispatch(state: &ServerState, client: &ClientHandle, text: &str) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(client_id = %client.id(), %err, "failed to decode envelope");
            return;
        }
    };

    match envelope.msg_type {
        MessageType::FileRequest => handle_file_request(state, client, &envelope).await,
        MessageType::FileOperation => handle_file_operation(state, client, &envelope).await,
        other => {
            warn!(client_id = %client.id(), msg_type = ?other, "unexpected message type from client");
        }
    }
}

/// Serve one `file_content` per requested, non-ignored, readable path.
async fn handle_file_request(state: &ServerState, client: &ClientHandle, envelope: &Envelope) {
    let request: FileRequest = match envelope.payload_as() {
        Ok(request) => request,
        Err(err) => {
            error!(client_id = %client.id(), %err, "failed to decode file request");
            return;
        }
    };

    info!(client_id = %client.id(), count = request.paths.len(), "handling file request");
    for path in &request.paths {
        if state.filter.is_ignored(path) {
            continue;
        }

        let full = state.sync_dir.join(paths::wire_to_rel(path));
        let content = match std::fs::read(&full) {
            Ok(content) => content,
            Err(err) => {
                error!(%path, %err, "failed to read file for client request");
                continue;
            }
        };

        let body = FileContent {
            path: path.clone(),
            content,
        };
        let frame = match Envelope::encode(MessageType::FileContent, &body) {
            Ok(frame) => frame,
            Err(err) => {
                error!(%path, %err, "failed to encode file content");
                continue;
            }
        };
        if let Err(err) = client.send(frame).await {
            error!(client_id = %client.id(), %err, "failed to send file content");
            break;
        }
    }
}

/// Enqueue an operation for the processor; ignored paths are dropped here,
/// before they ever reach the queue.
async fn handle_file_operation(state: &ServerState, client: &ClientHandle, envelope: &Envelope) {
    let op: FileOperation = match envelope.payload_as() {
        Ok(op) => op,
        Err(err) => {
            error!(client_id = %client.id(), %err, "failed to decode file operation");
            return;
        }
    };

    if state.filter.is_ignored(&op.path) {
        debug!(path = %op.path, "dropping operation for ignored path");
        return;
    }

    debug!(path = %op.path, client_id = %client.id(), "queuing file operation");
    let queued = OpEnvelope {
        sender_id: client.id(),
        op,
    };
    if let Err(err) = state.op_tx.send(queued).await {
        error!(%err, "operation processor is gone");
    }
}
