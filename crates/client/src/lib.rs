//! entangle-client: the mirroring endpoint
//!
//! Connects to the server, reconciles against the received manifest, applies
//! remote operations, and streams local changes back. Reconnects forever on
//! a fixed 5-second cadence; each new connection starts from a fresh
//! manifest.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use entangle_core::protocol::{Envelope, FileContent, FileOperation, FileRequest, MessageType};
use entangle_core::{apply, paths, Manifest, PathFilter};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

pub mod watch;

use watch::{EventOp, WatchEvent, Watcher};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Delay between connection attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server websocket URL, e.g. `ws://localhost:8080/ws`
    pub server_addr: String,
    /// Local mirror directory
    pub sync_dir: PathBuf,
    /// Watcher debounce window
    pub debounce: Duration,
}

/// State shared between the connection loop and the watcher task
struct Shared {
    sync_dir: PathBuf,
    filter: PathFilter,
    /// Write half of the current connection; `None` while disconnected.
    /// The mutex serializes every outbound frame.
    sink: Mutex<Option<WsSink>>,
    /// Echo suppression: held true for the whole of each inbound message,
    /// during which the watcher task drops everything it sees.
    is_syncing: AtomicBool,
}

impl Shared {
    /// Send one message on the current connection, if any.
    async fn send<T: Serialize>(&self, msg_type: MessageType, body: &T) {
        let frame = match Envelope::encode(msg_type, body) {
            Ok(frame) => frame,
            Err(err) => {
                error!(%err, "failed to encode message");
                return;
            }
        };

        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => {
                if let Err(err) = sink.send(Message::Text(frame)).await {
                    error!(%err, "failed to send message to server");
                }
            }
            None => debug!("not connected, dropping outbound message"),
        }
    }
}

/// The replication client
pub struct Client {
    config: ClientConfig,
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client mirroring into `config.sync_dir`.
    ///
    /// # Errors
    /// Returns an error if the sync directory cannot be created.
    pub fn new(config: ClientConfig, filter: PathFilter) -> color_eyre::Result<Self> {
        std::fs::create_dir_all(&config.sync_dir)?;

        let shared = Arc::new(Shared {
            sync_dir: config.sync_dir.clone(),
            filter,
            sink: Mutex::new(None),
            is_syncing: AtomicBool::new(false),
        });

        Ok(Self { config, shared })
    }

    /// Run forever: watch the local tree, connect, serve, reconnect.
    ///
    /// # Errors
    /// Returns an error only if the watcher backend cannot be started.
    pub async fn run(self) -> color_eyre::Result<()> {
        let watcher = Watcher::spawn(
            self.config.sync_dir.clone(),
            self.shared.filter.clone(),
            self.config.debounce,
        )?;
        drop(tokio::spawn(watch_loop(watcher, Arc::clone(&self.shared))));

        loop {
            let stream = match connect_async(self.config.server_addr.as_str()).await {
                Ok((stream, _)) => stream,
                Err(err) => {
                    error!(%err, "connection failed, retrying in 5 seconds");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            info!(addr = %self.config.server_addr, "connected to server");

            let (sink, read) = stream.split();
            *self.shared.sink.lock().await = Some(sink);

            self.serve(read).await;

            // Reconnect discards all per-connection state.
            *self.shared.sink.lock().await = None;
            self.shared.is_syncing.store(false, Ordering::SeqCst);
            warn!("disconnected from server, reconnecting in 5 seconds");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Read inbound messages until the connection fails.
    async fn serve(&self, mut read: WsRead) {
        while let Some(message) = read.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    error!(%err, "error reading from server");
                    return;
                }
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => return,
                _ => continue,
            };

            self.shared.is_syncing.store(true, Ordering::SeqCst);
            self.handle_message(&text).await;
            self.shared.is_syncing.store(false, Ordering::SeqCst);
        }
    }

    async fn handle_message(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%err, "failed to decode envelope from server");
                return;
            }
        };

        match envelope.msg_type {
            MessageType::Manifest => self.handle_manifest(&envelope).await,
            MessageType::FileContent => self.handle_file_content(&envelope),
            MessageType::FileOperation => self.handle_file_operation(&envelope),
            other => warn!(msg_type = ?other, "unexpected message type from server"),
        }
    }

    /// Reconcile the local tree against the server's manifest.
    async fn handle_manifest(&self, envelope: &Envelope) {
        let server_manifest: Manifest = match envelope.payload_as() {
            Ok(manifest) => manifest,
            Err(err) => {
                error!(%err, "failed to decode manifest");
                return;
            }
        };

        info!(
            files = server_manifest.len(),
            "received server manifest, reconciling"
        );
        let local = match Manifest::build(&self.shared.sync_dir, &self.shared.filter) {
            Ok(local) => local,
            Err(err) => {
                error!(%err, "failed to build local manifest");
                return;
            }
        };

        let plan = Manifest::diff(&local, &server_manifest);
        for path in &plan.to_delete {
            info!(%path, "removing local path not present on server");
            apply::remove_path(&self.shared.sync_dir, path);
        }

        if plan.to_request.is_empty() {
            info!("local tree is up to date");
            return;
        }

        info!(count = plan.to_request.len(), "requesting files from server");
        let request = FileRequest {
            paths: plan.to_request,
        };
        self.shared.send(MessageType::FileRequest, &request).await;
    }

    fn handle_file_content(&self, envelope: &Envelope) {
        let content: FileContent = match envelope.payload_as() {
            Ok(content) => content,
            Err(err) => {
                error!(%err, "failed to decode file content");
                return;
            }
        };

        info!(path = %content.path, "received file content from server");
        apply::write_file(&self.shared.sync_dir, &content.path, &content.content);
    }

    fn handle_file_operation(&self, envelope: &Envelope) {
        let op: FileOperation = match envelope.payload_as() {
            Ok(op) => op,
            Err(err) => {
                error!(%err, "failed to decode file operation");
                return;
            }
        };

        info!(op = ?op.op, path = %op.path, "applying operation from server");
        apply::apply_operation(&self.shared.sync_dir, &op);
    }
}

/// Forward local filesystem changes to the server.
///
/// Events observed while a remote message is being applied are dropped; that
/// is the whole echo-suppression contract.
async fn watch_loop(mut watcher: Watcher, shared: Arc<Shared>) {
    while let Some(event) = watcher.next().await {
        if shared.is_syncing.load(Ordering::SeqCst) {
            debug!(path = %event.path.display(), "suppressing event during sync");
            continue;
        }
        handle_fs_event(&shared, event).await;
    }
}

async fn handle_fs_event(shared: &Shared, event: WatchEvent) {
    let rel = match event.path.strip_prefix(&shared.sync_dir) {
        Ok(rel) => paths::rel_to_wire(rel),
        Err(_) => return,
    };
    if rel.is_empty() || shared.filter.is_ignored(&rel) {
        return;
    }

    let op = match event.op {
        EventOp::Remove | EventOp::Rename => FileOperation::remove(rel),
        EventOp::Create | EventOp::Write => {
            let meta = match std::fs::metadata(&event.path) {
                Ok(meta) => meta,
                // Gone already; a remove event will follow if it matters.
                Err(_) => return,
            };

            if meta.is_dir() {
                if event.op == EventOp::Create {
                    FileOperation::mkdir(rel)
                } else {
                    return;
                }
            } else {
                let content = match std::fs::read(&event.path) {
                    Ok(content) => content,
                    Err(err) => {
                        error!(path = %event.path.display(), %err, "failed to read changed file");
                        return;
                    }
                };
                FileOperation::write(rel, content)
            }
        }
    };

    info!(op = ?op.op, path = %op.path, "detected local change, sending to server");
    shared.send(MessageType::FileOperation, &op).await;
}
