//! entangle-server: the authoritative replication endpoint
//!
//! One listener accepts websocket upgrades at `/ws`; each connection gets a
//! reader task; a single operation-processor task owns all mutations of the
//! authoritative tree and drives the fan-out to every other client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use entangle_core::PathFilter;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

mod connection;
mod processor;
mod registry;

use processor::OpEnvelope;
use registry::Registry;

/// Operation ingest queue depth; a full queue blocks the offending reader
const OP_QUEUE_CAPACITY: usize = 100;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// The authoritative sync directory
    pub sync_dir: PathBuf,
}

pub(crate) struct ServerState {
    pub(crate) sync_dir: PathBuf,
    pub(crate) filter: PathFilter,
    pub(crate) registry: Registry,
    pub(crate) op_tx: mpsc::Sender<OpEnvelope>,
    /// Guards all writes to the authoritative tree
    pub(crate) disk_mutex: Mutex<()>,
}

/// The replication server
pub struct Server {
    config: ServerConfig,
    state: Arc<ServerState>,
    op_rx: mpsc::Receiver<OpEnvelope>,
}

impl Server {
    /// Create a server over `config.sync_dir`, filtering with `filter`.
    ///
    /// # Errors
    /// Returns an error if the sync directory cannot be created.
    pub fn new(config: ServerConfig, filter: PathFilter) -> color_eyre::Result<Self> {
        std::fs::create_dir_all(&config.sync_dir)?;

        let (op_tx, op_rx) = mpsc::channel(OP_QUEUE_CAPACITY);
        let state = Arc::new(ServerState {
            sync_dir: config.sync_dir.clone(),
            filter,
            registry: Registry::default(),
            op_tx,
            disk_mutex: Mutex::new(()),
        });

        Ok(Self {
            config,
            state,
            op_rx,
        })
    }

    /// Bind the configured port and serve until the process exits.
    ///
    /// # Errors
    /// Returns an error if the port cannot be bound.
    pub async fn run(self) -> color_eyre::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    ///
    /// # Errors
    /// Returns an error if the accept loop fails.
    pub async fn serve(self, listener: TcpListener) -> color_eyre::Result<()> {
        let Self { state, op_rx, .. } = self;

        drop(tokio::spawn(processor::run(Arc::clone(&state), op_rx)));

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .layer(Extension(state));

        info!(addr = %listener.local_addr()?, "websocket server listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}
