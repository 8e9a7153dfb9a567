//! Node Runtime
//!
//! Serves the file-level operations for one node identity: name listing,
//! manifest, range reads, and the replica-only write/delete surface, plus
//! the registry surface on the Primary. Each runtime owns its listener
//! and tracks open connections so a stop can forcibly destroy them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::io::ReaderStream;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use super::{NodeIdentity, NodeRole, ReplicaRegistry};
use crate::error::{Error, Result};
use crate::events::{EventBus, StatusKind};
use crate::store::LocalStore;

/// Open sockets of one listener, tracked only so a hard stop can abort
/// them. Entries remove themselves when a connection ends; a finished
/// task whose removal raced its insertion is harmless to abort.
#[derive(Debug, Default)]
struct ConnectionSet {
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl ConnectionSet {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, id: u64, handle: AbortHandle) {
        self.tasks.lock().expect("connection set poisoned").insert(id, handle);
    }

    fn remove(&self, id: u64) {
        self.tasks.lock().expect("connection set poisoned").remove(&id);
    }

    fn abort_all(&self) {
        let mut tasks = self.tasks.lock().expect("connection set poisoned");
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

/// Shared state for the request handlers
struct AppState {
    identity: NodeIdentity,
    store: LocalStore,
    /// Present only on the Primary
    registry: Option<Arc<ReplicaRegistry>>,
    events: EventBus,
}

/// A node runtime ready to start serving
pub struct NodeRuntime {
    identity: NodeIdentity,
    store: LocalStore,
    registry: Option<Arc<ReplicaRegistry>>,
    events: EventBus,
}

impl NodeRuntime {
    /// Create a runtime for `identity`, opening its store (and creating
    /// the replica registry if the identity is the Primary)
    pub async fn new(identity: NodeIdentity, events: EventBus) -> Result<Self> {
        let store = LocalStore::open(&identity.storage_root).await?;
        let registry = match identity.role {
            NodeRole::Primary => Some(Arc::new(ReplicaRegistry::new())),
            NodeRole::Replica | NodeRole::Client => None,
        };
        Ok(Self {
            identity,
            store,
            registry,
            events,
        })
    }

    /// The Primary's registry, if this runtime is the Primary
    pub fn registry(&self) -> Option<Arc<ReplicaRegistry>> {
        self.registry.clone()
    }

    /// This runtime's store
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Bind the listener and start the accept loop
    pub async fn start(self) -> Result<NodeHandle> {
        let listener = TcpListener::bind(&self.identity.bind_address)
            .await
            .map_err(|e| Error::Connectivity {
                address: self.identity.bind_address.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(AppState {
            identity: self.identity.clone(),
            store: self.store,
            registry: self.registry.clone(),
            events: self.events.clone(),
        });
        let app = create_router(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let connections = Arc::new(ConnectionSet::default());

        let label = self.identity.label();
        tracing::info!("{} listening on {}", label, local_addr);

        let accept_connections = Arc::clone(&connections);
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((socket, peer)) => {
                                tracing::trace!("{}: connection from {}", label, peer);
                                let app = app.clone();
                                let connections = Arc::clone(&accept_connections);
                                let id = connections.next_id();

                                let task = tokio::spawn({
                                    let connections = Arc::clone(&connections);
                                    async move {
                                        let io = TokioIo::new(socket);
                                        let service = hyper::service::service_fn(
                                            move |request| app.clone().oneshot(request),
                                        );
                                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                                            .serve_connection(io, service)
                                            .await
                                        {
                                            tracing::debug!("Connection from {} ended: {}", peer, e);
                                        }
                                        connections.remove(id);
                                    }
                                });
                                connections.insert(id, task.abort_handle());
                            }
                            Err(e) => {
                                tracing::error!("{}: accept error: {}", label, e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("{} listener closed", label);
        });

        Ok(NodeHandle {
            identity: self.identity,
            local_addr,
            registry: self.registry,
            shutdown: shutdown_tx,
            connections,
            accept_task,
        })
    }
}

/// Handle to a running node, used to address it and to stop it
pub struct NodeHandle {
    identity: NodeIdentity,
    local_addr: SocketAddr,
    registry: Option<Arc<ReplicaRegistry>>,
    shutdown: watch::Sender<bool>,
    connections: Arc<ConnectionSet>,
    accept_task: JoinHandle<()>,
}

impl NodeHandle {
    /// The identity this handle serves
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// The bound listener address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address as a `host:port` string
    pub fn address(&self) -> String {
        self.local_addr.to_string()
    }

    /// The Primary's registry, if this node is the Primary
    pub fn registry(&self) -> Option<Arc<ReplicaRegistry>> {
        self.registry.clone()
    }

    /// Hard stop: close the listener and forcibly destroy every open
    /// socket. Peers with in-flight transfers observe a transfer failure,
    /// not a clean end-of-stream.
    pub async fn hard_stop(self) {
        let _ = self.shutdown.send(true);
        self.connections.abort_all();
        let _ = self.accept_task.await;
        // A connection accepted while the stop signal was in flight is
        // inserted after the first drain; the loop has exited now, so a
        // second drain catches it.
        self.connections.abort_all();
        tracing::info!("{} stopped", self.identity.label());
    }
}

// ============ Router and handlers ============

fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // File-serving surface (every node)
        .route("/files", get(handle_list_files))
        .route("/manifest", get(handle_manifest))
        .route("/files/:name", get(handle_read_file))
        .route("/files/:name", put(handle_write_file))
        .route("/files/:name", delete(handle_delete_file))
        // Registry surface (Primary only)
        .route("/replicas", get(handle_list_replicas))
        .route("/replicas", post(handle_register))
        .route("/replicas/:address", delete(handle_unregister))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Register request
#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub address: String,
}

/// Register/unregister response
#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub changed: bool,
}

/// Error response
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(status: StatusCode, code: &str, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

/// Map a store error to a protocol-level failure and surface it as a
/// status notification
fn store_failure(state: &AppState, context: &str, e: Error) -> Response {
    let message = format!("{} failed: {}", context, e);
    tracing::warn!("{}: {}", state.identity.label(), message);
    state.events.status(
        state.identity.role,
        state.identity.replica_id,
        StatusKind::Error,
        message.clone(),
    );
    match e {
        Error::NotFound(name) => {
            error_response(StatusCode::NOT_FOUND, "NOT_FOUND", format!("no such file: {}", name))
        }
        Error::InvalidName(name) => {
            error_response(StatusCode::BAD_REQUEST, "INVALID_NAME", format!("invalid file name: {}", name))
        }
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR", message),
    }
}

/// Reject writes on the Primary
fn require_replica(state: &AppState, operation: &str) -> std::result::Result<(), Response> {
    if state.identity.role != NodeRole::Replica {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            format!("{} is not permitted on the primary", operation),
        ));
    }
    Ok(())
}

async fn handle_list_files(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_names().await {
        Ok(names) => Json(names).into_response(),
        Err(e) => store_failure(&state, "list", e),
    }
}

async fn handle_manifest(State(state): State<Arc<AppState>>) -> Response {
    match state.store.manifest().await {
        Ok(manifest) => Json(manifest).into_response(),
        Err(e) => store_failure(&state, "manifest", e),
    }
}

/// Parse a `Range: bytes=N-` header. Only offset-to-end ranges are part
/// of the protocol; anything else is treated as a full-content request.
fn parse_resume_offset(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;
    let (start, _end) = spec.split_once('-')?;
    start.trim().parse().ok()
}

async fn handle_read_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let offset = parse_resume_offset(&headers);

    let (file, total) = match state.store.open_range(&name, offset.unwrap_or(0)).await {
        Ok(pair) => pair,
        Err(e) => return store_failure(&state, "read", e),
    };

    match offset {
        // Resume request at or past the end: the caller likely already
        // has the full file.
        Some(offset) if offset >= total => {
            error_response(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "RANGE_NOT_SATISFIABLE",
                format!("offset {} is at or beyond size {}", offset, total),
            )
        }
        Some(offset) => Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, total - offset)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", offset, total - 1, total),
            )
            .body(Body::from_stream(ReaderStream::new(file)))
            .unwrap_or_else(|e| {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR", e.to_string())
            }),
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, total)
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from_stream(ReaderStream::new(file)))
            .unwrap_or_else(|e| {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR", e.to_string())
            }),
    }
}

async fn handle_write_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Body,
) -> Response {
    if let Err(rejection) = require_replica(&state, "write") {
        return rejection;
    }

    match state.store.write_stream(&name, body.into_data_stream()).await {
        Ok(written) => {
            tracing::debug!("{}: wrote {} ({} bytes)", state.identity.label(), name, written);
            state
                .events
                .file_list_changed(state.identity.role, state.identity.replica_id);
            StatusCode::OK.into_response()
        }
        Err(e) => store_failure(&state, "write", e),
    }
}

async fn handle_delete_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if let Err(rejection) = require_replica(&state, "delete") {
        return rejection;
    }

    match state.store.delete(&name).await {
        Ok(removed) => {
            if removed {
                tracing::debug!("{}: deleted {}", state.identity.label(), name);
                state
                    .events
                    .file_list_changed(state.identity.role, state.identity.replica_id);
            }
            StatusCode::OK.into_response()
        }
        Err(e) => store_failure(&state, "delete", e),
    }
}

/// Reject registry operations on replicas
fn require_registry(state: &AppState) -> std::result::Result<Arc<ReplicaRegistry>, Response> {
    state.registry.clone().ok_or_else(|| {
        error_response(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "the replica registry lives on the primary",
        )
    })
}

async fn handle_list_replicas(State(state): State<Arc<AppState>>) -> Response {
    match require_registry(&state) {
        Ok(registry) => Json(registry.snapshot().await).into_response(),
        Err(rejection) => rejection,
    }
}

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match require_registry(&state) {
        Ok(registry) => {
            let changed = registry.register(&req.address).await;
            Json(RegisterResponse { changed }).into_response()
        }
        Err(rejection) => rejection,
    }
}

async fn handle_unregister(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Response {
    match require_registry(&state) {
        Ok(registry) => {
            let changed = registry.unregister(&address).await;
            Json(RegisterResponse { changed }).into_response()
        }
        Err(rejection) => rejection,
    }
}
