//! Test utilities for keeper-core
//!
//! This module provides a mock remote drive server speaking the HTTP drive
//! API, so `HttpRemoteStore` can be exercised without a real drive.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use tokio::sync::oneshot;

#[derive(Default)]
struct DriveState {
    token: String,
    base_url: String,
    fail_puts: AtomicUsize,
    put_count: AtomicUsize,
    next_id: AtomicU64,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

/// Mock remote drive server for testing
pub struct MockDriveServer {
    addr: SocketAddr,
    state: Arc<DriveState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockDriveServer {
    /// Start the mock server on an available port, accepting `token` as bearer
    pub async fn start(token: &str) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(DriveState {
            token: token.to_string(),
            base_url: format!("http://{}", addr),
            ..Default::default()
        });

        let app = Router::new()
            .route("/files/*path", put(handle_put))
            .route("/folders/:id/children", get(handle_children))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer the next `n` uploads with 503
    pub fn fail_next_puts(&self, n: usize) {
        self.state.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Number of upload requests received (including failed ones)
    pub fn put_count(&self) -> usize {
        self.state.put_count.load(Ordering::SeqCst)
    }

    /// Stored file contents by remote path ("/2024/03/x.jpg")
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.files.lock().unwrap().get(path).cloned()
    }

    /// All stored remote paths
    pub fn paths(&self) -> Vec<String> {
        self.state.files.lock().unwrap().keys().cloned().collect()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockDriveServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn authorized(state: &DriveState, headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| t == state.token)
}

/// Upload endpoint
async fn handle_put(
    State(state): State<Arc<DriveState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.put_count.fetch_add(1, Ordering::SeqCst);

    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }

    let failing = state
        .fail_puts
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }

    let path = format!("/{}", path.trim_start_matches('/'));
    let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    state
        .files
        .lock()
        .unwrap()
        .insert(path.clone(), body.to_vec());

    Json(json!({
        "id": format!("file-{}", id),
        "url": format!("{}/files{}", state.base_url, path),
        "path": path,
    }))
    .into_response()
}

/// Folder listing; a folder id matches any path segment
async fn handle_children(
    State(state): State<Arc<DriveState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }

    let needle = format!("/{}/", id);
    let entries: Vec<_> = state
        .files
        .lock()
        .unwrap()
        .keys()
        .filter(|path| id == "root" || path.contains(&needle))
        .map(|path| {
            json!({
                "id": path.trim_start_matches('/'),
                "name": path.rsplit('/').next().unwrap_or_default(),
                "path": path,
            })
        })
        .collect();

    Json(entries).into_response()
}
