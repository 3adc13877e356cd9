//! Scripted remote drive for tests and dry runs

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{PutResult, RemoteEntry, RemoteStore};
use crate::error::{Error, Result};

/// A failure the mock can be scripted to return from `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Unauthenticated,
    NetworkUnavailable,
    NotFound,
    Transient,
    Permanent,
}

impl MockFailure {
    fn into_error(self, remote_path: &str) -> Error {
        match self {
            Self::Unauthenticated => Error::Unauthenticated,
            Self::NetworkUnavailable => Error::NetworkUnavailable("mock offline".to_string()),
            Self::NotFound => Error::NotFound(format!("mock folder for {}", remote_path)),
            Self::Transient => Error::Transient("mock 503".to_string()),
            Self::Permanent => Error::Permanent("mock 400".to_string()),
        }
    }
}

/// In-memory remote drive
///
/// `put` pops the next scripted failure; once the script is empty every put
/// succeeds with ids `mock-1`, `mock-2`, ...
#[derive(Debug)]
pub struct MockRemoteStore {
    authenticated: AtomicBool,
    script: Mutex<VecDeque<MockFailure>>,
    calls: Mutex<Vec<(PathBuf, String)>>,
    stored: Mutex<Vec<String>>,
    next_id: AtomicU64,
    delay: Mutex<Option<Duration>>,
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            delay: Mutex::new(None),
        }
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Queue failures returned by the next puts, in order
    pub fn script(&self, failures: impl IntoIterator<Item = MockFailure>) {
        if let Ok(mut script) = self.script.lock() {
            script.extend(failures);
        }
    }

    /// Make every put sleep first (for timeout and cancellation tests)
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.delay.lock() {
            *guard = delay;
        }
    }

    /// Every `(local_path, remote_path)` put was called with
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Remote paths of successful puts
    pub fn stored(&self) -> Vec<String> {
        self.stored.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<PutResult> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((local_path.to_path_buf(), remote_path.to_string()));
        }

        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        if let Some(failure) = scripted {
            return Err(failure.into_error(remote_path));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut stored) = self.stored.lock() {
            stored.push(remote_path.to_string());
        }
        Ok(PutResult {
            remote_id: Some(format!("mock-{}", id)),
            remote_url: Some(format!("mock://drive{}", remote_path)),
            remote_path: remote_path.to_string(),
        })
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        let prefix = format!("/{}/", folder_id.trim_matches('/'));
        let entries = self
            .stored()
            .into_iter()
            .filter(|path| path.starts_with(&prefix))
            .map(|path| RemoteEntry {
                id: path.clone(),
                name: path.rsplit('/').next().unwrap_or_default().to_string(),
                path,
            })
            .collect();
        Ok(entries)
    }
}
