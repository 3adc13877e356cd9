//! Remote drive stores with pluggable backends
//!
//! # Architecture
//!
//! - `RemoteStore` trait is the only thing the upload queue knows about
//! - `HttpRemoteStore` talks to an HTTP drive API with a bearer token
//! - `LocalRemoteStore` mirrors uploads into a local directory
//! - `MockRemoteStore` replays scripted outcomes for tests
//! - `UnconfiguredRemoteStore` stands in when no drive is set up; uploads
//!   stay queued
//!
//! # Failure taxonomy
//!
//! `put` reports failures as `Error::Unauthenticated`,
//! `Error::NetworkUnavailable`, `Error::NotFound`, `Error::Transient` or
//! `Error::Permanent`. The queue retries everything except `Permanent`
//! (see [`Error::is_retryable`](crate::Error::is_retryable)).

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod http;
mod local;
mod mock;

pub use http::HttpRemoteStore;
pub use local::LocalRemoteStore;
pub use mock::{MockFailure, MockRemoteStore};

/// What the remote drive reports for a stored file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutResult {
    pub remote_id: Option<String>,
    pub remote_url: Option<String>,
    /// Path the file ended up at (normally the requested path)
    pub remote_path: String,
}

/// A file or folder listed by the remote drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// Remote drive the upload queue replicates into
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether uploads can currently be attempted
    async fn authenticated(&self) -> bool;

    /// Store the local file at `remote_path`
    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<PutResult>;

    /// List the children of a remote folder (used by drive setup)
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>>;
}

/// Remote store used before a drive is configured
///
/// Never authenticated, so drains leave the queue untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRemoteStore;

#[async_trait]
impl RemoteStore for UnconfiguredRemoteStore {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn authenticated(&self) -> bool {
        false
    }

    async fn put(&self, _local_path: &Path, _remote_path: &str) -> Result<PutResult> {
        Err(Error::Unauthenticated)
    }

    async fn list_children(&self, _folder_id: &str) -> Result<Vec<RemoteEntry>> {
        Err(Error::Unauthenticated)
    }
}

/// Join a base path and a relative remote path with exactly one `/` between parts
pub fn join_remote_path(base: &str, rest: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let rest = rest.trim().trim_start_matches('/');
    let base = if base.is_empty() || base.starts_with('/') {
        base.to_string()
    } else {
        format!("/{}", base)
    };
    format!("{}/{}", base, rest)
}
