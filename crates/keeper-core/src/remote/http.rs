//! HTTP remote drive
//!
//! Talks to a drive API exposing:
//!
//! - `PUT {endpoint}/files{remote_path}` with the raw file bytes, answering
//!   `{"id": ..., "url": ..., "path": ...}`
//! - `GET {endpoint}/folders/{id}/children`, answering `[{"id", "name", "path"}]`
//!
//! The bearer token comes from the `remote_access_token` setting and is
//! considered expired past `remote_token_expiry`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{PutResult, RemoteEntry, RemoteStore};
use crate::db::Database;
use crate::error::{Error, Result};

/// HTTP drive backend
#[derive(Clone, Debug)]
pub struct HttpRemoteStore {
    http_client: Client,
    endpoint: String,
    db: Database,
}

#[derive(Debug, Default, Deserialize)]
struct PutResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

impl HttpRemoteStore {
    /// Create a store for `endpoint`, reading credentials from `db`
    ///
    /// `timeout` bounds every request; a timed out request is `Transient`.
    pub fn new(endpoint: &str, db: Database, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(Error::Config("remote endpoint is not configured".to_string()));
        }
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            db,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current access token, or `Unauthenticated` when missing or expired
    fn token(&self) -> Result<String> {
        let now = self.db.clock().now();
        match self.db.remote_credentials()? {
            Some(creds) if creds.is_valid_at(now) => Ok(creds.access_token),
            _ => Err(Error::Unauthenticated),
        }
    }
}

/// Map a transport error onto the upload failure taxonomy
fn classify_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transient(format!("request timed out: {}", e))
    } else if e.is_connect() {
        Error::NetworkUnavailable(e.to_string())
    } else if e.is_request() || e.is_body() {
        // Connection dropped after it was established
        Error::Transient(format!("connection lost: {}", e))
    } else {
        Error::Http(e)
    }
}

/// Map a non-success status onto the upload failure taxonomy
fn classify_status(status: StatusCode, what: &str, body: &str) -> Error {
    let detail = if body.trim().is_empty() {
        format!("{} returned {}", what, status)
    } else {
        format!("{} returned {}: {}", what, status, body.trim())
    };
    match status.as_u16() {
        401 | 403 => Error::Unauthenticated,
        404 => Error::NotFound(detail),
        408 | 429 => Error::Transient(detail),
        s if s >= 500 => Error::Transient(detail),
        _ => Error::Permanent(detail),
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, what, &body))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn authenticated(&self) -> bool {
        match self.token() {
            Ok(_) => true,
            Err(e) => {
                debug!("Remote drive not authenticated: {}", e);
                false
            }
        }
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<PutResult> {
        let bytes = match tokio::fs::read(local_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Permanent(format!(
                    "local file missing: {}",
                    local_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let token = self.token()?;

        let remote_path = if remote_path.starts_with('/') {
            remote_path.to_string()
        } else {
            format!("/{}", remote_path)
        };
        let url = format!("{}/files{}", self.endpoint, remote_path);

        let response = self
            .http_client
            .put(&url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(classify_send_error)?;
        let response = check_status(response, &format!("PUT {}", remote_path)).await?;

        let body: PutResponse = response.json().await.unwrap_or_default();
        debug!("Uploaded {} to {}", local_path.display(), url);

        Ok(PutResult {
            remote_id: body.id,
            remote_url: body.url,
            remote_path: body.path.unwrap_or(remote_path),
        })
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        let token = self.token()?;
        let url = format!("{}/folders/{}/children", self.endpoint, folder_id);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_send_error)?;
        let response = check_status(response, &format!("GET folder {}", folder_id)).await?;

        Ok(response.json().await?)
    }
}
