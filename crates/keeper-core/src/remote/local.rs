//! Directory-backed remote drive
//!
//! Copies uploads under a root directory. Used for offline setups and as a
//! stand-in drive when no HTTP endpoint is configured.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{PutResult, RemoteEntry, RemoteStore};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct LocalRemoteStore {
    root: PathBuf,
}

impl LocalRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a remote path under the root, refusing `..` components
    fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        let relative = remote_path.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == "..") {
            return Err(Error::Permanent(format!("invalid remote path: {}", remote_path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RemoteStore for LocalRemoteStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn authenticated(&self) -> bool {
        true
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<PutResult> {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(Error::Permanent(format!(
                "local file missing: {}",
                local_path.display()
            )));
        }
        let target = self.resolve(remote_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Transient(format!("create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| Error::Transient(format!("copy to {}: {}", target.display(), e)))?;

        let remote_path = format!("/{}", remote_path.trim_start_matches('/'));
        Ok(PutResult {
            remote_id: Some(remote_path.trim_start_matches('/').to_string()),
            remote_url: Some(format!("file://{}", target.display())),
            remote_path,
        })
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        let dir = if folder_id.is_empty() || folder_id == "root" {
            self.root.clone()
        } else {
            self.resolve(folder_id)?
        };
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("folder {}", folder_id)));
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry
                .path()
                .strip_prefix(&self.root)
                .map(|p| format!("/{}", p.to_string_lossy()))
                .unwrap_or_else(|_| name.clone());
            entries.push(RemoteEntry {
                id: path.trim_start_matches('/').to_string(),
                name,
                path,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_copies_into_root() {
        let src = tempfile::tempdir().unwrap();
        let drive = tempfile::tempdir().unwrap();
        let file = src.path().join("09-220740.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let store = LocalRemoteStore::new(drive.path());
        let result = store.put(&file, "/2024/03/09-220740.jpg").await.unwrap();

        assert_eq!(result.remote_path, "/2024/03/09-220740.jpg");
        assert_eq!(result.remote_id.as_deref(), Some("2024/03/09-220740.jpg"));
        let copied = drive.path().join("2024/03/09-220740.jpg");
        assert_eq!(std::fs::read(copied).unwrap(), b"jpeg");

        let children = store.list_children("2024/03").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, "/2024/03/09-220740.jpg");
    }

    #[tokio::test]
    async fn test_put_rejects_missing_file_and_escape() {
        let drive = tempfile::tempdir().unwrap();
        let store = LocalRemoteStore::new(drive.path());

        let err = store
            .put(&drive.path().join("nope.jpg"), "/2024/03/nope.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Permanent(_)));

        let file = drive.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();
        let err = store.put(&file, "/../escape.jpg").await.unwrap_err();
        assert!(matches!(err, Error::Permanent(_)));
    }

    #[tokio::test]
    async fn test_list_missing_folder() {
        let drive = tempfile::tempdir().unwrap();
        let store = LocalRemoteStore::new(drive.path());
        let err = store.list_children("1999").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
