//! LocalArtifactStore - ディレクトリを artifact ストアとして使う（ローカル開発用）
//!
//! # レイアウト
//! ```text
//! <root>/<id>/artifact.json   # id, name, created_at, expires_at, file
//! <root>/<id>/<file>          # payload
//! ```
//!
//! `expired` は list 時に Clock と `expires_at` から計算します。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{SecondsFormat, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AccessToken, ArtifactHandle, ArtifactId, Download, ListQuery, RemoteError, UploadAck,
    UploadOptions,
};
use crate::ports::{ArtifactStore, Clock, SystemClock};

const META_FILE: &str = "artifact.json";
const MAX_CREATE_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalMeta {
    id: u64,
    name: String,
    created_at: String,
    expires_at: String,
    file: String,
}

pub struct LocalArtifactStore<C = SystemClock> {
    root: PathBuf,
    clock: C,
}

impl LocalArtifactStore<SystemClock> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, SystemClock)
    }
}

impl<C: Clock> LocalArtifactStore<C> {
    pub fn with_clock(root: impl Into<PathBuf>, clock: C) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    async fn read_all(&self) -> Result<Vec<LocalMeta>, RemoteError> {
        let mut metas = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(metas),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path().join(META_FILE);
            let raw = match tokio::fs::read(&meta_path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<LocalMeta>(&raw) {
                Ok(meta) => metas.push(meta),
                Err(e) => {
                    tracing::debug!(path = %meta_path.display(), error = %e, "skipping unreadable artifact metadata");
                }
            }
        }

        metas.sort_by_key(|m| m.id);
        Ok(metas)
    }

    fn is_expired(&self, meta: &LocalMeta) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&meta.expires_at) {
            Ok(expires_at) => self.clock.now() >= expires_at,
            Err(_) => true,
        }
    }
}

#[async_trait]
impl<C: Clock> ArtifactStore for LocalArtifactStore<C> {
    async fn list_artifacts(&self, query: &ListQuery) -> Result<Vec<ArtifactHandle>, RemoteError> {
        let per_page = query.per_page.max(1) as usize;
        let skip = (query.page.max(1) as usize - 1) * per_page;

        let page = self
            .read_all()
            .await?
            .into_iter()
            .filter(|m| query.name.as_ref().is_none_or(|name| &m.name == name))
            .skip(skip)
            .take(per_page)
            .map(|m| ArtifactHandle {
                id: ArtifactId(m.id),
                expired: self.is_expired(&m),
                name: m.name,
                created_at: m.created_at,
            })
            .collect();
        Ok(page)
    }

    fn filters_by_name(&self) -> bool {
        true
    }

    async fn download(
        &self,
        handle: &ArtifactHandle,
        _token: &AccessToken,
        dest_dir: &Path,
    ) -> Result<Download, RemoteError> {
        let source = self.root.join(handle.id.0.to_string());
        let mut entries = match tokio::fs::read_dir(&source).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RemoteError::NotFound(handle.id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == META_FILE || !entry.file_type().await?.is_file() {
                continue;
            }
            tokio::fs::copy(entry.path(), dest_dir.join(entry.file_name())).await?;
        }

        Ok(Download::Flat {
            dir: dest_dir.to_path_buf(),
        })
    }

    async fn upload(
        &self,
        name: &str,
        file: &Path,
        options: UploadOptions,
    ) -> Result<UploadAck, RemoteError> {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RemoteError::Protocol(format!("not a file: {}", file.display())))?
            .to_string();

        tokio::fs::create_dir_all(&self.root).await?;
        let mut id = self.read_all().await?.last().map_or(1, |m| m.id + 1);

        // Concurrent writers may grab the same id; move on to the next one.
        let mut attempts = 0;
        let dir = loop {
            let dir = self.root.join(id.to_string());
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => break dir,
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && attempts < MAX_CREATE_ATTEMPTS =>
                {
                    attempts += 1;
                    id += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let size = tokio::fs::copy(file, dir.join(&file_name)).await?;

        let now = self.clock.now();
        let meta = LocalMeta {
            id,
            name: name.to_string(),
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            expires_at: (now + TimeDelta::days(i64::from(options.retention_days)))
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            file: file_name,
        };
        tokio::fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&meta)?).await?;

        tracing::debug!(id, dir = %dir.display(), "stored local artifact");
        Ok(UploadAck {
            id: ArtifactId(id),
            size,
        })
    }
}
