//! InMemoryArtifactStore - 開発・テスト用の artifact ストア
//!
//! # 特徴
//! - payload の形（flat / archive / 破損 / 空）を artifact ごとに指定できる
//! - list / download / upload それぞれに失敗を注入できる
//! - 呼び出し回数と upload 内容を記録する

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::archive::zip_single_file;
use crate::app::config::DEFAULT_FILE_NAME;
use crate::domain::{
    AccessToken, ArtifactHandle, ArtifactId, Download, ListQuery, RemoteError, UploadAck,
    UploadOptions,
};
use crate::ports::{ArtifactStore, Clock, SystemClock};

/// What a download of an artifact produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Materialized directory with the payload file.
    Flat(String),

    /// Zip archive with the payload file as its entry.
    Archive(String),

    /// Bytes that are not a zip archive.
    CorruptArchive,

    /// Materialized directory without the payload file.
    Empty,
}

#[derive(Debug, Default)]
struct InMemoryState {
    artifacts: Vec<(ArtifactHandle, Payload)>,
    next_id: u64,
    failing_lists: u32,
    failing_downloads: u32,
    failing_uploads: u32,
    list_calls: u32,
    download_calls: u32,
    upload_calls: u32,
    uploads: Vec<(String, String)>,
}

/// In-memory artifact store.
///
/// ```ignore
/// let store = InMemoryArtifactStore::new()
///     .with_artifact(ArtifactHandle::new(1, "last-run-timestamp", "2025-01-01T00:00:00Z"),
///                    Payload::Flat("2025-01-01T00:00:00.000Z".into()));
/// ```
pub struct InMemoryArtifactStore<C = SystemClock> {
    state: Mutex<InMemoryState>,
    file_name: String,
    name_filter: bool,
    clock: C,
}

impl InMemoryArtifactStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryArtifactStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryArtifactStore<C> {
    /// `clock` stamps `created_at` on uploads.
    pub fn with_clock(clock: C) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                next_id: 1,
                ..Default::default()
            }),
            file_name: DEFAULT_FILE_NAME.to_string(),
            name_filter: false,
            clock,
        }
    }

    /// Honor `ListQuery::name` server-side.
    pub fn with_name_filter(mut self, enabled: bool) -> Self {
        self.name_filter = enabled;
        self
    }

    pub fn with_artifact(mut self, handle: ArtifactHandle, payload: Payload) -> Self {
        let state = self.state.get_mut();
        state.next_id = state.next_id.max(handle.id.0 + 1);
        state.artifacts.push((handle, payload));
        self
    }

    /// The next `n` listing calls fail.
    pub async fn fail_lists(&self, n: u32) {
        self.state.lock().await.failing_lists = n;
    }

    /// The next `n` download calls fail.
    pub async fn fail_downloads(&self, n: u32) {
        self.state.lock().await.failing_downloads = n;
    }

    /// The next `n` upload calls fail.
    pub async fn fail_uploads(&self, n: u32) {
        self.state.lock().await.failing_uploads = n;
    }

    pub async fn list_calls(&self) -> u32 {
        self.state.lock().await.list_calls
    }

    pub async fn download_calls(&self) -> u32 {
        self.state.lock().await.download_calls
    }

    pub async fn upload_calls(&self) -> u32 {
        self.state.lock().await.upload_calls
    }

    /// Contents of every successful upload, oldest first.
    pub async fn uploaded_values(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .uploads
            .iter()
            .map(|(_, value)| value.clone())
            .collect()
    }
}

fn injected(kind: &str) -> RemoteError {
    RemoteError::Status {
        status: 503,
        body: format!("injected {kind} failure"),
    }
}

#[async_trait]
impl<C: Clock> ArtifactStore for InMemoryArtifactStore<C> {
    async fn list_artifacts(&self, query: &ListQuery) -> Result<Vec<ArtifactHandle>, RemoteError> {
        let mut state = self.state.lock().await;
        state.list_calls += 1;
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(injected("list"));
        }

        let per_page = query.per_page.max(1) as usize;
        let skip = (query.page.max(1) as usize - 1) * per_page;
        let page = state
            .artifacts
            .iter()
            .map(|(handle, _)| handle)
            .filter(|handle| match (&query.name, self.name_filter) {
                (Some(name), true) => &handle.name == name,
                _ => true,
            })
            .skip(skip)
            .take(per_page)
            .cloned()
            .collect();
        Ok(page)
    }

    fn filters_by_name(&self) -> bool {
        self.name_filter
    }

    async fn download(
        &self,
        handle: &ArtifactHandle,
        _token: &AccessToken,
        dest_dir: &Path,
    ) -> Result<Download, RemoteError> {
        let payload = {
            let mut state = self.state.lock().await;
            state.download_calls += 1;
            if state.failing_downloads > 0 {
                state.failing_downloads -= 1;
                return Err(injected("download"));
            }
            state
                .artifacts
                .iter()
                .find(|(h, _)| h.id == handle.id)
                .map(|(_, payload)| payload.clone())
                .ok_or_else(|| RemoteError::NotFound(handle.id.to_string()))?
        };

        match payload {
            Payload::Flat(contents) => {
                tokio::fs::write(dest_dir.join(&self.file_name), contents).await?;
                Ok(Download::Flat {
                    dir: dest_dir.to_path_buf(),
                })
            }
            Payload::Empty => Ok(Download::Flat {
                dir: dest_dir.to_path_buf(),
            }),
            Payload::Archive(contents) => {
                let path = dest_dir.join("artifact.zip");
                let bytes = zip_single_file(&self.file_name, contents.as_bytes())?;
                tokio::fs::write(&path, bytes).await?;
                Ok(Download::Archive { path })
            }
            Payload::CorruptArchive => {
                let path = dest_dir.join("artifact.zip");
                tokio::fs::write(&path, b"PK\x03\x04 definitely not a zip").await?;
                Ok(Download::Archive { path })
            }
        }
    }

    async fn upload(
        &self,
        name: &str,
        file: &Path,
        _options: UploadOptions,
    ) -> Result<UploadAck, RemoteError> {
        let contents = tokio::fs::read_to_string(file).await?;
        let created_at = self
            .clock
            .now()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let mut state = self.state.lock().await;
        state.upload_calls += 1;
        if state.failing_uploads > 0 {
            state.failing_uploads -= 1;
            return Err(injected("upload"));
        }

        let id = ArtifactId(state.next_id);
        state.next_id += 1;
        let size = contents.len() as u64;
        state.uploads.push((name.to_string(), contents.clone()));
        state.artifacts.push((
            ArtifactHandle {
                id,
                name: name.to_string(),
                created_at,
                expired: false,
            },
            Payload::Flat(contents),
        ));
        Ok(UploadAck { id, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: u32, per_page: u32) -> ListQuery {
        ListQuery {
            name: Some("a".to_string()),
            page,
            per_page,
        }
    }

    #[tokio::test]
    async fn pages_through_artifacts() {
        let store = InMemoryArtifactStore::new()
            .with_artifact(ArtifactHandle::new(1, "a", "2025-01-01T00:00:00Z"), Payload::Empty)
            .with_artifact(ArtifactHandle::new(2, "b", "2025-01-02T00:00:00Z"), Payload::Empty)
            .with_artifact(ArtifactHandle::new(3, "a", "2025-01-03T00:00:00Z"), Payload::Empty);

        assert_eq!(store.list_artifacts(&query(1, 2)).await.unwrap().len(), 2);
        assert_eq!(store.list_artifacts(&query(2, 2)).await.unwrap().len(), 1);
        assert!(store.list_artifacts(&query(3, 2)).await.unwrap().is_empty());
        assert_eq!(store.list_calls().await, 3);
    }

    #[tokio::test]
    async fn name_filter_is_optional() {
        let store = InMemoryArtifactStore::new()
            .with_name_filter(true)
            .with_artifact(ArtifactHandle::new(1, "a", "2025-01-01T00:00:00Z"), Payload::Empty)
            .with_artifact(ArtifactHandle::new(2, "b", "2025-01-02T00:00:00Z"), Payload::Empty);

        let page = store.list_artifacts(&query(1, 10)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "a");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryArtifactStore::new();
        store.fail_lists(1).await;

        assert!(store.list_artifacts(&query(1, 10)).await.is_err());
        assert!(store.list_artifacts(&query(1, 10)).await.is_ok());
    }

    #[tokio::test]
    async fn upload_becomes_listable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("timestamp.txt");
        std::fs::write(&file, "2025-01-01T00:00:00.000Z").unwrap();

        let store = InMemoryArtifactStore::new();
        let ack = store
            .upload("a", &file, UploadOptions { retention_days: 1 })
            .await
            .unwrap();

        let listed = store.list_artifacts(&query(1, 10)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ack.id);
        assert_eq!(
            store.uploaded_values().await,
            vec!["2025-01-01T00:00:00.000Z".to_string()]
        );
    }
}
