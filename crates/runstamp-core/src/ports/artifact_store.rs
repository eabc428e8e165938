//! ArtifactStore port - リモート artifact ストア（GitHub Actions / Local / InMemory）
//!
//! ストア側の実装詳細（ページング、zip 化、署名付き URL など）はここに隠蔽します。
//!
//! # 実装
//! - **GitHubArtifactStore**: 本番用
//! - **LocalArtifactStore**: ローカル開発用（ディレクトリ）
//! - **InMemoryArtifactStore**: テスト用

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{
    AccessToken, ArtifactHandle, Download, ListQuery, RemoteError, UploadAck, UploadOptions,
};

/// ArtifactStore は名前付き artifact の list / download / upload を提供
///
/// # 設計原則
/// - 各メソッドは 1 回のリモート呼び出し（retry は呼び出し側の責務）
/// - ハンドルは読み取り専用（ストアが作成し、保持期間で expired になる）
/// - 並行実行時は last-writer-wins（ロックなし）
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// One page of artifacts. An empty or short page ends the listing.
    async fn list_artifacts(&self, query: &ListQuery) -> Result<Vec<ArtifactHandle>, RemoteError>;

    /// Whether `ListQuery::name` is honored server-side.
    fn filters_by_name(&self) -> bool {
        false
    }

    /// Fetch `handle` into `dest_dir`.
    async fn download(
        &self,
        handle: &ArtifactHandle,
        token: &AccessToken,
        dest_dir: &Path,
    ) -> Result<Download, RemoteError>;

    /// Store `file` as the single payload of a new artifact called `name`.
    async fn upload(
        &self,
        name: &str,
        file: &Path,
        options: UploadOptions,
    ) -> Result<UploadAck, RemoteError>;
}

#[async_trait]
impl<S: ArtifactStore + ?Sized> ArtifactStore for std::sync::Arc<S> {
    async fn list_artifacts(&self, query: &ListQuery) -> Result<Vec<ArtifactHandle>, RemoteError> {
        (**self).list_artifacts(query).await
    }

    fn filters_by_name(&self) -> bool {
        (**self).filters_by_name()
    }

    async fn download(
        &self,
        handle: &ArtifactHandle,
        token: &AccessToken,
        dest_dir: &Path,
    ) -> Result<Download, RemoteError> {
        (**self).download(handle, token, dest_dir).await
    }

    async fn upload(
        &self,
        name: &str,
        file: &Path,
        options: UploadOptions,
    ) -> Result<UploadAck, RemoteError> {
        (**self).upload(name, file, options).await
    }
}
