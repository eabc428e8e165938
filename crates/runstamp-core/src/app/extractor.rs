//! ContentExtractor - artifact をダウンロードして中身の文字列を取り出す
//!
//! # 失敗の扱い
//! - token が無い → 呼び出さずに `None`
//! - download が retry を使い切った → warn + `None`
//! - ファイル / エントリが無い → `None`（「前回値なし」と同じ扱い）
//! - zip が壊れている → warn + `None`
//!
//! どのケースも invocation を失敗させない。

use std::io::Read;
use std::path::Path;

use crate::domain::{AccessToken, ArtifactHandle, Download};
use crate::ports::ArtifactStore;
use crate::retry::{RetryOutcome, RetryPolicy, with_retry};

pub struct ContentExtractor<'a, S: ?Sized> {
    store: &'a S,
    token: Option<&'a AccessToken>,
    policy: &'a RetryPolicy,
    file_name: &'a str,
}

impl<'a, S: ArtifactStore + ?Sized> ContentExtractor<'a, S> {
    pub fn new(
        store: &'a S,
        token: Option<&'a AccessToken>,
        policy: &'a RetryPolicy,
        file_name: &'a str,
    ) -> Self {
        Self {
            store,
            token,
            policy,
            file_name,
        }
    }

    /// Download `handle` and return the trimmed payload text.
    pub async fn extract(&self, handle: &ArtifactHandle) -> Option<String> {
        let Some(token) = self.token else {
            tracing::debug!("no access token configured, skipping artifact download");
            return None;
        };

        let workdir = match tempfile::Builder::new().prefix("runstamp-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(error = %e, "could not create download directory");
                return None;
            }
        };

        let outcome = with_retry("download_artifact", self.policy, || {
            self.store.download(handle, token, workdir.path())
        })
        .await;

        let download = match outcome {
            RetryOutcome::Success(download) => download,
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(
                    artifact_id = %handle.id,
                    attempts,
                    error = %last_error,
                    "downloading artifact failed, treating as no previous timestamp"
                );
                return None;
            }
        };

        let contents = match download {
            Download::Flat { dir } => read_flat(&dir, self.file_name).await,
            Download::Archive { path } => {
                let file_name = self.file_name.to_string();
                tokio::task::spawn_blocking(move || read_archive(&path, &file_name))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "archive reader task failed");
                        None
                    })
            }
        };

        if contents.is_none() {
            tracing::debug!(
                artifact_id = %handle.id,
                file = self.file_name,
                "artifact has no timestamp payload"
            );
        }
        contents
    }
}

async fn read_flat(dir: &Path, file_name: &str) -> Option<String> {
    let path = dir.join(file_name);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return None;
    }
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Some(text.trim().to_string()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read timestamp file");
            None
        }
    }
}

/// Text of the `file_name` entry, or `None` when the archive is unreadable or
/// lacks the entry.
fn read_archive(path: &Path, file_name: &str) -> Option<String> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not open artifact archive");
            return None;
        }
    };

    let mut archive = match zip::ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "artifact archive is corrupt");
            return None;
        }
    };

    let mut entry = match archive.by_name(file_name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return None,
        Err(e) => {
            tracing::warn!(entry = file_name, error = %e, "could not read archive entry");
            return None;
        }
    };

    let mut text = String::new();
    match entry.read_to_string(&mut text) {
        Ok(_) => Some(text.trim().to_string()),
        Err(e) => {
            tracing::warn!(entry = file_name, error = %e, "archive entry is not readable text");
            None
        }
    }
}
