//! ArtifactLocator - 最新の有効な artifact を探す
//!
//! # 選択ルール
//! - name が一致し、expired でないものだけを候補にする
//! - `created_at` の文字列比較で最大のものを選ぶ（ゼロ埋め ISO-8601 なので時刻順と一致）
//! - 同じ `created_at` の場合は id が大きい方
//!
//! listing が retry を使い切った場合は「見つからない」として扱い、warn を出す。

use crate::domain::{ArtifactHandle, ListQuery};
use crate::ports::ArtifactStore;
use crate::retry::{RetryOutcome, RetryPolicy, with_retry};

/// Finds the most recent non-expired artifact with a given name.
pub struct ArtifactLocator<'a, S: ?Sized> {
    store: &'a S,
    policy: &'a RetryPolicy,
    max_pages: u32,
    per_page: u32,
}

impl<'a, S: ArtifactStore + ?Sized> ArtifactLocator<'a, S> {
    pub fn new(store: &'a S, policy: &'a RetryPolicy, max_pages: u32, per_page: u32) -> Self {
        Self {
            store,
            policy,
            max_pages,
            per_page,
        }
    }

    pub async fn locate_latest(&self, artifact_name: &str) -> Option<ArtifactHandle> {
        let candidates = self.list_named(artifact_name).await?;
        let latest = select_latest(candidates);
        match &latest {
            Some(handle) => tracing::debug!(
                artifact_id = %handle.id,
                created_at = %handle.created_at,
                "located latest artifact"
            ),
            None => tracing::info!(artifact = artifact_name, "no unexpired artifact found"),
        }
        latest
    }

    /// Every listed artifact called `artifact_name`, or `None` when listing
    /// gave up.
    async fn list_named(&self, artifact_name: &str) -> Option<Vec<ArtifactHandle>> {
        let server_filter = self.store.filters_by_name();
        let mut found = Vec::new();

        for page in 1..=self.max_pages {
            let query = ListQuery {
                name: server_filter.then(|| artifact_name.to_string()),
                page,
                per_page: self.per_page,
            };

            let outcome = with_retry("list_artifacts", self.policy, || {
                self.store.list_artifacts(&query)
            })
            .await;

            let batch = match outcome {
                RetryOutcome::Success(batch) => batch,
                RetryOutcome::Exhausted {
                    attempts,
                    last_error,
                } => {
                    tracing::warn!(
                        attempts,
                        error = %last_error,
                        "listing artifacts failed, treating as no artifacts found"
                    );
                    return None;
                }
            };

            let short_page = (batch.len() as u64) < u64::from(self.per_page);
            found.extend(batch.into_iter().filter(|h| h.name == artifact_name));
            if short_page {
                return Some(found);
            }
        }

        tracing::warn!(
            max_pages = self.max_pages,
            per_page = self.per_page,
            "artifact listing hit the page limit, newer artifacts may be missed"
        );
        Some(found)
    }
}

/// Latest non-expired handle by `created_at`; ties go to the highest id.
pub fn select_latest(handles: impl IntoIterator<Item = ArtifactHandle>) -> Option<ArtifactHandle> {
    handles
        .into_iter()
        .filter(|h| !h.expired)
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        })
}
