//! TimestampStore - 取得（retrieve）と保存（store）のオーケストレーター
//!
//! # 状態遷移（1 invocation）
//! `Start → Retrieving? → Storing? → Done | Failed`
//!
//! - Retrieving: locator → extractor → validator。どの段階の欠損も「前回値なし」
//! - Storing: 単調性ガード → upload（upload 失敗のみ致命的）
//! - `fail_if_missing` による失敗は get-and-set の Storing を止めない

use chrono::{SubsecRound, TimeDelta};

use super::config::{MISSING_TIMESTAMP_MESSAGE, StoreConfig};
use super::extractor::ContentExtractor;
use super::locator::ArtifactLocator;
use crate::domain::{
    Mode, StoreError, StoredTimestamp, UploadOptions, ValidationError, validate,
};
use crate::ports::{ArtifactStore, Clock};
use crate::retry::with_retry;

/// Why no previous timestamp is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// No unexpired artifact, or listing gave up.
    NoArtifact,

    /// Artifact exists but no payload could be read from it.
    NoPayload,

    /// Payload was read but rejected.
    Invalid(ValidationError),
}

/// Result of the retrieval stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    Found(StoredTimestamp),
    Missing(MissingReason),
}

impl Retrieval {
    pub fn timestamp(&self) -> Option<&StoredTimestamp> {
        match self {
            Retrieval::Found(ts) => Some(ts),
            Retrieval::Missing(_) => None,
        }
    }
}

/// What one invocation did.
#[derive(Debug)]
pub struct InvocationReport {
    pub mode: Mode,

    /// `None` when the mode does not retrieve.
    pub retrieval: Option<Retrieval>,

    /// Value uploaded by this invocation.
    pub stored: Option<StoredTimestamp>,

    /// Messages of every failure that marks the invocation failed.
    pub failures: Vec<String>,
}

impl InvocationReport {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            retrieval: None,
            stored: None,
            failures: Vec::new(),
        }
    }

    /// The externally visible value: the retrieved timestamp, if any.
    pub fn output(&self) -> Option<&StoredTimestamp> {
        self.retrieval.as_ref().and_then(Retrieval::timestamp)
    }

    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Persists a single monotonically advancing timestamp in an artifact store.
pub struct TimestampStore<S, C> {
    store: S,
    clock: C,
    config: StoreConfig,
}

impl<S: ArtifactStore, C: Clock> TimestampStore<S, C> {
    pub fn new(store: S, clock: C, config: StoreConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Run the stages `mode` selects.
    pub async fn run(&self, mode: Mode) -> InvocationReport {
        tracing::info!(%mode, artifact = %self.config.artifact_name, "starting");
        let mut report = InvocationReport::new(mode);

        let previous = if mode.retrieves() {
            let retrieval = self.retrieve().await;
            if let Retrieval::Missing(reason) = &retrieval
                && self.config.fail_if_missing
            {
                tracing::error!(?reason, "{MISSING_TIMESTAMP_MESSAGE}");
                report.failures.push(MISSING_TIMESTAMP_MESSAGE.to_string());
            }
            let previous = retrieval.timestamp().cloned();
            report.retrieval = Some(retrieval);
            previous
        } else {
            None
        };

        if mode.stores() {
            match self.store(previous.as_ref()).await {
                Ok(stored) => report.stored = Some(stored),
                Err(e) => {
                    tracing::error!(error = %e, "storing timestamp failed");
                    report.failures.push(e.to_string());
                }
            }
        }

        tracing::info!(
            output = report.output().map(StoredTimestamp::as_str),
            stored = report.stored.as_ref().map(StoredTimestamp::as_str),
            failed = report.is_failed(),
            "finished"
        );
        report
    }

    /// Locate → extract → validate. Never fails; every problem collapses
    /// into [`Retrieval::Missing`] with a single warning.
    pub async fn retrieve(&self) -> Retrieval {
        let locator = ArtifactLocator::new(
            &self.store,
            &self.config.list_retry,
            self.config.max_pages,
            self.config.per_page,
        );
        let Some(handle) = locator.locate_latest(&self.config.artifact_name).await else {
            tracing::warn!("no previous run timestamp artifact found");
            return Retrieval::Missing(MissingReason::NoArtifact);
        };

        let extractor = ContentExtractor::new(
            &self.store,
            self.config.token.as_ref(),
            &self.config.download_retry,
            &self.config.file_name,
        );
        let raw = extractor.extract(&handle).await;

        match raw.as_deref().map(StoredTimestamp::parse) {
            Some(Ok(ts)) => {
                tracing::info!(timestamp = %ts, artifact_id = %handle.id, "retrieved previous run timestamp");
                Retrieval::Found(ts)
            }
            None | Some(Err(ValidationError::Empty)) => {
                tracing::warn!(artifact_id = %handle.id, "previous run timestamp artifact has no payload");
                Retrieval::Missing(MissingReason::NoPayload)
            }
            Some(Err(e @ ValidationError::Pattern)) => {
                tracing::warn!(
                    value = raw.as_deref(),
                    "stored value is not an ISO-8601 UTC timestamp, ignoring it"
                );
                Retrieval::Missing(MissingReason::Invalid(e))
            }
            Some(Err(e @ ValidationError::Parse)) => {
                tracing::warn!(
                    value = raw.as_deref(),
                    "stored value is not a valid calendar instant, ignoring it"
                );
                Retrieval::Missing(MissingReason::Invalid(e))
            }
        }
    }

    /// Upload a fresh value strictly greater than `previous`.
    pub async fn store(
        &self,
        previous: Option<&StoredTimestamp>,
    ) -> Result<StoredTimestamp, StoreError> {
        let value = self.next_value(previous)?;

        let staging = tempfile::Builder::new().prefix("runstamp-").tempdir()?;
        let file = staging.path().join(&self.config.file_name);
        tokio::fs::write(&file, value.as_str()).await?;

        let options = UploadOptions {
            retention_days: self.config.retention_days,
        };
        let ack = with_retry("upload_artifact", &self.config.upload_retry, || {
            self.store
                .upload(&self.config.artifact_name, &file, options)
        })
        .await
        .into_result()?;

        tracing::info!(timestamp = %value, artifact_id = %ack.id, "stored run timestamp");
        Ok(value)
    }

    /// Retrieve, then store a value newer than what was retrieved.
    ///
    /// The retrieval is returned even when the store step fails.
    pub async fn retrieve_then_store(
        &self,
    ) -> (Retrieval, Result<StoredTimestamp, StoreError>) {
        let retrieval = self.retrieve().await;
        let stored = self.store(retrieval.timestamp()).await;
        (retrieval, stored)
    }

    /// Current instant, re-read until it sorts after `previous`.
    ///
    /// When the clock cannot get there within `max_monotonic_iterations`
    /// reads, falls back to `previous` truncated to the second plus one
    /// second. The first 19 characters are fixed width, so that sorts after
    /// `previous` unless the year runs past 9999.
    fn next_value(
        &self,
        previous: Option<&StoredTimestamp>,
    ) -> Result<StoredTimestamp, StoreError> {
        let mut candidate = StoredTimestamp::from_datetime(self.clock.now());
        let Some(previous) = previous else {
            return checked(candidate, None);
        };

        let mut iterations = 0;
        while candidate <= *previous && iterations < self.config.max_monotonic_iterations {
            candidate = StoredTimestamp::from_datetime(self.clock.now());
            iterations += 1;
        }
        if candidate > *previous {
            return checked(candidate, Some(previous));
        }

        let bumped = previous
            .instant()
            .trunc_subsecs(0)
            .checked_add_signed(TimeDelta::seconds(1))
            .map(StoredTimestamp::from_datetime);
        let Some(bumped) = bumped else {
            return Err(StoreError::NoLaterTimestamp {
                value: format!("{previous} + 1s"),
            });
        };
        tracing::warn!(
            previous = %previous,
            clock = %candidate,
            stored = %bumped,
            "clock did not advance past the previous timestamp"
        );
        checked(bumped, Some(previous))
    }
}

/// `value` when it is storable and sorts after `previous`.
fn checked(
    value: StoredTimestamp,
    previous: Option<&StoredTimestamp>,
) -> Result<StoredTimestamp, StoreError> {
    let after_previous = previous.is_none_or(|p| value > *p);
    if after_previous && validate(Some(value.as_str())).is_ok() {
        return Ok(value);
    }
    Err(StoreError::NoLaterTimestamp {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccessToken, ArtifactHandle, validate};
    use crate::impls::inmem_store::{InMemoryArtifactStore, Payload};
    use crate::ports::{FixedClock, SequenceClock, SystemClock};
    use crate::retry::RetryPolicy;
    use crate::test_support::WarnCapture;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    const T0: &str = "2025-01-01T00:00:00.000Z";
    const NAME: &str = "last-run-timestamp";

    fn config() -> StoreConfig {
        StoreConfig::new()
            .with_token(Some(AccessToken::new("token")))
            .with_retry(RetryPolicy::immediate(2))
    }

    fn with_prior(payload: Payload) -> Arc<InMemoryArtifactStore> {
        Arc::new(InMemoryArtifactStore::new().with_artifact(
            ArtifactHandle::new(1, NAME, "2025-01-01T00:00:05Z"),
            payload,
        ))
    }

    fn ts(raw: &str) -> StoredTimestamp {
        StoredTimestamp::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn scenario_a_set_without_prior_uploads_once() {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let store = TimestampStore::new(artifacts.clone(), SystemClock, config());

        let report = store.run(Mode::Set).await;

        assert!(report.output().is_none());
        assert!(report.retrieval.is_none());
        assert!(!report.is_failed());
        assert_eq!(artifacts.upload_calls().await, 1);
        assert_eq!(artifacts.list_calls().await, 0);
        let uploaded = artifacts.uploaded_values().await;
        assert_eq!(uploaded.len(), 1);
        assert_eq!(validate(Some(&uploaded[0])), Ok(()));
    }

    #[tokio::test]
    async fn scenario_b_get_emits_the_stored_value() {
        let artifacts = with_prior(Payload::Flat(T0.to_string()));
        let store = TimestampStore::new(artifacts.clone(), SystemClock, config());

        let report = store.run(Mode::Get).await;

        assert_eq!(report.output().map(StoredTimestamp::as_str), Some(T0));
        assert!(!report.is_failed());
        assert_eq!(artifacts.upload_calls().await, 0);
    }

    #[tokio::test]
    async fn scenario_c_malformed_value_is_ignored() {
        let (capture, _guard) = WarnCapture::install();
        let artifacts = with_prior(Payload::Flat("not-a-timestamp".to_string()));
        let store = TimestampStore::new(artifacts, SystemClock, config());

        let report = store.run(Mode::Get).await;

        let warnings = capture.warnings();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("not an ISO-8601 UTC timestamp"));

        assert!(report.output().is_none());
        assert_eq!(
            report.retrieval,
            Some(Retrieval::Missing(MissingReason::Invalid(
                ValidationError::Pattern
            )))
        );
        assert!(!report.is_failed());
    }

    #[tokio::test]
    async fn scenario_d_missing_with_fail_if_missing_fails() {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let store = TimestampStore::new(
            artifacts.clone(),
            SystemClock,
            config().with_fail_if_missing(true),
        );

        let report = store.run(Mode::Get).await;

        assert!(report.output().is_none());
        assert!(report.is_failed());
        assert!(report.failures[0].contains("No valid previous run timestamp"));
        assert_eq!(artifacts.upload_calls().await, 0);
    }

    #[tokio::test]
    async fn scenario_e_get_and_set_advances_past_the_prior_value() {
        let artifacts = with_prior(Payload::Archive(T0.to_string()));
        let store = TimestampStore::new(artifacts.clone(), SystemClock, config());

        let report = store.run(Mode::GetAndSet).await;

        assert_eq!(report.output().map(StoredTimestamp::as_str), Some(T0));
        let stored = report.stored.unwrap();
        assert!(stored > ts(T0));
        assert_eq!(artifacts.uploaded_values().await, vec![stored.to_string()]);
    }

    #[tokio::test]
    async fn calendar_invalid_value_is_reported_as_parse() {
        let (capture, _guard) = WarnCapture::install();
        let artifacts = with_prior(Payload::Flat("2025-13-01T00:00:00Z".to_string()));
        let store = TimestampStore::new(artifacts, SystemClock, config());

        assert_eq!(
            store.retrieve().await,
            Retrieval::Missing(MissingReason::Invalid(ValidationError::Parse))
        );
        let warnings = capture.warnings();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("not a valid calendar instant"));
    }

    #[tokio::test]
    async fn expired_latest_artifact_is_skipped() {
        let artifacts = Arc::new(
            InMemoryArtifactStore::new()
                .with_artifact(
                    ArtifactHandle::new(1, NAME, "2025-01-01T00:00:00Z"),
                    Payload::Flat(T0.to_string()),
                )
                .with_artifact(
                    ArtifactHandle::new(2, NAME, "2025-02-01T00:00:00Z").expired(),
                    Payload::Flat("2025-02-01T00:00:00.000Z".to_string()),
                ),
        );
        let store = TimestampStore::new(artifacts, SystemClock, config());

        assert_eq!(store.retrieve().await, Retrieval::Found(ts(T0)));
    }

    #[tokio::test]
    async fn empty_payload_is_missing() {
        let artifacts = with_prior(Payload::Flat("   ".to_string()));
        let store = TimestampStore::new(artifacts, SystemClock, config());

        assert_eq!(
            store.retrieve().await,
            Retrieval::Missing(MissingReason::NoPayload)
        );
    }

    #[tokio::test]
    async fn missing_token_yields_no_payload_without_failing() {
        let (capture, _guard) = WarnCapture::install();
        let artifacts = with_prior(Payload::Flat(T0.to_string()));
        let store = TimestampStore::new(
            artifacts.clone(),
            SystemClock,
            config().with_token(None),
        );

        let report = store.run(Mode::Get).await;

        assert!(report.output().is_none());
        assert!(!report.is_failed());
        assert_eq!(artifacts.download_calls().await, 0);
        assert_eq!(capture.warnings().len(), 1, "{:?}", capture.warnings());
    }

    #[tokio::test]
    async fn fail_if_missing_still_stores_in_get_and_set() {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let store = TimestampStore::new(
            artifacts.clone(),
            SystemClock,
            config().with_fail_if_missing(true),
        );

        let report = store.run(Mode::GetAndSet).await;

        assert!(report.is_failed());
        assert!(report.output().is_none());
        assert!(report.stored.is_some());
        assert_eq!(artifacts.upload_calls().await, 1);
    }

    #[tokio::test]
    async fn upload_failure_is_fatal_but_output_survives() {
        let artifacts = with_prior(Payload::Flat(T0.to_string()));
        artifacts.fail_uploads(10).await;
        let store = TimestampStore::new(artifacts.clone(), SystemClock, config());

        let report = store.run(Mode::GetAndSet).await;

        assert_eq!(report.output().map(StoredTimestamp::as_str), Some(T0));
        assert!(report.stored.is_none());
        assert!(report.is_failed());
        assert!(report.failures[0].contains("upload failed after 3 attempt(s)"));
        assert_eq!(artifacts.upload_calls().await, 3);
    }

    #[tokio::test]
    async fn transient_upload_failure_is_retried() {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.fail_uploads(1).await;
        let store = TimestampStore::new(artifacts.clone(), SystemClock, config());

        let report = store.run(Mode::Set).await;

        assert!(!report.is_failed());
        assert_eq!(artifacts.upload_calls().await, 2);
        assert_eq!(artifacts.uploaded_values().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_mode_input_behaves_like_get() {
        let artifacts = with_prior(Payload::Flat(T0.to_string()));
        let store = TimestampStore::new(artifacts.clone(), SystemClock, config());

        let report = store.run(Mode::from_input("bogus")).await;

        assert_eq!(report.output().map(StoredTimestamp::as_str), Some(T0));
        assert_eq!(artifacts.upload_calls().await, 0);
    }

    #[tokio::test]
    async fn retrieve_then_store_returns_both_results() {
        let artifacts = with_prior(Payload::Flat(T0.to_string()));
        let store = TimestampStore::new(artifacts, SystemClock, config());

        let (retrieval, stored) = store.retrieve_then_store().await;

        assert_eq!(retrieval, Retrieval::Found(ts(T0)));
        assert!(stored.unwrap() > ts(T0));
    }

    #[tokio::test]
    async fn frozen_clock_still_produces_strictly_increasing_values() {
        let frozen = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let store = TimestampStore::new(artifacts, FixedClock::new(frozen), config());

        let first = store.store(Some(&ts(T0))).await.unwrap();
        let second = store.store(Some(&first)).await.unwrap();

        assert_eq!(first.as_str(), "2025-01-01T00:00:01.000Z");
        assert_eq!(second.as_str(), "2025-01-01T00:00:02.000Z");
        assert!(ts(T0) < first && first < second);
    }

    #[tokio::test]
    async fn clock_is_re_read_until_it_passes_the_previous_value() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = SequenceClock::new([t0, t0, t0, t0 + TimeDelta::milliseconds(1)]);
        let store = TimestampStore::new(Arc::new(InMemoryArtifactStore::new()), clock, config());

        let stored = store.store(Some(&ts(T0))).await.unwrap();

        assert_eq!(stored.as_str(), "2025-01-01T00:00:00.001Z");
    }

    #[tokio::test]
    async fn previous_value_in_the_future_is_still_exceeded() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let store = TimestampStore::new(
            Arc::new(InMemoryArtifactStore::new()),
            FixedClock::new(now),
            config(),
        );
        let previous = ts("2030-06-01T12:00:00Z");

        let stored = store.store(Some(&previous)).await.unwrap();

        assert_eq!(stored.as_str(), "2030-06-01T12:00:01.000Z");
        assert!(stored > previous);
    }

    #[tokio::test]
    async fn last_representable_previous_value_is_not_overwritten() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let store = TimestampStore::new(artifacts.clone(), FixedClock::new(now), config());
        let previous = ts("9999-12-31T23:59:59.999Z");

        let err = store.store(Some(&previous)).await.unwrap_err();

        assert!(matches!(err, StoreError::NoLaterTimestamp { .. }));
        assert_eq!(artifacts.upload_calls().await, 0);
    }

    #[tokio::test]
    async fn unstorable_value_fails_the_invocation_but_keeps_the_output() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let last = "9999-12-31T23:59:59.999Z";
        let artifacts = with_prior(Payload::Flat(last.to_string()));
        let store = TimestampStore::new(artifacts.clone(), FixedClock::new(now), config());

        let report = store.run(Mode::GetAndSet).await;

        assert_eq!(report.output().map(StoredTimestamp::as_str), Some(last));
        assert!(report.is_failed());
        assert!(report.stored.is_none());
        assert_eq!(artifacts.upload_calls().await, 0);
    }

    #[tokio::test]
    async fn store_without_previous_uses_the_clock() {
        let now = Utc.with_ymd_and_hms(2025, 5, 6, 7, 8, 9).unwrap();
        let store = TimestampStore::new(
            Arc::new(InMemoryArtifactStore::new()),
            FixedClock::new(now),
            config(),
        );

        let stored = store.store(None).await.unwrap();

        assert_eq!(stored.as_str(), "2025-05-06T07:08:09.000Z");
    }
}
