//! Store configuration.

use crate::domain::AccessToken;
use crate::retry::RetryPolicy;

/// Logical name of the single artifact slot.
pub const DEFAULT_ARTIFACT_NAME: &str = "last-run-timestamp";

/// The one file inside the artifact.
pub const DEFAULT_FILE_NAME: &str = "timestamp.txt";

pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Message attached to a failed invocation when `fail_if_missing` is set.
pub const MISSING_TIMESTAMP_MESSAGE: &str = "No valid previous run timestamp found";

/// Configuration of a [`TimestampStore`](super::TimestampStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub artifact_name: String,
    pub file_name: String,
    pub retention_days: u32,

    /// Mark the invocation failed when no valid previous value exists.
    pub fail_if_missing: bool,

    /// Credential for downloads. Without it retrieval finds nothing.
    pub token: Option<AccessToken>,

    pub list_retry: RetryPolicy,
    pub download_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,

    /// Listing stops after this many pages.
    pub max_pages: u32,
    pub per_page: u32,

    /// Cap on clock re-reads while waiting for a strictly newer value.
    pub max_monotonic_iterations: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            fail_if_missing: false,
            token: None,
            list_retry: RetryPolicy::default_remote(),
            download_retry: RetryPolicy::default_remote(),
            upload_retry: RetryPolicy::default_remote(),
            max_pages: 10,
            per_page: 100,
            max_monotonic_iterations: 1000,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_fail_if_missing(mut self, fail_if_missing: bool) -> Self {
        self.fail_if_missing = fail_if_missing;
        self
    }

    pub fn with_token(mut self, token: Option<AccessToken>) -> Self {
        self.token = token;
        self
    }

    /// Same policy for list, download and upload.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.list_retry = policy.clone();
        self.download_retry = policy.clone();
        self.upload_retry = policy;
        self
    }
}
