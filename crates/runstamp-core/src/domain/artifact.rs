//! Artifact model: handles returned by listing, download shapes, upload options.
//!
//! These types are owned by the remote store. This crate only reads them.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque key of a stored artifact.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub u64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact-{}", self.0)
    }
}

/// One entry of the remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub id: ArtifactId,
    pub name: String,

    /// Creation instant, normalized to zero-padded ISO-8601 with `Z`.
    /// Compared as a string when picking the latest entry.
    pub created_at: String,

    /// Past the store's retention window; must not be downloaded.
    pub expired: bool,
}

impl ArtifactHandle {
    pub fn new(id: u64, name: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            id: ArtifactId(id),
            name: name.into(),
            created_at: created_at.into(),
            expired: false,
        }
    }

    pub fn expired(mut self) -> Self {
        self.expired = true;
        self
    }
}

/// Where a download landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// The artifact's files were materialized into this directory.
    Flat { dir: PathBuf },

    /// The artifact arrived as a single zip archive.
    Archive { path: PathBuf },
}

/// One page of a listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Server-side name filter. Stores that cannot filter ignore it.
    pub name: Option<String>,

    /// 1-indexed.
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub retention_days: u32,
}

/// Acknowledgement of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAck {
    pub id: ArtifactId,
    pub size: u64,
}

/// Credential handed to the download capability.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// `None` for an empty or blank token.
    pub fn non_empty(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("ghp_secret");
        assert_eq!(format!("{token:?}"), "AccessToken(***)");
        assert_eq!(token.expose(), "ghp_secret");
    }

    #[test]
    fn blank_tokens_are_treated_as_absent() {
        assert!(AccessToken::non_empty("").is_none());
        assert!(AccessToken::non_empty("  ").is_none());
        assert!(AccessToken::non_empty("t").is_some());
    }

    #[test]
    fn handle_serializes_with_plain_id() {
        let handle = ArtifactHandle::new(7, "last-run-timestamp", "2025-01-01T00:00:00Z");
        let v = serde_json::to_value(&handle).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["expired"], false);
    }
}
