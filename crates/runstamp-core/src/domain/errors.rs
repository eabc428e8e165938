//! Errors - エラー型と分類
//!
//! - `RemoteError`: artifact store 呼び出しの失敗（retry 対象）
//! - `StoreError`: invocation を失敗させる終端エラー（upload 失敗、単調な値を作れない）

use thiserror::Error;

use crate::retry::RetryExhausted;

/// Failure of a single remote call (list, download, upload).
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("artifact not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Decode(e.to_string())
    }
}

impl From<zip::result::ZipError> for RemoteError {
    fn from(e: zip::result::ZipError) -> Self {
        RemoteError::Protocol(format!("zip: {e}"))
    }
}

/// Terminal failure of the storage stage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("upload failed after {attempts} attempt(s): {source}")]
    Upload {
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("cannot store {value}: not a valid timestamp newer than the previous one")]
    NoLaterTimestamp { value: String },

    #[error("failed to stage timestamp file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RetryExhausted<RemoteError>> for StoreError {
    fn from(e: RetryExhausted<RemoteError>) -> Self {
        StoreError::Upload {
            attempts: e.attempts,
            source: e.last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_error_mentions_attempts_and_cause() {
        let err = StoreError::Upload {
            attempts: 3,
            source: RemoteError::Status {
                status: 503,
                body: "busy".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("503"));
    }
}
