//! runstamp-core
//!
//! Persist a "last run" timestamp between CI invocations using a remote
//! artifact store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（timestamp, artifact, mode, errors）
//! - **ports**: 抽象化レイヤー（ArtifactStore, Clock）
//! - **app**: アプリケーションロジック（ArtifactLocator, ContentExtractor, TimestampStore）
//! - **impls**: 実装（InMemory / Local / GitHub）
//! - **retry**: リモート呼び出しの retry と backoff

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use app::{InvocationReport, Retrieval, StoreConfig, TimestampStore};
pub use domain::{Mode, StoredTimestamp};
