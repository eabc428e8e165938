//! App - アプリケーション層
//!
//! ports を組み合わせて timestamp の永続化プロトコルを実装します。
//!
//! # 主要コンポーネント
//! - **ArtifactLocator**: 最新の有効な artifact の特定
//! - **ContentExtractor**: download と payload の取り出し
//! - **TimestampStore**: retrieve / store / retrieve_then_store
//! - **StoreConfig**: 設定

pub mod config;
pub mod extractor;
pub mod locator;
pub mod store;

pub use self::config::StoreConfig;
pub use self::extractor::ContentExtractor;
pub use self::locator::{ArtifactLocator, select_latest};
pub use self::store::{InvocationReport, MissingReason, Retrieval, TimestampStore};
