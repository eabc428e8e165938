//! Impls - ArtifactStore の実装
//!
//! # 含まれる実装
//! - **InMemoryArtifactStore**: テスト用。失敗の注入と呼び出し回数の記録ができる
//! - **LocalArtifactStore**: ディレクトリを artifact ストアとして使う（ローカル開発用）
//! - **GitHubArtifactStore**: GitHub Actions の artifact API（本番用）
//!
//! `archive` は upload 用の単一ファイル zip を作るヘルパーです。

pub mod archive;
pub mod github;
pub mod inmem_store;
pub mod local_store;

pub use self::github::{GitHubArtifactStore, GitHubConfig};
pub use self::inmem_store::{InMemoryArtifactStore, Payload};
pub use self::local_store::LocalArtifactStore;
