//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! コアは外部の artifact ストアと時計にこの trait 経由でのみアクセスします。

pub mod artifact_store;
pub mod clock;

pub use self::artifact_store::ArtifactStore;
pub use self::clock::{Clock, FixedClock, SequenceClock, SystemClock};
