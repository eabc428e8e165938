//! Clock port - 時刻の抽象化
//!
//! - **SystemClock**: 本番用
//! - **FixedClock**: テスト用（常に同じ時刻）
//! - **SequenceClock**: テスト用（呼び出しごとに決められた時刻を返す）

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Clock は現在時刻を提供
///
/// # テスト容易性
/// - trait により時刻を差し替え可能
/// - 単調性ガードのテストでは FixedClock / SequenceClock を使用
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}

/// Returns queued instants in order, then repeats the last one forever.
#[derive(Debug)]
pub struct SequenceClock {
    remaining: Mutex<VecDeque<DateTime<Utc>>>,
    last: Mutex<DateTime<Utc>>,
}

impl SequenceClock {
    pub fn new(instants: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        let remaining: VecDeque<_> = instants.into_iter().collect();
        let last = remaining.front().copied().unwrap_or_default();
        Self {
            remaining: Mutex::new(remaining),
            last: Mutex::new(last),
        }
    }
}

impl Clock for SequenceClock {
    fn now(&self) -> DateTime<Utc> {
        let mut remaining = self.remaining.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = remaining.pop_front() {
            *last = next;
        }
        *last
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_never_moves() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn sequence_clock_repeats_last_instant() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let clock = SequenceClock::new([t1, t2]);
        assert_eq!(clock.now(), t1);
        assert_eq!(clock.now(), t2);
        assert_eq!(clock.now(), t2);
    }

    #[test]
    fn system_clock_advances() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
