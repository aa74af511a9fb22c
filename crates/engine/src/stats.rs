//! Run statistics: an explicitly owned, lock-guarded aggregate.
//!
//! Updated by the orchestrator as jobs reach terminal states; observers take
//! consistent snapshots for display. A single lock covers all counters so
//! concurrent completions can never produce lost updates.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct StatsInner {
    completed: u64,
    failed: u64,
    skipped: u64,
    input_bytes: u64,
    output_bytes: u64,
    started: Instant,
}

/// Aggregate counters for one run.
pub struct RunStats {
    inner: Mutex<StatsInner>,
}

/// Consistent copy of the aggregate at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Space saved across completed jobs, as a percentage of input bytes.
    pub fn savings_percent(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.output_bytes as f64 / self.input_bytes as f64) * 100.0
    }

    /// Total number of jobs that reached a terminal state.
    pub fn total(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                completed: 0,
                failed: 0,
                skipped: 0,
                input_bytes: 0,
                output_bytes: 0,
                started: Instant::now(),
            }),
        }
    }

    pub fn record_completed(&self, input_bytes: u64, output_bytes: u64) {
        let mut inner = self.inner.lock().expect("stats poisoned");
        inner.completed += 1;
        inner.input_bytes += input_bytes;
        inner.output_bytes += output_bytes;
    }

    pub fn record_failed(&self) {
        let mut inner = self.inner.lock().expect("stats poisoned");
        inner.failed += 1;
    }

    pub fn record_skipped(&self) {
        let mut inner = self.inner.lock().expect("stats poisoned");
        inner.skipped += 1;
    }

    /// Take a consistent snapshot for display.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().expect("stats poisoned");
        StatsSnapshot {
            completed: inner.completed,
            failed: inner.failed,
            skipped: inner.skipped,
            input_bytes: inner.input_bytes,
            output_bytes: inner.output_bytes,
            elapsed: inner.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_accumulate() {
        let stats = RunStats::new();

        stats.record_completed(1000, 400);
        stats.record_completed(2000, 600);
        stats.record_failed();
        stats.record_skipped();
        stats.record_skipped();

        let snap = stats.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.skipped, 2);
        assert_eq!(snap.input_bytes, 3000);
        assert_eq!(snap.output_bytes, 1000);
        assert_eq!(snap.total(), 5);
    }

    #[test]
    fn test_savings_percent() {
        let stats = RunStats::new();
        stats.record_completed(1000, 250);

        let snap = stats.snapshot();
        assert!((snap.savings_percent() - 75.0).abs() < 0.001);

        let empty = RunStats::new().snapshot();
        assert_eq!(empty.savings_percent(), 0.0);
    }

    #[tokio::test]
    async fn test_no_lost_updates_under_concurrency() {
        let stats = Arc::new(RunStats::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    stats.record_completed(10, 5);
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.completed, 800);
        assert_eq!(snap.input_bytes, 8000);
        assert_eq!(snap.output_bytes, 4000);
    }
}
