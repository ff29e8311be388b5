//! Apply Profiling
//!
//! Per-stream apply timings, logged periodically once enabled.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Accumulated apply statistics for one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub batches: u64,
    pub rows: u64,
    pub total_time: Duration,
}

#[derive(Debug, Default)]
pub struct StoreProfiler {
    enabled: AtomicBool,
    stats: Mutex<BTreeMap<String, StreamStats>>,
}

impl StoreProfiler {
    pub fn enable(&self) -> bool {
        !self.enabled.swap(true, Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn record(&self, stream: &str, rows: usize, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.entry(stream.to_string()).or_default();
            entry.batches += 1;
            entry.rows += rows as u64;
            entry.total_time += elapsed;
        }
    }

    /// Take the stats gathered since the last call
    pub fn drain(&self) -> BTreeMap<String, StreamStats> {
        match self.stats.lock() {
            Ok(mut stats) => std::mem::take(&mut *stats),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Log and reset the current window
    pub fn log_window(&self) {
        for (stream, stats) in self.drain() {
            tracing::info!(
                stream = %stream,
                batches = stats.batches,
                rows = stats.rows,
                "Applied {} rows to {} in {:.1}ms",
                stats.rows,
                stream,
                stats.total_time.as_secs_f64() * 1000.0,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_only_when_enabled() {
        let profiler = StoreProfiler::default();
        profiler.record("events", 3, Duration::from_millis(2));
        assert!(profiler.drain().is_empty());

        assert!(profiler.enable());
        assert!(!profiler.enable());

        profiler.record("events", 3, Duration::from_millis(2));
        profiler.record("events", 2, Duration::from_millis(1));

        let stats = profiler.drain();
        let events = stats.get("events").unwrap();
        assert_eq!(events.batches, 2);
        assert_eq!(events.rows, 5);
        assert!(profiler.drain().is_empty());
    }
}
